use crate::tensor::Tensor;
use crate::{MlError, Result};

/// Adam with bias-corrected first and second moments.
///
/// Moment buffers are created on the first [`Adam::step`] and persist for
/// the lifetime of the optimizer, so one instance must always be stepped
/// with the same parameter list in the same order.
#[derive(Clone, Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: usize,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    #[must_use]
    pub fn new(lr: f32) -> Self {
        Self { lr, beta1: 0.9, beta2: 0.999, eps: 1e-8, t: 0, m: Vec::new(), v: Vec::new() }
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    /// Number of steps taken so far.
    pub fn steps(&self) -> usize {
        self.t
    }

    /// Applies one update to every `(param, grad)` pair.
    pub fn step(&mut self, params: &mut [(&mut Tensor, &Tensor)]) -> Result<()> {
        if self.m.is_empty() {
            self.m = params.iter().map(|(p, _)| vec![0.0; p.len()]).collect();
            self.v = params.iter().map(|(p, _)| vec![0.0; p.len()]).collect();
        }
        if self.m.len() != params.len() {
            return Err(MlError::ParamCount { expected: self.m.len(), actual: params.len() });
        }
        for ((p, g), m) in params.iter().zip(&self.m) {
            if p.len() != g.len() || p.len() != m.len() {
                return Err(MlError::ShapeMismatch(format!(
                    "param of {} elements, grad of {}, state of {}",
                    p.len(),
                    g.len(),
                    m.len()
                )));
            }
        }

        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);
        for ((p, g), (m_vec, v_vec)) in params.iter_mut().zip(self.m.iter_mut().zip(self.v.iter_mut())) {
            for i in 0..p.len() {
                let gi = g.data[i];
                m_vec[i] = self.beta1 * m_vec[i] + (1.0 - self.beta1) * gi;
                v_vec[i] = self.beta2 * v_vec[i] + (1.0 - self.beta2) * gi * gi;
                let m_hat = m_vec[i] / bias1;
                let v_hat = v_vec[i] / bias2;
                p.data[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
        Ok(())
    }
}

/// Rescales `grads` in place so their joint L2 norm is at most `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm(grads: &mut [Tensor], max_norm: f32) -> f32 {
    let total = grads.iter().map(Tensor::sum_squares).sum::<f32>().sqrt();
    let coef = max_norm / (total + 1e-6);
    if coef < 1.0 {
        for g in grads.iter_mut() {
            g.scale(coef);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adam_first_step_moves_by_lr() {
        let mut param = Tensor::vector(&[1.0]);
        let grad = Tensor::vector(&[0.1]);
        let mut opt = Adam::new(0.1);
        opt.step(&mut [(&mut param, &grad)]).unwrap();
        // bias-corrected m_hat / sqrt(v_hat) == sign(grad) on the first step
        let expected = 1.0 - 0.1 * 0.1 / (0.01f32.sqrt() + 1e-8);
        assert!((param.data[0] - expected).abs() < 1e-6);
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn adam_state_persists_across_steps() {
        let mut param = Tensor::vector(&[0.0]);
        let grad = Tensor::vector(&[1.0]);
        let mut opt = Adam::new(0.01);
        opt.step(&mut [(&mut param, &grad)]).unwrap();
        let after_one = param.data[0];
        opt.step(&mut [(&mut param, &grad)]).unwrap();
        assert!(param.data[0] < after_one);
        assert_eq!(opt.steps(), 2);
    }

    #[test]
    fn adam_rejects_changed_param_list() {
        let mut a = Tensor::vector(&[0.0]);
        let mut b = Tensor::vector(&[0.0]);
        let g = Tensor::vector(&[1.0]);
        let mut opt = Adam::new(0.01);
        opt.step(&mut [(&mut a, &g)]).unwrap();
        let err = opt.step(&mut [(&mut a, &g), (&mut b, &g)]).unwrap_err();
        assert_eq!(err, MlError::ParamCount { expected: 1, actual: 2 });
    }

    #[test]
    fn clip_grad_norm_scales_large_gradients() {
        let mut grads = vec![Tensor::vector(&[3.0]), Tensor::vector(&[4.0])];
        let norm = clip_grad_norm(&mut grads, 1.0);
        assert!((norm - 5.0).abs() < 1e-6);
        let clipped = grads.iter().map(Tensor::sum_squares).sum::<f32>().sqrt();
        assert!((clipped - 1.0).abs() < 1e-4);

        let mut small = vec![Tensor::vector(&[0.3])];
        clip_grad_norm(&mut small, 1.0);
        assert_eq!(small[0].data, vec![0.3]);
    }
}
