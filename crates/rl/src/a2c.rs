use ml::{clip_grad_norm, Adam, Parameterized, Tensor};

use crate::env::Action;
use crate::error::{Result, RlError};
use crate::policy::Policy;
use crate::value::ValueFunction;

/// Losses measured during one update, before the parameter step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UpdateStats {
    /// `-mean(log π(a|s) · A)`.
    pub policy_loss: f32,
    /// Mean squared error plus the L2 penalty.
    pub value_loss: f32,
    /// Global L2 norm of the policy gradient before clipping.
    pub policy_grad_norm: f32,
}

/// One-step actor-critic update with independent Adam optimizers.
pub struct A2cUpdater {
    policy_opt: Adam,
    value_opt: Adam,
    l2_reg: f32,
    max_grad_norm: Option<f32>,
}

impl A2cUpdater {
    pub fn new(policy_lr: f32, value_lr: f32, l2_reg: f32, max_grad_norm: Option<f32>) -> Self {
        Self { policy_opt: Adam::new(policy_lr), value_opt: Adam::new(value_lr), l2_reg, max_grad_norm }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> usize {
        self.policy_opt.steps()
    }

    /// Takes exactly one gradient step on each of `value` and `policy`.
    ///
    /// All slices must have the same length. Both gradients are computed
    /// before either optimizer steps, so an error leaves both models and
    /// their optimizer state untouched. The value loss is
    /// `mean((V(s) - R)²) + l2_reg · Σ θ²` over every value parameter; the
    /// policy loss is `-mean(log π(a|s) · A)` with no importance ratio.
    pub fn update<P, V>(
        &mut self,
        policy: &mut P,
        value: &mut V,
        states: &[Vec<f32>],
        actions: &[Action],
        returns: &[f32],
        advantages: &[f32],
    ) -> Result<UpdateStats>
    where
        P: Policy + ?Sized,
        V: ValueFunction + ?Sized,
    {
        let n = states.len();
        if n == 0 {
            return Err(RlError::EmptyBatch);
        }
        if actions.len() != n || returns.len() != n || advantages.len() != n {
            return Err(RlError::DimensionMismatch(format!(
                "{n} states, {} actions, {} returns, {} advantages",
                actions.len(),
                returns.len(),
                advantages.len()
            )));
        }
        let inv_n = 1.0 / n as f32;

        let mut value_grads = value.zero_grads();
        let mut mse = 0.0f32;
        for (state, &target) in states.iter().zip(returns) {
            let v = value.estimate_backward(state, &|v| 2.0 * (v - target) * inv_n, &mut value_grads);
            mse += (v - target) * (v - target);
        }
        let mut l2 = 0.0f32;
        for (g, p) in value_grads.iter_mut().zip(value.params()) {
            l2 += p.sum_squares();
            g.add_scaled(p, 2.0 * self.l2_reg);
        }
        let value_loss = mse * inv_n + self.l2_reg * l2;

        let mut policy_grads = policy.zero_grads();
        let mut objective = 0.0f32;
        for ((state, action), adv) in states.iter().zip(actions).zip(advantages) {
            let log_prob = policy.log_prob_backward(state, action, -adv * inv_n, &mut policy_grads)?;
            objective += log_prob * adv;
        }
        let policy_loss = -objective * inv_n;
        let policy_grad_norm = match self.max_grad_norm {
            Some(max) => clip_grad_norm(&mut policy_grads, max),
            None => policy_grads.iter().map(Tensor::sum_squares).sum::<f32>().sqrt(),
        };
        step(&mut self.value_opt, value.params_mut(), &value_grads)?;
        step(&mut self.policy_opt, policy.params_mut(), &policy_grads)?;

        tracing::debug!(policy_loss, value_loss, policy_grad_norm, "actor-critic update");
        Ok(UpdateStats { policy_loss, value_loss, policy_grad_norm })
    }
}

fn step(opt: &mut Adam, params: Vec<&mut Tensor>, grads: &[Tensor]) -> Result<()> {
    let mut pairs: Vec<(&mut Tensor, &Tensor)> = params.into_iter().zip(grads).collect();
    opt.step(&mut pairs)?;
    Ok(())
}
