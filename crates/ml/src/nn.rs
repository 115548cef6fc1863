use rand::{distributions::Uniform, Rng};
use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;
use crate::{MlError, Result};

/// A fully connected layer computing `y = W x + b`.
#[derive(Clone, Debug)]
pub struct Dense {
    /// Weight matrix, shape `[out_dim, in_dim]`.
    pub w: Tensor,
    /// Bias vector, shape `[out_dim]`.
    pub b: Tensor,
    in_dim: usize,
    out_dim: usize,
}

impl Dense {
    /// Panics when the buffers do not match the requested dimensions.
    pub fn new(weights: Vec<f32>, bias: Vec<f32>, in_dim: usize, out_dim: usize) -> Self {
        assert_eq!(weights.len(), in_dim * out_dim);
        assert_eq!(bias.len(), out_dim);
        Self {
            w: Tensor::from_vec(vec![out_dim, in_dim], weights),
            b: Tensor::from_vec(vec![out_dim], bias),
            in_dim,
            out_dim,
        }
    }

    /// Glorot-uniform weights, zero bias.
    pub fn xavier(in_dim: usize, out_dim: usize, rng: &mut impl Rng) -> Self {
        let limit = (6.0f32 / (in_dim as f32 + out_dim as f32)).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        let weights: Vec<f32> = (0..in_dim * out_dim).map(|_| rng.sample(dist)).collect();
        Self::new(weights, vec![0.0; out_dim], in_dim, out_dim)
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Returns `(grad_input, grad_w, grad_b)` for upstream gradient `grad`.
    pub fn backward_full(&self, x: &Tensor, grad: &Tensor) -> (Tensor, Tensor, Tensor) {
        let mut grad_input = vec![0.0; self.in_dim];
        let mut grad_w = vec![0.0; self.in_dim * self.out_dim];
        for o in 0..self.out_dim {
            let go = grad.data[o];
            if go == 0.0 {
                continue;
            }
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                grad_w[row + i] = go * x.data[i];
                grad_input[i] += self.w.data[row + i] * go;
            }
        }
        (
            Tensor::from_vec(vec![self.in_dim], grad_input),
            Tensor::from_vec(vec![self.out_dim, self.in_dim], grad_w),
            Tensor::from_vec(vec![self.out_dim], grad.data.clone()),
        )
    }
}

/// A differentiable layer with an explicit backward pass.
///
/// `backward` receives the layer *input* `x` and the gradient of the loss
/// with respect to the layer output, and returns the gradient with respect
/// to `x` together with one gradient per parameter, in [`Layer::params`]
/// order.
pub trait Layer: Send + Sync {
    fn forward(&self, x: &Tensor) -> Tensor;
    fn backward(&self, x: &Tensor, grad: &Tensor) -> (Tensor, Vec<Tensor>);
    fn params(&self) -> Vec<&Tensor> {
        Vec::new()
    }
    fn params_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }
    /// Architecture and parameter snapshot used for serialization.
    fn spec(&self) -> LayerSpec;
}

impl Layer for Dense {
    fn forward(&self, x: &Tensor) -> Tensor {
        let mut y = self.b.data.clone();
        for (o, out) in y.iter_mut().enumerate() {
            let row = &self.w.data[o * self.in_dim..(o + 1) * self.in_dim];
            *out += row.iter().zip(&x.data).map(|(w, v)| w * v).sum::<f32>();
        }
        Tensor::from_vec(vec![self.out_dim], y)
    }

    fn backward(&self, x: &Tensor, grad: &Tensor) -> (Tensor, Vec<Tensor>) {
        let (dx, dw, db) = self.backward_full(x, grad);
        (dx, vec![dw, db])
    }

    fn params(&self) -> Vec<&Tensor> {
        vec![&self.w, &self.b]
    }

    fn params_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.w, &mut self.b]
    }

    fn spec(&self) -> LayerSpec {
        LayerSpec::Dense {
            in_dim: self.in_dim,
            out_dim: self.out_dim,
            weights: self.w.data.clone(),
            bias: self.b.data.clone(),
        }
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct TanhAct;

impl Layer for TanhAct {
    fn forward(&self, x: &Tensor) -> Tensor {
        let data: Vec<f32> = x.data.iter().map(|&v| v.tanh()).collect();
        Tensor::from_vec(x.shape.clone(), data)
    }

    fn backward(&self, x: &Tensor, grad: &Tensor) -> (Tensor, Vec<Tensor>) {
        let data: Vec<f32> = x
            .data
            .iter()
            .zip(&grad.data)
            .map(|(&v, &g)| {
                let t = v.tanh();
                g * (1.0 - t * t)
            })
            .collect();
        (Tensor::from_vec(x.shape.clone(), data), Vec::new())
    }

    fn spec(&self) -> LayerSpec {
        LayerSpec::Tanh
    }
}

/// Serialized form of a single layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerSpec {
    Dense {
        in_dim: usize,
        out_dim: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
    },
    Tanh,
}

impl LayerSpec {
    pub fn build(&self) -> Result<Box<dyn Layer>> {
        Ok(match self {
            LayerSpec::Dense { in_dim, out_dim, weights, bias } => {
                let w = Tensor::try_from_vec(vec![*out_dim, *in_dim], weights.clone())?;
                let b = Tensor::try_from_vec(vec![*out_dim], bias.clone())?;
                Box::new(Dense { w, b, in_dim: *in_dim, out_dim: *out_dim })
            }
            LayerSpec::Tanh => Box::new(TanhAct),
        })
    }
}

/// A model whose trainable state is a flat, ordered list of tensors.
///
/// Gradient buffers handed to optimizers follow the same order.
pub trait Parameterized {
    fn params(&self) -> Vec<&Tensor>;
    fn params_mut(&mut self) -> Vec<&mut Tensor>;

    /// Zero-filled gradient buffers matching [`Parameterized::params`].
    fn zero_grads(&self) -> Vec<Tensor> {
        self.params().into_iter().map(Tensor::zeros_like).collect()
    }
}

/// A stack of layers applied in order.
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequential {
    #[must_use]
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push<L: Layer + 'static>(&mut self, layer: L) {
        self.layers.push(Box::new(layer));
    }

    /// Multi-layer perceptron `in_dim -> hidden... -> out_dim` with tanh
    /// between dense layers.
    ///
    /// The output layer's weights are scaled by `out_scale` and its bias
    /// zeroed.
    pub fn mlp(
        in_dim: usize,
        hidden: &[usize],
        out_dim: usize,
        out_scale: f32,
        rng: &mut impl Rng,
    ) -> Self {
        let mut net = Self::new();
        let mut last = in_dim;
        for &h in hidden {
            net.push(Dense::xavier(last, h, rng));
            net.push(TanhAct);
            last = h;
        }
        let mut head = Dense::xavier(last, out_dim, rng);
        head.w.scale(out_scale);
        head.b.scale(0.0);
        net.push(head);
        net
    }

    pub fn from_specs(specs: &[LayerSpec]) -> Result<Self> {
        let layers = specs.iter().map(LayerSpec::build).collect::<Result<Vec<_>>>()?;
        let net = Self { layers };
        net.check_chain()?;
        Ok(net)
    }

    pub fn specs(&self) -> Vec<LayerSpec> {
        self.layers.iter().map(|l| l.spec()).collect()
    }

    /// Input width of the first dense layer, if any.
    pub fn in_dim(&self) -> Option<usize> {
        self.specs().iter().find_map(|s| match s {
            LayerSpec::Dense { in_dim, .. } => Some(*in_dim),
            _ => None,
        })
    }

    /// Output width of the last dense layer, if any.
    pub fn out_dim(&self) -> Option<usize> {
        self.specs().iter().rev().find_map(|s| match s {
            LayerSpec::Dense { out_dim, .. } => Some(*out_dim),
            _ => None,
        })
    }

    fn check_chain(&self) -> Result<()> {
        let mut width: Option<usize> = None;
        for spec in self.specs() {
            if let LayerSpec::Dense { in_dim, out_dim, .. } = spec {
                if let Some(w) = width {
                    if w != in_dim {
                        return Err(MlError::ShapeMismatch(format!(
                            "layer expects {in_dim} inputs but previous layer yields {w}"
                        )));
                    }
                }
                width = Some(out_dim);
            }
        }
        Ok(())
    }

    /// Forward pass returning the output alone.
    pub fn predict(&self, x: &Tensor) -> Tensor {
        self.layers.iter().fold(x.clone(), |out, layer| layer.forward(&out))
    }

    /// Forward pass keeping every intermediate activation, input first.
    pub fn forward(&self, x: &Tensor) -> (Tensor, Vec<Tensor>) {
        let mut out = x.clone();
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(out.clone());
        for layer in &self.layers {
            out = layer.forward(&out);
            activations.push(out.clone());
        }
        (out, activations)
    }

    /// Backpropagates `grad` through the stack.
    ///
    /// Returns the input gradient and the parameter gradients in the same
    /// order as [`Parameterized::params`].
    pub fn backward(&self, activations: &[Tensor], grad: &Tensor) -> (Tensor, Vec<Tensor>) {
        let mut grad_out = grad.clone();
        let mut per_layer = Vec::with_capacity(self.layers.len());
        for (layer, input) in self.layers.iter().zip(activations).rev() {
            let (g_in, p) = layer.backward(input, &grad_out);
            grad_out = g_in;
            per_layer.push(p);
        }
        let param_grads = per_layer.into_iter().rev().flatten().collect();
        (grad_out, param_grads)
    }
}

impl Parameterized for Sequential {
    fn params(&self) -> Vec<&Tensor> {
        self.layers.iter().flat_map(|l| l.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Tensor> {
        let mut out = Vec::new();
        for layer in &mut self.layers {
            out.extend(layer.params_mut());
        }
        out
    }
}
