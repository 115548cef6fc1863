use ml::{LayerSpec, Parameterized, Sequential, Tensor};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RlError};

pub const VALUE_HIDDEN: [usize; 2] = [128, 128];

/// State-value estimator `V(s)`.
pub trait ValueFunction: Parameterized + Send + Sync {
    fn obs_dim(&self) -> usize;

    fn estimate(&self, obs: &[f32]) -> f32;

    /// Adds `upstream(V(obs)) * ∂V(obs) / ∂θ` to `grads` with a single
    /// forward pass, returning `V(obs)`.
    fn estimate_backward(&self, obs: &[f32], upstream: &dyn Fn(f32) -> f32, grads: &mut [Tensor]) -> f32;
}

/// MLP critic with a single linear output.
pub struct ValueNetwork {
    net: Sequential,
    obs_dim: usize,
}

/// Serialized critic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueState {
    pub layers: Vec<LayerSpec>,
}

impl ValueNetwork {
    pub fn new(obs_dim: usize, rng: &mut impl Rng) -> Self {
        Self { net: Sequential::mlp(obs_dim, &VALUE_HIDDEN, 1, 0.1, rng), obs_dim }
    }

    pub fn from_net(net: Sequential) -> Result<Self> {
        match (net.in_dim(), net.out_dim()) {
            (Some(obs_dim), Some(1)) => Ok(Self { net, obs_dim }),
            (i, o) => Err(RlError::Checkpoint(format!("value network maps {i:?} -> {o:?}, expected a scalar output"))),
        }
    }

    pub fn state(&self) -> ValueState {
        ValueState { layers: self.net.specs() }
    }

    pub fn from_state(state: ValueState) -> Result<Self> {
        Self::from_net(Sequential::from_specs(&state.layers)?)
    }
}

impl Parameterized for ValueNetwork {
    fn params(&self) -> Vec<&Tensor> {
        self.net.params()
    }

    fn params_mut(&mut self) -> Vec<&mut Tensor> {
        self.net.params_mut()
    }
}

impl ValueFunction for ValueNetwork {
    fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn estimate(&self, obs: &[f32]) -> f32 {
        self.net.predict(&Tensor::vector(obs)).data[0]
    }

    fn estimate_backward(&self, obs: &[f32], upstream: &dyn Fn(f32) -> f32, grads: &mut [Tensor]) -> f32 {
        let (out, activations) = self.net.forward(&Tensor::vector(obs));
        let v = out.data[0];
        let (_, net_grads) = self.net.backward(&activations, &Tensor::vector(&[upstream(v)]));
        for (g, d) in grads.iter_mut().zip(&net_grads) {
            g.add_scaled(d, 1.0);
        }
        v
    }
}
