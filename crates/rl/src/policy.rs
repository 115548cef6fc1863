//! Stochastic policies over flat observation vectors.
//!
//! [`Policy`] is the capability set the rollout collector and the updater
//! depend on. [`GaussianPolicy`] covers continuous action spaces with a
//! diagonal Gaussian whose log standard deviation is a free parameter;
//! [`CategoricalPolicy`] covers discrete ones with a softmax over logits.
//! [`PolicyModel`] wraps both for construction and persistence.

use ml::{LayerSpec, Parameterized, Sequential, Tensor};
use rand::{distributions::Distribution, distributions::WeightedIndex, Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::env::{Action, ActionSpace};
use crate::error::{Result, RlError};

const LN_2PI: f32 = 1.837_877_1;

pub const GAUSSIAN_HIDDEN: [usize; 2] = [64, 64];
pub const CATEGORICAL_HIDDEN: [usize; 2] = [128, 128];
pub const HEAD_SCALE: f32 = 0.1;

/// A stochastic policy `π(a | s)`.
///
/// Implementations are pure functions of their parameters; all randomness
/// comes from the `rng` handed to [`Policy::act`].
pub trait Policy: Parameterized + Send + Sync {
    fn obs_dim(&self) -> usize;

    fn action_space(&self) -> ActionSpace;

    /// Samples an action, or returns the mode when `stochastic` is false.
    fn act(&self, obs: &[f32], stochastic: bool, rng: &mut dyn RngCore) -> Action;

    /// Log-density (or log-probability) of `action` at `obs`.
    fn log_prob(&self, obs: &[f32], action: &Action) -> Result<f32>;

    /// Adds `upstream * ∂ log π(action | obs) / ∂θ` to `grads` and returns
    /// the log-probability. `grads` follows [`Parameterized::params`] order.
    fn log_prob_backward(
        &self,
        obs: &[f32],
        action: &Action,
        upstream: f32,
        grads: &mut [Tensor],
    ) -> Result<f32>;
}

/// Standard-normal draw via the Box-Muller transform.
pub fn standard_normal(rng: &mut dyn RngCore) -> f32 {
    let u1: f32 = 1.0 - rng.gen::<f32>();
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

fn check_obs(obs: &[f32], dim: usize) -> Result<()> {
    if obs.len() == dim {
        Ok(())
    } else {
        Err(RlError::DimensionMismatch(format!("observation has {} entries, policy expects {dim}", obs.len())))
    }
}

fn accumulate(grads: &mut [Tensor], delta: &[Tensor]) {
    for (g, d) in grads.iter_mut().zip(delta) {
        g.add_scaled(d, 1.0);
    }
}

/// Diagonal Gaussian policy: an MLP produces the mean, `log_std` is shared
/// across states.
pub struct GaussianPolicy {
    net: Sequential,
    log_std: Tensor,
    obs_dim: usize,
    act_dim: usize,
}

impl GaussianPolicy {
    pub fn new(obs_dim: usize, act_dim: usize, log_std: f32, rng: &mut impl Rng) -> Self {
        let net = Sequential::mlp(obs_dim, &GAUSSIAN_HIDDEN, act_dim, HEAD_SCALE, rng);
        Self { net, log_std: Tensor::from_vec(vec![act_dim], vec![log_std; act_dim]), obs_dim, act_dim }
    }

    pub fn from_parts(net: Sequential, log_std: Vec<f32>) -> Result<Self> {
        let (Some(obs_dim), Some(act_dim)) = (net.in_dim(), net.out_dim()) else {
            return Err(RlError::Checkpoint("gaussian policy network has no dense layer".into()));
        };
        if log_std.len() != act_dim {
            return Err(RlError::Checkpoint(format!(
                "log_std has {} entries for a {act_dim}-dimensional action",
                log_std.len()
            )));
        }
        Ok(Self { net, log_std: Tensor::from_vec(vec![act_dim], log_std), obs_dim, act_dim })
    }

    pub fn log_std(&self) -> &[f32] {
        &self.log_std.data
    }

    pub fn mean(&self, obs: &[f32]) -> Vec<f32> {
        self.net.predict(&Tensor::vector(obs)).data
    }

    fn continuous<'a>(&self, action: &'a Action) -> Result<&'a [f32]> {
        match action {
            Action::Continuous(a) if a.len() == self.act_dim => Ok(a),
            other => Err(RlError::InvalidAction(format!(
                "{other:?} for a {}-dimensional gaussian policy",
                self.act_dim
            ))),
        }
    }

    fn density(&self, mean: &[f32], action: &[f32]) -> f32 {
        mean.iter()
            .zip(action)
            .zip(&self.log_std.data)
            .map(|((mu, a), log_std)| {
                let var = (2.0 * log_std).exp();
                -(a - mu).powi(2) / (2.0 * var) - log_std - 0.5 * LN_2PI
            })
            .sum()
    }
}

impl Parameterized for GaussianPolicy {
    fn params(&self) -> Vec<&Tensor> {
        let mut p = self.net.params();
        p.push(&self.log_std);
        p
    }

    fn params_mut(&mut self) -> Vec<&mut Tensor> {
        let mut p = self.net.params_mut();
        p.push(&mut self.log_std);
        p
    }
}

impl Policy for GaussianPolicy {
    fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Continuous(self.act_dim)
    }

    fn act(&self, obs: &[f32], stochastic: bool, rng: &mut dyn RngCore) -> Action {
        let mut mean = self.mean(obs);
        if stochastic {
            for (m, log_std) in mean.iter_mut().zip(&self.log_std.data) {
                *m += log_std.exp() * standard_normal(rng);
            }
        }
        Action::Continuous(mean)
    }

    fn log_prob(&self, obs: &[f32], action: &Action) -> Result<f32> {
        check_obs(obs, self.obs_dim)?;
        let a = self.continuous(action)?;
        Ok(self.density(&self.mean(obs), a))
    }

    fn log_prob_backward(
        &self,
        obs: &[f32],
        action: &Action,
        upstream: f32,
        grads: &mut [Tensor],
    ) -> Result<f32> {
        check_obs(obs, self.obs_dim)?;
        let a = self.continuous(action)?;
        let (mean, activations) = self.net.forward(&Tensor::vector(obs));

        let mut d_mean = vec![0.0; self.act_dim];
        let mut d_log_std = vec![0.0; self.act_dim];
        for i in 0..self.act_dim {
            let var = (2.0 * self.log_std.data[i]).exp();
            let diff = a[i] - mean.data[i];
            d_mean[i] = upstream * diff / var;
            d_log_std[i] = upstream * (diff * diff / var - 1.0);
        }

        let (_, net_grads) = self.net.backward(&activations, &Tensor::vector(&d_mean));
        let n = net_grads.len();
        accumulate(&mut grads[..n], &net_grads);
        grads[n].add_scaled(&Tensor::vector(&d_log_std), 1.0);
        Ok(self.density(&mean.data, a))
    }
}

/// Softmax policy over a fixed set of discrete actions.
pub struct CategoricalPolicy {
    net: Sequential,
    obs_dim: usize,
    num_actions: usize,
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.iter().map(|e| e / sum).collect()
}

fn log_softmax_at(logits: &[f32], index: usize) -> f32 {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let lse = max + logits.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
    logits[index] - lse
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

impl CategoricalPolicy {
    pub fn new(obs_dim: usize, num_actions: usize, rng: &mut impl Rng) -> Self {
        let net = Sequential::mlp(obs_dim, &CATEGORICAL_HIDDEN, num_actions, HEAD_SCALE, rng);
        Self { net, obs_dim, num_actions }
    }

    pub fn from_net(net: Sequential) -> Result<Self> {
        let (Some(obs_dim), Some(num_actions)) = (net.in_dim(), net.out_dim()) else {
            return Err(RlError::Checkpoint("categorical policy network has no dense layer".into()));
        };
        Ok(Self { net, obs_dim, num_actions })
    }

    pub fn probabilities(&self, obs: &[f32]) -> Vec<f32> {
        softmax(&self.net.predict(&Tensor::vector(obs)).data)
    }

    fn index(&self, action: &Action) -> Result<usize> {
        match action {
            Action::Discrete(a) if *a < self.num_actions => Ok(*a),
            other => Err(RlError::InvalidAction(format!(
                "{other:?} for a policy over {} actions",
                self.num_actions
            ))),
        }
    }
}

impl Parameterized for CategoricalPolicy {
    fn params(&self) -> Vec<&Tensor> {
        self.net.params()
    }

    fn params_mut(&mut self) -> Vec<&mut Tensor> {
        self.net.params_mut()
    }
}

impl Policy for CategoricalPolicy {
    fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discrete(self.num_actions)
    }

    fn act(&self, obs: &[f32], stochastic: bool, rng: &mut dyn RngCore) -> Action {
        let probs = self.probabilities(obs);
        if !stochastic {
            return Action::Discrete(argmax(&probs));
        }
        match WeightedIndex::new(&probs) {
            Ok(dist) => Action::Discrete(dist.sample(rng)),
            // only reachable with non-finite logits
            Err(_) => Action::Discrete(argmax(&probs)),
        }
    }

    fn log_prob(&self, obs: &[f32], action: &Action) -> Result<f32> {
        check_obs(obs, self.obs_dim)?;
        let a = self.index(action)?;
        Ok(log_softmax_at(&self.net.predict(&Tensor::vector(obs)).data, a))
    }

    fn log_prob_backward(
        &self,
        obs: &[f32],
        action: &Action,
        upstream: f32,
        grads: &mut [Tensor],
    ) -> Result<f32> {
        check_obs(obs, self.obs_dim)?;
        let a = self.index(action)?;
        let (logits, activations) = self.net.forward(&Tensor::vector(obs));
        let probs = softmax(&logits.data);
        let d_logits: Vec<f32> = probs
            .iter()
            .enumerate()
            .map(|(j, p)| upstream * (if j == a { 1.0 } else { 0.0 } - p))
            .collect();
        let (_, net_grads) = self.net.backward(&activations, &Tensor::vector(&d_logits));
        accumulate(grads, &net_grads);
        Ok(log_softmax_at(&logits.data, a))
    }
}

/// Serialized policy: architecture plus parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicyState {
    Gaussian { layers: Vec<LayerSpec>, log_std: Vec<f32> },
    Categorical { layers: Vec<LayerSpec> },
}

/// Either policy variant, chosen from the environment's action space.
pub enum PolicyModel {
    Gaussian(GaussianPolicy),
    Categorical(CategoricalPolicy),
}

impl PolicyModel {
    /// Fresh policy matching `space`.
    pub fn for_space(obs_dim: usize, space: ActionSpace, log_std: f32, rng: &mut impl Rng) -> Result<Self> {
        if obs_dim == 0 || space.size() == 0 {
            return Err(RlError::DimensionMismatch(format!(
                "cannot build a policy for {obs_dim} observations and {space:?}"
            )));
        }
        Ok(match space {
            ActionSpace::Continuous(n) => PolicyModel::Gaussian(GaussianPolicy::new(obs_dim, n, log_std, rng)),
            ActionSpace::Discrete(n) => PolicyModel::Categorical(CategoricalPolicy::new(obs_dim, n, rng)),
        })
    }

    pub fn state(&self) -> PolicyState {
        match self {
            PolicyModel::Gaussian(p) => PolicyState::Gaussian { layers: p.net.specs(), log_std: p.log_std.data.clone() },
            PolicyModel::Categorical(p) => PolicyState::Categorical { layers: p.net.specs() },
        }
    }

    pub fn from_state(state: PolicyState) -> Result<Self> {
        Ok(match state {
            PolicyState::Gaussian { layers, log_std } => {
                PolicyModel::Gaussian(GaussianPolicy::from_parts(Sequential::from_specs(&layers)?, log_std)?)
            }
            PolicyState::Categorical { layers } => {
                PolicyModel::Categorical(CategoricalPolicy::from_net(Sequential::from_specs(&layers)?)?)
            }
        })
    }

    fn inner(&self) -> &dyn Policy {
        match self {
            PolicyModel::Gaussian(p) => p,
            PolicyModel::Categorical(p) => p,
        }
    }
}

impl Parameterized for PolicyModel {
    fn params(&self) -> Vec<&Tensor> {
        self.inner().params()
    }

    fn params_mut(&mut self) -> Vec<&mut Tensor> {
        match self {
            PolicyModel::Gaussian(p) => p.params_mut(),
            PolicyModel::Categorical(p) => p.params_mut(),
        }
    }
}

impl Policy for PolicyModel {
    fn obs_dim(&self) -> usize {
        self.inner().obs_dim()
    }

    fn action_space(&self) -> ActionSpace {
        self.inner().action_space()
    }

    fn act(&self, obs: &[f32], stochastic: bool, rng: &mut dyn RngCore) -> Action {
        self.inner().act(obs, stochastic, rng)
    }

    fn log_prob(&self, obs: &[f32], action: &Action) -> Result<f32> {
        self.inner().log_prob(obs, action)
    }

    fn log_prob_backward(
        &self,
        obs: &[f32],
        action: &Action,
        upstream: f32,
        grads: &mut [Tensor],
    ) -> Result<f32> {
        self.inner().log_prob_backward(obs, action, upstream, grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn numeric_grad<P: Policy>(policy: &mut P, obs: &[f32], action: &Action, p_idx: usize, i: usize) -> f32 {
        let eps = 1e-2;
        policy.params_mut()[p_idx].data[i] += eps;
        let plus = policy.log_prob(obs, action).unwrap();
        policy.params_mut()[p_idx].data[i] -= 2.0 * eps;
        let minus = policy.log_prob(obs, action).unwrap();
        policy.params_mut()[p_idx].data[i] += eps;
        (plus - minus) / (2.0 * eps)
    }

    fn check_gradients<P: Policy>(policy: &mut P, obs: &[f32], action: &Action) {
        let mut grads = policy.zero_grads();
        policy.log_prob_backward(obs, action, 1.0, &mut grads).unwrap();
        for p_idx in 0..grads.len() {
            // a handful of entries per tensor keeps the check fast
            for i in (0..grads[p_idx].len()).step_by(7) {
                let numeric = numeric_grad(policy, obs, action, p_idx, i);
                let analytic = grads[p_idx].data[i];
                assert!(
                    (numeric - analytic).abs() < 2e-2 * (1.0 + analytic.abs()),
                    "param {p_idx}[{i}]: numeric {numeric}, analytic {analytic}"
                );
            }
        }
    }

    #[test]
    fn gaussian_log_prob_matches_closed_form() {
        let mut rng = StdRng::seed_from_u64(0);
        let policy = GaussianPolicy::new(3, 2, -0.5, &mut rng);
        let obs = [0.1, -0.4, 0.8];
        let mean = policy.mean(&obs);
        let action = Action::Continuous(vec![mean[0] + 0.3, mean[1] - 1.0]);
        let sigma = (-0.5f32).exp();
        let expected: f32 = [0.3f32, -1.0]
            .iter()
            .map(|d| -d * d / (2.0 * sigma * sigma) - (-0.5) - 0.5 * LN_2PI)
            .sum();
        assert!((policy.log_prob(&obs, &action).unwrap() - expected).abs() < 1e-4);
    }

    #[test]
    fn gaussian_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut policy = GaussianPolicy::new(3, 2, 0.0, &mut rng);
        let obs = [0.5, -0.2, 0.9];
        check_gradients(&mut policy, &obs, &Action::Continuous(vec![0.4, -0.7]));
    }

    #[test]
    fn categorical_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut policy = CategoricalPolicy::new(4, 3, &mut rng);
        let obs = [0.5, -0.2, 0.9, 0.0];
        check_gradients(&mut policy, &obs, &Action::Discrete(1));
    }

    #[test]
    fn deterministic_act_returns_mode() {
        let mut rng = StdRng::seed_from_u64(3);
        let gauss = GaussianPolicy::new(2, 1, 0.0, &mut rng);
        let obs = [0.3, 0.3];
        assert_eq!(gauss.act(&obs, false, &mut rng), Action::Continuous(gauss.mean(&obs)));

        let cat = CategoricalPolicy::new(2, 4, &mut rng);
        let probs = cat.probabilities(&obs);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(cat.act(&obs, false, &mut rng), Action::Discrete(argmax(&probs)));
    }

    #[test]
    fn sampling_depends_only_on_the_supplied_stream() {
        let mut init = StdRng::seed_from_u64(4);
        let policy = GaussianPolicy::new(2, 3, 0.0, &mut init);
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        for _ in 0..5 {
            assert_eq!(policy.act(&[0.1, 0.2], true, &mut a), policy.act(&[0.1, 0.2], true, &mut b));
        }
    }

    #[test]
    fn categorical_sampling_frequencies_follow_probabilities() {
        let mut rng = StdRng::seed_from_u64(5);
        let policy = CategoricalPolicy::new(1, 2, &mut rng);
        let probs = policy.probabilities(&[1.0]);
        let n = 20_000;
        let ones = (0..n)
            .filter(|_| policy.act(&[1.0], true, &mut rng) == Action::Discrete(1))
            .count();
        assert!((ones as f32 / n as f32 - probs[1]).abs() < 0.02);
    }

    #[test]
    fn invalid_actions_are_rejected() {
        let mut rng = StdRng::seed_from_u64(6);
        let cat = CategoricalPolicy::new(2, 2, &mut rng);
        assert!(matches!(cat.log_prob(&[0.0, 0.0], &Action::Discrete(5)), Err(RlError::InvalidAction(_))));
        let gauss = GaussianPolicy::new(2, 2, 0.0, &mut rng);
        assert!(gauss.log_prob(&[0.0, 0.0], &Action::Continuous(vec![0.0])).is_err());
        assert!(matches!(gauss.log_prob(&[0.0], &Action::Continuous(vec![0.0, 0.0])), Err(RlError::DimensionMismatch(_))));
    }

    #[test]
    fn state_roundtrip_preserves_behaviour() {
        let mut rng = StdRng::seed_from_u64(7);
        for space in [ActionSpace::Continuous(2), ActionSpace::Discrete(3)] {
            let model = PolicyModel::for_space(4, space, -0.3, &mut rng).unwrap();
            let json = serde_json::to_string(&model.state()).unwrap();
            let restored = PolicyModel::from_state(serde_json::from_str(&json).unwrap()).unwrap();
            assert_eq!(restored.action_space(), space);
            assert_eq!(restored.obs_dim(), 4);
            let obs = [0.1, 0.2, 0.3, 0.4];
            let action = model.act(&obs, true, &mut rng);
            assert_eq!(model.log_prob(&obs, &action).unwrap(), restored.log_prob(&obs, &action).unwrap());
        }
    }
}
