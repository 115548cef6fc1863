use serde::{Deserialize, Serialize};

use crate::error::{Result, RlError};

/// Hyperparameters for one training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub env_name: String,
    pub seed: u64,
    /// Discount factor.
    pub gamma: f32,
    /// GAE smoothing factor.
    pub tau: f32,
    pub l2_reg: f32,
    pub num_threads: usize,
    pub min_batch_size: usize,
    pub max_iter_num: usize,
    pub log_interval: usize,
    /// Iterations between checkpoints; `0` disables saving.
    pub save_model_interval: usize,
    /// Initial log standard deviation of the Gaussian policy.
    pub log_std: f32,
    pub policy_lr: f32,
    pub value_lr: f32,
    pub max_grad_norm: Option<f32>,
    pub standardize_advantages: bool,
    pub max_episode_steps: usize,
    pub obs_clip: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            env_name: "CartPole-v1".into(),
            seed: 1,
            gamma: 0.99,
            tau: 0.95,
            l2_reg: 1e-3,
            num_threads: 4,
            min_batch_size: 2048,
            max_iter_num: 500,
            log_interval: 1,
            save_model_interval: 0,
            log_std: 0.0,
            policy_lr: 0.01,
            value_lr: 0.01,
            max_grad_norm: Some(40.0),
            standardize_advantages: true,
            max_episode_steps: 10_000,
            obs_clip: 5.0,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        let checks: [(bool, &str); 11] = [
            (self.num_threads > 0, "num_threads must be positive"),
            (self.min_batch_size > 0, "min_batch_size must be positive"),
            (unit.contains(&self.gamma), "gamma must lie in [0, 1]"),
            (unit.contains(&self.tau), "tau must lie in [0, 1]"),
            (self.l2_reg >= 0.0, "l2_reg must be non-negative"),
            (self.policy_lr > 0.0, "policy_lr must be positive"),
            (self.value_lr > 0.0, "value_lr must be positive"),
            (self.log_interval > 0, "log_interval must be positive"),
            (self.max_episode_steps > 0, "max_episode_steps must be positive"),
            (self.obs_clip > 0.0, "obs_clip must be positive"),
            (self.max_grad_norm.map_or(true, |m| m > 0.0), "max_grad_norm must be positive"),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, msg)) => Err(RlError::Config((*msg).to_string())),
            None => Ok(()),
        }
    }

    /// Whether a checkpoint is due after `iteration` (zero-based).
    pub fn should_save(&self, iteration: usize) -> bool {
        self.save_model_interval > 0 && (iteration + 1) % self.save_model_interval == 0
    }

    pub fn should_log(&self, iteration: usize) -> bool {
        iteration % self.log_interval.max(1) == 0
    }
}
