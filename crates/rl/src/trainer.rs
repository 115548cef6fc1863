use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};

use crate::a2c::{A2cUpdater, UpdateStats};
use crate::checkpoint::Checkpoint;
use crate::config::TrainConfig;
use crate::env::Env;
use crate::envs;
use crate::error::{Result, RlError};
use crate::gae::{estimate_advantages, standardize, Advantages};
use crate::normalizer::Normalizer;
use crate::policy::PolicyModel;
use crate::rollout::{self, RolloutCollector, RolloutStats};
use crate::value::{ValueFunction, ValueNetwork};

/// Outcome of one collect-estimate-update iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    pub rollout: RolloutStats,
    pub update: UpdateStats,
}

/// Owns the models, the shared normalizer and the worker pool, and runs
/// training iterations one at a time.
pub struct Trainer {
    config: TrainConfig,
    policy: PolicyModel,
    value: ValueNetwork,
    normalizer: Mutex<Normalizer>,
    collector: RolloutCollector,
    updater: A2cUpdater,
    iteration: usize,
}

impl Trainer {
    /// Fresh models sized for the environments `make_env` produces; worker
    /// `i` receives `make_env(i)`.
    pub fn new<F>(config: TrainConfig, make_env: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<Box<dyn Env>>,
    {
        config.validate()?;
        let collector = build_collector(&config, make_env)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let policy = PolicyModel::for_space(collector.obs_dim(), collector.action_space(), config.log_std, &mut rng)?;
        let value = ValueNetwork::new(collector.obs_dim(), &mut rng);
        let normalizer = Normalizer::new(collector.obs_dim(), config.obs_clip);
        Self::assemble(config, policy, value, normalizer, collector)
    }

    /// Uses the built-in environment named by `config.env_name`.
    pub fn from_env_name(config: TrainConfig) -> Result<Self> {
        let name = config.env_name.clone();
        Self::new(config, |_| envs::make(&name))
    }

    /// Resumes from saved models. Any disagreement between the checkpoint
    /// and the environments is an error; there is no fallback to fresh
    /// initialization.
    pub fn from_checkpoint<F>(config: TrainConfig, checkpoint: Checkpoint, make_env: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<Box<dyn Env>>,
    {
        config.validate()?;
        let collector = build_collector(&config, make_env)?;
        let (policy, value, normalizer) = checkpoint.into_parts()?;
        Self::assemble(config, policy, value, normalizer, collector)
    }

    fn assemble(
        config: TrainConfig,
        policy: PolicyModel,
        value: ValueNetwork,
        normalizer: Normalizer,
        collector: RolloutCollector,
    ) -> Result<Self> {
        collector.check_policy(&policy)?;
        if value.obs_dim() != collector.obs_dim() || normalizer.dim() != collector.obs_dim() {
            return Err(RlError::DimensionMismatch(format!(
                "value network takes {}, normalizer tracks {}, environment provides {} observations",
                value.obs_dim(),
                normalizer.dim(),
                collector.obs_dim()
            )));
        }
        let updater = A2cUpdater::new(config.policy_lr, config.value_lr, config.l2_reg, config.max_grad_norm);
        tracing::info!(
            env = %config.env_name,
            workers = collector.num_workers(),
            obs_dim = collector.obs_dim(),
            action_space = ?collector.action_space(),
            "trainer ready"
        );
        Ok(Self {
            config,
            policy,
            value,
            normalizer: Mutex::new(normalizer),
            collector,
            updater,
            iteration: 0,
        })
    }

    /// Runs one iteration: collect a batch with the current policy, estimate
    /// advantages against the current value network, then update both.
    pub fn step(&mut self) -> Result<IterationReport> {
        let (batch, rollout) = self.collector.collect(self.config.min_batch_size, &self.policy, &self.normalizer)?;
        if rollout.rewards.is_none() {
            tracing::warn!(iteration = self.iteration, steps = rollout.num_steps, "no episode completed in batch");
        }

        let states = batch.states();
        let values: Vec<f32> = states.iter().map(|s| self.value.estimate(s)).collect();
        let Advantages { mut advantages, returns } =
            estimate_advantages(&batch.rewards(), &batch.masks(), &values, self.config.gamma, self.config.tau)?;
        if self.config.standardize_advantages {
            standardize(&mut advantages);
        }

        let update =
            self.updater
                .update(&mut self.policy, &mut self.value, &states, &batch.actions(), &returns, &advantages)?;

        let report = IterationReport { iteration: self.iteration, rollout, update };
        self.iteration += 1;
        Ok(report)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(&self.policy, &self.value, &self.normalizer.lock())
    }

    /// Greedy episodes on `env` with the current models. Normalizer
    /// statistics are not updated.
    pub fn evaluate(&self, env: &mut dyn Env, episodes: usize) -> Result<Vec<f32>> {
        let normalizer = self.normalizer.lock();
        rollout::evaluate(env, &self.policy, &normalizer, episodes, self.config.max_episode_steps)
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn policy(&self) -> &PolicyModel {
        &self.policy
    }

    pub fn value(&self) -> &ValueNetwork {
        &self.value
    }

    /// Snapshot of the running observation statistics.
    pub fn normalizer(&self) -> Normalizer {
        self.normalizer.lock().clone()
    }
}

fn build_collector<F>(config: &TrainConfig, mut make_env: F) -> Result<RolloutCollector>
where
    F: FnMut(usize) -> Result<Box<dyn Env>>,
{
    let envs = (0..config.num_threads).map(&mut make_env).collect::<Result<Vec<_>>>()?;
    RolloutCollector::new(envs, config.seed, config.max_episode_steps)
}
