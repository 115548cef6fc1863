//! Parallel rollout collection.
//!
//! Each worker owns one environment and one random stream exclusively. The
//! only state shared between workers is the observation normalizer, reached
//! through a single `Mutex`; the policy is borrowed immutably for the whole
//! collection phase.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;

use crate::env::{Action, ActionSpace, Env};
use crate::error::{Result, RlError};
use crate::normalizer::Normalizer;
use crate::policy::Policy;

/// One recorded environment step.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// Normalized observation the action was chosen from.
    pub state: Vec<f32>,
    pub action: Action,
    pub reward: f32,
    /// `0.0` on the last step of an episode (including forced cutoffs),
    /// `1.0` otherwise.
    pub mask: f32,
}

/// Concatenated transitions from every worker.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub transitions: Vec<Transition>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn states(&self) -> Vec<Vec<f32>> {
        self.transitions.iter().map(|t| t.state.clone()).collect()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.transitions.iter().map(|t| t.action.clone()).collect()
    }

    pub fn rewards(&self) -> Vec<f32> {
        self.transitions.iter().map(|t| t.reward).collect()
    }

    pub fn masks(&self) -> Vec<f32> {
        self.transitions.iter().map(|t| t.mask).collect()
    }
}

/// Reward statistics over completed episodes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RewardSummary {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
}

impl RewardSummary {
    fn from_episodes(rewards: &[f32]) -> Option<Self> {
        if rewards.is_empty() {
            return None;
        }
        let min = rewards.iter().copied().fold(f32::INFINITY, f32::min);
        let max = rewards.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let avg = rewards.iter().sum::<f32>() / rewards.len() as f32;
        Some(Self { min, max, avg })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RolloutStats {
    pub sample_time: Duration,
    pub num_steps: usize,
    /// Episodes that ended by termination or by the per-episode step cap.
    /// Episodes cut short because a worker's quota ran out are excluded.
    pub num_episodes: usize,
    pub total_reward: f32,
    /// `None` when no episode completed inside the batch.
    pub rewards: Option<RewardSummary>,
}

struct WorkerOutput {
    transitions: Vec<Transition>,
    episode_rewards: Vec<f32>,
}

struct Worker {
    index: usize,
    env: Box<dyn Env>,
    rng: StdRng,
}

impl Worker {
    fn run(
        &mut self,
        quota: usize,
        max_episode_steps: usize,
        policy: &dyn Policy,
        normalizer: &Mutex<Normalizer>,
    ) -> Result<WorkerOutput> {
        let mut transitions = Vec::with_capacity(quota);
        let mut episode_rewards = Vec::new();

        while transitions.len() < quota {
            let raw = self.env.reset()?;
            let mut state = self.observe(normalizer, &raw)?;
            let mut episode_reward = 0.0f32;
            let mut episode_steps = 0usize;

            loop {
                let action = policy.act(&state, true, &mut self.rng);
                let step = self.env.step(&action)?;
                let next_state = self.observe(normalizer, &step.observation)?;
                episode_reward += step.reward;
                episode_steps += 1;

                let capped = episode_steps >= max_episode_steps;
                let quota_hit = transitions.len() + 1 >= quota;
                let finished = step.done || capped;
                let mask = if finished || quota_hit { 0.0 } else { 1.0 };
                transitions.push(Transition { state, action, reward: step.reward, mask });

                if finished {
                    if capped || step.truncated() {
                        tracing::trace!(worker = self.index, episode_steps, "episode hit its step limit");
                    }
                    episode_rewards.push(episode_reward);
                    break;
                }
                if quota_hit {
                    tracing::trace!(worker = self.index, episode_steps, "episode truncated at quota");
                    break;
                }
                state = next_state;
            }
        }

        tracing::debug!(
            worker = self.index,
            steps = transitions.len(),
            episodes = episode_rewards.len(),
            "worker finished"
        );
        Ok(WorkerOutput { transitions, episode_rewards })
    }

    fn observe(&self, normalizer: &Mutex<Normalizer>, obs: &[f32]) -> Result<Vec<f32>> {
        let mut normalizer = normalizer.lock();
        if obs.len() != normalizer.dim() {
            return Err(RlError::DimensionMismatch(format!(
                "worker {} observed {} values, expected {}",
                self.index,
                obs.len(),
                normalizer.dim()
            )));
        }
        Ok(normalizer.update_and_normalize(obs))
    }
}

/// Runs one environment per worker on a dedicated thread pool.
pub struct RolloutCollector {
    workers: Vec<Worker>,
    pool: rayon::ThreadPool,
    max_episode_steps: usize,
    obs_dim: usize,
    action_space: ActionSpace,
}

impl RolloutCollector {
    /// Takes ownership of one environment per worker. Environment `i` and
    /// the action-sampling stream of worker `i` are both seeded with
    /// `base_seed + i`.
    pub fn new(envs: Vec<Box<dyn Env>>, base_seed: u64, max_episode_steps: usize) -> Result<Self> {
        let Some(first) = envs.first() else {
            return Err(RlError::Config("rollout needs at least one environment".into()));
        };
        if max_episode_steps == 0 {
            return Err(RlError::Config("max_episode_steps must be positive".into()));
        }
        let obs_dim = first.observation_dim();
        let action_space = first.action_space();
        for (i, env) in envs.iter().enumerate() {
            if env.observation_dim() != obs_dim || env.action_space() != action_space {
                return Err(RlError::DimensionMismatch(format!(
                    "worker {i} environment is {}-dim/{:?}, worker 0 is {obs_dim}-dim/{action_space:?}",
                    env.observation_dim(),
                    env.action_space()
                )));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(envs.len())
            .thread_name(|i| format!("rollout-{i}"))
            .build()?;
        let workers = envs
            .into_iter()
            .enumerate()
            .map(|(index, mut env)| {
                let seed = base_seed.wrapping_add(index as u64);
                env.seed(seed);
                Worker { index, env, rng: StdRng::seed_from_u64(seed) }
            })
            .collect();
        Ok(Self { workers, pool, max_episode_steps, obs_dim, action_space })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    pub fn action_space(&self) -> ActionSpace {
        self.action_space
    }

    /// Fails when `policy` does not fit the environments.
    pub fn check_policy(&self, policy: &dyn Policy) -> Result<()> {
        if policy.obs_dim() != self.obs_dim || policy.action_space() != self.action_space {
            return Err(RlError::DimensionMismatch(format!(
                "policy maps {} observations to {:?}, environment provides {} observations and {:?}",
                policy.obs_dim(),
                policy.action_space(),
                self.obs_dim,
                self.action_space
            )));
        }
        Ok(())
    }

    /// Per-worker transition quotas; the last worker absorbs the remainder.
    pub fn quotas(&self, min_batch_size: usize) -> Vec<usize> {
        let n = self.workers.len();
        let base = min_batch_size / n;
        let mut quotas = vec![base; n];
        if let Some(last) = quotas.last_mut() {
            *last += min_batch_size % n;
        }
        quotas
    }

    /// Collects at least `min_batch_size` transitions.
    ///
    /// Blocks until every worker finishes. Any environment error aborts the
    /// whole collection; no partial batch is returned.
    pub fn collect(
        &mut self,
        min_batch_size: usize,
        policy: &dyn Policy,
        normalizer: &Mutex<Normalizer>,
    ) -> Result<(Batch, RolloutStats)> {
        self.check_policy(policy)?;
        let tracked = normalizer.lock().dim();
        if tracked != self.obs_dim {
            return Err(RlError::DimensionMismatch(format!(
                "normalizer tracks {tracked} observations, environment provides {}",
                self.obs_dim
            )));
        }
        let start = Instant::now();
        let quotas = self.quotas(min_batch_size);
        let max_episode_steps = self.max_episode_steps;
        let workers = &mut self.workers;

        let outputs = self.pool.install(|| {
            workers
                .par_iter_mut()
                .zip(quotas)
                .map(|(worker, quota)| worker.run(quota, max_episode_steps, policy, normalizer))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut batch = Batch::default();
        let mut episode_rewards = Vec::new();
        for out in outputs {
            batch.transitions.extend(out.transitions);
            episode_rewards.extend(out.episode_rewards);
        }

        let stats = RolloutStats {
            sample_time: start.elapsed(),
            num_steps: batch.len(),
            num_episodes: episode_rewards.len(),
            total_reward: episode_rewards.iter().sum(),
            rewards: RewardSummary::from_episodes(&episode_rewards),
        };
        Ok((batch, stats))
    }
}

/// Runs `episodes` greedy episodes and returns their total rewards.
///
/// Observations are standardized with the current statistics, which are
/// left untouched. An environment that does not fit `policy` or
/// `normalizer` is rejected before it is reset.
pub fn evaluate(
    env: &mut dyn Env,
    policy: &dyn Policy,
    normalizer: &Normalizer,
    episodes: usize,
    max_episode_steps: usize,
) -> Result<Vec<f32>> {
    let (obs_dim, space) = (env.observation_dim(), env.action_space());
    if policy.obs_dim() != obs_dim || policy.action_space() != space || normalizer.dim() != obs_dim {
        return Err(RlError::DimensionMismatch(format!(
            "environment provides {obs_dim} observations and {space:?}, policy maps {} observations to {:?}, \
             normalizer tracks {}",
            policy.obs_dim(),
            policy.action_space(),
            normalizer.dim()
        )));
    }
    // the greedy policy never draws from the stream
    let mut rng = StdRng::seed_from_u64(0);
    let mut totals = Vec::with_capacity(episodes);
    for _ in 0..episodes {
        let mut state = observe(normalizer, &env.reset()?)?;
        let mut total = 0.0;
        for _ in 0..max_episode_steps {
            let step = env.step(&policy.act(&state, false, &mut rng))?;
            total += step.reward;
            if step.done {
                break;
            }
            state = observe(normalizer, &step.observation)?;
        }
        totals.push(total);
    }
    Ok(totals)
}

fn observe(normalizer: &Normalizer, obs: &[f32]) -> Result<Vec<f32>> {
    if obs.len() != normalizer.dim() {
        return Err(RlError::DimensionMismatch(format!(
            "observed {} values, expected {}",
            obs.len(),
            normalizer.dim()
        )));
    }
    Ok(normalizer.normalize(obs))
}
