use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use rl::{
    Action, ActionSpace, CategoricalPolicy, Env, EnvError, GaussianPolicy, Normalizer, RlError, RolloutCollector,
    Step,
};

/// Counts up from zero and terminates after `episode_len` steps.
struct Counter {
    episode_len: usize,
    t: usize,
    seed: u64,
    fail_at: Option<usize>,
    obs_dim: usize,
}

impl Counter {
    fn new(episode_len: usize) -> Self {
        Self { episode_len, t: 0, seed: 0, fail_at: None, obs_dim: 2 }
    }
}

impl Env for Counter {
    fn reset(&mut self) -> Result<Vec<f32>, EnvError> {
        self.t = 0;
        Ok(vec![0.0, self.seed as f32])
    }

    fn step(&mut self, action: &Action) -> Result<Step, EnvError> {
        if !matches!(action, Action::Discrete(_)) {
            return Err(EnvError::InvalidAction { action: action.clone(), space: self.action_space() });
        }
        self.t += 1;
        if Some(self.t) == self.fail_at {
            return Err(EnvError::Custom("simulator diverged".into()));
        }
        Ok(Step::new(vec![self.t as f32, self.seed as f32], 1.0, self.t >= self.episode_len))
    }

    fn seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    fn observation_dim(&self) -> usize {
        self.obs_dim
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discrete(2)
    }
}

fn counters(n: usize, episode_len: usize) -> Vec<Box<dyn Env>> {
    (0..n).map(|_| Box::new(Counter::new(episode_len)) as Box<dyn Env>).collect()
}

fn policy() -> CategoricalPolicy {
    CategoricalPolicy::new(2, 2, &mut StdRng::seed_from_u64(11))
}

#[test]
fn batch_meets_the_minimum_size_exactly() {
    let mut collector = RolloutCollector::new(counters(3, 4), 0, 1000).unwrap();
    assert_eq!(collector.quotas(10), vec![3, 3, 4]);

    let normalizer = Mutex::new(Normalizer::new(2, 5.0));
    let (batch, stats) = collector.collect(10, &policy(), &normalizer).unwrap();
    assert_eq!(batch.len(), 10);
    assert_eq!(stats.num_steps, 10);
    // each worker ran a single episode: one reset plus one observation per step
    assert_eq!(normalizer.lock().count(), 10 + 3);
    // only the worker with quota 4 reached the end of its episode
    assert_eq!(stats.num_episodes, 1);
}

#[test]
fn masks_mark_episode_ends_and_quota_cutoffs() {
    // one worker, episodes of length 4, quota 10: 4 + 4 + 2 (cut)
    let mut collector = RolloutCollector::new(counters(1, 4), 0, 1000).unwrap();
    let normalizer = Mutex::new(Normalizer::new(2, 5.0));
    let (batch, stats) = collector.collect(10, &policy(), &normalizer).unwrap();

    assert_eq!(batch.masks(), vec![1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0]);
    assert_eq!(stats.num_episodes, 2);
    assert_eq!(stats.total_reward, 8.0);
    let rewards = stats.rewards.unwrap();
    assert_eq!((rewards.min, rewards.max, rewards.avg), (4.0, 4.0, 4.0));
}

#[test]
fn episode_step_cap_counts_as_completed() {
    let mut collector = RolloutCollector::new(counters(1, 100), 0, 3).unwrap();
    let normalizer = Mutex::new(Normalizer::new(2, 5.0));
    let (batch, stats) = collector.collect(6, &policy(), &normalizer).unwrap();
    assert_eq!(batch.masks(), vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
    assert_eq!(stats.num_episodes, 2);
}

#[test]
fn no_completed_episode_leaves_reward_summary_empty() {
    let mut collector = RolloutCollector::new(counters(2, 1000), 0, 10_000).unwrap();
    let normalizer = Mutex::new(Normalizer::new(2, 5.0));
    let (batch, stats) = collector.collect(8, &policy(), &normalizer).unwrap();
    assert_eq!(batch.len(), 8);
    assert_eq!(stats.num_episodes, 0);
    assert!(stats.rewards.is_none());
}

#[test]
fn workers_are_seeded_from_the_base_seed() {
    let mut collector = RolloutCollector::new(counters(3, 2), 40, 1000).unwrap();
    let normalizer = Mutex::new(Normalizer::new(2, 5.0));
    collector.collect(6, &policy(), &normalizer).unwrap();
    // the second observation coordinate carries each environment's seed
    let mean = normalizer.lock().mean()[1];
    assert!((mean - 41.0).abs() < 1e-9, "{mean}");
}

#[test]
fn single_worker_collection_is_reproducible() {
    let run = || {
        let mut collector = RolloutCollector::new(counters(1, 5), 3, 1000).unwrap();
        let normalizer = Mutex::new(Normalizer::new(2, 5.0));
        collector.collect(32, &policy(), &normalizer).unwrap().0
    };
    assert_eq!(run(), run());
}

#[test]
fn environment_errors_abort_collection() {
    let mut envs = counters(2, 10);
    let mut failing = Counter::new(10);
    failing.fail_at = Some(3);
    envs.push(Box::new(failing));
    let mut collector = RolloutCollector::new(envs, 0, 1000).unwrap();
    let normalizer = Mutex::new(Normalizer::new(2, 5.0));
    let err = collector.collect(30, &policy(), &normalizer).unwrap_err();
    assert!(matches!(err, RlError::Environment(EnvError::Custom(_))), "{err}");
}

#[test]
fn mismatched_dimensions_fail_before_collection() {
    let mut envs = counters(1, 10);
    let mut wide = Counter::new(10);
    wide.obs_dim = 3;
    envs.push(Box::new(wide));
    assert!(matches!(RolloutCollector::new(envs, 0, 1000), Err(RlError::DimensionMismatch(_))));

    let mut collector = RolloutCollector::new(counters(1, 10), 0, 1000).unwrap();
    let continuous = GaussianPolicy::new(2, 1, 0.0, &mut StdRng::seed_from_u64(0));
    let normalizer = Mutex::new(Normalizer::new(2, 5.0));
    assert!(matches!(
        collector.collect(4, &continuous, &normalizer),
        Err(RlError::DimensionMismatch(_))
    ));
    assert_eq!(normalizer.lock().count(), 0);
}

#[test]
fn empty_worker_list_is_a_config_error() {
    assert!(matches!(RolloutCollector::new(Vec::new(), 0, 1000), Err(RlError::Config(_))));
}
