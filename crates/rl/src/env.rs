use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shape of an environment's action space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSpace {
    /// Real-valued actions with the given number of dimensions.
    Continuous(usize),
    /// One of `n` discrete choices.
    Discrete(usize),
}

impl ActionSpace {
    /// Continuous dimensionality or discrete cardinality.
    pub fn size(&self) -> usize {
        match self {
            ActionSpace::Continuous(n) | ActionSpace::Discrete(n) => *n,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Continuous(Vec<f32>),
    Discrete(usize),
}

/// `Step::info` key set by built-in environments that hit their step limit.
pub const TRUNCATED: &str = "truncated";

/// Outcome of a single [`Env::step`].
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub observation: Vec<f32>,
    pub reward: f32,
    /// The episode ended at this step.
    pub done: bool,
    /// Free-form diagnostics; never read by the learner.
    pub info: BTreeMap<String, f32>,
}

impl Step {
    pub fn new(observation: Vec<f32>, reward: f32, done: bool) -> Self {
        Self { observation, reward, done, info: BTreeMap::new() }
    }

    pub fn with_info(mut self, key: &str, value: f32) -> Self {
        self.info.insert(key.to_string(), value);
        self
    }

    /// Whether the episode ended on a time limit rather than a terminal
    /// state.
    pub fn truncated(&self) -> bool {
        self.info.get(TRUNCATED).is_some_and(|v| *v != 0.0)
    }
}

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("action {action:?} does not fit action space {space:?}")]
    InvalidAction { action: Action, space: ActionSpace },
    #[error("step called before reset")]
    NotReset,
    #[error("{0}")]
    Custom(String),
}

/// Episodic environment with flat numeric observations.
///
/// Inspired by classic frameworks like OpenAI Gym. Each worker of the
/// rollout collector owns one instance exclusively, hence `Send` but not
/// `Sync`.
pub trait Env: Send {
    /// Reset to a starting state and return the initial observation.
    fn reset(&mut self) -> Result<Vec<f32>, EnvError>;

    /// Advance the environment by one action.
    fn step(&mut self, action: &Action) -> Result<Step, EnvError>;

    /// Reseed the environment's internal randomness.
    fn seed(&mut self, seed: u64);

    /// Length of the observation vector.
    fn observation_dim(&self) -> usize;

    fn action_space(&self) -> ActionSpace;
}

impl<E: Env + ?Sized> Env for Box<E> {
    fn reset(&mut self) -> Result<Vec<f32>, EnvError> {
        (**self).reset()
    }

    fn step(&mut self, action: &Action) -> Result<Step, EnvError> {
        (**self).step(action)
    }

    fn seed(&mut self, seed: u64) {
        (**self).seed(seed);
    }

    fn observation_dim(&self) -> usize {
        (**self).observation_dim()
    }

    fn action_space(&self) -> ActionSpace {
        (**self).action_space()
    }
}
