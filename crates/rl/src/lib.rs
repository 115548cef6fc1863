#![deny(clippy::all)]

//! Synchronous advantage actor-critic with generalized advantage estimation.
//!
//! One training iteration runs three phases back to back:
//!
//! 1. [`rollout::RolloutCollector`] drives one environment per worker in
//!    parallel until the batch quota is met, normalizing every observation
//!    through a single lock-guarded [`normalizer::Normalizer`].
//! 2. [`gae::estimate_advantages`] turns rewards, masks and value estimates
//!    into advantages and return targets with a backward recursion.
//! 3. [`a2c::A2cUpdater`] takes one Adam step on the policy and one on the
//!    value network.
//!
//! [`trainer::Trainer`] sequences the phases and owns all mutable state.

pub mod a2c;
pub mod checkpoint;
pub mod config;
pub mod env;
pub mod envs;
pub mod error;
pub mod gae;
pub mod normalizer;
pub mod policy;
pub mod rollout;
pub mod trainer;
pub mod value;

pub use a2c::{A2cUpdater, UpdateStats};
pub use checkpoint::{Checkpoint, CHECKPOINT_VERSION};
pub use config::TrainConfig;
pub use env::{Action, ActionSpace, Env, EnvError, Step, TRUNCATED};
pub use error::{Result, RlError};
pub use gae::{estimate_advantages, standardize, Advantages};
pub use normalizer::{Normalizer, NormalizerState};
pub use policy::{CategoricalPolicy, GaussianPolicy, Policy, PolicyModel, PolicyState};
pub use rollout::{evaluate, Batch, RewardSummary, RolloutCollector, RolloutStats, Transition};
pub use trainer::{IterationReport, Trainer};
pub use value::{ValueFunction, ValueNetwork, ValueState};
