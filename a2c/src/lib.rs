//! # a2c
//!
//! Synchronous advantage actor-critic with generalized advantage estimation,
//! trained on CPU with a pool of rollout workers.
//!
//! ## Crates
//!
//! -   **`a2c`:** The crate you are currently viewing. It holds the
//!     command-line entry point and the training loop that logs progress
//!     and writes checkpoints.
//! -   **[`rl`]:** Environments, the observation normalizer, policy and value
//!     models, rollout collection, advantage estimation, the actor-critic
//!     update and the checkpoint schema.
//! -   **[`ml`]:** Tensors, dense layers with explicit backward passes, the
//!     Adam optimizer and gradient clipping.
//!
//! ## Getting Started
//!
//! ```text
//! RUST_LOG=info a2c --env-name CartPole-v1 --num-threads 4 --min-batch-size 2048
//! ```
//!
//! Pass `--save-model-interval N` to write `{save_dir}/{env_name}_a2c.json`
//! every `N` iterations and `--model-path` to resume from such a file.

pub mod app;

pub use ml;
pub use rl;
