#![deny(clippy::all)]

//! Minimal neural-network building blocks.
//!
//! Everything here runs on the CPU over `f32` buffers. Layers implement an
//! explicit backward pass instead of recording a tape, which keeps the
//! gradient of every parameter inspectable and lets callers accumulate
//! per-sample gradients over a batch themselves.

pub mod nn;
pub mod optim;
pub mod tensor;

use thiserror::Error;

pub use nn::{Dense, Layer, LayerSpec, Parameterized, Sequential, TanhAct};
pub use optim::{clip_grad_norm, Adam};
pub use tensor::Tensor;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MlError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("parameter count mismatch: expected {expected}, got {actual}")]
    ParamCount { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, MlError>;
