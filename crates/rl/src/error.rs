use thiserror::Error;

use crate::env::EnvError;

#[derive(Error, Debug)]
pub enum RlError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unknown environment `{0}`")]
    UnknownEnv(String),
    #[error("environment failure: {0}")]
    Environment(#[from] EnvError),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("empty batch")]
    EmptyBatch,
    #[error("model error: {0}")]
    Model(#[from] ml::MlError),
    #[error("checkpoint version {found} is not supported (expected {expected})")]
    CheckpointVersion { found: u32, expected: u32 },
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RlError>;
