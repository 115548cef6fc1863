//! Built-in environments, constructed by identifier.

mod cartpole;
mod pendulum;

pub use cartpole::CartPole;
pub use pendulum::Pendulum;

use crate::env::Env;
use crate::error::{Result, RlError};

/// Identifiers accepted by [`make`].
pub const AVAILABLE: &[&str] = &["CartPole-v1", "Pendulum-v1"];

/// Builds a fresh, unseeded environment by identifier.
pub fn make(name: &str) -> Result<Box<dyn Env>> {
    match name {
        "CartPole-v1" => Ok(Box::new(CartPole::new())),
        "Pendulum-v1" => Ok(Box::new(Pendulum::new())),
        other => Err(RlError::UnknownEnv(other.to_string())),
    }
}
