//! Generalized advantage estimation.

use crate::error::{Result, RlError};

/// Per-transition advantage and return targets for one batch.
#[derive(Clone, Debug, PartialEq)]
pub struct Advantages {
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
}

/// Backward GAE(γ, τ) recursion over a batch.
///
/// `masks[t] == 0` marks the last step of an episode and stops both the
/// bootstrap and the carried advantage at `t`. The final transition of the
/// batch has no successor and is assigned a zero advantage, so its return
/// equals its value estimate. Returns are `advantage + value`.
pub fn estimate_advantages(
    rewards: &[f32],
    masks: &[f32],
    values: &[f32],
    gamma: f32,
    tau: f32,
) -> Result<Advantages> {
    let n = rewards.len();
    if masks.len() != n || values.len() != n {
        return Err(RlError::DimensionMismatch(format!(
            "{n} rewards, {} masks, {} values",
            masks.len(),
            values.len()
        )));
    }

    let mut advantages = vec![0.0f32; n];
    for t in (0..n.saturating_sub(1)).rev() {
        let delta = rewards[t] + gamma * values[t + 1] * masks[t] - values[t];
        advantages[t] = delta + gamma * tau * masks[t] * advantages[t + 1];
    }
    let returns = advantages.iter().zip(values).map(|(a, v)| a + v).collect();
    Ok(Advantages { advantages, returns })
}

/// Shifts to zero mean and divides by the unbiased standard deviation.
///
/// With fewer than two entries only the mean is removed; the deviation is
/// floored at `1e-8`.
pub fn standardize(values: &mut [f32]) {
    let n = values.len();
    if n == 0 {
        return;
    }
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64;
    let std = if n > 1 {
        let ss: f64 = values.iter().map(|&v| (f64::from(v) - mean).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    } else {
        1.0
    };
    let std = std.max(1e-8);
    for v in values.iter_mut() {
        *v = ((f64::from(*v) - mean) / std) as f32;
    }
}
