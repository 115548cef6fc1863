//! Running observation standardization.
//!
//! Statistics are accumulated with Welford's algorithm in `f64`. During
//! rollout every worker feeds observations through one
//! `parking_lot::Mutex<Normalizer>`, so each read-modify-write of the
//! running statistics happens under the lock.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RlError};

/// Floor added to the standard deviation before dividing.
pub const STD_EPSILON: f64 = 1e-8;

#[derive(Clone, Debug, PartialEq)]
pub struct Normalizer {
    count: u64,
    mean: Vec<f64>,
    /// Sum of squared deviations from the running mean.
    m2: Vec<f64>,
    clip: f32,
}

/// Serialized form of a [`Normalizer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizerState {
    pub count: u64,
    pub mean: Vec<f64>,
    pub sum_sq_dev: Vec<f64>,
    pub clip: f32,
}

impl Normalizer {
    /// Fresh statistics for `dim`-dimensional observations, outputs clamped
    /// to `[-clip, clip]`.
    pub fn new(dim: usize, clip: f32) -> Self {
        Self { count: 0, mean: vec![0.0; dim], m2: vec![0.0; dim], clip: clip.abs() }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn clip(&self) -> f32 {
        self.clip
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Unbiased sample variance; the squared mean while only one sample has
    /// been seen.
    pub fn variance(&self) -> Vec<f64> {
        match self.count {
            0 => vec![0.0; self.dim()],
            1 => self.mean.iter().map(|m| m * m).collect(),
            n => self.m2.iter().map(|s| s / (n - 1) as f64).collect(),
        }
    }

    /// Folds `obs` into the statistics, then standardizes it.
    pub fn update_and_normalize(&mut self, obs: &[f32]) -> Vec<f32> {
        self.update(obs);
        self.normalize(obs)
    }

    pub fn update(&mut self, obs: &[f32]) {
        assert_eq!(obs.len(), self.dim(), "observation width");
        self.count += 1;
        let n = self.count as f64;
        for ((x, mean), m2) in obs.iter().zip(&mut self.mean).zip(&mut self.m2) {
            let x = f64::from(*x);
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
    }

    /// Standardizes `obs` with the current statistics without updating them.
    pub fn normalize(&self, obs: &[f32]) -> Vec<f32> {
        assert_eq!(obs.len(), self.dim(), "observation width");
        let clip = f64::from(self.clip);
        obs.iter()
            .zip(&self.mean)
            .zip(self.variance())
            .map(|((x, mean), var)| {
                let z = (f64::from(*x) - mean) / (var.sqrt() + STD_EPSILON);
                if z.is_nan() {
                    0.0
                } else {
                    z.clamp(-clip, clip) as f32
                }
            })
            .collect()
    }

    pub fn state(&self) -> NormalizerState {
        NormalizerState {
            count: self.count,
            mean: self.mean.clone(),
            sum_sq_dev: self.m2.clone(),
            clip: self.clip,
        }
    }

    pub fn from_state(state: NormalizerState) -> Result<Self> {
        if state.mean.len() != state.sum_sq_dev.len() {
            return Err(RlError::Checkpoint(format!(
                "normalizer mean has {} entries but sum_sq_dev has {}",
                state.mean.len(),
                state.sum_sq_dev.len()
            )));
        }
        if !state.clip.is_finite() || state.clip <= 0.0 {
            return Err(RlError::Checkpoint(format!("normalizer clip {} is not positive", state.clip)));
        }
        if state.sum_sq_dev.iter().any(|s| *s < 0.0) {
            return Err(RlError::Checkpoint("negative normalizer deviation".into()));
        }
        Ok(Self { count: state.count, mean: state.mean, m2: state.sum_sq_dev, clip: state.clip })
    }
}
