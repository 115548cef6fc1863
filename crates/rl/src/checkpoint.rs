//! Versioned on-disk model state.
//!
//! A checkpoint is a JSON document holding the policy, the value network and
//! the observation normalizer. Optimizer moments are not stored; a resumed
//! run starts Adam from scratch.

use std::fs;
use std::path::Path;

use ml::LayerSpec;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RlError};
use crate::normalizer::{Normalizer, NormalizerState};
use crate::policy::{Policy, PolicyModel, PolicyState};
use crate::value::{ValueFunction, ValueNetwork, ValueState};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub policy: PolicyState,
    pub value: ValueState,
    pub normalizer: NormalizerState,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

impl Checkpoint {
    pub fn new(policy: &PolicyModel, value: &ValueNetwork, normalizer: &Normalizer) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            policy: policy.state(),
            value: value.state(),
            normalizer: normalizer.state(),
        }
    }

    /// Serializes the checkpoint. JSON has no NaN or infinity, so any
    /// non-finite parameter or statistic is an error instead of a `null`.
    pub fn to_json(&self) -> Result<String> {
        self.check_finite()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn check_finite(&self) -> Result<()> {
        let policy_layers = match &self.policy {
            PolicyState::Gaussian { layers, log_std } => {
                ensure_finite("policy log_std", log_std.iter().copied())?;
                layers
            }
            PolicyState::Categorical { layers } => layers,
        };
        ensure_finite_layers("policy", policy_layers)?;
        ensure_finite_layers("value", &self.value.layers)?;
        let n = &self.normalizer;
        ensure_finite("normalizer mean", n.mean.iter().copied())?;
        ensure_finite("normalizer sum_sq_dev", n.sum_sq_dev.iter().copied())?;
        ensure_finite("normalizer clip", std::iter::once(f64::from(n.clip)))
    }

    /// Parses a checkpoint, rejecting any other schema version before the
    /// body is interpreted.
    pub fn from_json(json: &str) -> Result<Self> {
        let header: Header = serde_json::from_str(json)?;
        if header.version != CHECKPOINT_VERSION {
            return Err(RlError::CheckpointVersion { found: header.version, expected: CHECKPOINT_VERSION });
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, json)?;
        tracing::info!(path = %path.display(), "checkpoint saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let checkpoint = Self::from_json(&fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), "checkpoint loaded");
        Ok(checkpoint)
    }

    /// Rebuilds the three models and checks that they agree on the
    /// observation width.
    pub fn into_parts(self) -> Result<(PolicyModel, ValueNetwork, Normalizer)> {
        let policy = PolicyModel::from_state(self.policy)?;
        let value = ValueNetwork::from_state(self.value)?;
        let normalizer = Normalizer::from_state(self.normalizer)?;
        if policy.obs_dim() != value.obs_dim() || policy.obs_dim() != normalizer.dim() {
            return Err(RlError::Checkpoint(format!(
                "observation width disagrees: policy {}, value {}, normalizer {}",
                policy.obs_dim(),
                value.obs_dim(),
                normalizer.dim()
            )));
        }
        Ok((policy, value, normalizer))
    }
}

fn ensure_finite_layers(model: &str, layers: &[LayerSpec]) -> Result<()> {
    for (i, layer) in layers.iter().enumerate() {
        if let LayerSpec::Dense { weights, bias, .. } = layer {
            ensure_finite(&format!("{model} layer {i}"), weights.iter().chain(bias).map(|&x| f64::from(x)))?;
        }
    }
    Ok(())
}

fn ensure_finite<T: Into<f64>>(what: &str, values: impl IntoIterator<Item = T>) -> Result<()> {
    match values.into_iter().map(Into::<f64>::into).position(|x: f64| !x.is_finite()) {
        Some(i) => Err(RlError::Checkpoint(format!("{what} has a non-finite value at index {i}"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Action, ActionSpace};
    use rand::{rngs::StdRng, SeedableRng};

    fn sample(space: ActionSpace) -> Checkpoint {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = PolicyModel::for_space(3, space, -0.5, &mut rng).unwrap();
        let value = ValueNetwork::new(3, &mut rng);
        let mut normalizer = Normalizer::new(3, 5.0);
        normalizer.update(&[1.0, 2.0, 3.0]);
        normalizer.update(&[-1.0, 0.0, 4.0]);
        Checkpoint::new(&policy, &value, &normalizer)
    }

    #[test]
    fn json_round_trip_preserves_behaviour() {
        let original = sample(ActionSpace::Continuous(1));
        let restored = Checkpoint::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(restored, original);

        let obs = [0.1, -0.2, 0.3];
        let (p0, v0, n0) = original.into_parts().unwrap();
        let (p1, v1, n1) = restored.into_parts().unwrap();
        let a = Action::Continuous(vec![0.4]);
        assert_eq!(p0.log_prob(&obs, &a).unwrap(), p1.log_prob(&obs, &a).unwrap());
        assert_eq!(v0.estimate(&obs), v1.estimate(&obs));
        assert_eq!(n0.normalize(&obs), n1.normalize(&obs));
    }

    #[test]
    fn save_and_load_through_the_filesystem() {
        let dir = std::env::temp_dir().join(format!("a2c-checkpoint-{}", std::process::id()));
        let path = dir.join("nested").join("model.json");
        let original = sample(ActionSpace::Discrete(2));
        original.save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap(), original);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn other_versions_are_rejected() {
        let mut ckpt = sample(ActionSpace::Discrete(2));
        ckpt.version = CHECKPOINT_VERSION + 1;
        let err = Checkpoint::from_json(&ckpt.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, RlError::CheckpointVersion { found, .. } if found == CHECKPOINT_VERSION + 1));
    }

    #[test]
    fn malformed_documents_are_errors() {
        assert!(matches!(Checkpoint::from_json("{}"), Err(RlError::Serde(_))));
        assert!(matches!(Checkpoint::from_json(r#"{"version": 1}"#), Err(RlError::Serde(_))));
        assert!(Checkpoint::load("/definitely/not/here.json").is_err());

        let mut ckpt = sample(ActionSpace::Discrete(2));
        if let LayerSpec::Dense { in_dim, .. } = &mut ckpt.value.layers[0] {
            *in_dim = usize::MAX;
        }
        let parsed = Checkpoint::from_json(&ckpt.to_json().unwrap()).unwrap();
        assert!(matches!(parsed.into_parts(), Err(RlError::Model(_))));
    }

    #[test]
    fn non_finite_parameters_are_not_written() {
        let dir = std::env::temp_dir().join(format!("a2c-nonfinite-{}", std::process::id()));
        let path = dir.join("model.json");

        let mut ckpt = sample(ActionSpace::Discrete(2));
        if let LayerSpec::Dense { weights, .. } = &mut ckpt.value.layers[0] {
            weights[1] = f32::NAN;
        }
        assert!(matches!(ckpt.to_json(), Err(RlError::Checkpoint(_))));
        assert!(ckpt.save(&path).is_err());
        assert!(!path.exists());

        let mut ckpt = sample(ActionSpace::Continuous(1));
        if let PolicyState::Gaussian { log_std, .. } = &mut ckpt.policy {
            log_std[0] = f32::INFINITY;
        }
        assert!(matches!(ckpt.to_json(), Err(RlError::Checkpoint(_))));

        let mut ckpt = sample(ActionSpace::Discrete(2));
        ckpt.normalizer.mean[2] = f64::NAN;
        assert!(matches!(ckpt.to_json(), Err(RlError::Checkpoint(_))));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn mismatched_widths_are_rejected() {
        let mut ckpt = sample(ActionSpace::Discrete(2));
        ckpt.normalizer = Normalizer::new(5, 5.0).state();
        assert!(matches!(ckpt.into_parts(), Err(RlError::Checkpoint(_))));
    }
}
