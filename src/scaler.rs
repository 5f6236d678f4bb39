//! Standardization of raw CTG measurements.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, ValidationIssues};
use crate::features::{RawFeatures, FEATURE_NAMES, NUM_FEATURES};

/// Per-feature mean/scale fit offline. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub version: String,
    pub feature_names: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl FeatureScaler {
    /// Check the parameter set against the fixed feature layout.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let artifact = "scaler";
        if self.feature_names.len() != NUM_FEATURES
            || self
                .feature_names
                .iter()
                .zip(FEATURE_NAMES.iter())
                .any(|(a, b)| a != b)
        {
            return Err(PipelineError::missing_artifact(
                artifact,
                format!(
                    "feature names {:?} do not match the expected order {:?}",
                    self.feature_names, FEATURE_NAMES
                ),
            ));
        }
        if self.mean.len() != NUM_FEATURES || self.scale.len() != NUM_FEATURES {
            return Err(PipelineError::missing_artifact(
                artifact,
                format!(
                    "expected {} means and scales, got {} and {}",
                    NUM_FEATURES,
                    self.mean.len(),
                    self.scale.len()
                ),
            ));
        }
        if let Some(i) = self.mean.iter().position(|m| !m.is_finite()) {
            return Err(PipelineError::missing_artifact(
                artifact,
                format!("non-finite mean for {}", FEATURE_NAMES[i]),
            ));
        }
        if let Some(i) = self.scale.iter().position(|s| !s.is_finite() || *s <= 0.0) {
            return Err(PipelineError::missing_artifact(
                artifact,
                format!("invalid scale {} for {}", self.scale[i], FEATURE_NAMES[i]),
            ));
        }
        Ok(())
    }

    /// `(raw_i - mean_i) / scale_i` for every feature.
    ///
    /// A finite raw value can still overflow once divided by a small scale;
    /// such features are reported as non-finite input.
    pub fn transform(&self, raw: &RawFeatures) -> Result<[f64; NUM_FEATURES], PipelineError> {
        let mut out = [0.0; NUM_FEATURES];
        for (i, (x, o)) in raw.values().iter().zip(out.iter_mut()).enumerate() {
            *o = (x - self.mean[i]) / self.scale[i];
        }
        let non_finite: Vec<String> = out
            .iter()
            .zip(FEATURE_NAMES.iter())
            .filter(|(z, _)| !z.is_finite())
            .map(|(_, name)| (*name).to_string())
            .collect();
        if !non_finite.is_empty() {
            return Err(PipelineError::Validation(ValidationIssues {
                non_finite,
                ..Default::default()
            }));
        }
        Ok(out)
    }
}
