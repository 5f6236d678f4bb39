//! Error taxonomy for the inference pipeline.
//!
//! Every failure the core can produce maps onto exactly one [`PipelineError`]
//! variant. Nothing in the core retries: all operations are local and either
//! deterministic or explicitly seeded, so a retry would produce the same
//! failure. Retry and downgrade policy belongs to the caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Details of a rejected raw feature vector.
///
/// All problems are collected before reporting so a caller can fix the
/// whole input in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssues {
    /// Required features that were absent from a named input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    /// Features present but not numbers (strings, booleans, null, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_numeric: Vec<String>,
    /// Features that are numbers but NaN or infinite.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_finite: Vec<String>,
    /// `(expected, actual)` length for ordered inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_mismatch: Option<(usize, usize)>,
}

impl ValidationIssues {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
            && self.non_numeric.is_empty()
            && self.non_finite.is_empty()
            && self.length_mismatch.is_none()
    }
}

impl fmt::Display for ValidationIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing features: {:?}", self.missing));
        }
        if !self.non_numeric.is_empty() {
            parts.push(format!("non-numeric features: {:?}", self.non_numeric));
        }
        if !self.non_finite.is_empty() {
            parts.push(format!("non-finite features: {:?}", self.non_finite));
        }
        if let Some((expected, actual)) = self.length_mismatch {
            parts.push(format!("expected {} values, got {}", expected, actual));
        }
        if parts.is_empty() {
            write!(f, "invalid input")
        } else {
            write!(f, "{}", parts.join("; "))
        }
    }
}

/// Failure raised by a single model adapter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("expected {expected} input values, got {actual}")]
    InputDimension { expected: usize, actual: usize },

    #[error("model produced a non-finite output")]
    NonFinite,

    #[error("invalid probability distribution: {0}")]
    InvalidDistribution(String),

    #[error("{0}")]
    Internal(String),
}

/// Errors surfaced by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or incomplete input; correctable by the caller.
    #[error("validation failed: {0}")]
    Validation(ValidationIssues),

    /// One ensemble member failed. The whole prediction fails because a
    /// meta-feature vector with a hole in it is meaningless.
    #[error("base learner '{name}' failed: {cause}")]
    BaseLearner { name: String, cause: ModelError },

    #[error("meta-classifier failed: {0}")]
    MetaClassifier(ModelError),

    /// The explainer cannot run. Callers may return the prediction without
    /// attribution, but must never fabricate one.
    #[error("attribution unavailable: {0}")]
    AttributionUnavailable(String),

    /// An artifact was absent or corrupt at load time.
    #[error("artifact '{artifact}' unavailable: {reason}")]
    MissingArtifact { artifact: String, reason: String },
}

impl PipelineError {
    pub fn missing_artifact(artifact: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::MissingArtifact {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable tag, used in responses and access logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::BaseLearner { .. } => "base_learner_error",
            Self::MetaClassifier(_) => "meta_classifier_error",
            Self::AttributionUnavailable(_) => "attribution_unavailable",
            Self::MissingArtifact { .. } => "missing_artifact",
        }
    }
}
