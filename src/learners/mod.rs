//! First-layer base learners.
//!
//! Every model family sits behind [`ProbabilisticClassifier`]; the ensemble
//! only ever sees that capability. Learners are held in an explicit ordered
//! list because their position fixes the meta-feature column layout. A map
//! keyed by name would not guarantee that order across reloads.

pub mod boosting;
pub mod forest;
pub mod svm;
pub mod tree;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModelError, PipelineError};
use crate::features::NUM_FEATURES;
use crate::scores::{ClassScores, NUM_CLASSES};

pub use boosting::{GradientBoosting, ObliviousBoosting};
pub use forest::RandomForest;
pub use svm::RbfSvm;

/// A model that maps a feature vector to a class distribution.
pub trait ProbabilisticClassifier: Send + Sync {
    /// Model family, for logs and diagnostics.
    fn family(&self) -> &'static str;

    /// Expected input length.
    fn n_features(&self) -> usize;

    /// Class probabilities for one input vector.
    fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError>;
}

/// Reject inputs whose length does not match the model.
pub(crate) fn check_input(expected: usize, x: &[f64]) -> Result<(), ModelError> {
    if x.len() != expected {
        return Err(ModelError::InputDimension {
            expected,
            actual: x.len(),
        });
    }
    Ok(())
}

/// Divide by the sum; a zero or non-finite total is an error rather than a
/// silently uniform answer.
pub(crate) fn normalize(mut probs: [f64; NUM_CLASSES]) -> Result<[f64; NUM_CLASSES], ModelError> {
    if probs.iter().any(|p| !p.is_finite()) {
        return Err(ModelError::NonFinite);
    }
    let total: f64 = probs.iter().sum();
    if total <= 0.0 {
        return Err(ModelError::InvalidDistribution(format!(
            "cannot normalize total {}",
            total
        )));
    }
    for p in probs.iter_mut() {
        *p /= total;
    }
    Ok(probs)
}

/// Serialized base-learner artifact, tagged by model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum LearnerArtifact {
    Svm(RbfSvm),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    ObliviousBoosting(ObliviousBoosting),
}

impl LearnerArtifact {
    /// Validate structure and wrap the adapter.
    pub fn into_classifier(self) -> Result<Box<dyn ProbabilisticClassifier>, String> {
        let model: Box<dyn ProbabilisticClassifier> = match self {
            Self::Svm(m) => {
                m.validate()?;
                Box::new(m)
            }
            Self::RandomForest(m) => {
                m.validate()?;
                Box::new(m)
            }
            Self::GradientBoosting(m) => {
                m.validate()?;
                Box::new(m)
            }
            Self::ObliviousBoosting(m) => {
                m.validate()?;
                Box::new(m)
            }
        };
        Ok(model)
    }
}

/// A named ensemble member.
pub struct BaseLearner {
    pub name: String,
    pub model: Box<dyn ProbabilisticClassifier>,
}

impl BaseLearner {
    pub fn new(name: impl Into<String>, model: Box<dyn ProbabilisticClassifier>) -> Self {
        Self {
            name: name.into(),
            model,
        }
    }
}

impl std::fmt::Debug for BaseLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseLearner")
            .field("name", &self.name)
            .field("family", &self.model.family())
            .finish()
    }
}

/// The first layer: an ordered, fixed list of learners.
#[derive(Debug)]
pub struct Ensemble {
    members: Vec<BaseLearner>,
}

impl Ensemble {
    /// Order of `members` becomes the meta-feature column order.
    pub fn new(members: Vec<BaseLearner>) -> Result<Self, PipelineError> {
        if members.is_empty() {
            return Err(PipelineError::missing_artifact(
                "base_learners",
                "ensemble has no members",
            ));
        }
        for (i, member) in members.iter().enumerate() {
            if members[..i].iter().any(|m| m.name == member.name) {
                return Err(PipelineError::missing_artifact(
                    member.name.clone(),
                    "duplicate base learner name",
                ));
            }
            if member.model.n_features() != NUM_FEATURES {
                return Err(PipelineError::missing_artifact(
                    member.name.clone(),
                    format!(
                        "expects {} features, pipeline provides {}",
                        member.model.n_features(),
                        NUM_FEATURES
                    ),
                ));
            }
        }
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn members(&self) -> &[BaseLearner] {
        &self.members
    }

    /// Run every learner in ensemble order. The first failure aborts.
    pub fn predict_all(
        &self,
        standardized: &[f64; NUM_FEATURES],
    ) -> Result<Vec<ClassScores>, PipelineError> {
        let mut outputs = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let scores = member
                .model
                .predict_proba(standardized)
                .and_then(ClassScores::from_probabilities)
                .map_err(|cause| PipelineError::BaseLearner {
                    name: member.name.clone(),
                    cause,
                })?;
            debug!(
                learner = %member.name,
                family = member.model.family(),
                probs = ?scores.to_array(),
                "base learner output"
            );
            outputs.push(scores);
        }
        Ok(outputs)
    }
}
