//! ClassScores: validated class distributions and the predicted class.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Number of fetal health classes.
pub const NUM_CLASSES: usize = 3;

/// Tolerance for a distribution's sum.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-6;

/// Normalized entropy above which a prediction is flagged as uncertain.
///
/// At 0.85 no class exceeds roughly half the mass, which for a three-way
/// triage is not actionable on its own.
pub const ENTROPY_UNCERTAIN_THRESHOLD: f64 = 0.85;

/// Fetal health status (NSP label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetalHealth {
    Normal,
    Suspect,
    Pathological,
}

impl FetalHealth {
    /// From a zero-based model output index.
    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::Normal),
            1 => Some(Self::Suspect),
            2 => Some(Self::Pathological),
            _ => None,
        }
    }

    /// One-based clinical class index: 1 = Normal, 2 = Suspect, 3 = Pathological.
    pub fn class_index(&self) -> u8 {
        match self {
            Self::Normal => 1,
            Self::Suspect => 2,
            Self::Pathological => 3,
        }
    }

    pub fn output_index(&self) -> usize {
        self.class_index() as usize - 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Suspect => "SUSPECT",
            Self::Pathological => "PATHOLOGICAL",
        }
    }
}

/// A validated 3-class probability distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    #[serde(rename = "NORMAL")]
    pub normal: f64,
    #[serde(rename = "SUSPECT")]
    pub suspect: f64,
    #[serde(rename = "PATHOLOGICAL")]
    pub pathological: f64,
}

impl ClassScores {
    /// Accept `probs` only if every entry is finite and non-negative and the
    /// sum is 1 within [`PROBABILITY_SUM_TOLERANCE`].
    pub fn from_probabilities(probs: [f64; NUM_CLASSES]) -> Result<Self, ModelError> {
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        if let Some(p) = probs.iter().find(|p| **p < 0.0) {
            return Err(ModelError::InvalidDistribution(format!(
                "negative probability {}",
                p
            )));
        }
        let total: f64 = probs.iter().sum();
        if (total - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(ModelError::InvalidDistribution(format!(
                "probabilities sum to {}",
                total
            )));
        }
        Ok(Self {
            normal: probs[0],
            suspect: probs[1],
            pathological: probs[2],
        })
    }

    pub fn to_array(&self) -> [f64; NUM_CLASSES] {
        [self.normal, self.suspect, self.pathological]
    }

    /// Most likely class; exact ties resolve to the lowest index.
    pub fn predicted(&self) -> (FetalHealth, f64) {
        let idx = argmax(&self.to_array());
        let class = FetalHealth::from_index(idx).unwrap_or(FetalHealth::Normal);
        (class, self.to_array()[idx])
    }

    /// Shannon entropy normalized to [0, 1] (1 = uniform).
    pub fn entropy(&self) -> f64 {
        let max_entropy = (NUM_CLASSES as f64).ln();
        let h: f64 = self
            .to_array()
            .iter()
            .filter(|p| **p > 1e-15)
            .map(|p| -p * p.ln())
            .sum();
        h / max_entropy
    }

    pub fn is_uncertain(&self) -> bool {
        self.entropy() > ENTROPY_UNCERTAIN_THRESHOLD
    }
}

/// Index of the maximum element. Only a strictly greater value displaces the
/// current best, so the first of equal maxima wins.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Numerically stable softmax over `NUM_CLASSES` margins.
pub fn softmax(margins: [f64; NUM_CLASSES]) -> [f64; NUM_CLASSES] {
    let max = margins.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut out = margins.map(|m| (m - max).exp());
    let total: f64 = out.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return [1.0 / NUM_CLASSES as f64; NUM_CLASSES];
    }
    for v in out.iter_mut() {
        *v /= total;
    }
    out
}
