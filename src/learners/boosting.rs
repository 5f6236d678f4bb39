//! Gradient-boosted tree ensembles.
//!
//! Two layouts are supported:
//! - [`GradientBoosting`]: depth-wise regression trees, one tree per class
//!   per round (XGBoost `multi:softprob` dumps).
//! - [`ObliviousBoosting`]: symmetric trees where every node on a level
//!   shares one split, so a leaf is addressed by a bit mask (CatBoost
//!   `MultiClass` dumps).
//!
//! Both accumulate per-class margins and finish with a softmax.

use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, SplitRule};
use super::{check_input, normalize, ProbabilisticClassifier};
use crate::error::ModelError;
use crate::scores::{softmax, NUM_CLASSES};

/// A regression tree contributing to one class margin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedTree {
    pub class: usize,
    pub tree: DecisionTree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub n_features: usize,
    /// Initial margin per class.
    #[serde(default)]
    pub base_score: [f64; NUM_CLASSES],
    pub trees: Vec<BoostedTree>,
    #[serde(default = "default_gbdt_split")]
    pub split: SplitRule,
}

fn default_gbdt_split() -> SplitRule {
    SplitRule::Less
}

impl GradientBoosting {
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("gradient boosting model has no trees".into());
        }
        if self.base_score.iter().any(|b| !b.is_finite()) {
            return Err("non-finite base score".into());
        }
        for (i, t) in self.trees.iter().enumerate() {
            if t.class >= NUM_CLASSES {
                return Err(format!("tree {} targets class {}", i, t.class));
            }
            t.tree
                .validate(self.n_features, 1)
                .map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }

    pub fn margins(&self, x: &[f64]) -> [f64; NUM_CLASSES] {
        let mut margins = self.base_score;
        for t in &self.trees {
            margins[t.class] += t.tree.leaf_value(x, self.split)[0];
        }
        margins
    }
}

impl ProbabilisticClassifier for GradientBoosting {
    fn family(&self) -> &'static str {
        "gradient_boosting"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
        check_input(self.n_features, x)?;
        let margins = self.margins(x);
        if margins.iter().any(|m| !m.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        normalize(softmax(margins))
    }
}

/// One level of an oblivious tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObliviousSplit {
    pub feature: usize,
    pub border: f64,
}

/// Depth-d symmetric tree with `2^d` leaves. Level `i` sets bit `i` of the
/// leaf index when `x[feature] > border`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObliviousTree {
    pub splits: Vec<ObliviousSplit>,
    pub leaf_values: Vec<[f64; NUM_CLASSES]>,
}

impl ObliviousTree {
    fn leaf_index(&self, x: &[f64]) -> usize {
        self.splits
            .iter()
            .enumerate()
            .fold(0usize, |idx, (level, split)| {
                if x[split.feature] > split.border {
                    idx | (1 << level)
                } else {
                    idx
                }
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObliviousBoosting {
    pub n_features: usize,
    /// Multiplier applied to the summed leaf values.
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub bias: [f64; NUM_CLASSES],
    pub trees: Vec<ObliviousTree>,
}

fn default_scale() -> f64 {
    1.0
}

/// CatBoost caps symmetric trees at depth 16.
const MAX_OBLIVIOUS_DEPTH: usize = 16;

impl ObliviousBoosting {
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("oblivious boosting model has no trees".into());
        }
        if !self.scale.is_finite() || self.bias.iter().any(|b| !b.is_finite()) {
            return Err("non-finite scale or bias".into());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            let depth = tree.splits.len();
            if depth > MAX_OBLIVIOUS_DEPTH {
                return Err(format!("tree {} has depth {}", i, depth));
            }
            if tree.leaf_values.len() != 1 << depth {
                return Err(format!(
                    "tree {} has {} leaves, expected {}",
                    i,
                    tree.leaf_values.len(),
                    1usize << depth
                ));
            }
            if let Some(s) = tree
                .splits
                .iter()
                .find(|s| s.feature >= self.n_features || !s.border.is_finite())
            {
                return Err(format!(
                    "tree {} has invalid split on feature {} at {}",
                    i, s.feature, s.border
                ));
            }
            if tree.leaf_values.iter().flatten().any(|v| !v.is_finite()) {
                return Err(format!("tree {} has a non-finite leaf", i));
            }
        }
        Ok(())
    }

    pub fn margins(&self, x: &[f64]) -> [f64; NUM_CLASSES] {
        let mut sum = [0.0; NUM_CLASSES];
        for tree in &self.trees {
            let leaf = &tree.leaf_values[tree.leaf_index(x)];
            for (s, v) in sum.iter_mut().zip(leaf.iter()) {
                *s += v;
            }
        }
        let mut margins = [0.0; NUM_CLASSES];
        for c in 0..NUM_CLASSES {
            margins[c] = self.scale * sum[c] + self.bias[c];
        }
        margins
    }
}

impl ProbabilisticClassifier for ObliviousBoosting {
    fn family(&self) -> &'static str {
        "oblivious_boosting"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
        check_input(self.n_features, x)?;
        let margins = self.margins(x);
        if margins.iter().any(|m| !m.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        normalize(softmax(margins))
    }
}
