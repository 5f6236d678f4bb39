//! Random forest: mean of per-tree leaf class distributions.

use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, SplitRule};
use super::{check_input, normalize, ProbabilisticClassifier};
use crate::error::ModelError;
use crate::scores::NUM_CLASSES;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    /// Leaf values hold class counts or fractions; each leaf is normalized
    /// before averaging.
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("random forest has no trees".into());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, NUM_CLASSES)
                .map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

impl ProbabilisticClassifier for RandomForest {
    fn family(&self) -> &'static str {
        "random_forest"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
        check_input(self.n_features, x)?;
        let mut acc = [0.0; NUM_CLASSES];
        for tree in &self.trees {
            let leaf = tree.leaf_value(x, SplitRule::LessOrEqual);
            let mut dist = [0.0; NUM_CLASSES];
            dist.copy_from_slice(leaf);
            let dist = normalize(dist)?;
            for (a, d) in acc.iter_mut().zip(dist.iter()) {
                *a += d;
            }
        }
        let n = self.trees.len() as f64;
        normalize(acc.map(|a| a / n))
    }
}
