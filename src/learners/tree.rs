//! Flat-array binary decision trees shared by the tree-based learners.
//!
//! Nodes are stored structure-of-arrays style, one entry per node. A node is
//! a leaf when `children_left[node] < 0`. Children always have a larger index
//! than their parent, which both scikit-learn and XGBoost dumps satisfy and
//! which guarantees traversal terminates.

use serde::{Deserialize, Serialize};

/// Which side a value equal to the threshold goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitRule {
    /// `x <= threshold` goes left (scikit-learn).
    #[default]
    LessOrEqual,
    /// `x < threshold` goes left (XGBoost).
    Less,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub children_left: Vec<i32>,
    pub children_right: Vec<i32>,
    pub features: Vec<usize>,
    pub thresholds: Vec<f64>,
    /// Per-node output vector; only leaf entries are read.
    pub values: Vec<Vec<f64>>,
}

impl DecisionTree {
    pub fn node_count(&self) -> usize {
        self.children_left.len()
    }

    #[inline]
    fn is_leaf(&self, node: usize) -> bool {
        self.children_left[node] < 0
    }

    /// Output vector of the leaf `x` falls into.
    pub fn leaf_value(&self, x: &[f64], rule: SplitRule) -> &[f64] {
        let mut node = 0;
        while !self.is_leaf(node) {
            let v = x[self.features[node]];
            let go_left = match rule {
                SplitRule::LessOrEqual => v <= self.thresholds[node],
                SplitRule::Less => v < self.thresholds[node],
            };
            node = if go_left {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        &self.values[node]
    }

    /// Structural checks: consistent array lengths, forward-only children,
    /// in-range features, finite thresholds and leaf outputs of `n_outputs`.
    pub fn validate(&self, n_features: usize, n_outputs: usize) -> Result<(), String> {
        let n = self.node_count();
        if n == 0 {
            return Err("tree has no nodes".into());
        }
        if self.children_right.len() != n
            || self.features.len() != n
            || self.thresholds.len() != n
            || self.values.len() != n
        {
            return Err(format!("tree arrays disagree on node count {}", n));
        }
        for node in 0..n {
            let left = self.children_left[node];
            let right = self.children_right[node];
            if left < 0 {
                if self.values[node].len() != n_outputs {
                    return Err(format!(
                        "leaf {} has {} outputs, expected {}",
                        node,
                        self.values[node].len(),
                        n_outputs
                    ));
                }
                if self.values[node].iter().any(|v| !v.is_finite()) {
                    return Err(format!("leaf {} has a non-finite output", node));
                }
                continue;
            }
            for child in [left, right] {
                if child as usize <= node || child as usize >= n {
                    return Err(format!("node {} has invalid child {}", node, child));
                }
            }
            if self.features[node] >= n_features {
                return Err(format!(
                    "node {} splits on feature {} of {}",
                    node, self.features[node], n_features
                ));
            }
            if !self.thresholds[node].is_finite() {
                return Err(format!("node {} has a non-finite threshold", node));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn stump(feature: usize, threshold: f64, left: Vec<f64>, right: Vec<f64>) -> DecisionTree {
    DecisionTree {
        children_left: vec![1, -1, -1],
        children_right: vec![2, -1, -1],
        features: vec![feature, 0, 0],
        thresholds: vec![threshold, 0.0, 0.0],
        values: vec![vec![0.0; left.len()], left, right],
    }
}
