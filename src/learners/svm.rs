//! RBF-kernel support vector machine, one-vs-rest with Platt scaling.

use serde::{Deserialize, Serialize};

use super::{check_input, normalize, ProbabilisticClassifier};
use crate::error::ModelError;
use crate::scores::NUM_CLASSES;

/// Binary machine separating one class from the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvrMachine {
    /// One coefficient per support vector (`alpha_i * y_i`); zero for
    /// vectors that do not belong to this machine.
    pub dual_coef: Vec<f64>,
    pub intercept: f64,
    /// Platt sigmoid `1 / (1 + exp(A * d + B))`.
    pub platt_a: f64,
    pub platt_b: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbfSvm {
    pub n_features: usize,
    pub gamma: f64,
    pub support_vectors: Vec<Vec<f64>>,
    /// Indexed by output class.
    pub classes: Vec<OvrMachine>,
}

impl RbfSvm {
    pub fn validate(&self) -> Result<(), String> {
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return Err(format!("invalid gamma {}", self.gamma));
        }
        if self.support_vectors.is_empty() {
            return Err("svm has no support vectors".into());
        }
        if let Some(i) = self
            .support_vectors
            .iter()
            .position(|sv| sv.len() != self.n_features || sv.iter().any(|v| !v.is_finite()))
        {
            return Err(format!("support vector {} is malformed", i));
        }
        if self.classes.len() != NUM_CLASSES {
            return Err(format!(
                "expected {} one-vs-rest machines, got {}",
                NUM_CLASSES,
                self.classes.len()
            ));
        }
        for (c, m) in self.classes.iter().enumerate() {
            if m.dual_coef.len() != self.support_vectors.len() {
                return Err(format!(
                    "class {} has {} dual coefficients for {} support vectors",
                    c,
                    m.dual_coef.len(),
                    self.support_vectors.len()
                ));
            }
            if m.dual_coef.iter().any(|v| !v.is_finite())
                || !m.intercept.is_finite()
                || !m.platt_a.is_finite()
                || !m.platt_b.is_finite()
            {
                return Err(format!("class {} has non-finite parameters", c));
            }
        }
        Ok(())
    }

    fn kernel_row(&self, x: &[f64]) -> Vec<f64> {
        self.support_vectors
            .iter()
            .map(|sv| {
                let d2: f64 = sv.iter().zip(x).map(|(a, b)| (a - b) * (a - b)).sum();
                (-self.gamma * d2).exp()
            })
            .collect()
    }

    /// Raw decision value per class.
    pub fn decision_function(&self, x: &[f64]) -> [f64; NUM_CLASSES] {
        let k = self.kernel_row(x);
        let mut out = [0.0; NUM_CLASSES];
        for (o, m) in out.iter_mut().zip(&self.classes) {
            *o = m.dual_coef.iter().zip(&k).map(|(a, k)| a * k).sum::<f64>() + m.intercept;
        }
        out
    }
}

fn platt(d: f64, a: f64, b: f64) -> f64 {
    let t = a * d + b;
    // Split on sign so exp never overflows.
    if t >= 0.0 {
        let e = (-t).exp();
        e / (1.0 + e)
    } else {
        1.0 / (1.0 + t.exp())
    }
}

impl ProbabilisticClassifier for RbfSvm {
    fn family(&self) -> &'static str {
        "svm"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
        check_input(self.n_features, x)?;
        let decision = self.decision_function(x);
        let mut probs = [0.0; NUM_CLASSES];
        for (c, (p, m)) in probs.iter_mut().zip(&self.classes).enumerate() {
            *p = platt(decision[c], m.platt_a, m.platt_b);
        }
        normalize(probs)
    }
}
