//! CTG measurement vector and meta-feature naming.
//!
//! The raw input is a fixed, ordered set of 21 cardiotocography measurements.
//! Position matters: the scaler, every base learner, and the meta-classifier
//! were fit against this exact column order.
//!
//! Feature indices:
//!  0: LB        baseline heart rate       11: Width     histogram width
//!  1: AC        accelerations             12: Min       histogram minimum
//!  2: FM        fetal movements           13: Max       histogram maximum
//!  3: UC        uterine contractions      14: Nmax      histogram peaks
//!  4: ASTV      % abnormal short-term var 15: Nzeros    histogram zeros
//!  5: MSTV      mean short-term var       16: Mode      histogram mode
//!  6: ALTV      % abnormal long-term var  17: Mean      histogram mean
//!  7: MLTV      mean long-term var        18: Median    histogram median
//!  8: DL        light decelerations       19: Variance  histogram variance
//!  9: DS        severe decelerations      20: Tendency  histogram tendency
//! 10: DP        prolonged decelerations

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PipelineError, ValidationIssues};
use crate::scores::NUM_CLASSES;

/// Number of raw CTG measurements.
pub const NUM_FEATURES: usize = 21;

/// Raw feature names in model column order.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "LB", "AC", "FM", "UC", "ASTV", "MSTV", "ALTV", "MLTV", "DL", "DS", "DP", "Width", "Min",
    "Max", "Nmax", "Nzeros", "Mode", "Mean", "Median", "Variance", "Tendency",
];

/// A validated raw feature vector. Construction guarantees exactly 21 finite
/// values in [`FEATURE_NAMES`] order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawFeatures([f64; NUM_FEATURES]);

impl RawFeatures {
    /// Build from a named JSON object. Extra keys are ignored; every missing,
    /// non-numeric, or non-finite feature is reported together.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, PipelineError> {
        let mut issues = ValidationIssues::default();
        let mut values = [0.0; NUM_FEATURES];

        for (i, name) in FEATURE_NAMES.iter().enumerate() {
            match map.get(*name) {
                None => issues.missing.push((*name).to_string()),
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(v) if v.is_finite() => values[i] = v,
                    _ => issues.non_finite.push((*name).to_string()),
                },
                Some(_) => issues.non_numeric.push((*name).to_string()),
            }
        }

        if issues.is_empty() {
            Ok(Self(values))
        } else {
            Err(PipelineError::Validation(issues))
        }
    }

    /// Build from an ordered list of values in [`FEATURE_NAMES`] order.
    pub fn from_ordered(values: &[f64]) -> Result<Self, PipelineError> {
        if values.len() != NUM_FEATURES {
            return Err(PipelineError::Validation(ValidationIssues {
                length_mismatch: Some((NUM_FEATURES, values.len())),
                ..Default::default()
            }));
        }

        let non_finite: Vec<String> = values
            .iter()
            .zip(FEATURE_NAMES.iter())
            .filter(|(v, _)| !v.is_finite())
            .map(|(_, name)| (*name).to_string())
            .collect();
        if !non_finite.is_empty() {
            return Err(PipelineError::Validation(ValidationIssues {
                non_finite,
                ..Default::default()
            }));
        }

        let mut out = [0.0; NUM_FEATURES];
        out.copy_from_slice(values);
        Ok(Self(out))
    }

    /// Build from `(name, value)` pairs in any order.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let given: HashMap<&str, f64> = pairs.into_iter().collect();
        let mut issues = ValidationIssues::default();
        let mut values = [0.0; NUM_FEATURES];

        for (i, name) in FEATURE_NAMES.iter().enumerate() {
            match given.get(name) {
                None => issues.missing.push((*name).to_string()),
                Some(v) if !v.is_finite() => issues.non_finite.push((*name).to_string()),
                Some(v) => values[i] = *v,
            }
        }

        if issues.is_empty() {
            Ok(Self(values))
        } else {
            Err(PipelineError::Validation(issues))
        }
    }

    pub fn values(&self) -> &[f64; NUM_FEATURES] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }
}

/// Raw features as posted by clients: either a named object or an ordered
/// array of 21 numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureInput {
    Ordered(Vec<Value>),
    Named(Map<String, Value>),
}

impl FeatureInput {
    pub fn validate(&self) -> Result<RawFeatures, PipelineError> {
        match self {
            Self::Named(map) => RawFeatures::from_map(map),
            Self::Ordered(values) => {
                let mut issues = ValidationIssues::default();
                if values.len() != NUM_FEATURES {
                    issues.length_mismatch = Some((NUM_FEATURES, values.len()));
                    return Err(PipelineError::Validation(issues));
                }
                let mut out = Vec::with_capacity(NUM_FEATURES);
                for (value, name) in values.iter().zip(FEATURE_NAMES.iter()) {
                    match value.as_f64() {
                        Some(v) => out.push(v),
                        None => {
                            issues.non_numeric.push((*name).to_string());
                            out.push(0.0);
                        }
                    }
                }
                if !issues.is_empty() {
                    return Err(PipelineError::Validation(issues));
                }
                RawFeatures::from_ordered(&out)
            }
        }
    }
}

/// Meta-feature column names for an ensemble in the given order:
/// the 21 raw names followed by `{learner}_p{class}` for every learner.
pub fn meta_feature_names<S: AsRef<str>>(learner_names: &[S]) -> Vec<String> {
    let mut names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
    for learner in learner_names {
        for class in 0..NUM_CLASSES {
            names.push(format!("{}_p{}", learner.as_ref(), class));
        }
    }
    names
}

/// Length of the meta-feature vector for `k` base learners.
pub const fn meta_feature_len(k: usize) -> usize {
    NUM_FEATURES + NUM_CLASSES * k
}
