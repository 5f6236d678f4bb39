//! Meta-feature assembly: `standardized ++ learner_1 ++ ... ++ learner_K`.

use crate::features::{meta_feature_len, NUM_FEATURES};
use crate::scores::ClassScores;

/// Concatenate the standardized vector with each learner's class
/// probabilities, in ensemble order. Pure; identical inputs give a
/// bit-identical result.
pub fn assemble(standardized: &[f64; NUM_FEATURES], learner_outputs: &[ClassScores]) -> Vec<f64> {
    let mut meta = Vec::with_capacity(meta_feature_len(learner_outputs.len()));
    meta.extend_from_slice(standardized);
    for scores in learner_outputs {
        meta.extend_from_slice(&scores.to_array());
    }
    meta
}
