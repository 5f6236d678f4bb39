//! End-to-end inference: raw features to prediction and attribution.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::artifacts::ModelContext;
use crate::assembler::assemble;
use crate::error::PipelineError;
use crate::explain::{Explanation, ExplainerConfig, KernelExplainer};
use crate::features::RawFeatures;
use crate::model::UncertaintyEstimate;
use crate::scores::{ClassScores, FetalHealth};

/// Output of the stacked ensemble for one input.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub class: FetalHealth,
    /// 1 = Normal, 2 = Suspect, 3 = Pathological.
    pub class_index: u8,
    /// Probability of `class`.
    pub probability: f64,
    pub scores: ClassScores,
    pub entropy: f64,
    pub uncertain: bool,
    /// Per-learner distributions, in ensemble order.
    pub learner_scores: Vec<LearnerScores>,
    #[serde(skip)]
    pub meta_features: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerScores {
    pub name: String,
    pub scores: ClassScores,
}

/// What to do about attribution in [`analyze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributionPolicy {
    Skip,
    /// Attribution failures are reported next to the prediction.
    #[default]
    BestEffort,
    /// Attribution failures fail the whole call.
    Required,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub prediction: Prediction,
    pub attribution: Option<Explanation>,
    pub attribution_error: Option<String>,
}

/// Turn a validated meta-classifier distribution into the reported class.
fn finish_scores(scores: ClassScores) -> (FetalHealth, f64) {
    let (class, probability) = scores.predicted();
    debug!(
        normal = scores.normal,
        suspect = scores.suspect,
        pathological = scores.pathological,
        entropy = scores.entropy(),
        top_class = class.as_str(),
        top_probability = probability,
        "meta-classifier output"
    );
    (class, probability)
}

/// Scale, run every base learner and assemble.
fn meta_features(
    ctx: &ModelContext,
    raw: &RawFeatures,
) -> Result<(Vec<ClassScores>, Vec<f64>), PipelineError> {
    let standardized = ctx.scaler().transform(raw)?;
    let outputs = ctx.ensemble().predict_all(&standardized)?;
    let assembled = assemble(&standardized, &outputs);
    Ok((outputs, assembled))
}

/// Meta-feature rows for a corpus of raw records, the input to background
/// summarization. Records that fail validation are skipped with a warning
/// and counted in the second element.
pub fn corpus_meta_features(
    ctx: &ModelContext,
    records: &[Map<String, Value>],
) -> Result<(Vec<Vec<f64>>, usize), PipelineError> {
    let mut rows = Vec::with_capacity(records.len());
    let mut dropped = 0;
    for (i, record) in records.iter().enumerate() {
        match RawFeatures::from_map(record).and_then(|raw| meta_features(ctx, &raw)) {
            Ok((_, row)) => rows.push(row),
            Err(e @ PipelineError::Validation(_)) => {
                warn!(row = i, error = %e, "dropping corpus row");
                dropped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok((rows, dropped))
}

/// Scale, run every base learner, assemble and classify.
pub fn predict(ctx: &ModelContext, raw: &RawFeatures) -> Result<Prediction, PipelineError> {
    let (outputs, meta_features) = meta_features(ctx, raw)?;

    let scores = ctx
        .meta()
        .scores(&meta_features)
        .map_err(PipelineError::MetaClassifier)?;
    let (class, probability) = finish_scores(scores);

    let learner_scores = ctx
        .ensemble()
        .names()
        .into_iter()
        .zip(outputs)
        .map(|(name, scores)| LearnerScores {
            name: name.to_string(),
            scores,
        })
        .collect();

    Ok(Prediction {
        class,
        class_index: class.class_index(),
        probability,
        entropy: scores.entropy(),
        uncertain: scores.is_uncertain(),
        scores,
        learner_scores,
        meta_features,
    })
}

/// Attribute the predicted class over the meta-feature vector.
pub fn explain(
    ctx: &ModelContext,
    prediction: &Prediction,
    config: &ExplainerConfig,
) -> Result<Explanation, PipelineError> {
    let background = ctx.background().ok_or_else(|| {
        PipelineError::AttributionUnavailable("no background set loaded".into())
    })?;
    KernelExplainer::new(ctx.meta(), background, *config)
        .explain_class(&prediction.meta_features, prediction.class)
}

/// MC-dropout spread of the meta-classifier around this prediction.
pub fn uncertainty(
    ctx: &ModelContext,
    prediction: &Prediction,
    passes: usize,
    seed: u64,
) -> Result<UncertaintyEstimate, PipelineError> {
    ctx.meta()
        .predict_with_uncertainty(&prediction.meta_features, passes, seed)
        .map_err(PipelineError::MetaClassifier)
}

/// Predict, then attribute according to `policy`.
pub fn analyze(
    ctx: &ModelContext,
    raw: &RawFeatures,
    policy: AttributionPolicy,
    config: &ExplainerConfig,
) -> Result<Analysis, PipelineError> {
    let prediction = predict(ctx, raw)?;
    let (attribution, attribution_error) = match policy {
        AttributionPolicy::Skip => (None, None),
        AttributionPolicy::Required => (Some(explain(ctx, &prediction, config)?), None),
        AttributionPolicy::BestEffort => match explain(ctx, &prediction, config) {
            Ok(exp) => (Some(exp), None),
            Err(e) => {
                warn!(error = %e, "attribution omitted");
                (None, Some(e.to_string()))
            }
        },
    };
    Ok(Analysis {
        prediction,
        attribution,
        attribution_error,
    })
}
