//! FetalGuard: fetal health risk classification from cardiotocography.
//!
//! Classifies a CTG recording into one of three categories:
//! - **NORMAL** (1)
//! - **SUSPECT** (2)
//! - **PATHOLOGICAL** (3)
//!
//! The model is a two-layer stacked ensemble. Raw measurements are
//! standardized, four base learners (RBF SVM, random forest, gradient
//! boosting, oblivious-tree boosting) each produce a class distribution, and
//! a dropout MLP classifies the concatenation. Every prediction can be
//! explained with Kernel SHAP over the 33 meta-features.
//!
//! ```no_run
//! use std::path::Path;
//! use fetalguard::{analyze, AttributionPolicy, ExplainerConfig, ModelContext, RawFeatures};
//!
//! let ctx = ModelContext::load(Path::new("artifacts"))?;
//! let raw = RawFeatures::from_ordered(&[
//!     120.0, 0.0, 0.0, 0.0, 73.0, 0.5, 43.0, 2.4, 0.0, 0.0, 0.0,
//!     64.0, 62.0, 126.0, 2.0, 0.0, 120.0, 137.0, 121.0, 73.0, 1.0,
//! ])?;
//! let analysis = analyze(&ctx, &raw, AttributionPolicy::BestEffort, &ExplainerConfig::default())?;
//! println!("class {} p={:.3}", analysis.prediction.class_index, analysis.prediction.probability);
//! # Ok::<(), fetalguard::PipelineError>(())
//! ```
//!
//! Uses structured logging via [`tracing`]. Set the `RUST_LOG` environment
//! variable to control log verbosity (e.g., `RUST_LOG=fetalguard=debug`).

pub mod artifacts;
pub mod assembler;
pub mod background;
pub mod error;
pub mod explain;
pub mod features;
pub mod learners;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod scaler;
pub mod scores;
pub mod server;

pub use artifacts::{ArtifactManifest, ModelContext};
pub use background::{summarize, BackgroundSet, SummarizerConfig};
pub use error::{ModelError, PipelineError, ValidationIssues};
pub use explain::{Explanation, ExplainerConfig, FeatureContribution};
pub use features::{FeatureInput, RawFeatures, FEATURE_NAMES, NUM_FEATURES};
pub use model::{InferenceMode, MetaClassifier};
pub use pipeline::{analyze, explain, predict, Analysis, AttributionPolicy, Prediction};
pub use scores::{ClassScores, FetalHealth};
