//! Artifact manifest and the immutable model context.
//!
//! An artifact directory holds a `manifest.json` naming every fitted
//! component:
//!
//! ```json
//! {
//!   "version": "2024-05-ctg",
//!   "scaler": "scaler.json",
//!   "base_learners": [
//!     { "name": "SVM", "path": "svm.json" },
//!     { "name": "RandomForest", "path": "rf.json" },
//!     { "name": "XGBoost", "path": "xgb.json" },
//!     { "name": "CatBoost", "path": "cat.json" }
//!   ],
//!   "meta_classifier": "meta.json",
//!   "background": "background.json"
//! }
//! ```
//!
//! The order of `base_learners` is the ensemble order and therefore the
//! meta-feature column order. Loading is all-or-nothing: anything absent,
//! unparsable or dimensionally inconsistent fails with
//! [`PipelineError::MissingArtifact`] before a single request is served.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::background::BackgroundSet;
use crate::error::PipelineError;
use crate::features::{meta_feature_len, meta_feature_names};
use crate::learners::{BaseLearner, Ensemble, LearnerArtifact};
use crate::model::MetaClassifier;
use crate::scaler::FeatureScaler;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Version prefix for artifact hashes. Bump when the hashed layout changes.
const ARTIFACT_HASH_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerEntry {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub version: String,
    pub scaler: String,
    pub base_learners: Vec<LearnerEntry>,
    pub meta_classifier: String,
    pub background: String,
}

/// Everything inference needs, loaded once and shared read-only.
#[derive(Debug)]
pub struct ModelContext {
    version: String,
    scaler: FeatureScaler,
    ensemble: Ensemble,
    meta: MetaClassifier,
    background: Option<BackgroundSet>,
    meta_feature_names: Vec<String>,
    artifact_hash: String,
}

fn read_artifact(dir: &Path, rel: &str, artifact: &str) -> Result<Vec<u8>, PipelineError> {
    let path = dir.join(rel);
    fs::read(&path).map_err(|e| {
        PipelineError::missing_artifact(artifact, format!("{}: {}", path.display(), e))
    })
}

fn parse_artifact<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
    artifact: &str,
) -> Result<T, PipelineError> {
    serde_json::from_slice(bytes).map_err(|e| PipelineError::missing_artifact(artifact, e))
}

impl ModelContext {
    /// Assemble and cross-check a context from in-memory parts.
    ///
    /// The hash covers the version, the scaler, learner names and families,
    /// the meta-classifier and the background. [`ModelContext::load`] hashes
    /// the artifact bytes instead.
    pub fn new(
        version: impl Into<String>,
        scaler: FeatureScaler,
        ensemble: Ensemble,
        meta: MetaClassifier,
        background: Option<BackgroundSet>,
    ) -> Result<Self, PipelineError> {
        let version = version.into();
        let mut hasher = Sha256::new();
        hasher.update(ARTIFACT_HASH_VERSION.as_bytes());
        hasher.update(version.as_bytes());
        let parts = [
            serde_json::to_vec(&scaler),
            serde_json::to_vec(&meta),
            serde_json::to_vec(&background),
        ];
        for part in parts {
            let bytes = part.map_err(|e| PipelineError::missing_artifact("context", e))?;
            hasher.update(&bytes);
        }
        for member in ensemble.members() {
            hasher.update(member.name.as_bytes());
            hasher.update(member.model.family().as_bytes());
        }
        let hash = format!("sha256:{}", hex::encode(hasher.finalize()));
        Self::assemble(version, scaler, ensemble, meta, background, hash)
    }

    fn assemble(
        version: String,
        scaler: FeatureScaler,
        ensemble: Ensemble,
        meta: MetaClassifier,
        background: Option<BackgroundSet>,
        artifact_hash: String,
    ) -> Result<Self, PipelineError> {
        scaler.validate()?;
        let meta_feature_names = meta_feature_names(&ensemble.names());
        debug_assert_eq!(meta_feature_names.len(), meta_feature_len(ensemble.len()));
        meta.validate(meta_feature_names.len())?;
        if let Some(bg) = &background {
            bg.validate(&meta_feature_names)?;
        }
        Ok(Self {
            version,
            scaler,
            ensemble,
            meta,
            background,
            meta_feature_names,
            artifact_hash,
        })
    }

    /// Load every artifact named by `dir/manifest.json`.
    pub fn load(dir: &Path) -> Result<Self, PipelineError> {
        Self::load_with(dir, true)
    }

    /// Load everything except the background set, which may not exist yet
    /// when one is being summarized for a freshly fitted model.
    pub fn load_without_background(dir: &Path) -> Result<Self, PipelineError> {
        Self::load_with(dir, false)
    }

    fn load_with(dir: &Path, with_background: bool) -> Result<Self, PipelineError> {
        let manifest_bytes = read_artifact(dir, MANIFEST_FILE, "manifest")?;
        let manifest: ArtifactManifest = parse_artifact(&manifest_bytes, "manifest")?;

        let mut hasher = Sha256::new();
        hasher.update(ARTIFACT_HASH_VERSION.as_bytes());
        hasher.update(manifest.version.as_bytes());

        let bytes = read_artifact(dir, &manifest.scaler, "scaler")?;
        hasher.update(&bytes);
        let scaler: FeatureScaler = parse_artifact(&bytes, "scaler")?;

        let mut members = Vec::with_capacity(manifest.base_learners.len());
        for entry in &manifest.base_learners {
            let bytes = read_artifact(dir, &entry.path, &entry.name)?;
            hasher.update(entry.name.as_bytes());
            hasher.update(&bytes);
            let artifact: LearnerArtifact = parse_artifact(&bytes, &entry.name)?;
            let model = artifact
                .into_classifier()
                .map_err(|e| PipelineError::missing_artifact(entry.name.clone(), e))?;
            members.push(BaseLearner::new(entry.name.clone(), model));
        }
        let ensemble = Ensemble::new(members)?;

        let bytes = read_artifact(dir, &manifest.meta_classifier, "meta_classifier")?;
        hasher.update(&bytes);
        let meta: MetaClassifier = parse_artifact(&bytes, "meta_classifier")?;

        let background = if with_background {
            let bytes = read_artifact(dir, &manifest.background, "background")?;
            hasher.update(&bytes);
            Some(parse_artifact::<BackgroundSet>(&bytes, "background")?)
        } else {
            None
        };

        let hash = format!("sha256:{}", hex::encode(hasher.finalize()));
        let ctx = Self::assemble(manifest.version, scaler, ensemble, meta, background, hash)?;
        info!(
            version = %ctx.version,
            learners = ?ctx.ensemble.names(),
            background_rows = ctx.background.as_ref().map_or(0, BackgroundSet::len),
            hash = %ctx.artifact_hash,
            "artifacts loaded"
        );
        Ok(ctx)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scaler(&self) -> &FeatureScaler {
        &self.scaler
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn meta(&self) -> &MetaClassifier {
        &self.meta
    }

    pub fn background(&self) -> Option<&BackgroundSet> {
        self.background.as_ref()
    }

    pub fn meta_feature_names(&self) -> &[String] {
        &self.meta_feature_names
    }

    pub fn artifact_hash(&self) -> &str {
        &self.artifact_hash
    }
}

/// Write `manifest` plus the component files into `dir`.
pub fn write_artifacts(
    dir: &Path,
    manifest: &ArtifactManifest,
    scaler: &FeatureScaler,
    learners: &[LearnerArtifact],
    meta: &MetaClassifier,
    background: &BackgroundSet,
) -> eyre::Result<()> {
    use eyre::{ensure, WrapErr};

    ensure!(
        learners.len() == manifest.base_learners.len(),
        "{} learner artifacts for {} manifest entries",
        learners.len(),
        manifest.base_learners.len()
    );
    fs::create_dir_all(dir).wrap_err_with(|| format!("creating {}", dir.display()))?;
    let write = |rel: &str, bytes: Vec<u8>| -> eyre::Result<()> {
        let path = dir.join(rel);
        fs::write(&path, bytes).wrap_err_with(|| format!("writing {}", path.display()))
    };
    write(MANIFEST_FILE, serde_json::to_vec_pretty(manifest)?)?;
    write(&manifest.scaler, serde_json::to_vec(scaler)?)?;
    for (entry, learner) in manifest.base_learners.iter().zip(learners) {
        write(&entry.path, serde_json::to_vec(learner)?)?;
    }
    write(&manifest.meta_classifier, serde_json::to_vec(meta)?)?;
    write(&manifest.background, serde_json::to_vec(background)?)?;
    Ok(())
}
