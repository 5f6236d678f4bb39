//! Request/response types and configuration for the FetalGuard server.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use crate::error::ValidationIssues;
use crate::explain::{ExplainerConfig, FeatureContribution};
use crate::features::FeatureInput;
use crate::model::UncertaintyEstimate;
use crate::report::AnalysisReport;
use crate::scores::ClassScores;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to (defaults to [`DEFAULT_BIND_ADDR`]; use 0.0.0.0 to expose externally)
    pub bind_addr: SocketAddr,
    /// Directory holding `manifest.json` and the artifacts it lists.
    pub artifacts_dir: PathBuf,
    /// JSONL report store. `None` keeps reports in memory only.
    pub reports_path: Option<PathBuf>,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: u32,
    /// Path for JSONL access log
    pub access_log_path: String,
    /// Maximum access log file size in bytes before rotation (0 = no limit)
    pub max_access_log_bytes: u64,
    /// Directory for the periodic `metrics.json` snapshot.
    pub metrics_dir: String,
    /// Optional API key for bearer token authentication on /api/v1/* endpoints.
    /// If None, auth is disabled.
    pub api_key: Option<String>,
    /// Never compute attributions; predictions are returned without them.
    pub skip_attribution: bool,
    /// Wall-clock budget for one attribution in milliseconds (0 = unbounded).
    /// A prediction whose attribution overruns is returned without one.
    pub attribution_timeout_ms: u64,
    pub explainer: ExplainerConfig,
}

/// Loopback by default; exposing the service is an explicit choice.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Default directory for metrics persistence.
pub const DEFAULT_METRICS_DIR: &str = ".";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            artifacts_dir: PathBuf::from("artifacts"),
            reports_path: Some(PathBuf::from("fetalguard-reports.jsonl")),
            rate_limit_rpm: 60,
            access_log_path: "fetalguard-access.jsonl".to_string(),
            max_access_log_bytes: 50 * 1024 * 1024, // 50 MB
            api_key: None,
            skip_attribution: false,
            attribution_timeout_ms: 10_000,
            explainer: ExplainerConfig::default(),
            metrics_dir: DEFAULT_METRICS_DIR.to_string(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("artifacts_dir", &self.artifacts_dir)
            .field("reports_path", &self.reports_path)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("access_log_path", &self.access_log_path)
            .field("max_access_log_bytes", &self.max_access_log_bytes)
            .field("metrics_dir", &self.metrics_dir)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("skip_attribution", &self.skip_attribution)
            .field("attribution_timeout_ms", &self.attribution_timeout_ms)
            .field("explainer", &self.explainer)
            .finish()
    }
}

/// How the request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Valid bearer token.
    ApiKey,
    /// No API key configured.
    Open,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    /// 21 raw CTG values, named or in canonical order.
    pub features: FeatureInput,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    /// Set to false to skip attribution for this request.
    #[serde(default)]
    pub explain: Option<bool>,
    /// MC-dropout passes for an uncertainty estimate. Absent or 0 skips it.
    #[serde(default)]
    pub uncertainty_passes: Option<usize>,
}

/// Classification result returned on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// 1 = Normal, 2 = Suspect, 3 = Pathological.
    pub class_index: u8,
    pub class_label: String,
    pub probability: f64,
    pub scores: ClassScores,
    pub entropy: f64,
    pub uncertain: bool,
    /// Absolute contributions over the meta-features, in meta-feature order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Vec<FeatureContribution>>,
    /// Expected model output over the background set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
    /// Why the attribution is absent, when it was requested but failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution_error: Option<String>,
    /// Per-class MC-dropout mean and standard deviation, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<UncertaintyEstimate>,
    pub report_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable failure tag (`validation_error`, `base_learner_error`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<ValidationIssues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionResult>,
    pub processing_time_ms: u64,
    pub model_version: String,
}

impl PredictResponse {
    pub fn failure(
        error: impl Into<String>,
        kind: &str,
        model_version: &str,
        start: Instant,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_kind: Some(kind.to_string()),
            issues: None,
            prediction: None,
            processing_time_ms: start.elapsed().as_millis() as u64,
            model_version: model_version.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsResponse {
    pub success: bool,
    pub count: usize,
    pub reports: Vec<AnalysisReport>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_version: String,
    pub model_hash: String,
    pub uptime_seconds: u64,
    pub base_learners: Vec<String>,
    pub attribution_enabled: bool,
    pub background_size: usize,
    pub reports_stored: usize,
}

/// Stats response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub model_hash: String,
    pub requests: RequestStats,
    pub classifications: ClassificationStats,
    pub attribution: AttributionStats,
    pub endpoints: EndpointStats,
    pub auth: AuthStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestStats {
    pub total: u64,
    pub errors: u64,
    pub validation_errors: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassificationStats {
    pub normal: u64,
    pub suspect: u64,
    pub pathological: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttributionStats {
    pub computed: u64,
    pub omitted: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointStats {
    pub predict: u64,
    pub reports: u64,
    pub stats: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthStats {
    pub api_key: u64,
    pub open: u64,
}
