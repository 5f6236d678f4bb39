//! HTTP endpoint handler functions.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error, warn};

use crate::error::PipelineError;
use crate::explain::Explanation;
use crate::pipeline::{self, Analysis};
use crate::report::{NewReport, ReportQuery};

use super::logging::RecordEvent;
use super::types::*;
use super::ServerState;

/// Maximum request body size in bytes (1 MB).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Upper bound on `limit` for report listings.
pub const MAX_REPORTS_PER_PAGE: usize = 500;

/// Upper bound on MC-dropout passes per request.
pub const MAX_UNCERTAINTY_PASSES: usize = 1000;

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
        PipelineError::MissingArtifact { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::BaseLearner { .. }
        | PipelineError::MetaClassifier(_)
        | PipelineError::AttributionUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fail(
    state: &ServerState,
    status: StatusCode,
    kind: &str,
    message: String,
    start: Instant,
) -> Response {
    state.usage.record_error("predict", kind);
    let body = PredictResponse::failure(message, kind, state.ctx.version(), start);
    (status, Json(body)).into_response()
}

fn pipeline_failure(state: &ServerState, err: PipelineError, start: Instant) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, kind = err.kind(), "prediction failed");
    }
    let kind = err.kind();
    let mut body = PredictResponse::failure(err.to_string(), kind, state.ctx.version(), start);
    if let PipelineError::Validation(issues) = err {
        body.issues = Some(issues);
    }
    state.usage.record_error("predict", kind);
    (status, Json(body)).into_response()
}

/// Run the attribution on the blocking pool under the configured budget.
/// On timeout the blocking task still runs to completion and its result is
/// discarded.
async fn attribute(
    state: &Arc<ServerState>,
    prediction: &pipeline::Prediction,
) -> Result<Explanation, String> {
    let ctx = Arc::clone(&state.ctx);
    let prediction = prediction.clone();
    let config = state.config.explainer;
    let task = tokio::task::spawn_blocking(move || pipeline::explain(&ctx, &prediction, &config));

    let joined = match state.config.attribution_timeout_ms {
        0 => task.await,
        ms => match tokio::time::timeout(Duration::from_millis(ms), task).await {
            Ok(joined) => joined,
            Err(_) => return Err(format!("attribution exceeded {} ms budget", ms)),
        },
    };
    match joined {
        Ok(Ok(explanation)) => Ok(explanation),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("attribution task failed: {}", e)),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let ctx = &state.ctx;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_version: ctx.version().to_string(),
        model_hash: ctx.artifact_hash().to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        base_learners: ctx.ensemble().names().into_iter().map(String::from).collect(),
        attribution_enabled: !state.config.skip_attribution && ctx.background().is_some(),
        background_size: ctx.background().map_or(0, |bg| bg.len()),
        reports_stored: state.store.len(),
    })
}

pub async fn ping_handler() -> &'static str {
    "pong"
}

pub async fn predict_handler(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let start = Instant::now();
    state.usage.ep_predict.fetch_add(1, Ordering::Relaxed);
    match request.extensions().get::<AuthMethod>().copied() {
        Some(AuthMethod::ApiKey) => state.usage.auth_api_key.fetch_add(1, Ordering::Relaxed),
        _ => state.usage.auth_open.fetch_add(1, Ordering::Relaxed),
    };

    let bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            return fail(
                &state,
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("Failed to read request body: {}", e),
                start,
            )
        }
    };
    let req: PredictRequest = match serde_json::from_slice(&bytes) {
        Ok(r) => r,
        Err(e) => {
            return fail(
                &state,
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("Invalid JSON: {}", e),
                start,
            )
        }
    };

    let raw = match req.features.validate() {
        Ok(raw) => raw,
        Err(e) => return pipeline_failure(&state, e, start),
    };

    let passes = req.uncertainty_passes.unwrap_or(0);
    if passes > MAX_UNCERTAINTY_PASSES {
        return fail(
            &state,
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!(
                "uncertainty_passes must be at most {}, got {}",
                MAX_UNCERTAINTY_PASSES, passes
            ),
            start,
        );
    }
    let mc_seed = state.config.explainer.seed.unwrap_or_else(rand::random::<u64>);

    let ctx = Arc::clone(&state.ctx);
    let (prediction, uncertainty) = match tokio::task::spawn_blocking(move || {
        let prediction = pipeline::predict(&ctx, &raw)?;
        let uncertainty = match passes {
            0 => None,
            n => Some(pipeline::uncertainty(&ctx, &prediction, n, mc_seed)?),
        };
        Ok::<_, PipelineError>((prediction, uncertainty))
    })
    .await
    {
        Ok(Ok(p)) => p,
        Ok(Err(e)) => return pipeline_failure(&state, e, start),
        Err(e) => {
            return fail(
                &state,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("Prediction task failed: {}", e),
                start,
            )
        }
    };

    let wants_attribution = !state.config.skip_attribution && req.explain.unwrap_or(true);
    let (attribution, attribution_error) = if wants_attribution {
        match attribute(&state, &prediction).await {
            Ok(exp) => (Some(exp), None),
            Err(reason) => {
                warn!(reason = %reason, "attribution omitted");
                (None, Some(reason))
            }
        }
    } else {
        (None, None)
    };

    let analysis = Analysis {
        prediction,
        attribution,
        attribution_error,
    };

    let new_report = match NewReport::from_analysis(
        &analysis,
        req.patient_name.clone(),
        req.patient_id.clone(),
    ) {
        Ok(r) => r,
        Err(e) => {
            return fail(
                &state,
                StatusCode::INTERNAL_SERVER_ERROR,
                "report_store_error",
                format!("Failed to serialize report: {}", e),
                start,
            )
        }
    };
    let report = match state.store.insert(new_report) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to persist report");
            return fail(
                &state,
                StatusCode::INTERNAL_SERVER_ERROR,
                "report_store_error",
                format!("Failed to persist report: {}", e),
                start,
            );
        }
    };

    let processing_time_ms = start.elapsed().as_millis() as u64;
    let p = &analysis.prediction;
    state.usage.record(&RecordEvent {
        endpoint: "predict",
        patient_id: req.patient_id.as_deref(),
        class: p.class,
        probability: p.probability,
        attributed: analysis.attribution.is_some(),
        attribution_omitted: analysis.attribution_error.is_some(),
        report_id: report.id,
        processing_time_ms,
    });
    debug!(
        report_id = report.id,
        class_index = p.class_index,
        probability = p.probability,
        processing_time_ms,
        "prediction served"
    );

    let response = PredictResponse {
        success: true,
        error: None,
        error_kind: None,
        issues: None,
        prediction: Some(PredictionResult {
            class_index: p.class_index,
            class_label: p.class.as_str().to_string(),
            probability: p.probability,
            scores: p.scores,
            entropy: p.entropy,
            uncertain: p.uncertain,
            base_value: analysis.attribution.as_ref().map(|a| a.base_value),
            attribution: analysis.attribution.map(|a| a.contributions),
            attribution_error: analysis.attribution_error,
            uncertainty,
            report_id: report.id,
        }),
        processing_time_ms,
        model_version: state.ctx.version().to_string(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

pub async fn reports_handler(
    State(state): State<Arc<ServerState>>,
    Query(mut query): Query<ReportQuery>,
) -> impl IntoResponse {
    state.usage.ep_reports.fetch_add(1, Ordering::Relaxed);
    query.limit = Some(query.limit.unwrap_or(MAX_REPORTS_PER_PAGE).min(MAX_REPORTS_PER_PAGE));
    let reports = state.store.list(&query);
    Json(ReportsResponse {
        success: true,
        count: reports.len(),
        reports,
    })
}

pub async fn stats_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.usage.ep_stats.fetch_add(1, Ordering::Relaxed);
    let u = &state.usage;

    Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        model_hash: state.ctx.artifact_hash().to_string(),
        requests: RequestStats {
            total: u.total_requests.load(Ordering::Relaxed),
            errors: u.total_errors.load(Ordering::Relaxed),
            validation_errors: u.validation_errors.load(Ordering::Relaxed),
        },
        classifications: ClassificationStats {
            normal: u.normal.load(Ordering::Relaxed),
            suspect: u.suspect.load(Ordering::Relaxed),
            pathological: u.pathological.load(Ordering::Relaxed),
        },
        attribution: AttributionStats {
            computed: u.attribution_computed.load(Ordering::Relaxed),
            omitted: u.attribution_omitted.load(Ordering::Relaxed),
        },
        endpoints: EndpointStats {
            predict: u.ep_predict.load(Ordering::Relaxed),
            reports: u.ep_reports.load(Ordering::Relaxed),
            stats: u.ep_stats.load(Ordering::Relaxed),
        },
        auth: AuthStats {
            api_key: u.auth_api_key.load(Ordering::Relaxed),
            open: u.auth_open.load(Ordering::Relaxed),
        },
    })
}
