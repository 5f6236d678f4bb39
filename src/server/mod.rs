//! HTTP server for the FetalGuard classifier service.
//!
//! Provides REST API endpoints for CTG risk classification with Kernel SHAP
//! attributions and a persistent report history.
//!
//! Features:
//! - Per-IP rate limiting with automatic eviction when the map exceeds 10k entries
//! - Optional bearer-token auth on `/api/v1/*`
//! - JSONL access logging with size-based rotation (configurable via `max_access_log_bytes`)
//! - Attribution on the blocking pool under a wall-clock budget; on overrun
//!   the prediction is returned without it
//! - Structured logging via [`tracing`]

pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod types;

pub use handlers::{MAX_BODY_BYTES, MAX_REPORTS_PER_PAGE, MAX_UNCERTAINTY_PASSES};
pub use logging::{RecordEvent, UsageMetrics, METRICS_PERSIST_INTERVAL_SECS};
pub use types::{
    AttributionStats, AuthMethod, AuthStats, ClassificationStats, EndpointStats, HealthResponse,
    PredictRequest, PredictResponse, PredictionResult, ReportsResponse, RequestStats,
    ServerConfig, StatsResponse, DEFAULT_BIND_ADDR, DEFAULT_METRICS_DIR,
};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use eyre::{Result, WrapErr};
use lru::LruCache;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::artifacts::ModelContext;
use crate::report::{JsonlReportStore, ReportStore};

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

pub struct ServerState {
    pub config: ServerConfig,
    /// Immutable model artifacts, shared by every request.
    pub ctx: Arc<ModelContext>,
    pub store: Arc<dyn ReportStore>,
    pub start_time: Instant,
    pub rate_limiters: Mutex<LruCache<IpAddr, Arc<middleware::IpRateLimiter>>>,
    pub usage: UsageMetrics,
}

impl ServerState {
    pub fn new(config: ServerConfig, ctx: Arc<ModelContext>, store: Arc<dyn ReportStore>) -> Self {
        let usage = UsageMetrics::new(
            &config.access_log_path,
            config.max_access_log_bytes,
            &config.metrics_dir,
        );
        Self {
            config,
            ctx,
            store,
            start_time: Instant::now(),
            rate_limiters: middleware::new_rate_limiter_cache(),
            usage,
        }
    }

    /// Load artifacts and open the report store named by `config`.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let ctx = ModelContext::load(&config.artifacts_dir).wrap_err_with(|| {
            format!("failed to load artifacts from {}", config.artifacts_dir.display())
        })?;
        let store: Arc<dyn ReportStore> = match &config.reports_path {
            Some(path) => Arc::new(
                JsonlReportStore::open(path)
                    .wrap_err_with(|| format!("failed to open report store {}", path.display()))?,
            ),
            None => Arc::new(JsonlReportStore::in_memory()),
        };
        Ok(Self::new(config, Arc::new(ctx), store))
    }
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// All routes with auth, rate limiting, CORS and the body limit applied.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/predict", post(handlers::predict_handler))
        .route("/api/v1/reports", get(handlers::reports_handler))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/ping", get(handlers::ping_handler))
        .route("/stats", get(handlers::stats_handler))
        .merge(api_routes)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Run the HTTP server until SIGINT/SIGTERM.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let rate_limit_rpm = config.rate_limit_rpm;
    let bind_addr = config.bind_addr;
    let access_log = config.access_log_path.clone();

    let state = Arc::new(ServerState::from_config(config)?);
    info!(
        model_version = state.ctx.version(),
        model_hash = state.ctx.artifact_hash(),
        reports = state.store.len(),
        "model loaded"
    );
    if state.config.skip_attribution {
        info!("attribution disabled (FETALGUARD_SKIP_ATTRIBUTION=1)");
    }

    let app = build_router(state.clone());

    // Spawn background task to persist metrics to disk periodically
    let metrics_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            METRICS_PERSIST_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            metrics_state.usage.persist_to_disk();
        }
    });

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .wrap_err_with(|| format!("failed to bind {}", bind_addr))?;
    info!(bind = %bind_addr, "FetalGuard server listening");
    info!("Endpoints: GET /health, GET /ping, GET /stats, POST /api/v1/predict, GET /api/v1/reports");
    if rate_limit_rpm > 0 {
        info!(rate_limit_rpm, "rate limiting enabled");
    } else {
        info!("rate limiting disabled");
    }
    if state.config.api_key.is_some() {
        info!("bearer-token auth enabled on /api/v1/*");
    }
    info!(access_log = %access_log);

    let shutdown_state = state;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_state.usage.persist_to_disk();
    })
    .await
    .wrap_err("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down gracefully"),
        _ = terminate => info!("received SIGTERM, shutting down gracefully"),
    }
}
