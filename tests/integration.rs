//! Integration tests for the FetalGuard HTTP server.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use fetalguard::features::NUM_FEATURES;
use fetalguard::learners::{BaseLearner, Ensemble, ProbabilisticClassifier};
use fetalguard::report::{JsonlReportStore, ReportStore};
use fetalguard::scores::NUM_CLASSES;
use fetalguard::server::*;
use fetalguard::{ExplainerConfig, ModelContext, ModelError};

// ---------------------------------------------------------------------------
// Helper: spin up a test server on an ephemeral port
// ---------------------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

fn test_config(dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        artifacts_dir: dir.join("artifacts"),
        reports_path: Some(dir.join("reports.jsonl")),
        rate_limit_rpm: 0, // no rate limiting in tests
        access_log_path: dir.join("access.jsonl").to_string_lossy().to_string(),
        max_access_log_bytes: 0,
        metrics_dir: dir.to_string_lossy().to_string(),
        explainer: ExplainerConfig {
            nsamples: 64,
            seed: Some(11),
        },
        ..Default::default()
    }
}

async fn spawn_with(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixture(&dir.path().join("artifacts"));
    let mut config = test_config(dir.path());
    configure(&mut config);

    let state = Arc::new(ServerState::from_config(config).unwrap());
    let addr = serve(state.clone()).await;

    TestServer {
        addr,
        state,
        _dir: dir,
    }
}

/// Serve an already built state on an ephemeral port.
async fn serve(state: Arc<ServerState>) -> SocketAddr {
    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// A forest stand-in whose every prediction fails.
struct BrokenForest;

impl ProbabilisticClassifier for BrokenForest {
    fn family(&self) -> &'static str {
        "random_forest"
    }

    fn n_features(&self) -> usize {
        NUM_FEATURES
    }

    fn predict_proba(&self, _x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
        Err(ModelError::NonFinite)
    }
}

async fn spawn_test_server() -> TestServer {
    spawn_with(|_| {}).await
}

async fn post_predict(
    client: &reqwest::Client,
    server: &TestServer,
    body: Value,
) -> (reqwest::StatusCode, PredictResponse) {
    let resp = client
        .post(server.url("/api/v1/predict"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_endpoint() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let health: HealthResponse = resp.json().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.model_version, "it-1");
    assert!(health.model_hash.starts_with("sha256:"));
    assert_eq!(health.base_learners, common::LEARNER_NAMES.to_vec());
    assert!(health.attribution_enabled);
    assert_eq!(health.background_size, 8);
    assert_eq!(health.reports_stored, 0);
}

#[tokio::test]
async fn test_ping() {
    let server = spawn_test_server().await;
    let body = reqwest::get(server.url("/ping")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "pong");
}

#[tokio::test]
async fn test_predict_returns_class_probability_and_attribution() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();

    let (status, resp) = post_predict(
        &client,
        &server,
        json!({
            "features": common::scenario(),
            "patient_name": "Jane Roe",
            "patient_id": "MRN-001"
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert!(resp.success, "error: {:?}", resp.error);

    let p = resp.prediction.unwrap();
    assert!((1..=3).contains(&p.class_index));
    assert!((0.0..=1.0).contains(&p.probability));
    let sum = p.scores.normal + p.scores.suspect + p.scores.pathological;
    assert!((sum - 1.0).abs() < 1e-6);

    let attribution = p.attribution.expect("attribution present");
    assert_eq!(attribution.len(), 33);
    assert_eq!(attribution[0].feature_name, "LB");
    assert_eq!(attribution[21].feature_name, "SVM_p0");
    assert_eq!(attribution[32].feature_name, "CatBoost_p2");
    assert!(attribution.iter().all(|c| c.contribution_score >= 0.0));
    assert!(p.attribution_error.is_none());
    assert_eq!(p.report_id, 1);
}

#[tokio::test]
async fn test_predict_accepts_ordered_values() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();
    let named = common::scenario();
    let ordered: Vec<Value> = fetalguard::FEATURE_NAMES
        .iter()
        .map(|n| named[*n].clone())
        .collect();

    let (_, by_name) = post_predict(&client, &server, json!({ "features": named, "explain": false })).await;
    let (_, by_order) =
        post_predict(&client, &server, json!({ "features": ordered, "explain": false })).await;
    let a = by_name.prediction.unwrap();
    let b = by_order.prediction.unwrap();
    assert_eq!(a.class_index, b.class_index);
    assert_eq!(a.probability, b.probability);
    assert!(a.attribution.is_none());
}

#[tokio::test]
async fn test_missing_feature_is_rejected_with_400() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();
    let mut features = common::as_map(&common::scenario());
    features.remove("ASTV");

    let (status, resp) = post_predict(&client, &server, json!({ "features": features })).await;
    assert_eq!(status, 400);
    assert!(!resp.success);
    assert_eq!(resp.error_kind.as_deref(), Some("validation_error"));
    assert_eq!(resp.issues.unwrap().missing, vec!["ASTV".to_string()]);
    assert_eq!(server.state.store.len(), 0);
}

#[tokio::test]
async fn test_non_numeric_and_wrong_length_rejected() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();

    let mut features = common::as_map(&common::scenario());
    features.insert("LB".into(), json!("high"));
    let (status, resp) = post_predict(&client, &server, json!({ "features": features })).await;
    assert_eq!(status, 400);
    assert_eq!(resp.issues.unwrap().non_numeric, vec!["LB".to_string()]);

    let (status, resp) = post_predict(&client, &server, json!({ "features": [1.0, 2.0] })).await;
    assert_eq!(status, 400);
    assert_eq!(resp.issues.unwrap().length_mismatch, Some((21, 2)));
}

#[tokio::test]
async fn test_overflowing_feature_is_rejected_with_400() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();
    let mut features = common::as_map(&common::scenario());
    // Finite on the wire, infinite once divided by the AC scale.
    features.insert("AC".into(), json!(1e308));

    let (status, resp) = post_predict(&client, &server, json!({ "features": features })).await;
    assert_eq!(status, 400);
    assert_eq!(resp.error_kind.as_deref(), Some("validation_error"));
    assert_eq!(resp.issues.unwrap().non_finite, vec!["AC".to_string()]);
    assert_eq!(server.state.store.len(), 0);
}

#[tokio::test]
async fn test_failing_base_learner_is_500_and_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let members = common::learners()
        .into_iter()
        .zip(common::LEARNER_NAMES)
        .map(|(artifact, name)| {
            let model: Box<dyn ProbabilisticClassifier> = if name == "RandomForest" {
                Box::new(BrokenForest)
            } else {
                artifact.into_classifier().unwrap()
            };
            BaseLearner::new(name, model)
        })
        .collect();
    let ctx = ModelContext::new(
        "broken-1",
        common::scaler(),
        Ensemble::new(members).unwrap(),
        common::meta(33),
        Some(common::background()),
    )
    .unwrap();
    let state = Arc::new(ServerState::new(
        test_config(dir.path()),
        Arc::new(ctx),
        Arc::new(JsonlReportStore::in_memory()),
    ));
    let addr = serve(state.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/v1/predict", addr))
        .json(&json!({ "features": common::scenario(), "patient_id": "MRN-500" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: PredictResponse = resp.json().await.unwrap();
    assert!(!body.success);
    assert_eq!(body.error_kind.as_deref(), Some("base_learner_error"));
    assert!(body.error.unwrap().contains("RandomForest"));
    assert!(body.prediction.is_none());
    assert_eq!(state.store.len(), 0);
    assert_eq!(state.usage.total_errors.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_predict_reports_mc_dropout_uncertainty_on_request() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();

    let (status, plain) = post_predict(
        &client,
        &server,
        json!({ "features": common::scenario(), "explain": false }),
    )
    .await;
    assert_eq!(status, 200);
    assert!(plain.prediction.unwrap().uncertainty.is_none());

    let (status, resp) = post_predict(
        &client,
        &server,
        json!({ "features": common::scenario(), "explain": false, "uncertainty_passes": 60 }),
    )
    .await;
    assert_eq!(status, 200);
    let est = resp.prediction.unwrap().uncertainty.expect("uncertainty present");
    assert_eq!(est.passes, 60);
    assert!((est.mean.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!(est.std.iter().all(|s| s.is_finite() && *s >= 0.0));
    assert!(est.std.iter().any(|s| *s > 0.0));

    let (status, resp) = post_predict(
        &client,
        &server,
        json!({
            "features": common::scenario(),
            "uncertainty_passes": MAX_UNCERTAINTY_PASSES + 1
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(resp.error_kind.as_deref(), Some("invalid_request"));
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let server = spawn_test_server().await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/v1/predict"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: PredictResponse = resp.json().await.unwrap();
    assert_eq!(body.error_kind.as_deref(), Some("invalid_request"));
}

#[tokio::test]
async fn test_reports_listing_newest_first_and_filtered() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();
    for (pid, features) in [
        ("A", common::scenario()),
        ("B", common::normal_trace()),
        ("A", common::normal_trace()),
    ] {
        let (status, _) = post_predict(
            &client,
            &server,
            json!({ "features": features, "patient_id": pid, "explain": false }),
        )
        .await;
        assert_eq!(status, 200);
    }

    let all: ReportsResponse = client
        .get(server.url("/api/v1/reports"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.count, 3);
    let ids: Vec<u64> = all.reports.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert!(all.reports.iter().all(|r| r.attribution_json.is_none()));

    let only_a: ReportsResponse = client
        .get(server.url("/api/v1/reports?patient_id=A&limit=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(only_a.count, 1);
    assert_eq!(only_a.reports[0].id, 3);
}

#[tokio::test]
async fn test_report_stores_attribution_json() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();
    let (_, resp) = post_predict(
        &client,
        &server,
        json!({ "features": common::scenario(), "patient_id": "P" }),
    )
    .await;
    let p = resp.prediction.unwrap();

    let stored = server.state.store.get(p.report_id).unwrap();
    assert_eq!(stored.class_index, p.class_index);
    assert_eq!(stored.probability, p.probability);
    let parsed: Vec<Value> = serde_json::from_str(stored.attribution_json.as_deref().unwrap()).unwrap();
    assert_eq!(parsed.len(), 33);
    assert!(parsed[0].get("feature_name").is_some());
    assert!(parsed[0].get("contribution_score").is_some());
}

#[tokio::test]
async fn test_skip_attribution_flag() {
    let server = spawn_with(|c| c.skip_attribution = true).await;
    let client = reqwest::Client::new();
    let (status, resp) =
        post_predict(&client, &server, json!({ "features": common::scenario() })).await;
    assert_eq!(status, 200);
    let p = resp.prediction.unwrap();
    assert!(p.attribution.is_none());
    assert!(p.attribution_error.is_none());
}

#[tokio::test]
async fn test_stats_counts_predictions_and_errors() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();
    post_predict(&client, &server, json!({ "features": common::scenario() })).await;
    post_predict(&client, &server, json!({ "features": [1] })).await;

    let stats: StatsResponse = client
        .get(server.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.requests.total, 2);
    assert_eq!(stats.requests.errors, 1);
    assert_eq!(stats.requests.validation_errors, 1);
    assert_eq!(stats.endpoints.predict, 2);
    assert_eq!(stats.attribution.computed, 1);
    assert_eq!(
        stats.classifications.normal + stats.classifications.suspect + stats.classifications.pathological,
        1
    );
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let server = spawn_with(|c| c.api_key = Some("s3cret".into())).await;
    let client = reqwest::Client::new();
    let body = json!({ "features": common::scenario(), "explain": false });

    let missing = client
        .post(server.url("/api/v1/predict"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = client
        .post(server.url("/api/v1/predict"))
        .bearer_auth("nope")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let ok = client
        .post(server.url("/api/v1/predict"))
        .bearer_auth("s3cret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);

    // Health stays public.
    let health = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let server = spawn_with(|c| c.rate_limit_rpm = 2).await;
    let client = reqwest::Client::new();
    let mut statuses = Vec::new();
    for _ in 0..4 {
        let resp = client
            .get(server.url("/api/v1/reports"))
            .send()
            .await
            .unwrap();
        statuses.push(resp.status().as_u16());
    }
    assert_eq!(&statuses[..2], &[200, 200]);
    assert!(statuses[2..].iter().all(|s| *s == 429));
}

#[tokio::test]
async fn test_missing_background_downgrades_to_prediction_only() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixture(&dir.path().join("artifacts"));
    let ctx = ModelContext::load_without_background(&dir.path().join("artifacts")).unwrap();
    let config = test_config(dir.path());
    let state = Arc::new(ServerState::new(
        config,
        Arc::new(ctx),
        Arc::new(JsonlReportStore::in_memory()),
    ));
    let addr = serve(state.clone()).await;

    let resp: PredictResponse = reqwest::Client::new()
        .post(format!("http://{}/api/v1/predict", addr))
        .json(&json!({ "features": common::scenario() }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(resp.success);
    let p = resp.prediction.unwrap();
    assert!(p.attribution.is_none());
    assert!(p.attribution_error.unwrap().contains("background"));
    assert_eq!(state.store.len(), 1);
}

#[tokio::test]
async fn test_reports_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixture(&dir.path().join("artifacts"));
    let path = dir.path().join("reports.jsonl");
    {
        let state = ServerState::from_config(test_config(dir.path())).unwrap();
        let ctx = &state.ctx;
        let raw = fetalguard::RawFeatures::from_map(&common::as_map(&common::scenario())).unwrap();
        let analysis = fetalguard::analyze(
            ctx,
            &raw,
            fetalguard::AttributionPolicy::Skip,
            &ExplainerConfig::default(),
        )
        .unwrap();
        let report =
            fetalguard::report::NewReport::from_analysis(&analysis, None, Some("X".into())).unwrap();
        state.store.insert(report).unwrap();
    }
    let reopened = JsonlReportStore::open(&path).unwrap();
    assert_eq!(reopened.len(), 1);
}
