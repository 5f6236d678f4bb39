//! Usage metrics, access logging, and metrics persistence.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::scores::FetalHealth;

/// Maximum number of rotated access log files to keep.
const MAX_ACCESS_LOG_ROTATIONS: usize = 5;

/// Interval in seconds between metrics persistence to disk.
pub const METRICS_PERSIST_INTERVAL_SECS: u64 = 60;

/// One successful prediction, as recorded in metrics and the access log.
#[derive(Debug, Clone, Copy)]
pub struct RecordEvent<'a> {
    pub endpoint: &'a str,
    pub patient_id: Option<&'a str>,
    pub class: FetalHealth,
    pub probability: f64,
    /// Whether an attribution accompanied the prediction.
    pub attributed: bool,
    /// Whether an attribution was wanted but could not be produced.
    pub attribution_omitted: bool,
    pub report_id: u64,
    pub processing_time_ms: u64,
}

pub struct UsageMetrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub validation_errors: AtomicU64,

    pub normal: AtomicU64,
    pub suspect: AtomicU64,
    pub pathological: AtomicU64,

    pub attribution_computed: AtomicU64,
    pub attribution_omitted: AtomicU64,

    pub ep_predict: AtomicU64,
    pub ep_reports: AtomicU64,
    pub ep_stats: AtomicU64,

    pub auth_api_key: AtomicU64,
    pub auth_open: AtomicU64,

    access_log: std::sync::Mutex<Option<File>>,
    access_log_path: String,
    access_log_bytes: AtomicU64,
    max_access_log_bytes: u64,
    metrics_path: String,
}

/// Counters in `metrics.json`, in snapshot order.
const PERSISTED_COUNTERS: [&str; 13] = [
    "total_requests",
    "total_errors",
    "validation_errors",
    "normal",
    "suspect",
    "pathological",
    "attribution_computed",
    "attribution_omitted",
    "ep_predict",
    "ep_reports",
    "ep_stats",
    "auth_api_key",
    "auth_open",
];

impl UsageMetrics {
    /// Open the access log and restore counters from a previous
    /// `metrics.json` in `metrics_dir`, if one exists.
    pub fn new(access_log_path: &str, max_access_log_bytes: u64, metrics_dir: &str) -> Self {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(access_log_path)
            .ok();
        if file.is_none() {
            warn!(path = access_log_path, "could not open access log");
        }
        let current_size = std::fs::metadata(access_log_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let metrics_path = Path::new(metrics_dir).join("metrics.json");

        let metrics = Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            normal: AtomicU64::new(0),
            suspect: AtomicU64::new(0),
            pathological: AtomicU64::new(0),
            attribution_computed: AtomicU64::new(0),
            attribution_omitted: AtomicU64::new(0),
            ep_predict: AtomicU64::new(0),
            ep_reports: AtomicU64::new(0),
            ep_stats: AtomicU64::new(0),
            auth_api_key: AtomicU64::new(0),
            auth_open: AtomicU64::new(0),
            access_log: std::sync::Mutex::new(file),
            access_log_path: access_log_path.to_string(),
            access_log_bytes: AtomicU64::new(current_size),
            max_access_log_bytes,
            metrics_path: metrics_path.to_string_lossy().to_string(),
        };
        metrics.restore_from_disk();
        metrics
    }

    fn counter(&self, name: &str) -> Option<&AtomicU64> {
        Some(match name {
            "total_requests" => &self.total_requests,
            "total_errors" => &self.total_errors,
            "validation_errors" => &self.validation_errors,
            "normal" => &self.normal,
            "suspect" => &self.suspect,
            "pathological" => &self.pathological,
            "attribution_computed" => &self.attribution_computed,
            "attribution_omitted" => &self.attribution_omitted,
            "ep_predict" => &self.ep_predict,
            "ep_reports" => &self.ep_reports,
            "ep_stats" => &self.ep_stats,
            "auth_api_key" => &self.auth_api_key,
            "auth_open" => &self.auth_open,
            _ => return None,
        })
    }

    fn restore_from_disk(&self) {
        let Ok(content) = std::fs::read_to_string(&self.metrics_path) else {
            return;
        };
        let snapshot: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %self.metrics_path, error = %e, "ignoring unreadable metrics snapshot");
                return;
            }
        };
        for name in PERSISTED_COUNTERS {
            if let (Some(counter), Some(v)) = (
                self.counter(name),
                snapshot.get(name).and_then(|v| v.as_u64()),
            ) {
                counter.store(v, Ordering::Relaxed);
            }
        }
        info!(path = %self.metrics_path, "restored metrics snapshot");
    }

    pub fn record(&self, event: &RecordEvent<'_>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match event.class {
            FetalHealth::Normal => self.normal.fetch_add(1, Ordering::Relaxed),
            FetalHealth::Suspect => self.suspect.fetch_add(1, Ordering::Relaxed),
            FetalHealth::Pathological => self.pathological.fetch_add(1, Ordering::Relaxed),
        };

        if event.attributed {
            self.attribution_computed.fetch_add(1, Ordering::Relaxed);
        }
        if event.attribution_omitted {
            self.attribution_omitted.fetch_add(1, Ordering::Relaxed);
        }

        self.write_access_line(serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "endpoint": event.endpoint,
            "patient_id": event.patient_id,
            "class_index": event.class.class_index(),
            "class": event.class.as_str(),
            "probability": event.probability,
            "attributed": event.attributed,
            "report_id": event.report_id,
            "processing_time_ms": event.processing_time_ms,
        }));
    }

    /// Count a failed request. `kind` is the error tag written to the access log.
    pub fn record_error(&self, endpoint: &str, kind: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        if kind == "validation_error" {
            self.validation_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.write_access_line(serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "endpoint": endpoint,
            "error": kind,
        }));
    }

    fn write_access_line(&self, entry: serde_json::Value) {
        let Ok(mut guard) = self.access_log.try_lock() else {
            return;
        };
        let Some(ref mut file) = *guard else {
            return;
        };
        let mut line = entry.to_string();
        line.push('\n');
        let line_len = line.len() as u64;
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(error = %e, "failed to write access log entry");
        }
        let new_size = self.access_log_bytes.fetch_add(line_len, Ordering::Relaxed) + line_len;

        // 0 = no limit
        if self.max_access_log_bytes > 0 && new_size >= self.max_access_log_bytes {
            for i in (1..MAX_ACCESS_LOG_ROTATIONS).rev() {
                let from = format!("{}.{}", self.access_log_path, i);
                let to = format!("{}.{}", self.access_log_path, i + 1);
                if Path::new(&from).exists() {
                    if let Err(e) = std::fs::rename(&from, &to) {
                        warn!(from = %from, to = %to, error = %e, "log rotation rename failed");
                    }
                }
            }
            let rotated = format!("{}.1", self.access_log_path);
            if let Err(e) = std::fs::rename(&self.access_log_path, &rotated) {
                warn!(from = %self.access_log_path, to = %rotated, error = %e, "log rotation rename failed");
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.access_log_path)
            {
                Ok(new_file) => {
                    *file = new_file;
                    self.access_log_bytes.store(0, Ordering::Relaxed);
                }
                Err(e) => warn!(error = %e, "could not reopen access log after rotation"),
            }
        }
    }

    /// Persist current metrics snapshot to disk so they survive restarts.
    pub fn persist_to_disk(&self) {
        let mut snapshot = serde_json::Map::new();
        for name in PERSISTED_COUNTERS {
            if let Some(counter) = self.counter(name) {
                snapshot.insert(name.to_string(), counter.load(Ordering::Relaxed).into());
            }
        }
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => {
                if let Err(e) = std::fs::write(&self.metrics_path, &data) {
                    warn!(path = %self.metrics_path, error = %e, "failed to persist metrics");
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize metrics snapshot");
            }
        }
    }
}
