//! Analysis reports and their append-only store.
//!
//! A report is written once per successful prediction and never modified.
//! [`JsonlReportStore`] appends one JSON line per report and keeps an
//! in-memory copy for listing; on open it replays the file.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::pipeline::Analysis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub id: u64,
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    /// 1 = Normal, 2 = Suspect, 3 = Pathological.
    pub class_index: u8,
    pub probability: f64,
    /// Serialized `[{feature_name, contribution_score}]`, absent when the
    /// attribution was omitted.
    pub attribution_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Report contents before the store assigns an id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    pub class_index: u8,
    pub probability: f64,
    pub attribution_json: Option<String>,
}

impl NewReport {
    pub fn from_analysis(
        analysis: &Analysis,
        patient_name: Option<String>,
        patient_id: Option<String>,
    ) -> Result<Self, serde_json::Error> {
        let attribution_json = analysis
            .attribution
            .as_ref()
            .map(|a| serde_json::to_string(&a.contributions))
            .transpose()?;
        Ok(Self {
            patient_name,
            patient_id,
            class_index: analysis.prediction.class_index,
            probability: analysis.prediction.probability,
            attribution_json,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReportQuery {
    pub patient_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ReportStoreError {
    #[error("report store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persistence boundary for reports. Implementations serialize their own
/// writes.
pub trait ReportStore: Send + Sync {
    fn insert(&self, report: NewReport) -> Result<AnalysisReport, ReportStoreError>;

    /// Newest first, optionally filtered by patient and truncated.
    fn list(&self, query: &ReportQuery) -> Vec<AnalysisReport>;

    fn get(&self, id: u64) -> Option<AnalysisReport>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct JsonlReportStore {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
    reports: RwLock<Vec<AnalysisReport>>,
}

impl JsonlReportStore {
    /// Open (or create) `path`, replaying existing reports. Malformed lines
    /// are skipped with a warning.
    pub fn open(path: &Path) -> Result<Self, ReportStoreError> {
        let mut reports = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AnalysisReport>(&line) {
                    Ok(r) => reports.push(r),
                    Err(e) => {
                        warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed report")
                    }
                }
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), reports = reports.len(), "report store opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Mutex::new(Some(file)),
            reports: RwLock::new(reports),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
            reports: RwLock::new(Vec::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ReportStore for JsonlReportStore {
    fn insert(&self, report: NewReport) -> Result<AnalysisReport, ReportStoreError> {
        let mut reports = self.reports.write().unwrap_or_else(|e| e.into_inner());
        let id = reports.last().map_or(1, |r| r.id + 1);
        let stored = AnalysisReport {
            id,
            patient_name: report.patient_name,
            patient_id: report.patient_id,
            class_index: report.class_index,
            probability: report.probability,
            attribution_json: report.attribution_json,
            created_at: Utc::now(),
        };

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = file.as_mut() {
            let mut line = serde_json::to_string(&stored)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        reports.push(stored.clone());
        Ok(stored)
    }

    fn list(&self, query: &ReportQuery) -> Vec<AnalysisReport> {
        let reports = self.reports.read().unwrap_or_else(|e| e.into_inner());
        reports
            .iter()
            .rev()
            .filter(|r| match &query.patient_id {
                Some(pid) => r.patient_id.as_deref() == Some(pid.as_str()),
                None => true,
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    fn get(&self, id: u64) -> Option<AnalysisReport> {
        let reports = self.reports.read().unwrap_or_else(|e| e.into_inner());
        reports.iter().find(|r| r.id == id).cloned()
    }

    fn len(&self) -> usize {
        self.reports.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
