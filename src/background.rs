//! Background sample set and the offline k-means summarizer that builds it.
//!
//! The attribution engine treats the background as the "feature absent"
//! reference distribution. Running it against every training row is too
//! slow, so the training corpus of meta-feature vectors is compressed to
//! [`N_BACKGROUND_SAMPLES`] weighted representatives.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Representatives kept by the summarizer.
pub const N_BACKGROUND_SAMPLES: usize = 100;

/// Weighted rows in meta-feature space. Weights sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSet {
    pub version: String,
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub weights: Vec<f64>,
}

impl BackgroundSet {
    /// Every row with the same weight.
    pub fn uniform(version: impl Into<String>, feature_names: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        let w = 1.0 / rows.len().max(1) as f64;
        let weights = vec![w; rows.len()];
        Self {
            version: version.into(),
            feature_names,
            rows,
            weights,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.feature_names.len()
    }

    /// Check against the meta-feature layout the ensemble produces.
    pub fn validate(&self, expected_names: &[String]) -> Result<(), PipelineError> {
        let fail = |reason: String| PipelineError::missing_artifact("background", reason);
        if self.feature_names != expected_names {
            return Err(fail(format!(
                "columns {:?} do not match meta-feature layout {:?}",
                self.feature_names, expected_names
            )));
        }
        if self.rows.is_empty() {
            return Err(fail("background set is empty".into()));
        }
        if self.weights.len() != self.rows.len() {
            return Err(fail(format!(
                "{} weights for {} rows",
                self.weights.len(),
                self.rows.len()
            )));
        }
        if let Some(i) = self
            .rows
            .iter()
            .position(|r| r.len() != self.dim() || r.iter().any(|v| !v.is_finite()))
        {
            return Err(fail(format!("row {} is malformed", i)));
        }
        if self.weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(fail("weights must be finite and non-negative".into()));
        }
        let total: f64 = self.weights.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(fail(format!("weights sum to {}", total)));
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SummarizeError {
    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("row {row} has {actual} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row {row} contains a non-finite value")]
    NonFinite { row: usize },

    #[error("invalid summarizer config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub k: usize,
    /// Independent k-means++ restarts; the lowest inertia wins.
    pub n_init: usize,
    pub max_iter: usize,
    /// Stop once the summed squared centroid shift drops below this.
    pub tol: f64,
    pub seed: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            k: N_BACKGROUND_SAMPLES,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            seed: 0,
        }
    }
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = sq_dist(row, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn kmeans_pp(corpus: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let n = corpus.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(corpus[rng.gen_range(0..n)].clone());
    let mut d2: Vec<f64> = corpus.iter().map(|r| sq_dist(r, &centroids[0])).collect();

    while centroids.len() < k {
        let total: f64 = d2.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut idx = n - 1;
            for (i, d) in d2.iter().enumerate() {
                if target < *d {
                    idx = i;
                    break;
                }
                target -= d;
            }
            idx
        } else {
            rng.gen_range(0..n)
        };
        let c = corpus[pick].clone();
        for (d, r) in d2.iter_mut().zip(corpus) {
            *d = d.min(sq_dist(r, &c));
        }
        centroids.push(c);
    }
    centroids
}

struct Clustering {
    centroids: Vec<Vec<f64>>,
    labels: Vec<usize>,
    inertia: f64,
}

fn lloyd(corpus: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, config: &SummarizerConfig) -> Clustering {
    let dim = corpus[0].len();
    let k = centroids.len();
    let mut labels = vec![0; corpus.len()];

    for iteration in 0..config.max_iter {
        let assigned: Vec<(usize, f64)> = corpus.par_iter().map(|r| nearest(r, &centroids)).collect();
        for (l, (c, _)) in labels.iter_mut().zip(&assigned) {
            *l = *c;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (row, &l) in corpus.iter().zip(&labels) {
            counts[l] += 1;
            for (s, v) in sums[l].iter_mut().zip(row) {
                *s += v;
            }
        }

        // An empty cluster takes the point currently worst served.
        let mut taken = Vec::new();
        for c in 0..k {
            if counts[c] > 0 {
                continue;
            }
            let far = assigned
                .iter()
                .enumerate()
                .filter(|(i, _)| !taken.contains(i))
                .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
                .map(|(i, _)| i);
            if let Some(i) = far {
                taken.push(i);
                sums[c] = corpus[i].clone();
                counts[c] = 1;
            }
        }

        let mut shift = 0.0;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let updated: Vec<f64> = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            shift += sq_dist(&updated, &centroids[c]);
            centroids[c] = updated;
        }
        if shift <= config.tol {
            debug!(iteration, shift, "k-means converged");
            break;
        }
    }

    let assigned: Vec<(usize, f64)> = corpus.par_iter().map(|r| nearest(r, &centroids)).collect();
    let inertia = assigned.iter().map(|(_, d)| d).sum();
    let labels = assigned.into_iter().map(|(c, _)| c).collect();
    Clustering {
        centroids,
        labels,
        inertia,
    }
}

/// Sorted distinct values per column.
fn column_values(corpus: &[Vec<f64>], dim: usize) -> Vec<Vec<f64>> {
    (0..dim)
        .map(|j| {
            let mut col: Vec<f64> = corpus.iter().map(|r| r[j]).collect();
            col.sort_by(f64::total_cmp);
            col.dedup();
            col
        })
        .collect()
}

fn snap(value: f64, sorted: &[f64]) -> f64 {
    let i = sorted.partition_point(|v| *v < value);
    match (i.checked_sub(1).map(|j| sorted[j]), sorted.get(i)) {
        (Some(lo), Some(hi)) => {
            if value - lo <= hi - value {
                lo
            } else {
                *hi
            }
        }
        (Some(lo), None) => lo,
        (None, Some(hi)) => *hi,
        (None, None) => value,
    }
}

/// Compress `corpus` into at most `config.k` weighted rows.
///
/// Each centroid coordinate is snapped to the nearest value observed in its
/// column, and each weight is the cluster's share of the corpus. A corpus of
/// `k` rows or fewer is returned unchanged with equal weights.
pub fn summarize(
    corpus: &[Vec<f64>],
    feature_names: Vec<String>,
    config: &SummarizerConfig,
) -> Result<BackgroundSet, SummarizeError> {
    if config.k == 0 || config.n_init == 0 {
        return Err(SummarizeError::InvalidConfig(
            "k and n_init must be positive".into(),
        ));
    }
    let Some(first) = corpus.first() else {
        return Err(SummarizeError::EmptyCorpus);
    };
    let dim = first.len();
    for (row, r) in corpus.iter().enumerate() {
        if r.len() != dim {
            return Err(SummarizeError::RaggedRow {
                row,
                expected: dim,
                actual: r.len(),
            });
        }
        if r.iter().any(|v| !v.is_finite()) {
            return Err(SummarizeError::NonFinite { row });
        }
    }
    if feature_names.len() != dim {
        return Err(SummarizeError::InvalidConfig(format!(
            "{} feature names for {} columns",
            feature_names.len(),
            dim
        )));
    }

    let version = format!("kmeans-k{}-seed{}", config.k, config.seed);
    if corpus.len() <= config.k {
        info!(rows = corpus.len(), k = config.k, "corpus fits in k, keeping every row");
        return Ok(BackgroundSet::uniform(version, feature_names, corpus.to_vec()));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut best: Option<Clustering> = None;
    for run in 0..config.n_init {
        let init = kmeans_pp(corpus, config.k, &mut rng);
        let result = lloyd(corpus, init, config);
        debug!(run, inertia = result.inertia, "k-means restart");
        if best.as_ref().map_or(true, |b| result.inertia < b.inertia) {
            best = Some(result);
        }
    }
    let Some(best) = best else {
        return Err(SummarizeError::InvalidConfig("no k-means run completed".into()));
    };

    let columns = column_values(corpus, dim);
    let mut counts = vec![0usize; best.centroids.len()];
    for &l in &best.labels {
        counts[l] += 1;
    }
    let n = corpus.len() as f64;
    let mut rows = Vec::with_capacity(config.k);
    let mut weights = Vec::with_capacity(config.k);
    for (centroid, count) in best.centroids.iter().zip(&counts) {
        if *count == 0 {
            continue;
        }
        rows.push(
            centroid
                .iter()
                .zip(&columns)
                .map(|(v, col)| snap(*v, col))
                .collect(),
        );
        weights.push(*count as f64 / n);
    }

    info!(
        corpus_rows = corpus.len(),
        representatives = rows.len(),
        inertia = best.inertia,
        "background summarized"
    );
    Ok(BackgroundSet {
        version,
        feature_names,
        rows,
        weights,
    })
}
