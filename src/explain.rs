//! Kernel SHAP attribution over the meta-feature vector.
//!
//! A coalition mask says which features keep the explained value; masked-out
//! features are filled in from each background row, and the coalition value
//! is the background-weighted mean model output. Masks are drawn with the
//! Shapley kernel weights: subset sizes whose complete enumeration fits in
//! the sample budget are enumerated (smallest and largest first, paired with
//! their complements), the rest of the budget is sampled. A weighted least
//! squares fit constrained so that attributions sum to `f(x) - E[f(bg)]`
//! gives one signed value per feature.
//!
//! Cost is `nsamples * background_rows` model evaluations, spread over the
//! rayon pool.

use std::collections::HashMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::background::BackgroundSet;
use crate::error::PipelineError;
use crate::learners::ProbabilisticClassifier;
use crate::scores::{argmax, FetalHealth, NUM_CLASSES};

/// Default coalition budget.
pub const DEFAULT_NSAMPLES: usize = 50;

/// Sample budget and RNG seed. With `seed: None` the generator is seeded
/// from OS entropy and results vary run to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainerConfig {
    pub nsamples: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            nsamples: DEFAULT_NSAMPLES,
            seed: None,
        }
    }
}

/// One entry of the reported attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature_name: String,
    /// Magnitude of the signed attribution; always >= 0.
    pub contribution_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    /// Class whose output channel was explained.
    pub class: FetalHealth,
    /// `E[f(background)]` for that channel.
    pub base_value: f64,
    /// `f(x)` for that channel.
    pub prediction: f64,
    /// Signed attributions in meta-feature order.
    pub signed: Vec<f64>,
    /// Absolute attributions paired with names, same order.
    pub contributions: Vec<FeatureContribution>,
    /// Coalitions actually evaluated.
    pub nsamples: usize,
}

impl Explanation {
    /// `signed` sums to this, up to rounding.
    pub fn total_effect(&self) -> f64 {
        self.prediction - self.base_value
    }

    /// Indices of the `k` largest contributions, largest first.
    pub fn top_features(&self, k: usize) -> Vec<&FeatureContribution> {
        let mut sorted: Vec<&FeatureContribution> = self.contributions.iter().collect();
        sorted.sort_by(|a, b| b.contribution_score.total_cmp(&a.contribution_score));
        sorted.truncate(k);
        sorted
    }
}

/// Explains one model against one background set.
pub struct KernelExplainer<'a> {
    model: &'a dyn ProbabilisticClassifier,
    background: &'a BackgroundSet,
    config: ExplainerConfig,
}

fn unavailable(reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::AttributionUnavailable(reason.to_string())
}

fn binom(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Calls `f` with every `k`-subset of `0..n` in lexicographic order.
fn for_each_combination(n: usize, k: usize, mut f: impl FnMut(&[usize])) {
    if k > n {
        return;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        f(&idx);
        let Some(i) = (0..k).rev().find(|&i| idx[i] != i + n - k) else {
            return;
        };
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// Coalition masks over the varying features with their kernel weights.
#[derive(Debug, Default)]
struct Coalitions {
    masks: Vec<Vec<bool>>,
    weights: Vec<f64>,
}

impl Coalitions {
    fn push(&mut self, mask: Vec<bool>, weight: f64) {
        self.masks.push(mask);
        self.weights.push(weight);
    }

    fn len(&self) -> usize {
        self.masks.len()
    }
}

/// Build the coalition set for `m >= 2` varying features.
fn draw_coalitions(m: usize, nsamples: usize, rng: &mut ChaCha8Rng) -> Coalitions {
    let num_subset_sizes = (m - 1).div_ceil(2);
    let num_paired = (m - 1) / 2;

    let mut weight_vector: Vec<f64> = (1..=num_subset_sizes)
        .map(|s| {
            let w = (m - 1) as f64 / (s * (m - s)) as f64;
            if s <= num_paired {
                w * 2.0
            } else {
                w
            }
        })
        .collect();
    let total: f64 = weight_vector.iter().sum();
    weight_vector.iter_mut().for_each(|w| *w /= total);

    let mut out = Coalitions::default();
    let mut num_full = 0;
    let mut samples_left = nsamples as f64;
    let mut remaining = weight_vector.clone();

    for size in 1..=num_subset_sizes {
        let paired = size <= num_paired;
        let mut nsubsets = binom(m, size);
        if paired {
            nsubsets *= 2.0;
        }
        if samples_left * remaining[size - 1] / nsubsets < 1.0 - 1e-8 {
            break;
        }
        num_full += 1;
        samples_left -= nsubsets;
        if remaining[size - 1] < 1.0 {
            let denom = 1.0 - remaining[size - 1];
            remaining.iter_mut().for_each(|w| *w /= denom);
        }

        let mut w = weight_vector[size - 1] / binom(m, size);
        if paired {
            w /= 2.0;
        }
        for_each_combination(m, size, |inds| {
            let mut mask = vec![false; m];
            for &i in inds {
                mask[i] = true;
            }
            if paired {
                let complement = mask.iter().map(|b| !b).collect();
                out.push(mask, w);
                out.push(complement, w);
            } else {
                out.push(mask, w);
            }
        });
    }

    let n_fixed = out.len();
    let mut samples_left = nsamples.saturating_sub(n_fixed);
    if num_full == num_subset_sizes || samples_left == 0 {
        return out;
    }

    // Each paired draw also yields its complement, so paired sizes count half.
    let mut remaining: Vec<f64> = weight_vector
        .iter()
        .enumerate()
        .map(|(i, w)| if i < num_paired { w / 2.0 } else { *w })
        .skip(num_full)
        .collect();
    let total: f64 = remaining.iter().sum();
    remaining.iter_mut().for_each(|w| *w /= total);

    let Ok(size_dist) = WeightedIndex::new(&remaining) else {
        return out;
    };
    let mut used: HashMap<Vec<bool>, usize> = HashMap::new();
    let mut draws = 0;
    while samples_left > 0 && draws < 4 * nsamples {
        draws += 1;
        let size = size_dist.sample(rng) + num_full + 1;
        let mut mask = vec![false; m];
        for i in sample(rng, m, size).into_vec() {
            mask[i] = true;
        }

        let position = used.get(&mask).copied();
        match position {
            None => {
                used.insert(mask.clone(), out.len());
                samples_left -= 1;
                out.push(mask.clone(), 1.0);
            }
            Some(at) => out.weights[at] += 1.0,
        }

        if samples_left > 0 && size <= num_paired {
            match position {
                None => {
                    samples_left -= 1;
                    out.push(mask.iter().map(|b| !b).collect(), 1.0);
                }
                Some(at) => out.weights[at + 1] += 1.0,
            }
        }
    }

    // Sampled masks share the kernel mass not taken by the enumerated sizes.
    let weight_left: f64 = weight_vector[num_full..].iter().sum();
    let sampled: f64 = out.weights[n_fixed..].iter().sum();
    if sampled > 0.0 {
        out.weights[n_fixed..]
            .iter_mut()
            .for_each(|w| *w *= weight_left / sampled);
    }
    out
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting. Pivots
/// below 1e-12 are treated as zero and their unknowns pinned to 0.
#[allow(clippy::needless_range_loop)]
fn solve_linear_system(a: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .zip(b)
        .map(|(row, &bi)| {
            let mut r = row.clone();
            r.push(bi);
            r
        })
        .collect();

    for i in 0..n {
        let mut max_row = i;
        for k in (i + 1)..n {
            if aug[k][i].abs() > aug[max_row][i].abs() {
                max_row = k;
            }
        }
        aug.swap(i, max_row);

        let pivot = aug[i][i];
        if pivot.abs() < 1e-12 {
            continue;
        }
        for k in (i + 1)..n {
            let factor = aug[k][i] / pivot;
            for j in i..=n {
                aug[k][j] -= factor * aug[i][j];
            }
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = aug[i][n];
        for j in (i + 1)..n {
            sum -= aug[i][j] * x[j];
        }
        let pivot = aug[i][i];
        x[i] = if pivot.abs() > 1e-12 { sum / pivot } else { 0.0 };
    }
    x
}

impl<'a> KernelExplainer<'a> {
    pub fn new(
        model: &'a dyn ProbabilisticClassifier,
        background: &'a BackgroundSet,
        config: ExplainerConfig,
    ) -> Self {
        Self {
            model,
            background,
            config,
        }
    }

    fn output(&self, row: &[f64]) -> Result<[f64; NUM_CLASSES], PipelineError> {
        let out = self.model.predict_proba(row).map_err(unavailable)?;
        if out.iter().any(|v| !v.is_finite()) {
            return Err(unavailable("model produced a non-finite output"));
        }
        Ok(out)
    }

    /// Explain the class the model predicts for `x`.
    pub fn explain(&self, x: &[f64]) -> Result<Explanation, PipelineError> {
        let fx = self.output(x)?;
        let class = FetalHealth::from_index(argmax(&fx))
            .ok_or_else(|| unavailable("model output has no predicted class"))?;
        self.explain_class(x, class)
    }

    /// Explain one class channel of the model output at `x`.
    pub fn explain_class(&self, x: &[f64], class: FetalHealth) -> Result<Explanation, PipelineError> {
        let bg = self.background;
        if bg.is_empty() {
            return Err(unavailable("background set is empty"));
        }
        let dim = x.len();
        if bg.dim() != dim || self.model.n_features() != dim {
            return Err(unavailable(format!(
                "input has {} values, background {} columns, model {} inputs",
                dim,
                bg.dim(),
                self.model.n_features()
            )));
        }
        if bg.rows.iter().any(|r| r.len() != dim) || bg.weights.len() != bg.len() {
            return Err(unavailable("background rows are malformed"));
        }
        let weight_total: f64 = bg.weights.iter().sum();
        if !(weight_total > 0.0) {
            return Err(unavailable("background weights sum to zero"));
        }

        let c = class.output_index();
        let fx = self.output(x)?[c];
        let mut fnull = 0.0;
        for (row, w) in bg.rows.iter().zip(&bg.weights) {
            fnull += w * self.output(row)?[c];
        }
        fnull /= weight_total;

        let varying: Vec<usize> = (0..dim)
            .filter(|&j| bg.rows.iter().any(|r| r[j] != x[j]))
            .collect();
        let m = varying.len();
        let mut signed = vec![0.0; dim];
        let mut evaluated = 0;

        match m {
            0 => {}
            1 => signed[varying[0]] = fx - fnull,
            _ => {
                let mut nsamples = self.config.nsamples;
                if m <= 30 {
                    nsamples = nsamples.min((1usize << m) - 2);
                }
                let mut rng = match self.config.seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                    None => ChaCha8Rng::from_entropy(),
                };
                let coalitions = draw_coalitions(m, nsamples, &mut rng);
                evaluated = coalitions.len();
                if evaluated == 0 {
                    return Err(unavailable("sample budget produced no coalitions"));
                }

                let values: Vec<f64> = coalitions
                    .masks
                    .par_iter()
                    .map(|mask| self.coalition_value(x, &varying, mask, c, weight_total))
                    .collect::<Result<_, _>>()?;

                let phi = solve_constrained(&coalitions, &values, fx, fnull);
                for (j, v) in varying.iter().zip(phi) {
                    signed[*j] = v;
                }
            }
        }

        debug!(
            class = class.as_str(),
            base_value = fnull,
            prediction = fx,
            varying = m,
            coalitions = evaluated,
            "kernel shap complete"
        );

        let contributions = bg
            .feature_names
            .iter()
            .zip(&signed)
            .map(|(name, v)| FeatureContribution {
                feature_name: name.clone(),
                contribution_score: v.abs(),
            })
            .collect();

        Ok(Explanation {
            class,
            base_value: fnull,
            prediction: fx,
            signed,
            contributions,
            nsamples: evaluated,
        })
    }

    fn coalition_value(
        &self,
        x: &[f64],
        varying: &[usize],
        mask: &[bool],
        class: usize,
        weight_total: f64,
    ) -> Result<f64, PipelineError> {
        let mut hybrid = vec![0.0; x.len()];
        let mut acc = 0.0;
        for (row, w) in self.background.rows.iter().zip(&self.background.weights) {
            hybrid.copy_from_slice(row);
            for (j, keep) in varying.iter().zip(mask) {
                if *keep {
                    hybrid[*j] = x[*j];
                }
            }
            acc += w * self.output(&hybrid)?[class];
        }
        Ok(acc / weight_total)
    }
}

/// Weighted least squares with `sum(phi) = fx - fnull` enforced by
/// eliminating the last feature.
fn solve_constrained(coalitions: &Coalitions, values: &[f64], fx: f64, fnull: f64) -> Vec<f64> {
    let m = coalitions.masks[0].len();
    let last = m - 1;
    let total = fx - fnull;

    let mut xtwx = vec![vec![0.0; last]; last];
    let mut xtwy = vec![0.0; last];
    let mut e = vec![0.0; last];
    for ((mask, w), v) in coalitions.masks.iter().zip(&coalitions.weights).zip(values) {
        let z_last = if mask[last] { 1.0 } else { 0.0 };
        for j in 0..last {
            e[j] = (if mask[j] { 1.0 } else { 0.0 }) - z_last;
        }
        let y = (v - fnull) - z_last * total;
        for j in 0..last {
            xtwy[j] += w * e[j] * y;
            for k in 0..last {
                xtwx[j][k] += w * e[j] * e[k];
            }
        }
    }

    // Tiny ridge keeps near-singular sampled designs solvable.
    let mean_diag = (0..last).map(|j| xtwx[j][j]).sum::<f64>() / last as f64;
    for (j, row) in xtwx.iter_mut().enumerate() {
        row[j] += 1e-10 * mean_diag.max(1e-12);
    }

    let mut phi = solve_linear_system(&xtwx, &xtwy);
    let rest: f64 = phi.iter().sum();
    phi.push(total - rest);
    phi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    /// Channel 0 is `coef . x`; other channels are zero.
    struct Linear(Vec<f64>);

    impl ProbabilisticClassifier for Linear {
        fn family(&self) -> &'static str {
            "linear"
        }
        fn n_features(&self) -> usize {
            self.0.len()
        }
        fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
            Ok([self.0.iter().zip(x).map(|(a, b)| a * b).sum(), 0.0, 0.0])
        }
    }

    /// Pairwise interactions, so sampled results depend on the coalitions.
    struct Interacting;

    impl ProbabilisticClassifier for Interacting {
        fn family(&self) -> &'static str {
            "interacting"
        }
        fn n_features(&self) -> usize {
            10
        }
        fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
            let v: f64 = x.windows(2).map(|w| w[0] * w[1]).sum::<f64>() + x[0];
            Ok([10.0 + v, 0.0, 0.0])
        }
    }

    /// Third-order interactions; sampled coalitions cannot recover these
    /// exactly.
    struct Triplets;

    impl ProbabilisticClassifier for Triplets {
        fn family(&self) -> &'static str {
            "triplets"
        }
        fn n_features(&self) -> usize {
            10
        }
        fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
            let v: f64 = x.windows(3).map(|w| w[0] * w[1] * w[2]).sum::<f64>()
                + x.windows(2).map(|w| w[0] * w[1]).sum::<f64>()
                + x[0];
            Ok([10.0 + v, 0.0, 0.0])
        }
    }

    struct Broken;

    impl ProbabilisticClassifier for Broken {
        fn family(&self) -> &'static str {
            "broken"
        }
        fn n_features(&self) -> usize {
            2
        }
        fn predict_proba(&self, _x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
            Err(ModelError::Internal("down".into()))
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    fn background(n: usize, rows: Vec<Vec<f64>>, weights: Vec<f64>) -> BackgroundSet {
        BackgroundSet {
            version: "test".into(),
            feature_names: names(n),
            rows,
            weights,
        }
    }

    fn seeded(nsamples: usize, seed: u64) -> ExplainerConfig {
        ExplainerConfig {
            nsamples,
            seed: Some(seed),
        }
    }

    #[test]
    fn test_linear_model_recovers_exact_shapley_values() {
        let coef = vec![1.0, -2.0, 0.5, 3.0];
        let model = Linear(coef.clone());
        let bg = background(
            4,
            vec![vec![0.0, 1.0, 2.0, -1.0], vec![2.0, -1.0, 0.0, 1.0]],
            vec![0.25, 0.75],
        );
        let x = [1.0, 2.0, 3.0, 4.0];
        let exp = KernelExplainer::new(&model, &bg, seeded(14, 0))
            .explain_class(&x, FetalHealth::Normal)
            .unwrap();
        assert_eq!(exp.nsamples, 14);
        for j in 0..4 {
            let mean = 0.25 * bg.rows[0][j] + 0.75 * bg.rows[1][j];
            let expected = coef[j] * (x[j] - mean);
            assert!(
                (exp.signed[j] - expected).abs() < 1e-8,
                "feature {}: {} vs {}",
                j,
                exp.signed[j],
                expected
            );
            assert_eq!(exp.contributions[j].contribution_score, exp.signed[j].abs());
        }
    }

    #[test]
    fn test_attributions_sum_to_total_effect() {
        let bg = background(
            10,
            (0..5).map(|i| (0..10).map(|j| ((i * 10 + j) as f64).cos()).collect()).collect(),
            vec![0.2; 5],
        );
        let x: Vec<f64> = (0..10).map(|j| j as f64 * 0.3).collect();
        for nsamples in [20, 50, 400] {
            let exp = KernelExplainer::new(&Interacting, &bg, seeded(nsamples, 3))
                .explain(&x)
                .unwrap();
            let sum: f64 = exp.signed.iter().sum();
            assert!((sum - exp.total_effect()).abs() < 1e-9);
            assert!(exp.contributions.iter().all(|c| c.contribution_score >= 0.0));
            assert_eq!(exp.contributions.len(), 10);
        }
    }

    #[test]
    fn test_pinned_seed_is_reproducible() {
        let bg = background(10, vec![vec![0.0; 10], vec![1.0; 10]], vec![0.5, 0.5]);
        let x = vec![2.0; 10];
        let a = KernelExplainer::new(&Interacting, &bg, seeded(50, 9)).explain(&x).unwrap();
        let b = KernelExplainer::new(&Interacting, &bg, seeded(50, 9)).explain(&x).unwrap();
        assert_eq!(a.signed, b.signed);
    }

    fn spread_runs(nsamples: usize) -> Vec<Vec<f64>> {
        let bg = background(
            10,
            (0..4).map(|i| (0..10).map(|j| ((i + j) % 3) as f64).collect()).collect(),
            vec![0.25; 4],
        );
        let x = vec![2.5; 10];
        (0..8)
            .map(|seed| {
                KernelExplainer::new(&Triplets, &bg, seeded(nsamples, seed))
                    .explain(&x)
                    .unwrap()
                    .signed
            })
            .collect()
    }

    fn spread(nsamples: usize) -> f64 {
        let runs = spread_runs(nsamples);
        (0..10)
            .map(|j| {
                let mean = runs.iter().map(|r| r[j]).sum::<f64>() / runs.len() as f64;
                runs.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / runs.len() as f64
            })
            .sum()
    }

    #[test]
    fn test_more_samples_less_variance() {
        // 1022 coalitions covers every mask for 10 features.
        let full = spread(1022);
        let small = spread(24);
        assert!(full < 1e-12, "full enumeration varied: {}", full);
        assert!(small > full);
    }

    #[test]
    fn test_error_shrinks_as_budget_grows() {
        let exact = spread_runs(1022).swap_remove(0);
        let error = |nsamples: usize| {
            let runs = spread_runs(nsamples);
            runs.iter()
                .map(|r| r.iter().zip(&exact).map(|(a, b)| (a - b).powi(2)).sum::<f64>())
                .sum::<f64>()
                / runs.len() as f64
        };
        // 24 samples every size; 400 enumerates sizes 1, 2, 8 and 9 first.
        let coarse = error(24);
        let middle = error(400);
        let full = error(1022);
        assert!(full < 1e-12, "full enumeration drifted: {}", full);
        assert!(middle < coarse, "400 samples ({}) not better than 24 ({})", middle, coarse);
        assert!(full < middle, "full ({}) not better than 400 samples ({})", full, middle);
    }

    #[test]
    fn test_constant_features_get_zero() {
        let model = Linear(vec![1.0, 1.0, 1.0]);
        let bg = background(3, vec![vec![0.0, 5.0, 0.0], vec![1.0, 5.0, 2.0]], vec![0.5, 0.5]);
        let exp = KernelExplainer::new(&model, &bg, seeded(50, 1))
            .explain_class(&[3.0, 5.0, 1.0], FetalHealth::Normal)
            .unwrap();
        assert_eq!(exp.signed[1], 0.0);
        assert!((exp.signed[0] - 2.5).abs() < 1e-9);
        assert!((exp.signed[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_varying_feature_takes_whole_effect() {
        let model = Linear(vec![2.0, 1.0]);
        let bg = background(2, vec![vec![0.0, 1.0]], vec![1.0]);
        let exp = KernelExplainer::new(&model, &bg, ExplainerConfig::default())
            .explain_class(&[3.0, 1.0], FetalHealth::Normal)
            .unwrap();
        assert_eq!(exp.signed, vec![6.0, 0.0]);
        assert_eq!(exp.nsamples, 0);
    }

    #[test]
    fn test_empty_background_is_unavailable() {
        let model = Linear(vec![1.0, 1.0]);
        let bg = background(2, vec![], vec![]);
        assert!(matches!(
            KernelExplainer::new(&model, &bg, ExplainerConfig::default()).explain(&[1.0, 1.0]),
            Err(PipelineError::AttributionUnavailable(_))
        ));
    }

    #[test]
    fn test_model_failure_is_unavailable() {
        let bg = background(2, vec![vec![0.0, 0.0]], vec![1.0]);
        assert!(matches!(
            KernelExplainer::new(&Broken, &bg, ExplainerConfig::default()).explain(&[1.0, 1.0]),
            Err(PipelineError::AttributionUnavailable(_))
        ));
    }

    #[test]
    fn test_coalition_budget_and_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let c = draw_coalitions(33, 50, &mut rng);
        assert!(c.len() <= 50);
        assert!(c.len() >= 40);
        assert!((c.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(c.masks.iter().all(|m| m.iter().any(|b| *b) && !m.iter().all(|b| *b)));

        let full = draw_coalitions(4, 14, &mut rng);
        assert_eq!(full.len(), 14);
        assert!((full.weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_combinations() {
        let mut seen = Vec::new();
        for_each_combination(4, 2, |c| seen.push(c.to_vec()));
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], vec![0, 1]);
        assert_eq!(seen[5], vec![2, 3]);
        assert_eq!(binom(33, 2), 528.0);
    }
}
