//! Meta-classifier: a dense feed-forward network over the meta-feature vector.
//!
//! The shipped artifact is `[33] -> Dense(64, relu) -> Dropout(0.3) ->
//! Dense(32, relu) -> Dropout(0.3) -> Dense(3, softmax)`, but any stack of
//! dense layers ending in a 3-way softmax loads.
//!
//! Dropout is only active under [`InferenceMode::Sampling`]. Deterministic
//! evaluation is the default and is what the prediction path and the
//! attribution engine use.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, PipelineError};
use crate::learners::{check_input, ProbabilisticClassifier};
use crate::scores::{ClassScores, NUM_CLASSES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Linear,
    Softmax,
}

/// Fully connected layer. `weights[o]` is the row of input weights for
/// output unit `o`. `dropout` is applied to this layer's activations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub activation: Activation,
    #[serde(default)]
    pub dropout: f64,
}

impl DenseLayer {
    pub fn n_inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    pub fn n_outputs(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        let z: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + b)
            .collect();
        match self.activation {
            Activation::Relu => z.into_iter().map(|v| v.max(0.0)).collect(),
            Activation::Linear => z,
            Activation::Softmax => {
                let max = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let e: Vec<f64> = z.iter().map(|v| (v - max).exp()).collect();
                let total: f64 = e.iter().sum();
                e.into_iter().map(|v| v / total).collect()
            }
        }
    }
}

/// How dropout behaves during a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceMode {
    /// Dropout disabled. Repeat calls are bit-identical.
    #[default]
    Deterministic,
    /// Monte Carlo dropout with inverted scaling, seeded.
    Sampling { seed: u64 },
}

/// Mean and spread of the class distribution over MC-dropout passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertaintyEstimate {
    pub mean: [f64; NUM_CLASSES],
    pub std: [f64; NUM_CLASSES],
    pub passes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaClassifier {
    pub version: String,
    pub layers: Vec<DenseLayer>,
}

impl MetaClassifier {
    pub fn n_inputs(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::n_inputs)
    }

    /// Shape and value checks. `expected_inputs` is the meta-feature length
    /// implied by the ensemble.
    pub fn validate(&self, expected_inputs: usize) -> Result<(), PipelineError> {
        let fail = |reason: String| PipelineError::missing_artifact("meta_classifier", reason);

        let Some(last) = self.layers.last() else {
            return Err(fail("network has no layers".into()));
        };
        if self.n_inputs() != expected_inputs {
            return Err(fail(format!(
                "network takes {} inputs, meta-feature vector has {}",
                self.n_inputs(),
                expected_inputs
            )));
        }
        if last.activation != Activation::Softmax || last.n_outputs() != NUM_CLASSES {
            return Err(fail(format!(
                "output layer must be a {}-way softmax",
                NUM_CLASSES
            )));
        }

        let mut width = expected_inputs;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.n_outputs() == 0 || layer.bias.len() != layer.n_outputs() {
                return Err(fail(format!("layer {} has mismatched bias", i)));
            }
            if layer.weights.iter().any(|row| row.len() != width) {
                return Err(fail(format!("layer {} expects {} inputs", i, width)));
            }
            if i + 1 < self.layers.len() && layer.activation == Activation::Softmax {
                return Err(fail(format!("softmax on hidden layer {}", i)));
            }
            if !(0.0..1.0).contains(&layer.dropout) {
                return Err(fail(format!("layer {} dropout {} out of [0, 1)", i, layer.dropout)));
            }
            if layer
                .weights
                .iter()
                .flatten()
                .chain(&layer.bias)
                .any(|v| !v.is_finite())
            {
                return Err(fail(format!("layer {} has non-finite parameters", i)));
            }
            width = layer.n_outputs();
        }
        if last.dropout != 0.0 {
            return Err(fail("dropout on the output layer".into()));
        }
        Ok(())
    }

    fn forward(&self, x: &[f64], mut rng: Option<&mut ChaCha8Rng>) -> Vec<f64> {
        let mut h = x.to_vec();
        for layer in &self.layers {
            h = layer.forward(&h);
            if let Some(rng) = rng.as_deref_mut() {
                if layer.dropout > 0.0 {
                    let keep = 1.0 - layer.dropout;
                    for v in h.iter_mut() {
                        *v = if rng.gen::<f64>() < keep { *v / keep } else { 0.0 };
                    }
                }
            }
        }
        h
    }

    fn check_finite_input(&self, x: &[f64]) -> Result<(), ModelError> {
        check_input(self.n_inputs(), x)?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        Ok(())
    }

    fn finish(out: Vec<f64>) -> Result<[f64; NUM_CLASSES], ModelError> {
        if out.len() != NUM_CLASSES {
            return Err(ModelError::Internal(format!(
                "network produced {} outputs",
                out.len()
            )));
        }
        if out.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        let mut probs = [0.0; NUM_CLASSES];
        probs.copy_from_slice(&out);
        Ok(probs)
    }

    /// Class distribution for one meta-feature vector.
    pub fn predict(&self, x: &[f64], mode: InferenceMode) -> Result<[f64; NUM_CLASSES], ModelError> {
        self.check_finite_input(x)?;
        let out = match mode {
            InferenceMode::Deterministic => self.forward(x, None),
            InferenceMode::Sampling { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                self.forward(x, Some(&mut rng))
            }
        };
        Self::finish(out)
    }

    /// Monte Carlo dropout: `passes` sampled forward passes from one seeded
    /// stream, summarized as per-class mean and standard deviation.
    pub fn predict_with_uncertainty(
        &self,
        x: &[f64],
        passes: usize,
        seed: u64,
    ) -> Result<UncertaintyEstimate, ModelError> {
        self.check_finite_input(x)?;
        if passes == 0 {
            return Err(ModelError::Internal("at least one pass is required".into()));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut samples = Vec::with_capacity(passes);
        for _ in 0..passes {
            samples.push(Self::finish(self.forward(x, Some(&mut rng)))?);
        }

        let n = passes as f64;
        let mut mean = [0.0; NUM_CLASSES];
        for s in &samples {
            for c in 0..NUM_CLASSES {
                mean[c] += s[c] / n;
            }
        }
        let mut std = [0.0; NUM_CLASSES];
        for s in &samples {
            for c in 0..NUM_CLASSES {
                std[c] += (s[c] - mean[c]).powi(2) / n;
            }
        }
        Ok(UncertaintyEstimate {
            mean,
            std: std.map(f64::sqrt),
            passes,
        })
    }

    /// Deterministic prediction wrapped as validated scores.
    pub fn scores(&self, x: &[f64]) -> Result<ClassScores, ModelError> {
        self.predict(x, InferenceMode::Deterministic)
            .and_then(ClassScores::from_probabilities)
    }
}

impl ProbabilisticClassifier for MetaClassifier {
    fn family(&self) -> &'static str {
        "mlp"
    }

    fn n_features(&self) -> usize {
        self.n_inputs()
    }

    fn predict_proba(&self, x: &[f64]) -> Result<[f64; NUM_CLASSES], ModelError> {
        self.predict(x, InferenceMode::Deterministic)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Random network of the shipped shape, seeded.
    pub fn random_network(n_inputs: usize, seed: u64) -> MetaClassifier {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut layer = |n_in: usize, n_out: usize, activation, dropout| DenseLayer {
            weights: (0..n_out)
                .map(|_| (0..n_in).map(|_| rng.gen_range(-0.5..0.5)).collect())
                .collect(),
            bias: (0..n_out).map(|_| rng.gen_range(-0.1..0.1)).collect(),
            activation,
            dropout,
        };
        let layers = vec![
            layer(n_inputs, 64, Activation::Relu, 0.3),
            layer(64, 32, Activation::Relu, 0.3),
            layer(32, NUM_CLASSES, Activation::Softmax, 0.0),
        ];
        MetaClassifier {
            version: "test".into(),
            layers,
        }
    }
}
