//! Shared fixtures: a small but complete artifact directory built through the
//! public API.

#![allow(dead_code)]

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Map, Value};

use fetalguard::artifacts::{write_artifacts, ArtifactManifest, LearnerEntry};
use fetalguard::background::BackgroundSet;
use fetalguard::features::{meta_feature_names, FEATURE_NAMES, NUM_FEATURES};
use fetalguard::learners::boosting::{BoostedTree, ObliviousSplit, ObliviousTree};
use fetalguard::learners::svm::OvrMachine;
use fetalguard::learners::tree::{DecisionTree, SplitRule};
use fetalguard::learners::{
    GradientBoosting, LearnerArtifact, ObliviousBoosting, RandomForest, RbfSvm,
};
use fetalguard::model::{Activation, DenseLayer};
use fetalguard::scaler::FeatureScaler;
use fetalguard::MetaClassifier;

pub const LEARNER_NAMES: [&str; 4] = ["SVM", "RandomForest", "XGBoost", "CatBoost"];

const ASTV: usize = 4;
const ALTV: usize = 6;

pub fn scaler() -> FeatureScaler {
    FeatureScaler {
        version: "it".into(),
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        mean: vec![
            133.3, 0.003, 0.009, 0.004, 47.0, 1.33, 9.8, 8.2, 0.002, 0.0, 0.0002, 70.4, 93.6,
            164.0, 4.1, 0.3, 137.5, 134.6, 138.1, 18.8, 0.3,
        ],
        scale: vec![
            9.8, 0.004, 0.047, 0.003, 17.2, 0.88, 18.4, 5.6, 0.003, 0.0001, 0.0006, 38.9, 29.6,
            17.9, 3.0, 0.7, 16.4, 15.6, 14.5, 29.0, 0.6,
        ],
    }
}

fn stump(feature: usize, threshold: f64, left: Vec<f64>, right: Vec<f64>) -> DecisionTree {
    DecisionTree {
        children_left: vec![1, -1, -1],
        children_right: vec![2, -1, -1],
        features: vec![feature, 0, 0],
        thresholds: vec![threshold, 0.0, 0.0],
        values: vec![vec![0.0; left.len()], left, right],
    }
}

pub fn learners() -> Vec<LearnerArtifact> {
    let mut sv_high = vec![0.0; NUM_FEATURES];
    sv_high[ASTV] = 1.5;
    let mut sv_low = vec![0.0; NUM_FEATURES];
    sv_low[ASTV] = -1.0;
    let machine = |dual_coef: Vec<f64>| OvrMachine {
        dual_coef,
        intercept: 0.0,
        platt_a: -2.5,
        platt_b: 0.0,
    };
    vec![
        LearnerArtifact::Svm(RbfSvm {
            n_features: NUM_FEATURES,
            gamma: 0.4,
            support_vectors: vec![sv_low, vec![0.0; NUM_FEATURES], sv_high],
            classes: vec![
                machine(vec![1.0, -0.5, -0.5]),
                machine(vec![-0.5, 1.0, -0.5]),
                machine(vec![-0.5, -0.5, 1.0]),
            ],
        }),
        LearnerArtifact::RandomForest(RandomForest {
            n_features: NUM_FEATURES,
            trees: vec![
                stump(ASTV, 0.5, vec![30.0, 8.0, 2.0], vec![2.0, 8.0, 30.0]),
                stump(ALTV, 0.0, vec![20.0, 15.0, 5.0], vec![5.0, 10.0, 25.0]),
            ],
        }),
        LearnerArtifact::GradientBoosting(GradientBoosting {
            n_features: NUM_FEATURES,
            base_score: [0.4, 0.0, 0.0],
            trees: vec![
                BoostedTree {
                    class: 0,
                    tree: stump(ASTV, 0.5, vec![1.0], vec![-1.0]),
                },
                BoostedTree {
                    class: 2,
                    tree: stump(ASTV, 0.5, vec![-1.0], vec![1.5]),
                },
            ],
            split: SplitRule::Less,
        }),
        LearnerArtifact::ObliviousBoosting(ObliviousBoosting {
            n_features: NUM_FEATURES,
            scale: 1.0,
            bias: [0.1, 0.0, 0.0],
            trees: vec![ObliviousTree {
                splits: vec![
                    ObliviousSplit {
                        feature: ASTV,
                        border: 0.5,
                    },
                    ObliviousSplit {
                        feature: ALTV,
                        border: 0.5,
                    },
                ],
                leaf_values: vec![
                    [1.0, 0.0, -1.0],
                    [-0.5, 0.2, 1.0],
                    [0.0, 0.5, 0.0],
                    [-1.0, 0.0, 1.5],
                ],
            }],
        }),
    ]
}

pub fn meta(n_inputs: usize) -> MetaClassifier {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let mut layer = |n_in: usize, n_out: usize, activation, dropout| DenseLayer {
        weights: (0..n_out)
            .map(|_| (0..n_in).map(|_| rng.gen_range(-0.5..0.5)).collect())
            .collect(),
        bias: (0..n_out).map(|_| rng.gen_range(-0.1..0.1)).collect(),
        activation,
        dropout,
    };
    MetaClassifier {
        version: "it".into(),
        layers: vec![
            layer(n_inputs, 16, Activation::Relu, 0.3),
            layer(16, 3, Activation::Softmax, 0.0),
        ],
    }
}

pub fn background() -> BackgroundSet {
    let names = meta_feature_names(&LEARNER_NAMES);
    let rows = (0..8)
        .map(|i| {
            let t = i as f64 / 7.0;
            let mut row: Vec<f64> = (0..NUM_FEATURES)
                .map(|j| (t * 2.0 - 1.0) * ((j % 4) as f64 - 1.5) * 0.5)
                .collect();
            for _ in 0..LEARNER_NAMES.len() {
                row.extend_from_slice(&[0.7 - 0.5 * t, 0.2, 0.1 + 0.5 * t]);
            }
            row
        })
        .collect();
    BackgroundSet::uniform("it", names, rows)
}

pub fn manifest() -> ArtifactManifest {
    ArtifactManifest {
        version: "it-1".into(),
        scaler: "scaler.json".into(),
        base_learners: LEARNER_NAMES
            .iter()
            .map(|name| LearnerEntry {
                name: name.to_string(),
                path: format!("{}.json", name.to_lowercase()),
            })
            .collect(),
        meta_classifier: "meta.json".into(),
        background: "background.json".into(),
    }
}

/// Write a full artifact directory into `dir`.
pub fn write_fixture(dir: &Path) {
    let names = meta_feature_names(&LEARNER_NAMES);
    write_artifacts(
        dir,
        &manifest(),
        &scaler(),
        &learners(),
        &meta(names.len()),
        &background(),
    )
    .expect("write fixture artifacts");
}

/// The reference scenario: high ASTV, abnormal long-term variability.
pub fn scenario() -> Value {
    json!({
        "LB": 120, "AC": 0, "FM": 0, "UC": 0, "ASTV": 73, "MSTV": 0.5, "ALTV": 43,
        "MLTV": 2.4, "DL": 0, "DS": 0, "DP": 0, "Width": 64, "Min": 62, "Max": 126,
        "Nmax": 2, "Nzeros": 0, "Mode": 120, "Mean": 137, "Median": 121,
        "Variance": 73, "Tendency": 1
    })
}

/// A reassuring trace.
pub fn normal_trace() -> Value {
    json!({
        "LB": 132, "AC": 0.006, "FM": 0, "UC": 0.006, "ASTV": 17, "MSTV": 2.1, "ALTV": 0,
        "MLTV": 10.4, "DL": 0.003, "DS": 0, "DP": 0, "Width": 130, "Min": 68, "Max": 198,
        "Nmax": 6, "Nzeros": 1, "Mode": 141, "Mean": 136, "Median": 140,
        "Variance": 12, "Tendency": 0
    })
}

pub fn as_map(v: &Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap_or_default()
}
