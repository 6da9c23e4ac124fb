// ============================================================
// Layer 5 — Classifier Capability + Model Families
// ============================================================
// Every model family exposes the same narrow capability:
//
//   predict_proba(features) → P(label = positive)
//
// FamilySpec is the serialisable "what to train" (family + params),
// TrainedModel is the serialisable "what was trained". Adding a
// family means one variant in each enum plus a fit function; the
// trainer, evaluator and artifact store never match on families
// beyond these two enums.
//
// What is a TrainedModel?
//   Plain data: coefficients for logistic regression, node arenas
//   for the tree families. No tensors or backend handles survive
//   training, so a model serialises to JSON and scores rows with
//   ordinary f64 arithmetic.
//
// Reference: Rust Book §17 (Trait Objects), §6 (Enums)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::record::Label;
use crate::ml::boosting::{BoostedModel, BoostingParams};
use crate::ml::forest::{ForestModel, ForestParams};
use crate::ml::logistic::{LogisticModel, LogisticParams};

/// Probability estimator over a fixed-width feature vector
pub trait Classifier {
    /// Probability of the positive class, in [0, 1]
    fn predict_proba(&self, features: &[f64]) -> f64;

    fn predict(&self, features: &[f64], threshold: f64) -> Label {
        if self.predict_proba(features) >= threshold {
            Label::Positive
        } else {
            Label::Negative
        }
    }
}

// ─── Training input ───────────────────────────────────────────────────────────

/// Feature rows + 0/1 targets of one partition. `row_ids`
/// are the dataset ids each row came from; the leakage guard checks
/// them before anything is fitted.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub rows:    Vec<Vec<f64>>,
    pub targets: Vec<u8>,
    pub row_ids: Vec<usize>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Rows at the given positions, in the given order
    pub fn subset(&self, positions: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            rows:    positions.iter().map(|&i| self.rows[i].clone()).collect(),
            targets: positions.iter().map(|&i| self.targets[i]).collect(),
            row_ids: positions.iter().map(|&i| self.row_ids[i]).collect(),
        }
    }

    pub fn positive_rate(&self) -> f64 {
        if self.targets.is_empty() {
            return 0.0;
        }
        self.targets.iter().filter(|&&t| t == 1).count() as f64 / self.targets.len() as f64
    }
}

// ─── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between the trainer and a
/// worker. Fit loops poll it between epochs / trees.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), FitError> {
        if self.is_cancelled() { Err(FitError::Cancelled) } else { Ok(()) }
    }
}

/// Why a single fit failed. The trainer turns this into a
/// CandidateTraining error carrying the candidate name.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("training diverged: {0}")]
    Diverged(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("backend error: {0}")]
    Backend(String),
}

// ─── Families ─────────────────────────────────────────────────────────────────

/// A model family with concrete hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "params", rename_all = "snake_case")]
pub enum FamilySpec {
    Logistic(LogisticParams),
    RandomForest(ForestParams),
    GradientBoosting(BoostingParams),
}

impl FamilySpec {
    pub fn name(&self) -> &'static str {
        match self {
            FamilySpec::Logistic(_)         => "logistic",
            FamilySpec::RandomForest(_)     => "random_forest",
            FamilySpec::GradientBoosting(_) => "gradient_boosting",
        }
    }

    /// Fit this family on `data`. Same data + same seed → same model.
    pub fn fit(&self, data: &FeatureMatrix, seed: u64, cancel: &CancelToken) -> Result<TrainedModel, FitError> {
        if data.is_empty() || data.n_features() == 0 {
            return Err(FitError::Invalid("empty training matrix".to_string()));
        }
        if data.targets.iter().all(|&t| t == data.targets[0]) {
            return Err(FitError::Invalid("training targets contain a single class".to_string()));
        }
        match self {
            FamilySpec::Logistic(p)         => p.fit(data, seed, cancel).map(TrainedModel::Logistic),
            FamilySpec::RandomForest(p)     => p.fit(data, seed, cancel).map(TrainedModel::Forest),
            FamilySpec::GradientBoosting(p) => p.fit(data, seed, cancel).map(TrainedModel::Boosted),
        }
    }

    pub fn params_json(&self) -> serde_json::Value {
        match self {
            FamilySpec::Logistic(p)         => serde_json::to_value(p),
            FamilySpec::RandomForest(p)     => serde_json::to_value(p),
            FamilySpec::GradientBoosting(p) => serde_json::to_value(p),
        }
        .unwrap_or(serde_json::Value::Null)
    }
}

/// A fitted model of any family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TrainedModel {
    Logistic(LogisticModel),
    Forest(ForestModel),
    Boosted(BoostedModel),
}

impl TrainedModel {
    /// Number of input features the model expects
    pub fn n_features(&self) -> usize {
        match self {
            TrainedModel::Logistic(m) => m.weights.len(),
            TrainedModel::Forest(m)   => m.n_features,
            TrainedModel::Boosted(m)  => m.n_features,
        }
    }
}

impl Classifier for TrainedModel {
    fn predict_proba(&self, features: &[f64]) -> f64 {
        match self {
            TrainedModel::Logistic(m) => m.predict_proba(features),
            TrainedModel::Forest(m)   => m.predict_proba(features),
            TrainedModel::Boosted(m)  => m.predict_proba(features),
        }
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(a.check().is_ok());
        b.cancel();
        assert_eq!(a.check(), Err(FitError::Cancelled));
    }

    #[test]
    fn test_subset_keeps_row_ids() {
        let m = FeatureMatrix {
            rows:    vec![vec![0.0], vec![1.0], vec![2.0]],
            targets: vec![0, 1, 0],
            row_ids: vec![10, 11, 12],
        };
        let s = m.subset(&[2, 0]);
        assert_eq!(s.row_ids, vec![12, 10]);
        assert_eq!(s.targets, vec![0, 0]);
    }

    #[test]
    fn test_single_class_is_invalid() {
        let m = FeatureMatrix {
            rows:    vec![vec![0.0], vec![1.0]],
            targets: vec![1, 1],
            row_ids: vec![0, 1],
        };
        let spec = FamilySpec::Logistic(LogisticParams::default());
        assert!(matches!(spec.fit(&m, 1, &CancelToken::new()), Err(FitError::Invalid(_))));
    }

    #[test]
    fn test_family_spec_json_shape() {
        let spec = FamilySpec::RandomForest(ForestParams::default());
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["family"], "random_forest");
        assert!(v["params"].is_object());
        let back: FamilySpec = serde_json::from_value(v).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(40.0) > 0.999);
        assert!(sigmoid(-40.0) < 0.001);
    }
}
