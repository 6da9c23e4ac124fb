// ============================================================
// Layer 6 — Pipeline Configuration
// ============================================================
// One JSON document describes a whole training run. Every field
// has a default, so `{}` is a valid config that reproduces the
// census pipeline:
//
//   split       20% evaluation, seed 42, stratified
//   encoding    one-hot, standard scaling, IQR clipping (1.5)
//   features    census derived features, 20 best by ANOVA F
//   candidates  logistic + gradient boosting (both grid-searched
//               over 5 folds, each also trained at base params)
//               + random forest
//   selection   F1, then ROC AUC, then candidate name
//
// `validate` runs before anything is loaded, so a bad config
// fails fast instead of after an hour of training.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::features::{census_features, DerivedFeature, SelectionCriterion};
use crate::data::loader::CsvOptions;
use crate::data::preprocessor::{EncodingConfig, OutlierPolicy};
use crate::domain::error::{PipelineError, Result};
use crate::domain::schema::{AttributeKind, RawSchema};
use crate::ml::boosting::BoostingParams;
use crate::ml::classifier::FamilySpec;
use crate::ml::evaluator::SelectionPolicy;
use crate::ml::forest::ForestParams;
use crate::ml::logistic::LogisticParams;
use crate::ml::search::{training_plan, CandidateSpec, ParamGrid};
use crate::ml::trainer::TrainerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// CSV files read back to back into one dataset
    pub paths: Vec<PathBuf>,
    pub csv:   CsvOptions,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("data/adult.data")],
            csv:   CsvOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub eval_ratio: f64,
    pub seed:       u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self { eval_ratio: 0.2, seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub derived:   Vec<DerivedFeature>,
    pub selection: SelectionCriterion,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { derived: census_features(), selection: SelectionCriterion::default() }
    }
}

/// Everything a training run needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data:         DataConfig,
    pub schema:       RawSchema,
    pub split:        SplitConfig,
    pub encoding:     EncodingConfig,
    pub features:     FeatureConfig,
    pub candidates:   Vec<CandidateSpec>,
    pub trainer:      TrainerConfig,
    pub selection:    SelectionPolicy,
    /// P(positive) at or above this is predicted positive
    pub threshold:    f64,
    pub artifact_dir: PathBuf,
    pub report_dir:   PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data:         DataConfig::default(),
            schema:       RawSchema::census(),
            split:        SplitConfig::default(),
            encoding:     EncodingConfig::default(),
            features:     FeatureConfig::default(),
            candidates:   default_candidates(),
            trainer:      TrainerConfig::default(),
            selection:    SelectionPolicy::default(),
            threshold:    0.5,
            artifact_dir: PathBuf::from("artifacts"),
            report_dir:   PathBuf::from("reports"),
        }
    }
}

/// Logistic regression and gradient boosting with grids, plus an
/// un-tuned random forest
pub fn default_candidates() -> Vec<CandidateSpec> {
    vec![
        CandidateSpec::new("logistic_regression", FamilySpec::Logistic(LogisticParams::default())).with_grid(
            ParamGrid::Logistic {
                learning_rate: vec![0.01, 0.05],
                weight_decay:  vec![1e-4, 1e-3, 1e-2],
                epochs:        vec![],
            },
        ),
        CandidateSpec::new("gradient_boosting", FamilySpec::GradientBoosting(BoostingParams::default())).with_grid(
            ParamGrid::GradientBoosting {
                n_estimators:     vec![100, 200],
                max_depth:        vec![3, 5],
                learning_rate:    vec![],
                min_child_weight: vec![],
                subsample:        vec![],
            },
        ),
        CandidateSpec::new("random_forest", FamilySpec::RandomForest(ForestParams::default())),
    ]
}

impl PipelineConfig {
    /// Read a JSON config; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read '{}': {e}", path.display())))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("'{}': {e}", path.display())))?;
        config.validate()?;
        tracing::debug!("Loaded config from '{}'", path.display());
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations that could only fail later
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(PipelineError::Config(msg));

        if !(self.split.eval_ratio > 0.0 && self.split.eval_ratio < 1.0) {
            return bad(format!("split.eval_ratio must be in (0, 1), got {}", self.split.eval_ratio));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return bad(format!("threshold must be in (0, 1), got {}", self.threshold));
        }
        if self.data.paths.is_empty() {
            return bad("data.paths is empty".to_string());
        }

        // ── Schema ───────────────────────────────────────────────────────────
        let mut names = BTreeSet::new();
        for a in &self.schema.attributes {
            if !names.insert(a.name.as_str()) {
                return bad(format!("attribute '{}' is declared twice", a.name));
            }
            if a.name == self.data.csv.label_column {
                return bad(format!("label column '{}' is also a schema attribute", a.name));
            }
        }
        if self.schema.attributes.is_empty() {
            return bad("schema has no attributes".to_string());
        }

        // ── Encoding ─────────────────────────────────────────────────────────
        match self.encoding.outliers {
            OutlierPolicy::Iqr { factor } | OutlierPolicy::ZScore { factor } if !(factor > 0.0) => {
                return bad(format!("outlier factor must be > 0, got {factor}"));
            }
            _ => {}
        }
        if self.encoding.min_category_frequency == 0 {
            return bad("encoding.min_category_frequency must be >= 1".to_string());
        }

        // ── Features ─────────────────────────────────────────────────────────
        let mut feature_names = BTreeSet::new();
        for f in &self.features.derived {
            if !feature_names.insert(f.name()) {
                return bad(format!("derived feature '{}' is declared twice", f.name()));
            }
            for source in f.sources() {
                match self.schema.get(source) {
                    Some(a) if a.kind == AttributeKind::Numeric => {}
                    _ => {
                        return bad(format!(
                            "derived feature '{}' reads '{}', which is not a numeric attribute",
                            f.name(),
                            source,
                        ))
                    }
                }
            }
        }
        match self.features.selection {
            SelectionCriterion::KBest { k } if k == 0 => return bad("features.selection.k must be >= 1".to_string()),
            _ => {}
        }

        // ── Candidates ───────────────────────────────────────────────────────
        if self.candidates.is_empty() {
            return bad("no candidates configured".to_string());
        }
        let mut candidate_names = BTreeSet::new();
        for c in &self.candidates {
            if c.name.trim().is_empty() {
                return bad("candidate with an empty name".to_string());
            }
            c.configs().map_err(|e| PipelineError::Config(format!("candidate '{}': {e}", c.name)))?;
        }
        // base twins of searched candidates share the namespace
        for c in training_plan(&self.candidates, &self.trainer.search) {
            if !candidate_names.insert(c.name.clone()) {
                return bad(format!("candidate name '{}' is used twice", c.name));
            }
        }
        if self.trainer.search.enabled && self.trainer.search.folds < 2 {
            return bad(format!("trainer.search.folds must be >= 2, got {}", self.trainer.search.folds));
        }
        if self.trainer.candidate_timeout_secs == 0 {
            return bad("trainer.candidate_timeout_secs must be >= 1".to_string());
        }

        Ok(())
    }
}
