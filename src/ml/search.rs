// ============================================================
// Layer 5 — Candidates + Hyperparameter Search
// ============================================================
// A candidate is a named family with base hyperparameters and an
// optional typed grid. The grid expands into concrete FamilySpecs
// (cartesian product, declaration order); an empty axis keeps the
// base value.
//
// Search = stratified k-fold over the TRAINING matrix only:
//
//   for config in grid:
//       for fold in folds:
//           fit on fold.fit, score fold.validate with the metric
//       mean score
//   best mean wins (ties → earlier config), then the caller refits
//   it on the whole training matrix
//
// With search on, every searched candidate also trains once at its
// base params (`<name>_base`), so base and tuned are both scored on
// the evaluation partition and compete for champion.
//
// The evaluation partition never reaches this module.

use serde::{Deserialize, Serialize};

use crate::data::splitter::stratified_folds;
use crate::ml::boosting::BoostingParams;
use crate::ml::classifier::{CancelToken, Classifier, FamilySpec, FeatureMatrix, FitError};
use crate::ml::evaluator::Metric;
use crate::ml::forest::ForestParams;
use crate::ml::logistic::LogisticParams;

/// One model to train: a name, a family with base params, an optional grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name:   String,
    #[serde(flatten)]
    pub family: FamilySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid:   Option<ParamGrid>,
}

/// Values to try per hyperparameter; empty = keep the base value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ParamGrid {
    Logistic {
        #[serde(default)]
        learning_rate: Vec<f64>,
        #[serde(default)]
        weight_decay:  Vec<f64>,
        #[serde(default)]
        epochs:        Vec<usize>,
    },
    RandomForest {
        #[serde(default)]
        n_trees:          Vec<usize>,
        #[serde(default)]
        max_depth:        Vec<usize>,
        #[serde(default)]
        min_samples_leaf: Vec<usize>,
    },
    GradientBoosting {
        #[serde(default)]
        n_estimators:     Vec<usize>,
        #[serde(default)]
        max_depth:        Vec<usize>,
        #[serde(default)]
        learning_rate:    Vec<f64>,
        #[serde(default)]
        min_child_weight: Vec<f64>,
        #[serde(default)]
        subsample:        Vec<f64>,
    },
}

/// Base value when the axis is empty
fn axis<T: Clone>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() { vec![base] } else { values.to_vec() }
}

impl ParamGrid {
    pub fn family_name(&self) -> &'static str {
        match self {
            ParamGrid::Logistic { .. }         => "logistic",
            ParamGrid::RandomForest { .. }     => "random_forest",
            ParamGrid::GradientBoosting { .. } => "gradient_boosting",
        }
    }

    /// Cartesian product over `base`. Fails when the grid is for a
    /// different family than `base`.
    pub fn expand(&self, base: &FamilySpec) -> Result<Vec<FamilySpec>, String> {
        let mut out = Vec::new();
        match (self, base) {
            (ParamGrid::Logistic { learning_rate, weight_decay, epochs }, FamilySpec::Logistic(b)) => {
                for lr in axis(learning_rate, b.learning_rate) {
                    for wd in axis(weight_decay, b.weight_decay) {
                        for ep in axis(epochs, b.epochs) {
                            out.push(FamilySpec::Logistic(LogisticParams {
                                learning_rate: lr,
                                weight_decay:  wd,
                                epochs:        ep,
                                ..b.clone()
                            }));
                        }
                    }
                }
            }
            (ParamGrid::RandomForest { n_trees, max_depth, min_samples_leaf }, FamilySpec::RandomForest(b)) => {
                for nt in axis(n_trees, b.n_trees) {
                    for md in axis(max_depth, b.max_depth) {
                        for ml in axis(min_samples_leaf, b.min_samples_leaf) {
                            out.push(FamilySpec::RandomForest(ForestParams {
                                n_trees:          nt,
                                max_depth:        md,
                                min_samples_leaf: ml,
                                ..b.clone()
                            }));
                        }
                    }
                }
            }
            (
                ParamGrid::GradientBoosting { n_estimators, max_depth, learning_rate, min_child_weight, subsample },
                FamilySpec::GradientBoosting(b),
            ) => {
                for ne in axis(n_estimators, b.n_estimators) {
                    for md in axis(max_depth, b.max_depth) {
                        for lr in axis(learning_rate, b.learning_rate) {
                            for mcw in axis(min_child_weight, b.min_child_weight) {
                                for ss in axis(subsample, b.subsample) {
                                    out.push(FamilySpec::GradientBoosting(BoostingParams {
                                        n_estimators:     ne,
                                        max_depth:        md,
                                        learning_rate:    lr,
                                        min_child_weight: mcw,
                                        subsample:        ss,
                                        ..b.clone()
                                    }));
                                }
                            }
                        }
                    }
                }
            }
            (grid, base) => {
                return Err(format!("{} grid given for a {} candidate", grid.family_name(), base.name()));
            }
        }
        Ok(out)
    }
}

impl CandidateSpec {
    pub fn new(name: impl Into<String>, family: FamilySpec) -> Self {
        Self { name: name.into(), family, grid: None }
    }

    pub fn with_grid(mut self, grid: ParamGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    /// Concrete configs to search; just the base when there is no grid
    pub fn configs(&self) -> Result<Vec<FamilySpec>, String> {
        match &self.grid {
            Some(grid) => grid.expand(&self.family),
            None       => Ok(vec![self.family.clone()]),
        }
    }
}

// ─── Training plan ────────────────────────────────────────────────────────────

/// Name suffix of a searched candidate's untuned twin
pub const BASE_SUFFIX: &str = "_base";

/// What actually gets trained. A candidate whose grid is searched is
/// preceded by `<name>_base`, the same family at its base params, so
/// the report carries base and tuned rows side by side.
pub fn training_plan(candidates: &[CandidateSpec], search: &SearchConfig) -> Vec<CandidateSpec> {
    let mut plan = Vec::with_capacity(candidates.len() * 2);
    for c in candidates {
        let searched = search.enabled && c.configs().map_or(false, |configs| configs.len() > 1);
        if searched {
            plan.push(CandidateSpec::new(format!("{}{BASE_SUFFIX}", c.name), c.family.clone()));
        }
        plan.push(c.clone());
    }
    plan
}

// ─── Search ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    /// Internal stratified folds
    pub folds:   usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { enabled: true, folds: 5 }
    }
}

/// The chosen configuration of one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub spec:          FamilySpec,
    /// Mean fold score; None when no search ran
    pub cv_score:      Option<f64>,
    pub configs_tried: usize,
}

/// Pick the best config of `candidate` by mean internal-fold `metric`.
/// A config whose fit fails on any fold is skipped; only when every
/// config fails is the last error returned.
pub fn grid_search(
    candidate: &CandidateSpec,
    training:  &FeatureMatrix,
    search:    &SearchConfig,
    metric:    Metric,
    threshold: f64,
    seed:      u64,
    cancel:    &CancelToken,
) -> Result<SearchOutcome, FitError> {
    let configs = candidate.configs().map_err(FitError::Invalid)?;
    if !search.enabled || configs.len() == 1 {
        return Ok(SearchOutcome { spec: candidate.family.clone(), cv_score: None, configs_tried: 1 });
    }

    let folds = stratified_folds(&training.targets, search.folds, seed)
        .map_err(|e| FitError::Invalid(e.to_string()))?;

    let mut best: Option<(usize, f64)> = None;
    let mut last_error = None;

    'configs: for (c, spec) in configs.iter().enumerate() {
        let mut total = 0.0;
        for fold in &folds {
            cancel.check()?;
            let fit_part = training.subset(&fold.fit);
            let val_part = training.subset(&fold.validate);
            match spec.fit(&fit_part, seed, cancel) {
                Ok(model) => {
                    let probs: Vec<f64> = val_part.rows.iter().map(|r| model.predict_proba(r)).collect();
                    total += metric.oriented(metric.score(&probs, &val_part.targets, threshold));
                }
                Err(FitError::Cancelled) => return Err(FitError::Cancelled),
                Err(e) => {
                    tracing::debug!("'{}' config {} skipped: {}", candidate.name, c, e);
                    last_error = Some(e);
                    continue 'configs;
                }
            }
        }
        let mean = total / folds.len() as f64;
        tracing::debug!("'{}' config {}: mean {} {:.4}", candidate.name, c, metric.name(), metric.oriented(mean));
        if best.map_or(true, |(_, b)| mean.total_cmp(&b) == std::cmp::Ordering::Greater) {
            best = Some((c, mean));
        }
    }

    match best {
        Some((c, mean)) => Ok(SearchOutcome {
            spec:          configs[c].clone(),
            cv_score:      Some(metric.oriented(mean)),
            configs_tried: configs.len(),
        }),
        None => Err(last_error.unwrap_or_else(|| FitError::Invalid("empty grid".to_string()))),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn boosted_grid() -> CandidateSpec {
        CandidateSpec::new("xgb", FamilySpec::GradientBoosting(BoostingParams::default())).with_grid(
            ParamGrid::GradientBoosting {
                n_estimators:     vec![5, 20],
                max_depth:        vec![1, 3],
                learning_rate:    vec![],
                min_child_weight: vec![],
                subsample:        vec![],
            },
        )
    }

    fn data() -> FeatureMatrix {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![(i % 25) as f64, ((i * 7) % 11) as f64]).collect();
        let targets = rows.iter().map(|r| (r[0] > 15.0) as u8).collect();
        FeatureMatrix { rows, targets, row_ids: (0..100).collect() }
    }

    #[test]
    fn test_grid_expands_cartesian_in_order() {
        let configs = boosted_grid().configs().unwrap();
        assert_eq!(configs.len(), 4);
        match (&configs[0], &configs[3]) {
            (FamilySpec::GradientBoosting(a), FamilySpec::GradientBoosting(d)) => {
                assert_eq!((a.n_estimators, a.max_depth), (5, 1));
                assert_eq!((d.n_estimators, d.max_depth), (20, 3));
                assert_eq!(a.learning_rate, BoostingParams::default().learning_rate);
            }
            _ => panic!("wrong family"),
        }
    }

    #[test]
    fn test_mismatched_grid_is_rejected() {
        let c = CandidateSpec::new("lr", FamilySpec::Logistic(LogisticParams::default())).with_grid(
            ParamGrid::RandomForest { n_trees: vec![10], max_depth: vec![], min_samples_leaf: vec![] },
        );
        assert!(c.configs().is_err());
    }

    #[test]
    fn test_search_picks_a_grid_config() {
        let out = grid_search(
            &boosted_grid(),
            &data(),
            &SearchConfig { enabled: true, folds: 3 },
            Metric::F1,
            0.5,
            42,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.configs_tried, 4);
        assert!(out.cv_score.unwrap() > 0.5);
    }

    #[test]
    fn test_search_is_deterministic() {
        let run = || {
            grid_search(&boosted_grid(), &data(), &SearchConfig { enabled: true, folds: 3 }, Metric::F1, 0.5, 9, &CancelToken::new())
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_disabled_search_keeps_base_params() {
        let out = grid_search(
            &boosted_grid(),
            &data(),
            &SearchConfig { enabled: false, folds: 3 },
            Metric::F1,
            0.5,
            1,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.spec, FamilySpec::GradientBoosting(BoostingParams::default()));
        assert_eq!(out.cv_score, None);
    }

    #[test]
    fn test_plan_adds_base_twin_for_searched_grids() {
        let plain = CandidateSpec::new("forest", FamilySpec::RandomForest(ForestParams::default()));
        let plan  = training_plan(&[boosted_grid(), plain], &SearchConfig::default());
        let names: Vec<&str> = plan.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["xgb_base", "xgb", "forest"]);
        assert_eq!(plan[0].grid, None);
        assert_eq!(plan[0].family, plan[1].family);
    }

    #[test]
    fn test_plan_without_search_is_unchanged() {
        let plan = training_plan(&[boosted_grid()], &SearchConfig { enabled: false, folds: 3 });
        assert_eq!(plan, vec![boosted_grid()]);
    }

    #[test]
    fn test_candidate_json_is_flat() {
        let json = r#"{
            "name": "lr",
            "family": "logistic",
            "params": { "epochs": 3 },
            "grid": { "family": "logistic", "weight_decay": [0.0, 0.01] }
        }"#;
        let c: CandidateSpec = serde_json::from_str(json).unwrap();
        assert_eq!(c.configs().unwrap().len(), 2);
        match &c.family {
            FamilySpec::Logistic(p) => assert_eq!(p.epochs, 3),
            _ => panic!("wrong family"),
        }
    }
}
