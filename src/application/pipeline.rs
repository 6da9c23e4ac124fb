// ============================================================
// Layer 2 — Training Pipeline
// ============================================================
// The whole batch job over an in-memory dataset, with no file
// I/O, so tests can drive it directly:
//
//   Step 1: Split into Training / Evaluation     (Layer 4 - data)
//   Step 2: Fit the encoder/scaler store         (Layer 4 - data)
//   Step 3: Encode both partitions               (Layer 4 - data)
//   Step 4: Fit derived features + selection     (Layer 4 - data)
//   Step 5: Train every candidate in parallel    (Layer 5 - ml)
//           (searched ones also at base params)
//   Step 6: Score on Evaluation, pick champion   (Layer 5 - ml)
//
// Every fitting step is preceded by a leakage-guard check on the
// row ids it is about to read.

use std::sync::Arc;

use chrono::Utc;

use crate::data::features::{FeatureBuilder, FeatureSchema};
use crate::data::preprocessor::{EncodedRecord, Preprocessor, TransformerState};
use crate::data::splitter::{split, Split};
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{Dataset, LabeledRecord};
use crate::infra::config::PipelineConfig;
use crate::ml::classifier::FeatureMatrix;
use crate::ml::evaluator::{CandidateReport, EvaluationReport, Evaluator, MetricSet};
use crate::ml::search::training_plan;
use crate::ml::trainer::{ModelCandidate, Trainer};

/// Everything a finished run produced, ready to publish
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub split:            Split,
    pub transformer:      TransformerState,
    pub features:         FeatureSchema,
    pub champion:         ModelCandidate,
    pub champion_metrics: MetricSet,
    pub report:           EvaluationReport,
}

/// Run split → fit → train → evaluate → select on `dataset`.
///
/// # Errors
/// DataError / LeakageGuard / SchemaMismatch from the data layer, and
/// NoViableCandidate when every candidate failed. Single candidate
/// failures are recorded in the report instead.
pub fn run(config: &PipelineConfig, dataset: &Dataset) -> Result<PipelineRun> {
    let seed = config.split.seed;

    // ── Step 1: Split ────────────────────────────────────────────────────────
    let split = split(dataset, config.split.eval_ratio, seed)?;
    let guard = split.guard();
    tracing::info!(
        "Split {} rows: {} training, {} evaluation",
        dataset.len(),
        split.training.len(),
        split.evaluation.len(),
    );

    // ── Step 2: Encoder/scaler store on Training ─────────────────────────────
    let view = split.training_view(dataset);
    guard.check(Stage::Encode, view.row_ids())?;
    let transformer = Preprocessor::new(config.schema.clone(), config.encoding.clone()).fit(view)?;

    // ── Step 3: Encode both partitions ───────────────────────────────────────
    let (train_encoded, train_targets) = encode(&transformer, view.row_ids(), dataset)?;
    let (eval_encoded, eval_targets)   = encode(&transformer, &split.evaluation.rows, dataset)?;

    // ── Step 4: Feature schema on Training ───────────────────────────────────
    guard.check(Stage::Features, view.row_ids())?;
    let features = FeatureBuilder::new(
        config.features.derived.clone(),
        config.encoding.categorical,
        config.features.selection.clone(),
    )
    .fit(&transformer, &train_encoded, &train_targets)?;

    let training = FeatureMatrix {
        rows:    train_encoded.iter().map(|r| features.vectorize(r).0).collect(),
        targets: train_targets,
        row_ids: view.row_ids().to_vec(),
    };
    let evaluation = FeatureMatrix {
        rows:    eval_encoded.iter().map(|r| features.vectorize(r).0).collect(),
        targets: eval_targets,
        row_ids: split.evaluation.rows.clone(),
    };
    tracing::info!(
        "Feature matrices: {} × {} training, {} evaluation (positive rate {:.3})",
        training.len(),
        training.n_features(),
        evaluation.len(),
        training.positive_rate(),
    );

    // ── Step 5: Train all candidates ─────────────────────────────────────────
    let plan     = training_plan(&config.candidates, &config.trainer.search);
    let trainer  = Trainer::new(config.trainer.clone(), config.selection.primary, config.threshold, seed);
    let outcomes = trainer.train_all(&plan, Arc::new(training), &guard)?;

    // ── Step 6: Evaluate and select ──────────────────────────────────────────
    let evaluator = Evaluator::new(config.threshold, config.selection.clone());
    let mut reports = Vec::with_capacity(outcomes.len());
    let mut trained = Vec::with_capacity(outcomes.len());

    for (outcome, spec) in outcomes.into_iter().zip(&plan) {
        let duration_ms = outcome.duration.as_millis() as u64;
        match outcome.result {
            Ok(candidate) => {
                let (metrics, confusion) = evaluator.evaluate(&candidate.model, &evaluation);
                tracing::info!(
                    "  '{}': roc_auc={:.4} f1={:.4} brier={:.4} accuracy={:.4}",
                    candidate.name, metrics.roc_auc, metrics.f1, metrics.brier, metrics.accuracy,
                );
                reports.push(CandidateReport {
                    name:        candidate.name.clone(),
                    family:      outcome.family.to_string(),
                    params:      candidate.spec.params_json(),
                    cv_score:    candidate.cv_score,
                    metrics:     Some(metrics),
                    confusion:   Some(confusion),
                    failure:     None,
                    duration_ms,
                    rank:        None,
                });
                trained.push(Some(candidate));
            }
            Err(e) => {
                reports.push(CandidateReport {
                    name:        outcome.name,
                    family:      outcome.family.to_string(),
                    params:      spec.family.params_json(),
                    cv_score:    None,
                    metrics:     None,
                    confusion:   None,
                    failure:     Some(e.to_string()),
                    duration_ms,
                    rank:        None,
                });
                trained.push(None);
            }
        }
    }

    let champion_index = evaluator.select(&mut reports)?;
    let champion = trained
        .get_mut(champion_index)
        .and_then(Option::take)
        .ok_or_else(|| PipelineError::NoViableCandidate { failed: reports.len() })?;
    let champion_metrics = reports[champion_index]
        .metrics
        .ok_or_else(|| PipelineError::NoViableCandidate { failed: reports.len() })?;

    let report = EvaluationReport {
        created_at:      Utc::now(),
        seed,
        threshold:       config.threshold,
        policy:          config.selection.clone(),
        training_rows:   split.training.len(),
        evaluation_rows: split.evaluation.len(),
        champion:        Some(champion.name.clone()),
        candidates:      reports,
    };

    Ok(PipelineRun { split, transformer, features, champion, champion_metrics, report })
}

/// Transform the given rows and collect their 0/1 targets
fn encode(state: &TransformerState, ids: &[usize], dataset: &Dataset) -> Result<(Vec<EncodedRecord>, Vec<u8>)> {
    let mut encoded = Vec::with_capacity(ids.len());
    let mut targets = Vec::with_capacity(ids.len());
    for &id in ids {
        let row = labeled_row(dataset, id)?;
        let label = row.label.ok_or_else(|| PipelineError::Data {
            stage:     Stage::Encode,
            row:       Some(id),
            attribute: None,
            reason:    "row has no label".to_string(),
        })?;
        encoded.push(state.transform(&row.record)?);
        targets.push(label.as_target());
    }
    Ok((encoded, targets))
}

fn labeled_row(dataset: &Dataset, id: usize) -> Result<&LabeledRecord> {
    dataset.row(id).ok_or_else(|| PipelineError::Data {
        stage:     Stage::Encode,
        row:       Some(id),
        attribute: None,
        reason:    "row id is out of range".to_string(),
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{Label, Record};
    use crate::domain::schema::{AttributeSpec, RawSchema};
    use crate::ml::boosting::BoostingParams;
    use crate::ml::classifier::FamilySpec;
    use crate::ml::logistic::LogisticParams;
    use crate::ml::search::CandidateSpec;

    fn dataset() -> Dataset {
        let mut ds = Dataset::default();
        for i in 0..120 {
            let age   = 20.0 + (i % 45) as f64;
            let hours = 20.0 + (i % 7) as f64 * 6.0;
            let work  = ["Private", "State-gov", "Self-emp"][i % 3];
            let positive = age > 42.0 && hours >= 38.0;
            ds.push(
                Record::new().with("age", age).with("workclass", work).with("hours_per_week", hours),
                Some(if positive { Label::Positive } else { Label::Negative }),
            );
        }
        ds
    }

    fn config() -> PipelineConfig {
        let mut c = PipelineConfig::default();
        c.schema = RawSchema::new(vec![
            AttributeSpec::numeric("age"),
            AttributeSpec::categorical("workclass"),
            AttributeSpec::numeric("hours_per_week"),
        ]);
        c.features.derived = vec![];
        c.trainer.search.enabled = false;
        c.candidates = vec![
            CandidateSpec::new("boost", FamilySpec::GradientBoosting(BoostingParams { n_estimators: 20, ..Default::default() })),
            CandidateSpec::new("lr", FamilySpec::Logistic(LogisticParams { epochs: 5, ..Default::default() })),
        ];
        c
    }

    #[test]
    fn test_run_ranks_every_candidate() {
        let run = run(&config(), &dataset()).unwrap();
        assert_eq!(run.report.candidates.len(), 2);
        assert_eq!(run.report.ranked().len(), 2);
        assert_eq!(run.report.champion.as_deref(), Some(run.champion.name.as_str()));
        assert_eq!(run.report.training_rows + run.report.evaluation_rows, 120);
        assert_eq!(run.champion.model.n_features(), run.features.width());
    }

    #[test]
    fn test_failed_candidate_is_reported_not_fatal() {
        let mut c = config();
        c.candidates.push(CandidateSpec::new(
            "broken",
            FamilySpec::Logistic(LogisticParams { batch_size: 0, ..Default::default() }),
        ));
        let run = run(&c, &dataset()).unwrap();
        let broken = run.report.candidates.iter().find(|r| r.name == "broken").unwrap();
        assert!(broken.failure.is_some());
        assert_eq!(broken.rank, None);
    }

    #[test]
    fn test_searched_candidate_reports_base_and_tuned() {
        let mut c = config();
        c.trainer.search = crate::ml::search::SearchConfig { enabled: true, folds: 3 };
        c.candidates[0] = c.candidates[0].clone().with_grid(crate::ml::search::ParamGrid::GradientBoosting {
            n_estimators:     vec![10, 20],
            max_depth:        vec![],
            learning_rate:    vec![],
            min_child_weight: vec![],
            subsample:        vec![],
        });
        let run = run(&c, &dataset()).unwrap();
        let names: Vec<&str> = run.report.candidates.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["boost_base", "boost", "lr"]);

        let base  = &run.report.candidates[0];
        let tuned = &run.report.candidates[1];
        assert_eq!(base.cv_score, None);
        assert!(tuned.cv_score.is_some());
        assert!(base.metrics.is_some() && tuned.metrics.is_some());
    }

    #[test]
    fn test_partitions_are_disjoint() {
        let run = run(&config(), &dataset()).unwrap();
        for id in &run.split.training.rows {
            assert!(!run.split.evaluation.rows.contains(id));
        }
    }
}
