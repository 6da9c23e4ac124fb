// ============================================================
// Layer 5 — Model Trainer
// ============================================================
// Trains every configured candidate on the training matrix.
//
// Per candidate (on its own named worker thread):
//   1. grid search over internal stratified folds (optional)
//   2. refit the chosen config on the whole training matrix
//
// Coordination:
//   - the training matrix is shared read-only through an Arc
//   - each worker sends exactly one result on a crossbeam channel
//   - every worker gets its own deadline, counted from its spawn;
//     the coordinator waits for the earliest pending one, and a
//     worker past its deadline is cancelled through its CancelToken
//     and recorded as a failed candidate
//   - a panicking worker is caught and recorded as a failed candidate
//
// A failed candidate never aborts the run; the evaluator simply
// has fewer candidates to rank.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use crate::data::splitter::LeakageGuard;
use crate::domain::error::{PipelineError, Result, Stage};
use crate::ml::classifier::{CancelToken, FamilySpec, FeatureMatrix, FitError, TrainedModel};
use crate::ml::evaluator::Metric;
use crate::ml::search::{grid_search, CandidateSpec, SearchConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub search:                 SearchConfig,
    /// Wall-clock budget per candidate (search + refit)
    pub candidate_timeout_secs: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            search:                 SearchConfig::default(),
            candidate_timeout_secs: 1800,
        }
    }
}

/// A successfully trained candidate
#[derive(Debug, Clone)]
pub struct ModelCandidate {
    pub name:          String,
    /// Family + the hyperparameters actually used for the final fit
    pub spec:          FamilySpec,
    pub model:         TrainedModel,
    pub cv_score:      Option<f64>,
    pub configs_tried: usize,
}

/// What happened to one candidate
#[derive(Debug)]
pub struct CandidateOutcome {
    pub name:     String,
    pub family:   &'static str,
    pub duration: Duration,
    pub result:   Result<ModelCandidate>,
}

#[derive(Debug, Clone)]
pub struct Trainer {
    config:    TrainerConfig,
    /// Metric the search optimises
    metric:    Metric,
    threshold: f64,
    seed:      u64,
}

impl Trainer {
    pub fn new(config: TrainerConfig, metric: Metric, threshold: f64, seed: u64) -> Self {
        Self { config, metric, threshold, seed }
    }

    /// Search + refit one candidate on the calling thread
    pub fn train(&self, candidate: &CandidateSpec, training: &FeatureMatrix, cancel: &CancelToken) -> Result<ModelCandidate> {
        let failure = |e: FitError| PipelineError::CandidateTraining {
            candidate: candidate.name.clone(),
            family:    candidate.family.name().to_string(),
            reason:    e.to_string(),
        };

        // ── Step 1: Search on internal folds ─────────────────────────────────
        let outcome = grid_search(
            candidate,
            training,
            &self.config.search,
            self.metric,
            self.threshold,
            self.seed,
            cancel,
        )
        .map_err(failure)?;

        // ── Step 2: Refit on all training rows ───────────────────────────────
        let model = outcome.spec.fit(training, self.seed, cancel).map_err(failure)?;

        Ok(ModelCandidate {
            name:          candidate.name.clone(),
            spec:          outcome.spec,
            model,
            cv_score:      outcome.cv_score,
            configs_tried: outcome.configs_tried,
        })
    }

    /// Train all candidates in parallel. Returns one outcome per
    /// candidate, in the order given.
    ///
    /// # Errors
    /// LeakageGuard if the training matrix contains an evaluation row.
    /// Individual candidate failures are reported in the outcomes.
    pub fn train_all(
        &self,
        candidates: &[CandidateSpec],
        training:   Arc<FeatureMatrix>,
        guard:      &LeakageGuard,
    ) -> Result<Vec<CandidateOutcome>> {
        guard.check(Stage::Train, &training.row_ids)?;

        let timeout  = Duration::from_secs(self.config.candidate_timeout_secs.max(1));
        let started  = Instant::now();
        let (tx, rx) = channel::unbounded::<(usize, Duration, Result<ModelCandidate>)>();

        tracing::info!(
            "Training {} candidate(s) on {} rows × {} features (timeout {}s each)",
            candidates.len(),
            training.len(),
            training.n_features(),
            timeout.as_secs(),
        );

        // ── Spawn one worker per candidate ───────────────────────────────────
        let mut tokens    = Vec::with_capacity(candidates.len());
        let mut deadlines = Vec::with_capacity(candidates.len());
        let mut handles   = Vec::with_capacity(candidates.len());
        let mut results: BTreeMap<usize, (Duration, Result<ModelCandidate>)> = BTreeMap::new();

        for (i, candidate) in candidates.iter().enumerate() {
            let token   = CancelToken::new();
            let worker  = self.clone();
            let spec    = candidate.clone();
            let data    = Arc::clone(&training);
            let cancel  = token.clone();
            let tx      = tx.clone();

            deadlines.push(Instant::now() + timeout);
            let spawned = thread::Builder::new()
                .name(format!("train-{}", candidate.name))
                .spawn(move || {
                    let t0 = Instant::now();
                    let result = catch_unwind(AssertUnwindSafe(|| worker.train(&spec, &data, &cancel)))
                        .unwrap_or_else(|payload| {
                            Err(PipelineError::CandidateTraining {
                                candidate: spec.name.clone(),
                                family:    spec.family.name().to_string(),
                                reason:    format!("panicked: {}", panic_message(payload.as_ref())),
                            })
                        });
                    // the coordinator may have stopped listening after a timeout
                    let _ = tx.send((i, t0.elapsed(), result));
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    results.insert(i, (Duration::ZERO, Err(failed(candidate, format!("cannot spawn worker: {e}")))));
                }
            }
            tokens.push(token);
        }
        drop(tx);

        // ── Collect until done, expiring workers one deadline at a time ──────
        while results.len() < candidates.len() {
            let Some(next) = (0..candidates.len())
                .filter(|i| !results.contains_key(i))
                .map(|i| deadlines[i])
                .min()
            else {
                break;
            };

            match rx.recv_deadline(next) {
                Ok((i, elapsed, result)) => {
                    if results.contains_key(&i) {
                        continue;
                    }
                    match &result {
                        Ok(c)  => tracing::info!("  ✓ '{}' trained in {:.1}s", c.name, elapsed.as_secs_f64()),
                        Err(e) => tracing::warn!("  ✗ {}", e),
                    }
                    results.insert(i, (elapsed, result));
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    for (i, candidate) in candidates.iter().enumerate() {
                        if !results.contains_key(&i) && deadlines[i] <= now {
                            tokens[i].cancel();
                            tracing::warn!("  ✗ '{}' timed out after {}s", candidate.name, timeout.as_secs());
                            results.insert(
                                i,
                                (timeout, Err(failed(candidate, format!("timed out after {}s", timeout.as_secs())))),
                            );
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    for (i, candidate) in candidates.iter().enumerate() {
                        results
                            .entry(i)
                            .or_insert_with(|| (Duration::ZERO, Err(failed(candidate, "worker exited without a result"))));
                    }
                }
            }
        }

        // Finished workers are joined; cancelled ones wind down on their own
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        tracing::info!("Training finished in {:.1}s", started.elapsed().as_secs_f64());

        Ok(candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let (duration, result) = results
                    .remove(&i)
                    .unwrap_or((Duration::ZERO, Err(failed(c, "no result"))));
                CandidateOutcome { name: c.name.clone(), family: c.family.name(), duration, result }
            })
            .collect())
    }
}

fn failed(candidate: &CandidateSpec, reason: impl Into<String>) -> PipelineError {
    PipelineError::CandidateTraining {
        candidate: candidate.name.clone(),
        family:    candidate.family.name().to_string(),
        reason:    reason.into(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::splitter::{Partition, PartitionKind};
    use crate::ml::boosting::BoostingParams;
    use crate::ml::classifier::Classifier;
    use crate::ml::forest::ForestParams;

    fn data() -> FeatureMatrix {
        let rows: Vec<Vec<f64>> = (0..120).map(|i| vec![(i % 30) as f64, (i % 4) as f64]).collect();
        let targets = rows.iter().map(|r| (r[0] >= 18.0) as u8).collect();
        FeatureMatrix { rows, targets, row_ids: (0..120).collect() }
    }

    fn guard(rows: Vec<usize>) -> LeakageGuard {
        LeakageGuard::new(&Partition { kind: PartitionKind::Evaluation, rows })
    }

    fn trainer() -> Trainer {
        let config = TrainerConfig { search: SearchConfig { enabled: false, folds: 3 }, candidate_timeout_secs: 120 };
        Trainer::new(config, Metric::F1, 0.5, 42)
    }

    #[test]
    fn test_trains_all_candidates_in_order() {
        let candidates = vec![
            CandidateSpec::new("boost", FamilySpec::GradientBoosting(BoostingParams { n_estimators: 20, ..BoostingParams::default() })),
            CandidateSpec::new("forest", FamilySpec::RandomForest(ForestParams { n_trees: 10, ..ForestParams::default() })),
        ];
        let out = trainer().train_all(&candidates, Arc::new(data()), &guard(vec![500])).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "boost");
        assert_eq!(out[1].family, "random_forest");
        let model = &out[0].result.as_ref().unwrap().model;
        assert!(model.predict_proba(&[25.0, 0.0]) > 0.5);
    }

    #[test]
    fn test_failed_candidate_does_not_abort_others() {
        let candidates = vec![
            CandidateSpec::new("bad", FamilySpec::RandomForest(ForestParams { n_trees: 0, ..ForestParams::default() })),
            CandidateSpec::new("good", FamilySpec::GradientBoosting(BoostingParams { n_estimators: 5, ..BoostingParams::default() })),
        ];
        let out = trainer().train_all(&candidates, Arc::new(data()), &guard(vec![])).unwrap();
        assert!(matches!(out[0].result, Err(PipelineError::CandidateTraining { .. })));
        assert!(out[1].result.is_ok());
    }

    #[test]
    fn test_leaked_rows_are_rejected() {
        let candidates = vec![CandidateSpec::new("b", FamilySpec::GradientBoosting(BoostingParams::default()))];
        let err = trainer().train_all(&candidates, Arc::new(data()), &guard(vec![3])).unwrap_err();
        assert!(matches!(err, PipelineError::LeakageGuard { stage: Stage::Train, .. }));
    }

    #[test]
    fn test_timeout_becomes_failure() {
        let mut t = trainer();
        t.config.candidate_timeout_secs = 1;
        let slow = ForestParams { n_trees: 1_000_000, max_depth: 20, ..ForestParams::default() };
        let candidates = vec![CandidateSpec::new("slow", FamilySpec::RandomForest(slow))];
        let out = t.train_all(&candidates, Arc::new(data()), &guard(vec![])).unwrap();
        match &out[0].result {
            Err(PipelineError::CandidateTraining { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_slow_candidate_does_not_expire_a_fast_one() {
        let mut t = trainer();
        t.config.candidate_timeout_secs = 1;
        let slow = ForestParams { n_trees: 1_000_000, max_depth: 20, ..ForestParams::default() };
        let candidates = vec![
            CandidateSpec::new("slow", FamilySpec::RandomForest(slow)),
            CandidateSpec::new("quick", FamilySpec::GradientBoosting(BoostingParams { n_estimators: 3, ..BoostingParams::default() })),
        ];
        let out = t.train_all(&candidates, Arc::new(data()), &guard(vec![])).unwrap();
        assert!(out[0].result.is_err());
        assert!(out[1].result.is_ok());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
