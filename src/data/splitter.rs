// ============================================================
// Layer 4 — Train/Evaluation Splitter
// ============================================================
// Partitions a labelled dataset into two disjoint sets:
//   - Training:   everything that is fitted (encoders, scalers,
//                 feature selection, models, search folds)
//   - Evaluation: only ever scored, never fitted on
//
// The split is stratified: each class is shuffled on its own
// with a seeded StdRng and then cut at the same ratio, so both
// subsets keep the dataset's class proportions. Given the same
// seed and the same input order the assignment is identical.
//
// Partitions carry row ids (input positions). The LeakageGuard
// remembers the evaluation ids and rejects any fitting step that
// is handed one of them.
//
// Reference: rand crate documentation (SeedableRng, SliceRandom)

use std::collections::BTreeSet;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{Dataset, Label, LabeledRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionKind {
    Training,
    Evaluation,
}

/// A set of dataset row ids, sorted ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub kind: PartitionKind,
    pub rows: Vec<usize>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of `split`: two disjoint partitions covering the dataset
#[derive(Debug, Clone)]
pub struct Split {
    pub training:   Partition,
    pub evaluation: Partition,
}

impl Split {
    /// Read-only view over the training rows. This is the only way to
    /// obtain a TrainingView, so fitting code cannot be handed
    /// evaluation rows by accident.
    pub fn training_view<'a>(&'a self, dataset: &'a Dataset) -> TrainingView<'a> {
        TrainingView { dataset, rows: &self.training.rows }
    }

    pub fn guard(&self) -> LeakageGuard {
        LeakageGuard::new(&self.evaluation)
    }
}

/// Borrowed view of the training partition
#[derive(Debug, Clone, Copy)]
pub struct TrainingView<'a> {
    dataset: &'a Dataset,
    rows:    &'a [usize],
}

impl<'a> TrainingView<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_ids(&self) -> &'a [usize] {
        self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a LabeledRecord> + 'a {
        let dataset = self.dataset;
        self.rows.iter().filter_map(move |&id| dataset.row(id))
    }
}

/// Shuffle each class with a seeded RNG and split it at `eval_ratio`.
///
/// # Arguments
/// * `dataset`    - Fully labelled rows
/// * `eval_ratio` - Share of each class that goes to evaluation, e.g. 0.2
/// * `seed`       - RNG seed; same seed + same input order = same split
///
/// # Errors
/// DataError when the dataset is empty, a row has no label, or a class
/// has fewer than two rows (it could not appear on both sides).
pub fn split(dataset: &Dataset, eval_ratio: f64, seed: u64) -> Result<Split> {
    if dataset.is_empty() {
        return Err(PipelineError::data(Stage::Split, "dataset is empty"));
    }
    if !(eval_ratio > 0.0 && eval_ratio < 1.0) {
        return Err(PipelineError::Config(format!("eval_ratio must be in (0, 1), got {eval_ratio}")));
    }

    let mut negatives = Vec::new();
    let mut positives = Vec::new();
    for (id, row) in dataset.rows().iter().enumerate() {
        match row.label {
            Some(Label::Negative) => negatives.push(id),
            Some(Label::Positive) => positives.push(id),
            None => {
                return Err(PipelineError::Data {
                    stage:     Stage::Split,
                    row:       Some(id),
                    attribute: None,
                    reason:    "row has no label".to_string(),
                })
            }
        }
    }

    let mut rng      = StdRng::seed_from_u64(seed);
    let mut training = Vec::with_capacity(dataset.len());
    let mut eval     = Vec::new();

    for (label, mut ids) in [(Label::Negative, negatives), (Label::Positive, positives)] {
        let total = ids.len();
        if total < 2 {
            return Err(PipelineError::data(
                Stage::Split,
                format!("class {label} has {total} row(s); at least 2 are needed to stratify"),
            ));
        }

        // Fisher-Yates per class, then cut
        ids.shuffle(&mut rng);
        let n_eval = ((total as f64) * eval_ratio).round() as usize;
        let n_eval = n_eval.clamp(1, total - 1);

        eval.extend_from_slice(&ids[..n_eval]);
        training.extend_from_slice(&ids[n_eval..]);
    }

    training.sort_unstable();
    eval.sort_unstable();

    tracing::debug!(
        "Dataset split: {} training, {} evaluation (seed {})",
        training.len(),
        eval.len(),
        seed,
    );

    Ok(Split {
        training:   Partition { kind: PartitionKind::Training, rows: training },
        evaluation: Partition { kind: PartitionKind::Evaluation, rows: eval },
    })
}

// ─── Leakage Guard ────────────────────────────────────────────────────────────
/// Remembers which row ids belong to the evaluation partition
#[derive(Debug, Clone)]
pub struct LeakageGuard {
    evaluation: BTreeSet<usize>,
}

impl LeakageGuard {
    pub fn new(evaluation: &Partition) -> Self {
        Self { evaluation: evaluation.rows.iter().copied().collect() }
    }

    /// Fail if any of `rows` is an evaluation row
    pub fn check(&self, stage: Stage, rows: &[usize]) -> Result<()> {
        match rows.iter().find(|r| self.evaluation.contains(*r)) {
            Some(r) => Err(PipelineError::leakage(
                stage,
                format!("evaluation row {r} was passed to a fitting step"),
            )),
            None => Ok(()),
        }
    }
}

// ─── Internal Folds ───────────────────────────────────────────────────────────
/// One internal cross-validation fold. Indices are positions into the
/// training matrix, not dataset row ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub fit:      Vec<usize>,
    pub validate: Vec<usize>,
}

/// Stratified k-fold over `targets` (0/1 per training position).
/// Each class is shuffled with the seed and dealt round-robin.
pub fn stratified_folds(targets: &[u8], k: usize, seed: u64) -> Result<Vec<Fold>> {
    if k < 2 {
        return Err(PipelineError::Config(format!("search folds must be >= 2, got {k}")));
    }
    if targets.len() < k {
        return Err(PipelineError::data(
            Stage::Train,
            format!("{} training rows cannot form {k} folds", targets.len()),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignment = vec![0usize; targets.len()];
    let mut next = 0usize;

    for class in [0u8, 1u8] {
        let mut idx: Vec<usize> = (0..targets.len()).filter(|&i| targets[i] == class).collect();
        idx.shuffle(&mut rng);
        for i in idx {
            assignment[i] = next % k;
            next += 1;
        }
    }

    Ok((0..k)
        .map(|f| {
            let (validate, fit): (Vec<usize>, Vec<usize>) =
                (0..targets.len()).partition(|&i| assignment[i] == f);
            Fold { fit, validate }
        })
        .collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::Record;

    fn dataset(neg: usize, pos: usize) -> Dataset {
        let mut ds = Dataset::default();
        for i in 0..(neg + pos) {
            let label = if i < neg { Label::Negative } else { Label::Positive };
            ds.push(Record::new().with("i", i as f64), Some(label));
        }
        ds
    }

    #[test]
    fn test_disjoint_and_complete() {
        let ds = dataset(80, 20);
        let s  = split(&ds, 0.2, 42).unwrap();
        assert_eq!(s.training.len() + s.evaluation.len(), 100);
        let train: BTreeSet<_> = s.training.rows.iter().collect();
        assert!(s.evaluation.rows.iter().all(|r| !train.contains(r)));
    }

    #[test]
    fn test_stratified_proportions() {
        let ds = dataset(750, 250);
        let s  = split(&ds, 0.2, 7).unwrap();
        let pos_eval = s.evaluation.rows.iter().filter(|&&r| r >= 750).count();
        assert_eq!(s.evaluation.len(), 200);
        assert_eq!(pos_eval, 50);
    }

    #[test]
    fn test_same_seed_same_split() {
        let ds = dataset(60, 40);
        let a  = split(&ds, 0.25, 11).unwrap();
        let b  = split(&ds, 0.25, 11).unwrap();
        assert_eq!(a.training, b.training);
        assert_eq!(a.evaluation, b.evaluation);

        let c = split(&ds, 0.25, 12).unwrap();
        assert_ne!(a.evaluation, c.evaluation);
    }

    #[test]
    fn test_rejects_single_row_class() {
        let ds = dataset(10, 1);
        assert!(matches!(split(&ds, 0.2, 1), Err(PipelineError::Data { .. })));
    }

    #[test]
    fn test_rejects_unlabeled_row() {
        let mut ds = dataset(5, 5);
        ds.push(Record::new(), None);
        let err = split(&ds, 0.2, 1).unwrap_err();
        assert!(matches!(err, PipelineError::Data { row: Some(10), .. }));
    }

    #[test]
    fn test_guard_flags_evaluation_rows() {
        let ds    = dataset(20, 20);
        let s     = split(&ds, 0.2, 3).unwrap();
        let guard = s.guard();
        assert!(guard.check(Stage::Train, &s.training.rows).is_ok());

        let mut leaked = s.training.rows.clone();
        leaked.push(s.evaluation.rows[0]);
        assert!(matches!(
            guard.check(Stage::Train, &leaked),
            Err(PipelineError::LeakageGuard { .. })
        ));
    }

    #[test]
    fn test_training_view_only_sees_training_rows() {
        let ds   = dataset(10, 10);
        let s    = split(&ds, 0.3, 5).unwrap();
        let view = s.training_view(&ds);
        assert_eq!(view.len(), s.training.len());
        assert_eq!(view.iter().count(), s.training.len());
    }

    #[test]
    fn test_folds_cover_every_position_once() {
        let targets: Vec<u8> = (0..50).map(|i| (i % 3 == 0) as u8).collect();
        let folds = stratified_folds(&targets, 5, 9).unwrap();
        assert_eq!(folds.len(), 5);
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.validate.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        for f in &folds {
            assert_eq!(f.fit.len() + f.validate.len(), 50);
        }
    }
}
