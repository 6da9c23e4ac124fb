// ============================================================
// Layer 5 — Evaluator / Selector
// ============================================================
// Scores every trained candidate on the evaluation partition and
// picks the champion.
//
// Metrics (all in [0, 1]):
//   roc_auc    discrimination; rank statistic, tied scores share
//              their average rank
//   f1         balance of precision and recall at the threshold
//   brier      calibration; mean squared probability error,
//              LOWER is better
//   accuracy, precision, recall
//
// Selection:
//   1. primary metric (oriented so "better" is larger)
//   2. secondary metric
//   3. tie-break rule on names
// Comparisons use f64::total_cmp, so the order is total and the
// same input always yields the same champion.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};
use crate::ml::classifier::{Classifier, FeatureMatrix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    RocAuc,
    F1,
    Brier,
    Accuracy,
    Precision,
    Recall,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::RocAuc    => "roc_auc",
            Metric::F1        => "f1",
            Metric::Brier     => "brier",
            Metric::Accuracy  => "accuracy",
            Metric::Precision => "precision",
            Metric::Recall    => "recall",
        }
    }

    pub fn higher_is_better(self) -> bool {
        !matches!(self, Metric::Brier)
    }

    /// Value flipped so that larger is always better
    pub fn oriented(self, value: f64) -> f64 {
        if self.higher_is_better() { value } else { -value }
    }

    /// Compute this metric alone
    pub fn score(self, probabilities: &[f64], targets: &[u8], threshold: f64) -> f64 {
        MetricSet::compute(probabilities, targets, threshold).0.get(self)
    }
}

// ─── Metric values ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative:  usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive:  usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub roc_auc:   f64,
    pub f1:        f64,
    pub brier:     f64,
    pub accuracy:  f64,
    pub precision: f64,
    pub recall:    f64,
}

impl MetricSet {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::RocAuc    => self.roc_auc,
            Metric::F1        => self.f1,
            Metric::Brier     => self.brier,
            Metric::Accuracy  => self.accuracy,
            Metric::Precision => self.precision,
            Metric::Recall    => self.recall,
        }
    }

    /// All metrics + the confusion matrix at `threshold`
    pub fn compute(probabilities: &[f64], targets: &[u8], threshold: f64) -> (MetricSet, ConfusionMatrix) {
        let mut cm = ConfusionMatrix::default();
        let mut squared_error = 0.0;

        for (&p, &t) in probabilities.iter().zip(targets) {
            let predicted = p >= threshold;
            match (t == 1, predicted) {
                (false, false) => cm.true_negative  += 1,
                (false, true)  => cm.false_positive += 1,
                (true, false)  => cm.false_negative += 1,
                (true, true)   => cm.true_positive  += 1,
            }
            squared_error += (p - t as f64).powi(2);
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(cm.true_positive, cm.true_positive + cm.false_positive);
        let recall    = ratio(cm.true_positive, cm.true_positive + cm.false_negative);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let metrics = MetricSet {
            roc_auc:  roc_auc(probabilities, targets),
            f1,
            brier:    if cm.total() == 0 { 0.0 } else { squared_error / cm.total() as f64 },
            accuracy: ratio(cm.true_negative + cm.true_positive, cm.total()),
            precision,
            recall,
        };
        (metrics, cm)
    }
}

/// Area under the ROC curve via the Mann-Whitney rank statistic.
/// Tied scores get the average of their ranks. One-class input → 0.5.
pub fn roc_auc(probabilities: &[f64], targets: &[u8]) -> f64 {
    let n_pos = targets.iter().filter(|&&t| t == 1).count();
    let n_neg = targets.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probabilities[order[j + 1]] == probabilities[order[i]] {
            j += 1;
        }
        // ranks are 1-based: i+1 ..= j+1
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for &k in &order[i..=j] {
            if targets[k] == 1 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    (rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

// ─── Reports ──────────────────────────────────────────────────────────────────

/// One candidate's entry in the evaluation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub name:        String,
    pub family:      String,
    /// Hyperparameters of the model that was scored (post search)
    pub params:      serde_json::Value,
    /// Mean internal-fold score of the chosen config, if searched
    pub cv_score:    Option<f64>,
    pub metrics:     Option<MetricSet>,
    pub confusion:   Option<ConfusionMatrix>,
    /// Set when training failed; such candidates are never ranked
    pub failure:     Option<String>,
    pub duration_ms: u64,
    /// 1 = champion
    pub rank:        Option<usize>,
}

impl CandidateReport {
    pub fn is_viable(&self) -> bool {
        self.failure.is_none() && self.metrics.is_some()
    }
}

/// Complete comparison of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub created_at:      DateTime<Utc>,
    pub seed:            u64,
    pub threshold:       f64,
    pub policy:          SelectionPolicy,
    pub training_rows:   usize,
    pub evaluation_rows: usize,
    pub candidates:      Vec<CandidateReport>,
    pub champion:        Option<String>,
}

impl EvaluationReport {
    pub fn champion_report(&self) -> Option<&CandidateReport> {
        let name = self.champion.as_deref()?;
        self.candidates.iter().find(|c| c.name == name)
    }

    /// Viable candidates, best first
    pub fn ranked(&self) -> Vec<&CandidateReport> {
        let mut v: Vec<&CandidateReport> = self.candidates.iter().filter(|c| c.rank.is_some()).collect();
        v.sort_by_key(|c| c.rank);
        v
    }
}

// ─── Selection ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Lexicographically smallest candidate name wins
    CandidateName,
    /// Smallest family name, then candidate name
    FamilyThenName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    pub primary:   Metric,
    pub secondary: Metric,
    pub tie_break: TieBreak,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            primary:   Metric::F1,
            secondary: Metric::RocAuc,
            tie_break: TieBreak::CandidateName,
        }
    }
}

impl SelectionPolicy {
    /// Total order over viable reports; Less = better
    pub fn compare(&self, a: &CandidateReport, b: &CandidateReport) -> Ordering {
        let (Some(ma), Some(mb)) = (&a.metrics, &b.metrics) else {
            return b.is_viable().cmp(&a.is_viable());
        };
        let by = |m: Metric| m.oriented(mb.get(m)).total_cmp(&m.oriented(ma.get(m)));

        by(self.primary)
            .then_with(|| by(self.secondary))
            .then_with(|| match self.tie_break {
                TieBreak::CandidateName  => a.name.cmp(&b.name),
                TieBreak::FamilyThenName => a.family.cmp(&b.family).then_with(|| a.name.cmp(&b.name)),
            })
    }
}

/// Scores candidates and chooses the champion
#[derive(Debug, Clone)]
pub struct Evaluator {
    pub threshold: f64,
    pub policy:    SelectionPolicy,
}

impl Evaluator {
    pub fn new(threshold: f64, policy: SelectionPolicy) -> Self {
        Self { threshold, policy }
    }

    /// Score one model on the evaluation matrix
    pub fn evaluate(&self, model: &dyn Classifier, evaluation: &FeatureMatrix) -> (MetricSet, ConfusionMatrix) {
        let probabilities: Vec<f64> = evaluation.rows.iter().map(|r| model.predict_proba(r)).collect();
        MetricSet::compute(&probabilities, &evaluation.targets, self.threshold)
    }

    /// Rank viable candidates in place and return the champion's index.
    ///
    /// # Errors
    /// NoViableCandidate when every candidate failed.
    pub fn select(&self, candidates: &mut [CandidateReport]) -> Result<usize> {
        let mut viable: Vec<usize> = (0..candidates.len()).filter(|&i| candidates[i].is_viable()).collect();
        if viable.is_empty() {
            return Err(PipelineError::NoViableCandidate { failed: candidates.len() });
        }

        viable.sort_by(|&a, &b| self.policy.compare(&candidates[a], &candidates[b]));
        for c in candidates.iter_mut() {
            c.rank = None;
        }
        for (rank, &i) in viable.iter().enumerate() {
            candidates[i].rank = Some(rank + 1);
        }

        let champion = viable[0];
        tracing::info!(
            "Champion: '{}' ({}) {} = {:.4}",
            candidates[champion].name,
            candidates[champion].family,
            self.policy.primary.name(),
            candidates[champion].metrics.map_or(f64::NAN, |m| m.get(self.policy.primary)),
        );
        Ok(champion)
    }
}
