// ============================================================
// Layer 6 — Report Writer
// ============================================================
// Writes human-readable summaries of a training run. The
// authoritative record is report.json in the artifact store:
//
//   reports/
//     comparison.csv              ← one row per candidate
//     confusion_<candidate>.csv   ← 2×2 matrix per trained candidate
//
// Example comparison.csv:
//   rank,candidate,family,roc_auc,f1,brier,accuracy,precision,recall,cv_score,duration_ms,failure
//   1,gradient_boosting,gradient_boosting,0.921,0.712,0.091,0.871,0.783,0.653,0.708,41230,
//   2,logistic_regression,logistic,0.902,0.664,0.104,0.853,0.741,0.601,0.659,8120,
//
// These files are for people; nothing reads them back. Callers
// log a failure here and carry on.

use std::fs;
use std::path::{Path, PathBuf};

use csv::Writer;

use crate::domain::error::{PipelineError, Result};
use crate::ml::evaluator::{CandidateReport, ConfusionMatrix, EvaluationReport, MetricSet};

/// Writes comparison and confusion CSVs into one directory
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every summary file for `report`; returns the paths written
    pub fn write_all(&self, report: &EvaluationReport) -> Result<Vec<PathBuf>> {
        let mut written = vec![self.write_comparison(report)?];
        for c in &report.candidates {
            if let Some(cm) = &c.confusion {
                written.push(self.write_confusion(&c.name, cm)?);
            }
        }
        tracing::debug!("Wrote {} report file(s) to '{}'", written.len(), self.dir.display());
        Ok(written)
    }

    /// One row per candidate: ranked ones first, then failures
    pub fn write_comparison(&self, report: &EvaluationReport) -> Result<PathBuf> {
        let path = self.dir.join("comparison.csv");
        let mut w = Writer::from_path(&path).map_err(csv_error)?;
        w.write_record([
            "rank", "candidate", "family", "roc_auc", "f1", "brier", "accuracy",
            "precision", "recall", "cv_score", "duration_ms", "failure",
        ])
        .map_err(csv_error)?;

        let mut rows: Vec<&CandidateReport> = report.candidates.iter().collect();
        rows.sort_by(|a, b| match (a.rank, b.rank) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None)    => std::cmp::Ordering::Less,
            (None, Some(_))    => std::cmp::Ordering::Greater,
            (None, None)       => a.name.cmp(&b.name),
        });

        for c in rows {
            let metric = |get: fn(&MetricSet) -> f64| {
                c.metrics.as_ref().map(|m| format!("{:.6}", get(m))).unwrap_or_default()
            };
            w.write_record([
                c.rank.map(|r| r.to_string()).unwrap_or_default(),
                c.name.clone(),
                c.family.clone(),
                metric(|m| m.roc_auc),
                metric(|m| m.f1),
                metric(|m| m.brier),
                metric(|m| m.accuracy),
                metric(|m| m.precision),
                metric(|m| m.recall),
                c.cv_score.map(|s| format!("{s:.6}")).unwrap_or_default(),
                c.duration_ms.to_string(),
                c.failure.clone().unwrap_or_default(),
            ])
            .map_err(csv_error)?;
        }
        w.flush()?;
        Ok(path)
    }

    /// 2×2 matrix; rows = actual, columns = predicted
    pub fn write_confusion(&self, candidate: &str, cm: &ConfusionMatrix) -> Result<PathBuf> {
        let path = self.dir.join(format!("confusion_{}.csv", file_safe(candidate)));
        let mut w = Writer::from_path(&path).map_err(csv_error)?;
        w.write_record(["actual", "predicted_negative", "predicted_positive"]).map_err(csv_error)?;
        for (actual, predicted_negative, predicted_positive) in [
            ("negative", cm.true_negative, cm.false_positive),
            ("positive", cm.false_negative, cm.true_positive),
        ] {
            w.write_record([actual.to_string(), predicted_negative.to_string(), predicted_positive.to_string()])
                .map_err(csv_error)?;
        }
        w.flush()?;
        Ok(path)
    }
}

fn csv_error(e: csv::Error) -> PipelineError {
    PipelineError::Io(e.into())
}

/// Candidate names are free text; keep file names portable
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::evaluator::SelectionPolicy;
    use chrono::Utc;

    fn report() -> EvaluationReport {
        let ok = CandidateReport {
            name:        "boost v2".into(),
            family:      "gradient_boosting".into(),
            params:      serde_json::Value::Null,
            cv_score:    Some(0.7),
            metrics:     Some(MetricSet { roc_auc: 0.9, f1: 0.7, brier: 0.1, accuracy: 0.85, precision: 0.75, recall: 0.65 }),
            confusion:   Some(ConfusionMatrix { true_negative: 50, false_positive: 5, false_negative: 8, true_positive: 12 }),
            failure:     None,
            duration_ms: 1200,
            rank:        Some(1),
        };
        let failed = CandidateReport {
            name:      "forest".into(),
            family:    "random_forest".into(),
            cv_score:  None,
            metrics:   None,
            confusion: None,
            failure:   Some("timed out after 1s".into()),
            rank:      None,
            ..ok.clone()
        };
        EvaluationReport {
            created_at:      Utc::now(),
            seed:            42,
            threshold:       0.5,
            policy:          SelectionPolicy::default(),
            training_rows:   300,
            evaluation_rows: 75,
            candidates:      vec![failed, ok],
            champion:        Some("boost v2".into()),
        }
    }

    #[test]
    fn test_comparison_lists_ranked_first() {
        let dir = tempfile::tempdir().unwrap();
        let w   = ReportWriter::new(dir.path()).unwrap();
        let path = w.write_comparison(&report()).unwrap();

        let mut r = csv::Reader::from_path(path).unwrap();
        let rows: Vec<csv::StringRecord> = r.records().map(|x| x.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "1");
        assert_eq!(&rows[0][1], "boost v2");
        assert_eq!(&rows[1][0], "");
        assert_eq!(&rows[1][11], "timed out after 1s");
    }

    #[test]
    fn test_confusion_file_per_trained_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let written = ReportWriter::new(dir.path()).unwrap().write_all(&report()).unwrap();
        assert_eq!(written.len(), 2);
        let text = std::fs::read_to_string(dir.path().join("confusion_boost_v2.csv")).unwrap();
        assert!(text.contains("negative,50,5"));
        assert!(text.contains("positive,8,12"));
    }
}
