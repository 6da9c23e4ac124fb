// ============================================================
// Layer 3 — Core Traits
// ============================================================
// Seams between the layers:
//   - RecordSource     → anything that yields a labelled Dataset
//   - IncomePredictor  → anything that maps a raw record to a label
//
// The application layer only sees these traits; the CSV loader
// and the artifact-backed Predictor are the implementations.

use crate::domain::error::Result;
use crate::domain::record::{Dataset, Label, Record};

/// Any component that can produce a labelled dataset
pub trait RecordSource {
    fn load_all(&self) -> Result<Dataset>;
}

/// A single inference outcome
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Prediction {
    pub label:       Label,
    /// Text form of the label, e.g. ">50K"
    pub label_text:  String,
    /// Probability of the positive class, in [0, 1]
    pub probability: f64,
}

/// Any component that can score a raw record
pub trait IncomePredictor {
    fn predict(&self, record: &Record) -> Result<Prediction>;
}
