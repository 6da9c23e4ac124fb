// ============================================================
// Layer 3 — Record / Dataset Domain Types
// ============================================================
// A Record is one raw observation: attribute name → raw value.
// It is never mutated after loading; every transform reads it
// by reference and produces a new value.
//
// Dataset rows keep their input position as a row id. The split
// manager hands out partitions of those ids, which is what makes
// the leakage guard possible.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One raw cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Missing,
}

impl RawValue {
    /// Parse a CSV cell. `?` and empty cells are missing values,
    /// the convention of the census files.
    pub fn from_cell(cell: &str) -> Self {
        let cell = cell.trim();
        if cell.is_empty() || cell == "?" {
            return RawValue::Missing;
        }
        match cell.parse::<f64>() {
            Ok(n) if n.is_finite() => RawValue::Number(n),
            _                      => RawValue::Text(cell.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, RawValue::Missing)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Number(v as f64)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

/// One raw observation. Attribute order is the BTreeMap order, so
/// serialised records are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, RawValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used by loaders and tests
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: RawValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build a record from a JSON object. Numbers stay numbers, strings
    /// go through the same cell parsing as CSV input, null is missing.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut record = Record::new();
        for (k, v) in obj {
            let raw = match v {
                serde_json::Value::Number(n) => n.as_f64().map(RawValue::Number).unwrap_or(RawValue::Missing),
                serde_json::Value::String(s) => RawValue::from_cell(s),
                serde_json::Value::Null      => RawValue::Missing,
                other                        => RawValue::Text(other.to_string()),
            };
            record.insert(k.clone(), raw);
        }
        Some(record)
    }
}

/// Binary income label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Negative,
    Positive,
}

impl Label {
    pub fn as_target(self) -> u8 {
        match self {
            Label::Negative => 0,
            Label::Positive => 1,
        }
    }

    pub fn from_target(t: u8) -> Self {
        if t == 0 { Label::Negative } else { Label::Positive }
    }
}

/// The text form of both classes, e.g. `<=50K` / `>50K`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConfig {
    pub negative: String,
    pub positive: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            negative: "<=50K".to_string(),
            positive: ">50K".to_string(),
        }
    }
}

impl LabelConfig {
    /// Map raw label text to a Label. The UCI test file appends a
    /// trailing '.', which is stripped before comparison.
    pub fn parse(&self, raw: &str) -> Option<Label> {
        let norm = raw.trim().trim_end_matches('.');
        if norm == self.negative {
            Some(Label::Negative)
        } else if norm == self.positive {
            Some(Label::Positive)
        } else {
            None
        }
    }

    pub fn text(&self, label: Label) -> &str {
        match label {
            Label::Negative => &self.negative,
            Label::Positive => &self.positive,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Negative => f.write_str("negative"),
            Label::Positive => f.write_str("positive"),
        }
    }
}

/// A record with its (optional) label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub record: Record,
    pub label:  Option<Label>,
}

/// Ordered collection of labelled records. Row id = index.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<LabeledRecord>,
}

impl Dataset {
    pub fn new(rows: Vec<LabeledRecord>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, id: usize) -> Option<&LabeledRecord> {
        self.rows.get(id)
    }

    pub fn rows(&self) -> &[LabeledRecord] {
        &self.rows
    }

    pub fn push(&mut self, record: Record, label: Option<Label>) {
        self.rows.push(LabeledRecord { record, label });
    }

    /// Count of (negative, positive) labels; unlabeled rows are skipped
    pub fn class_counts(&self) -> (usize, usize) {
        self.rows.iter().fold((0, 0), |(n, p), r| match r.label {
            Some(Label::Negative) => (n + 1, p),
            Some(Label::Positive) => (n, p + 1),
            None                  => (n, p),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_parsing() {
        assert_eq!(RawValue::from_cell(" 39 "), RawValue::Number(39.0));
        assert_eq!(RawValue::from_cell(" Private"), RawValue::Text("Private".into()));
        assert_eq!(RawValue::from_cell("?"), RawValue::Missing);
        assert_eq!(RawValue::from_cell(""), RawValue::Missing);
    }

    #[test]
    fn label_parsing_strips_trailing_dot() {
        let labels = LabelConfig::default();
        assert_eq!(labels.parse(" >50K."), Some(Label::Positive));
        assert_eq!(labels.parse("<=50K"), Some(Label::Negative));
        assert_eq!(labels.parse("maybe"), None);
    }

    #[test]
    fn record_from_json() {
        let v = serde_json::json!({ "age": 45, "workclass": "Private", "occupation": null });
        let r = Record::from_json(&v).unwrap();
        assert_eq!(r.get("age"), Some(&RawValue::Number(45.0)));
        assert_eq!(r.get("workclass"), Some(&RawValue::Text("Private".into())));
        assert_eq!(r.get("occupation"), Some(&RawValue::Missing));
    }

    #[test]
    fn class_counts_skip_unlabeled() {
        let mut ds = Dataset::default();
        ds.push(Record::new(), Some(Label::Positive));
        ds.push(Record::new(), Some(Label::Negative));
        ds.push(Record::new(), None);
        assert_eq!(ds.class_counts(), (1, 1));
    }
}
