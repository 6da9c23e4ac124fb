// ============================================================
// Layer 4 — CSV Record Loader
// ============================================================
// Reads the census CSV files into a labelled Dataset using the
// csv crate.
//
// Census file conventions handled here:
//   - no header row in the UCI files: column names come from the
//     configuration instead
//   - "?" and empty cells are missing values
//   - the test file starts with a "|1x3 Cross validator" line and
//     its labels end with '.' (">50K.")
//
// The raw schema is checked while loading: a required column that
// is absent, text in a numeric attribute, or a missing value under
// the `reject` policy is a DataError naming the row and attribute.
// Nothing is fitted here.
//
// Reference: csv crate documentation (ReaderBuilder, StringRecord)

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{Dataset, LabelConfig, RawValue, Record};
use crate::domain::schema::{AttributeKind, MissingPolicy, RawSchema};
use crate::domain::traits::RecordSource;

/// Column names of the UCI adult files, in file order
pub const CENSUS_COLUMNS: [&str; 15] = [
    "age", "workclass", "fnlwgt", "education", "education-num",
    "marital-status", "occupation", "relationship", "race", "sex",
    "capital-gain", "capital-loss", "hours-per-week", "native-country", "income",
];

/// How a CSV file maps onto records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    /// Column holding the income label
    pub label_column: String,
    /// First non-comment line is a header row
    pub has_headers:  bool,
    /// Column names to use when the file has no header row
    pub column_names: Vec<String>,
    pub delimiter:    char,
    /// Lines starting with this character are skipped
    pub comment:      Option<char>,
    pub labels:       LabelConfig,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            label_column: "income".to_string(),
            has_headers:  false,
            column_names: CENSUS_COLUMNS.iter().map(|c| c.to_string()).collect(),
            delimiter:    ',',
            comment:      Some('|'),
            labels:       LabelConfig::default(),
        }
    }
}

/// Loads one CSV file. Implements the RecordSource trait from Layer 3.
pub struct CsvSource {
    path:    PathBuf,
    schema:  RawSchema,
    options: CsvOptions,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, schema: RawSchema, options: CsvOptions) -> Self {
        Self { path: path.into(), schema, options }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse from any reader; `load_all` wraps this around the file
    pub fn read_from<R: Read>(&self, input: R) -> Result<Dataset> {
        let mut reader = ReaderBuilder::new()
            .delimiter(ascii_byte(self.options.delimiter, "delimiter")?)
            .comment(self.options.comment.map(|c| ascii_byte(c, "comment")).transpose()?)
            .has_headers(self.options.has_headers)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_reader(input);

        // ── Step 1: Resolve column names ─────────────────────────────────────
        let headers: Vec<String> = if self.options.has_headers {
            reader
                .headers()
                .map_err(|e| PipelineError::data(Stage::Load, format!("cannot read header: {e}")))?
                .iter()
                .map(|h| h.to_string())
                .collect()
        } else {
            self.options.column_names.clone()
        };

        let label_index = headers
            .iter()
            .position(|h| *h == self.options.label_column)
            .ok_or_else(|| {
                PipelineError::data_at(Stage::Load, None, &self.options.label_column, "label column not found")
            })?;

        for spec in &self.schema.attributes {
            if spec.required && !headers.iter().any(|h| *h == spec.name) {
                return Err(PipelineError::data_at(Stage::Load, None, &spec.name, "column not present in input"));
            }
        }

        // ── Step 2: Parse rows ───────────────────────────────────────────────
        let mut dataset = Dataset::default();
        let mut line    = StringRecord::new();

        loop {
            let row = dataset.len();
            let more = reader
                .read_record(&mut line)
                .map_err(|e| PipelineError::data(Stage::Load, format!("row {row}: {e}")))?;
            if !more {
                break;
            }
            if line.iter().all(|c| c.is_empty()) {
                continue;
            }
            if line.len() != headers.len() {
                return Err(PipelineError::Data {
                    stage:     Stage::Load,
                    row:       Some(row),
                    attribute: None,
                    reason:    format!("expected {} fields, found {}", headers.len(), line.len()),
                });
            }

            let label_text = &line[label_index];
            let label = self.options.labels.parse(label_text).ok_or_else(|| {
                PipelineError::data_at(
                    Stage::Load,
                    Some(row),
                    &self.options.label_column,
                    format!("unrecognised label '{label_text}'"),
                )
            })?;

            let record = self.parse_record(row, &headers, &line)?;
            dataset.push(record, Some(label));
        }

        let (neg, pos) = dataset.class_counts();
        tracing::info!(
            "Loaded {} rows from '{}' ({} negative, {} positive)",
            dataset.len(),
            self.path.display(),
            neg,
            pos,
        );
        Ok(dataset)
    }

    fn parse_record(&self, row: usize, headers: &[String], line: &StringRecord) -> Result<Record> {
        let mut record = Record::new();

        for spec in &self.schema.attributes {
            let Some(col) = headers.iter().position(|h| *h == spec.name) else {
                continue;
            };
            let value = RawValue::from_cell(&line[col]);

            if value.is_missing() && spec.missing == MissingPolicy::Reject {
                return Err(PipelineError::data_at(Stage::Load, Some(row), &spec.name, "missing value"));
            }
            if let (AttributeKind::Numeric, RawValue::Text(t)) = (spec.kind, &value) {
                return Err(PipelineError::data_at(
                    Stage::Load,
                    Some(row),
                    &spec.name,
                    format!("not a number: '{t}'"),
                ));
            }
            record.insert(spec.name.clone(), value);
        }

        Ok(record)
    }
}

impl RecordSource for CsvSource {
    fn load_all(&self) -> Result<Dataset> {
        let file = File::open(&self.path).map_err(|e| {
            PipelineError::data(Stage::Load, format!("cannot open '{}': {e}", self.path.display()))
        })?;
        self.read_from(BufReader::new(file))
    }
}

/// Several sources read back to back into one dataset, e.g. the UCI
/// `adult.data` + `adult.test` pair
pub struct ConcatSource {
    sources: Vec<CsvSource>,
}

impl ConcatSource {
    pub fn new(sources: Vec<CsvSource>) -> Self {
        Self { sources }
    }
}

impl RecordSource for ConcatSource {
    fn load_all(&self) -> Result<Dataset> {
        let mut rows = Vec::new();
        for source in &self.sources {
            rows.extend(source.load_all()?.rows().iter().cloned());
        }
        Ok(Dataset::new(rows))
    }
}

fn ascii_byte(c: char, what: &str) -> Result<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| PipelineError::Config(format!("CSV {what} must be an ASCII character, got '{c}'")))
}
