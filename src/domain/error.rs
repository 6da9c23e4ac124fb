// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every library-level failure is a PipelineError. Each variant
// carries the pipeline stage plus the attribute / candidate it
// concerns, so a failed run can be diagnosed from the message.
//
// Only CandidateTraining is recovered locally (the trainer records
// it and carries on). Everything else propagates to the caller.
//
// thiserror vs anyhow:
//   The library layers return this typed enum so callers can match
//   on the variant (e.g. ArtifactMissing → "train first"). The CLI
//   and use cases wrap it in anyhow::Error with extra context.
//
// Reference: Rust Book §9 (Error Handling)

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the library layers
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Split,
    Encode,
    Features,
    Train,
    Evaluate,
    Publish,
    Serve,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load     => "load",
            Stage::Split    => "split",
            Stage::Encode   => "encode",
            Stage::Features => "features",
            Stage::Train    => "train",
            Stage::Evaluate => "evaluate",
            Stage::Publish  => "publish",
            Stage::Serve    => "serve",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or missing raw data. Raised before any fitting happens.
    #[error("data error during {stage}{}: {reason}", location(.row, .attribute))]
    Data {
        stage:     Stage,
        row:       Option<usize>,
        attribute: Option<String>,
        reason:    String,
    },

    /// Evaluation rows reached a fitting or search step. Always fatal.
    #[error("leakage guard tripped during {stage}: {reason}")]
    LeakageGuard { stage: Stage, reason: String },

    /// One candidate failed to train. Recorded in the report, never aborts a run.
    #[error("candidate '{candidate}' ({family}) failed: {reason}")]
    CandidateTraining {
        candidate: String,
        family:    String,
        reason:    String,
    },

    /// Every candidate failed, so there is nothing to select.
    #[error("no candidate trained successfully ({failed} failed)")]
    NoViableCandidate { failed: usize },

    /// Publishing failed. No partial artifact set is left visible.
    #[error("artifact write failed at '{}': {reason}", .path.display())]
    ArtifactWrite { path: PathBuf, reason: String },

    /// A published piece is missing; callers treat this as "no model available".
    #[error("artifact piece '{piece}' missing under '{}'", .path.display())]
    ArtifactMissing { piece: String, path: PathBuf },

    /// Published piece exists but cannot be decoded.
    #[error("artifact piece '{piece}' is corrupt: {reason}")]
    ArtifactCorrupt { piece: String, reason: String },

    /// Inference input does not match the frozen raw schema.
    #[error("schema mismatch on attribute '{attribute}': {reason}")]
    SchemaMismatch { attribute: String, reason: String },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn location(row: &Option<usize>, attribute: &Option<String>) -> String {
    match (row, attribute) {
        (Some(r), Some(a)) => format!(" (row {r}, attribute '{a}')"),
        (Some(r), None)    => format!(" (row {r})"),
        (None, Some(a))    => format!(" (attribute '{a}')"),
        (None, None)       => String::new(),
    }
}

impl PipelineError {
    pub fn data(stage: Stage, reason: impl Into<String>) -> Self {
        PipelineError::Data { stage, row: None, attribute: None, reason: reason.into() }
    }

    pub fn data_at(
        stage:     Stage,
        row:       Option<usize>,
        attribute: impl Into<String>,
        reason:    impl Into<String>,
    ) -> Self {
        PipelineError::Data {
            stage,
            row,
            attribute: Some(attribute.into()),
            reason:    reason.into(),
        }
    }

    pub fn schema(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::SchemaMismatch { attribute: attribute.into(), reason: reason.into() }
    }

    pub fn leakage(stage: Stage, reason: impl Into<String>) -> Self {
        PipelineError::LeakageGuard { stage, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_error_names_row_and_attribute() {
        let e = PipelineError::data_at(Stage::Load, Some(7), "age", "not a number: 'abc'");
        let msg = e.to_string();
        assert!(msg.contains("load"));
        assert!(msg.contains("row 7"));
        assert!(msg.contains("'age'"));
    }

    #[test]
    fn data_error_without_location() {
        let e = PipelineError::data(Stage::Split, "dataset is empty");
        assert_eq!(e.to_string(), "data error during split: dataset is empty");
    }
}
