// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that sit below the application layer:
//
//   config.rs    — PipelineConfig (serde JSON, defaults, validation)
//   artifact.rs  — versioned champion store; publish is
//                  lock → stage → fsync → rename → swap CURRENT
//   metrics.rs   — comparison / confusion CSVs next to report.json
//
// Reference: Rust Book §7 (Modules)

/// Pipeline configuration and validation
pub mod config;

/// Versioned, atomically published champion artifacts
pub mod artifact;

/// Human-readable CSV summaries of a training run
pub mod metrics;
