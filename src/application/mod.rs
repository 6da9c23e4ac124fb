// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers; no model math and no printing
// here (that's Layer 1).
//
//   pipeline.rs          — split → fit → train → evaluate → select,
//                          in memory
//   train_use_case.rs    — config + CSV + pipeline + publish
//   predict_use_case.rs  — the serving-side Predictor
//   inspect_use_case.rs  — read-only view of the current champion
//
// Library layers return PipelineError; this layer is where errors
// become anyhow::Error with context attached.
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// In-memory training pipeline
pub mod pipeline;

/// The training workflow
pub mod train_use_case;

/// Artifact-backed inference
pub mod predict_use_case;

/// Champion / report inspection
pub mod inspect_use_case;
