// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain structs, enums and traits describing what the system
// works with. No file I/O, no model code.

/// Error taxonomy shared by every library layer
pub mod error;

/// Raw records, labels and the dataset container
pub mod record;

/// Raw attribute schema and missing-value policies
pub mod schema;

/// Abstractions the other layers implement
pub mod traits;
