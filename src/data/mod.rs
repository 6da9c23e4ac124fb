// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between a CSV file and a fixed-width feature vector.
//
//   CSV file
//       │
//       ▼
//   CsvSource         → raw Records + labels, schema-checked
//       │
//       ▼
//   split()           → stratified training / evaluation partitions
//       │
//       ▼
//   Preprocessor      → fits TransformerState on training rows only
//       │               (imputation, clipping, scaling, encoding maps)
//       ▼
//   FeatureBuilder    → fits FeatureSchema on training rows only
//       │               (derived features, one-hot, selection)
//       ▼
//   FeatureVector     → what the models consume
//       │
//       ▼
//   FeatureDataset +  → Burn DataLoader input for the logistic
//   FeatureBatcher      family (shuffled mini-batches)
//
// Each module is responsible for exactly one step.

/// Reads census CSV files into a Dataset
pub mod loader;

/// Stratified train/evaluation split, leakage guard and folds
pub mod splitter;

/// Encoding maps, imputation and scaling (the TransformerState)
pub mod preprocessor;

/// Derived features and feature selection (the FeatureSchema)
pub mod features;

/// Feature rows as a Burn Dataset
pub mod dataset;

/// Stacks feature rows into tensors for the DataLoader
pub mod batcher;
