// ============================================================
// income_pipeline — library root
// ============================================================
// Layers, outermost first:
//
//   1 cli          — clap commands, printing
//   2 application  — pipeline + train / predict / inspect use cases
//   3 domain       — records, schema, error taxonomy, traits
//   4 data         — CSV loading, split, encoder/scaler store,
//                    feature builder
//   5 ml           — model families, search, trainer, evaluator
//   6 infra        — config, artifact store, report CSVs
//
// Each layer only depends on the layers below it.

#![recursion_limit = "256"]

pub mod application;
pub mod cli;
pub mod data;
pub mod domain;
pub mod infra;
pub mod ml;
