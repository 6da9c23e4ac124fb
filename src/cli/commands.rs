// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Four subcommands: `train`, `predict`, `inspect`, `config`.
//
// `train` flags are overrides: anything left unset keeps the
// value from --config (or the built-in defaults).
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::train_use_case::TrainOptions;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train all candidates, pick a champion and publish it
    Train(TrainArgs),

    /// Score one or more raw records with the current champion
    Predict(PredictArgs),

    /// Show the current champion, candidate ranking and encodings
    Inspect(InspectArgs),

    /// Print the default pipeline configuration as JSON
    Config,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON pipeline configuration; defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// CSV file(s) to train on; repeat to concatenate
    #[arg(long = "data")]
    pub data: Vec<PathBuf>,

    /// Root of the versioned artifact store
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Directory for comparison.csv and confusion matrices
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Seed for the split, folds and model training
    #[arg(long)]
    pub seed: Option<u64>,

    /// Share of rows held out for evaluation, in (0, 1)
    #[arg(long)]
    pub eval_ratio: Option<f64>,

    /// Train every candidate with its base parameters only
    #[arg(long)]
    pub no_search: bool,
}

/// The application layer never sees clap types
impl From<TrainArgs> for TrainOptions {
    fn from(a: TrainArgs) -> Self {
        TrainOptions {
            config:       a.config,
            data:         a.data,
            artifact_dir: a.artifact_dir,
            report_dir:   a.report_dir,
            seed:         a.seed,
            eval_ratio:   a.eval_ratio,
            no_search:    a.no_search,
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// A JSON object (or array of objects) of raw attributes, inline
    /// or as a path to a .json file
    #[arg(long)]
    pub input: String,

    #[arg(long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,

    /// Also print every category → code table
    #[arg(long)]
    pub encodings: bool,
}
