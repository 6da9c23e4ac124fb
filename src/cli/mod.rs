// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap, routes each subcommand to its use
// case, and prints the result. No pipeline logic lives here.
//
//   train    — load CSV, train candidates, publish the champion
//   predict  — score raw JSON records with the current champion
//   inspect  — show the champion, ranking and encoding maps
//   config   — print the default configuration
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use std::fs;

use anyhow::{bail, Context, Result};
use clap::Parser;
use commands::{Commands, InspectArgs, PredictArgs, TrainArgs};

use crate::domain::record::Record;
use crate::infra::artifact::ArtifactStore;
use crate::infra::config::PipelineConfig;

#[derive(Parser, Debug)]
#[command(
    name = "income-pipeline",
    version,
    about = "Train, select and serve income classifiers on census records."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Predict(args) => run_predict(args),
            Commands::Inspect(args) => run_inspect(args),
            Commands::Config        => run_config(),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let use_case = TrainUseCase::from_options(&args.into())?;
    tracing::info!(
        "Starting training on {} file(s), {} candidate(s)",
        use_case.config().data.paths.len(),
        use_case.config().candidates.len(),
    );
    let summary = use_case.execute()?;

    println!("Published version {}", summary.version);
    println!(
        "Champion: {} ({})  roc_auc={:.4} f1={:.4} brier={:.4} accuracy={:.4}",
        summary.champion,
        summary.family,
        summary.metrics.roc_auc,
        summary.metrics.f1,
        summary.metrics.brier,
        summary.metrics.accuracy,
    );
    if summary.failed > 0 {
        println!("{} of {} candidate(s) failed; see the report", summary.failed, summary.candidates);
    }
    for path in &summary.report_files {
        println!("  wrote {}", path.display());
    }
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::Predictor;

    let text = if args.input.trim_start().starts_with(['{', '[']) {
        args.input.clone()
    } else {
        fs::read_to_string(&args.input).with_context(|| format!("Cannot read input file '{}'", args.input))?
    };
    let value: serde_json::Value = serde_json::from_str(&text).context("Input is not valid JSON")?;
    let objects = match value {
        serde_json::Value::Array(items) => items,
        other                           => vec![other],
    };

    let predictor = Predictor::load(&ArtifactStore::new(&args.artifact_dir))
        .with_context(|| format!("No champion available under '{}'", args.artifact_dir.display()))?;

    for (i, object) in objects.iter().enumerate() {
        let Some(record) = Record::from_json(object) else {
            bail!("Input item {i} is not a JSON object");
        };
        let prediction = predictor
            .predict(&record)
            .with_context(|| format!("Cannot score input item {i}"))?;
        println!("{}", serde_json::to_string(&prediction)?);
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let view = InspectUseCase::new(ArtifactStore::new(&args.artifact_dir)).execute()?;

    println!("Current version : {} ({} published)", view.version, view.versions.len());
    println!("Champion        : {} ({})", view.champion, view.family);
    println!("Trained at      : {}", view.trained_at.to_rfc3339());
    println!("Threshold       : {}", view.threshold);
    println!();
    println!("{:<4} {:<24} {:<18} {:>8} {:>8} {:>8} {:>8}", "rank", "candidate", "family", "roc_auc", "f1", "brier", "acc");
    for c in &view.candidates {
        match (&c.rank, &c.metrics) {
            (Some(rank), Some(m)) => println!(
                "{:<4} {:<24} {:<18} {:>8.4} {:>8.4} {:>8.4} {:>8.4}",
                rank, c.name, c.family, m.roc_auc, m.f1, m.brier, m.accuracy,
            ),
            _ => println!(
                "{:<4} {:<24} {:<18} failed: {}",
                "-", c.name, c.family, c.failure.as_deref().unwrap_or("not scored"),
            ),
        }
    }
    println!();
    println!("Selected features ({}): {}", view.selected_columns.len(), view.selected_columns.join(", "));

    if args.encodings {
        for e in &view.encodings {
            println!();
            println!("{} (0 = unknown)", e.attribute);
            for (category, code) in &e.categories {
                println!("  {code:>3}  {category}");
            }
        }
    }
    Ok(())
}

fn run_config() -> Result<()> {
    println!("{}", PipelineConfig::default().to_json_pretty()?);
    Ok(())
}
