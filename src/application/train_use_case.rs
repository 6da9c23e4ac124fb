// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Runs one training job end to end:
//
//   Step 1: Resolve the config (file + CLI overrides)  (Layer 6 - infra)
//   Step 2: Load the CSV files                          (Layer 4 - data)
//   Step 3: Run the pipeline                            (Layer 2 - pipeline)
//   Step 4: Write comparison / confusion CSVs           (Layer 6 - infra)
//   Step 5: Publish the champion artifact               (Layer 6 - infra)
//
// Step 4 is best effort. Step 5 either makes the new champion
// current or leaves the previous one in place.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::application::pipeline;
use crate::data::loader::{ConcatSource, CsvSource};
use crate::domain::traits::RecordSource;
use crate::infra::artifact::{ArtifactStore, ModelArtifact, SchemaArtifact};
use crate::infra::config::PipelineConfig;
use crate::infra::metrics::ReportWriter;
use crate::ml::evaluator::MetricSet;

// ─── Options ──────────────────────────────────────────────────────────────────
// Command-line overrides applied on top of the JSON config. `None`
// keeps whatever the config says.
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    pub config:       Option<PathBuf>,
    pub data:         Vec<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub report_dir:   Option<PathBuf>,
    pub seed:         Option<u64>,
    pub eval_ratio:   Option<f64>,
    pub no_search:    bool,
}

impl TrainOptions {
    /// Load the config file (or defaults) and apply the overrides
    pub fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("Failed to load config '{}'", path.display()))?,
            None => PipelineConfig::default(),
        };

        if !self.data.is_empty() {
            config.data.paths = self.data.clone();
        }
        if let Some(dir) = &self.artifact_dir {
            config.artifact_dir = dir.clone();
        }
        if let Some(dir) = &self.report_dir {
            config.report_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.split.seed = seed;
        }
        if let Some(ratio) = self.eval_ratio {
            config.split.eval_ratio = ratio;
        }
        if self.no_search {
            config.trainer.search.enabled = false;
        }

        config.validate().context("Invalid configuration after command-line overrides")?;
        Ok(config)
    }
}

/// What the CLI reports back after a successful run
#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub version:      String,
    pub champion:     String,
    pub family:       String,
    pub metrics:      MetricSet,
    pub candidates:   usize,
    pub failed:       usize,
    pub report_files: Vec<PathBuf>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: PipelineConfig,
}

impl TrainUseCase {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn from_options(options: &TrainOptions) -> Result<Self> {
        Ok(Self::new(options.resolve()?))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute the full training job end to end
    pub fn execute(&self) -> Result<TrainSummary> {
        let cfg = &self.config;

        // ── Step 2: Load the raw records ─────────────────────────────────────
        let source = ConcatSource::new(
            cfg.data
                .paths
                .iter()
                .map(|p| CsvSource::new(p, cfg.schema.clone(), cfg.data.csv.clone()))
                .collect(),
        );
        let dataset = source.load_all().context("Failed to load training data")?;
        let (negatives, positives) = dataset.class_counts();
        tracing::info!(
            "Loaded {} records from {} file(s) ({} negative, {} positive)",
            dataset.len(),
            cfg.data.paths.len(),
            negatives,
            positives,
        );

        // ── Step 3: Split, fit, train, evaluate, select ──────────────────────
        let run = pipeline::run(cfg, &dataset).context("Training pipeline failed")?;

        // ── Step 4: Human-readable summaries (best effort) ───────────────────
        let report_files = match ReportWriter::new(&cfg.report_dir).and_then(|w| w.write_all(&run.report)) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Could not write report files to '{}': {}", cfg.report_dir.display(), e);
                Vec::new()
            }
        };

        // ── Step 5: Publish ──────────────────────────────────────────────────
        let failed = run.report.candidates.iter().filter(|c| !c.is_viable()).count();
        let candidates = run.report.candidates.len();
        let champion = run.champion;
        let model = ModelArtifact {
            candidate:  champion.name.clone(),
            family:     champion.spec.name().to_string(),
            params:     champion.spec.params_json(),
            trained_at: Utc::now(),
            metrics:    run.champion_metrics,
            threshold:  cfg.threshold,
            model:      champion.model,
        };
        let schema = SchemaArtifact {
            raw:      cfg.schema.clone(),
            labels:   cfg.data.csv.labels.clone(),
            features: run.features,
        };

        let store = ArtifactStore::new(&cfg.artifact_dir);
        let published = store
            .publish(model, run.transformer, schema, run.report)
            .with_context(|| format!("Failed to publish champion to '{}'", cfg.artifact_dir.display()))?;

        Ok(TrainSummary {
            version:      published.version,
            champion:     published.model.candidate,
            family:       published.model.family,
            metrics:      published.model.metrics,
            candidates,
            failed,
            report_files,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_on_defaults() {
        let options = TrainOptions {
            data:       vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")],
            seed:       Some(7),
            eval_ratio: Some(0.3),
            no_search:  true,
            ..Default::default()
        };
        let c = options.resolve().unwrap();
        assert_eq!(c.data.paths.len(), 2);
        assert_eq!(c.split.seed, 7);
        assert_eq!(c.split.eval_ratio, 0.3);
        assert!(!c.trainer.search.enabled);
        assert_eq!(c.artifact_dir, PathBuf::from("artifacts"));
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let options = TrainOptions { eval_ratio: Some(1.5), ..Default::default() };
        assert!(options.resolve().is_err());
    }

    #[test]
    fn test_missing_data_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let options = TrainOptions {
            data:         vec![dir.path().join("absent.csv")],
            artifact_dir: Some(dir.path().join("artifacts")),
            report_dir:   Some(dir.path().join("reports")),
            ..Default::default()
        };
        let err = TrainUseCase::from_options(&options).unwrap().execute().unwrap_err();
        assert!(format!("{err:#}").contains("absent.csv"));
        assert!(!dir.path().join("artifacts").exists());
    }
}
