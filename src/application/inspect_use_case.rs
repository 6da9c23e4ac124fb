// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Read-only look at the published champion: which version is
// current, how every candidate scored, and the frozen encoding
// tables. The CLI formats the result; nothing is printed here.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::application::predict_use_case::Predictor;
use crate::infra::artifact::ArtifactStore;
use crate::ml::evaluator::{CandidateReport, MetricSet};

/// One categorical attribute's frozen table
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingSummary {
    pub attribute:  String,
    /// (category, code) in code order; code 0 (unknown) is implied
    pub categories: Vec<(String, u32)>,
}

#[derive(Debug, Clone)]
pub struct Inspection {
    pub version:          String,
    pub versions:         Vec<String>,
    pub champion:         String,
    pub family:           String,
    pub trained_at:       DateTime<Utc>,
    pub threshold:        f64,
    pub metrics:          MetricSet,
    /// Ranked candidates first, failed ones after
    pub candidates:       Vec<CandidateReport>,
    pub selected_columns: Vec<String>,
    pub encodings:        Vec<EncodingSummary>,
}

pub struct InspectUseCase {
    store: ArtifactStore,
}

impl InspectUseCase {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn execute(&self) -> Result<Inspection> {
        let predictor = Predictor::load(&self.store)
            .with_context(|| format!("No usable champion under '{}'", self.store.root().display()))?;
        let versions = self.store.versions().context("Failed to list published versions")?;
        let artifact = predictor.artifact();

        let mut candidates: Vec<CandidateReport> =
            predictor.report().ranked().into_iter().cloned().collect();
        candidates.extend(predictor.report().candidates.iter().filter(|c| c.rank.is_none()).cloned());

        let encodings = predictor
            .encoding_maps()
            .into_iter()
            .map(|(attribute, map)| EncodingSummary {
                attribute:  attribute.to_string(),
                categories: map.categories().into_iter().map(|(c, code)| (c.to_string(), code)).collect(),
            })
            .collect();

        Ok(Inspection {
            version:          predictor.version().to_string(),
            versions,
            champion:         artifact.model.candidate.clone(),
            family:           artifact.model.family.clone(),
            trained_at:       artifact.model.trained_at,
            threshold:        artifact.model.threshold,
            metrics:          artifact.model.metrics,
            candidates,
            selected_columns: artifact.schema.features.selected_columns().into_iter().map(str::to_string).collect(),
            encodings,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::artifact::tests::pieces;

    #[test]
    fn test_inspect_current_version() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let (m, t, s, r) = pieces();
        let published = store.publish(m, t, s, r).unwrap();

        let view = InspectUseCase::new(ArtifactStore::new(dir.path())).execute().unwrap();
        assert_eq!(view.version, published.version);
        assert_eq!(view.versions, vec![published.version.clone()]);
        assert_eq!(view.champion, "lr");
        assert_eq!(view.encodings.len(), 1);
        assert_eq!(view.encodings[0].attribute, "workclass");
    }

    #[test]
    fn test_inspect_empty_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InspectUseCase::new(ArtifactStore::new(dir.path())).execute().is_err());
    }
}
