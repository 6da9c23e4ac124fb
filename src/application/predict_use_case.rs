// ============================================================
// Layer 2 — Predictor (serving side)
// ============================================================
// Loads the current champion artifact once and scores raw
// records with exactly the transformation used in training:
//
//   raw record
//     → TransformerState::transform   (frozen maps / scaling)
//     → FeatureSchema::vectorize      (derived + selected columns)
//     → TrainedModel::predict_proba
//     → threshold → label
//
// A missing required attribute is a SchemaMismatch; an unseen
// category maps to the unknown code; a missing value is imputed
// with the training default.

use std::collections::BTreeMap;

use crate::data::preprocessor::EncodingMap;
use crate::domain::error::{PipelineError, Result};
use crate::domain::record::{Label, Record};
use crate::domain::traits::{IncomePredictor, Prediction};
use crate::infra::artifact::{ArtifactStore, ChampionArtifact};
use crate::ml::classifier::Classifier;
use crate::ml::evaluator::EvaluationReport;

/// Ready-to-serve champion. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Predictor {
    artifact: ChampionArtifact,
}

impl Predictor {
    /// Load the current version from `store`.
    ///
    /// # Errors
    /// ArtifactMissing when nothing is published; ArtifactCorrupt when
    /// the pieces disagree with each other.
    pub fn load(store: &ArtifactStore) -> Result<Self> {
        let artifact = store.load()?;
        Self::from_artifact(artifact)
    }

    pub fn from_artifact(artifact: ChampionArtifact) -> Result<Self> {
        let expected = artifact.schema.features.width();
        let actual   = artifact.model.model.n_features();
        if expected != actual {
            return Err(PipelineError::ArtifactCorrupt {
                piece:  "model.json".to_string(),
                reason: format!("model expects {actual} features, schema selects {expected}"),
            });
        }
        tracing::info!(
            "Serving '{}' ({}) from version {}",
            artifact.model.candidate,
            artifact.model.family,
            artifact.version,
        );
        Ok(Self { artifact })
    }

    pub fn version(&self) -> &str {
        &self.artifact.version
    }

    pub fn artifact(&self) -> &ChampionArtifact {
        &self.artifact
    }

    /// Score one raw record
    pub fn predict(&self, record: &Record) -> Result<Prediction> {
        let encoded  = self.artifact.transformer.transform(record)?;
        let features = self.artifact.schema.features.vectorize(&encoded);
        let probability = self.artifact.model.model.predict_proba(features.as_slice());
        let label = if probability >= self.artifact.model.threshold { Label::Positive } else { Label::Negative };
        Ok(Prediction {
            label,
            label_text: self.artifact.schema.labels.text(label).to_string(),
            probability,
        })
    }

    /// Frozen category → code tables, per categorical attribute
    pub fn encoding_maps(&self) -> BTreeMap<&str, &EncodingMap> {
        self.artifact.transformer.encoding_maps().into_iter().collect()
    }

    pub fn report(&self) -> &EvaluationReport {
        &self.artifact.report
    }
}

impl IncomePredictor for Predictor {
    fn predict(&self, record: &Record) -> Result<Prediction> {
        Predictor::predict(self, record)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::artifact::tests::pieces;

    fn predictor() -> (tempfile::TempDir, Predictor) {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let (m, t, s, r) = pieces();
        store.publish(m, t, s, r).unwrap();
        let p = Predictor::load(&store).unwrap();
        (dir, p)
    }

    #[test]
    fn test_load_without_publish_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = Predictor::load(&ArtifactStore::new(dir.path())).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }

    #[test]
    fn test_prediction_is_a_probability() {
        let (_dir, p) = predictor();
        let out = p.predict(&Record::new().with("age", 33.0).with("workclass", "A")).unwrap();
        assert!((0.0..=1.0).contains(&out.probability));
        assert_eq!(out.label_text, p.artifact().schema.labels.text(out.label));
    }

    #[test]
    fn test_missing_required_attribute_is_schema_mismatch() {
        let (_dir, p) = predictor();
        let err = p.predict(&Record::new().with("age", 33.0)).unwrap_err();
        match err {
            PipelineError::SchemaMismatch { attribute, .. } => assert_eq!(attribute, "workclass"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unseen_category_still_predicts() {
        let (_dir, p) = predictor();
        let known   = p.predict(&Record::new().with("age", 33.0).with("workclass", "A")).unwrap();
        let unseen  = p.predict(&Record::new().with("age", 33.0).with("workclass", "Never-seen")).unwrap();
        assert!((0.0..=1.0).contains(&unseen.probability));
        assert!(known.probability.is_finite());
    }

    #[test]
    fn test_mismatched_width_is_corrupt() {
        let (_dir, p) = predictor();
        let mut artifact = p.artifact().clone();
        artifact.schema.features.selected.pop();
        assert!(matches!(Predictor::from_artifact(artifact), Err(PipelineError::ArtifactCorrupt { .. })));
    }

    #[test]
    fn test_encoding_maps_exposed() {
        let (_dir, p) = predictor();
        let maps = p.encoding_maps();
        assert_eq!(maps["workclass"].code("A"), 1);
        assert_eq!(maps["workclass"].code("Z"), 0);
    }
}
