// ============================================================
// Layer 6 — Artifact Store
// ============================================================
// Persists the champion together with everything inference needs
// to reproduce the training-time transformation.
//
// Layout:
//   <root>/
//     CURRENT                      ← name of the active version
//     .publish.lock                ← pid + time, present only while publishing
//     versions/
//       20261019T101500.123456Z/
//         model.json               ← TrainedModel + metadata
//         transformer.json         ← encoding maps, scaling params
//         schema.json              ← raw schema, labels, feature schema
//         report.json              ← full evaluation report
//
// Publish protocol (single writer):
//   1. take .publish.lock (create_new; fails if another publish runs,
//      a lock older than STALE_LOCK_SECS is treated as abandoned)
//   2. write + fsync all four files into .staging-<version>/
//   3. rename staging → versions/<version>
//   4. write CURRENT.tmp, fsync, rename over CURRENT
// Readers only ever follow CURRENT, so they see either the old
// champion or the complete new one. Published version directories
// are never modified again.
//
// Reference: lightning_db wal.rs (temp file + rename),
//            raft storage.rs (sync_all before rename)

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::features::FeatureSchema;
use crate::data::preprocessor::TransformerState;
use crate::domain::error::{PipelineError, Result};
use crate::domain::record::LabelConfig;
use crate::domain::schema::RawSchema;
use crate::ml::classifier::TrainedModel;
use crate::ml::evaluator::{EvaluationReport, MetricSet};

pub const MODEL_FILE:       &str = "model.json";
pub const TRANSFORMER_FILE: &str = "transformer.json";
pub const SCHEMA_FILE:      &str = "schema.json";
pub const REPORT_FILE:      &str = "report.json";
pub const CURRENT_FILE:     &str = "CURRENT";
pub const LOCK_FILE:        &str = ".publish.lock";
pub const VERSIONS_DIR:     &str = "versions";

/// The champion model plus its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub candidate:  String,
    pub family:     String,
    pub params:     serde_json::Value,
    pub trained_at: DateTime<Utc>,
    pub metrics:    MetricSet,
    pub threshold:  f64,
    pub model:      TrainedModel,
}

/// How raw input becomes a feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaArtifact {
    pub raw:      RawSchema,
    pub labels:   LabelConfig,
    pub features: FeatureSchema,
}

/// One published, immutable artifact set
#[derive(Debug, Clone, PartialEq)]
pub struct ChampionArtifact {
    pub version:     String,
    pub model:       ModelArtifact,
    pub transformer: TransformerState,
    pub schema:      SchemaArtifact,
    pub report:      EvaluationReport,
}

/// Versioned on-disk artifact store rooted at one directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(VERSIONS_DIR).join(version)
    }

    // ─── Publish ──────────────────────────────────────────────────────────────

    /// Write a new version and make it current. On any failure the
    /// previous CURRENT is left untouched and no staging files remain.
    pub fn publish(
        &self,
        model:       ModelArtifact,
        transformer: TransformerState,
        schema:      SchemaArtifact,
        report:      EvaluationReport,
    ) -> Result<ChampionArtifact> {
        fs::create_dir_all(&self.root).map_err(|e| write_error(&self.root, e))?;

        // ── Step 1: Single writer ────────────────────────────────────────────
        let _lock = PublishLock::acquire(&self.root.join(LOCK_FILE))?;

        let version = self.next_version();
        let staging = self.root.join(format!(".staging-{version}"));
        let target  = self.version_dir(&version);

        // ── Steps 2-4: Stage, move, switch ───────────────────────────────────
        let result = self
            .stage(&staging, &model, &transformer, &schema, &report)
            .and_then(|()| {
                let versions = self.root.join(VERSIONS_DIR);
                fs::create_dir_all(&versions).map_err(|e| write_error(&versions, e))?;
                fs::rename(&staging, &target).map_err(|e| write_error(&target, e))?;
                sync_dir(&versions).map_err(|e| write_error(&versions, e))
            })
            .and_then(|()| self.switch_current(&version));

        if let Err(e) = result {
            let _ = fs::remove_dir_all(&staging);
            if self.current_version().ok().flatten().as_deref() != Some(version.as_str()) {
                let _ = fs::remove_dir_all(&target);
            }
            tracing::warn!("Publish of version {} failed: {}", version, e);
            return Err(e);
        }

        tracing::info!("Published champion '{}' as version {}", model.candidate, version);
        Ok(ChampionArtifact { version, model, transformer, schema, report })
    }

    fn stage(
        &self,
        staging:     &Path,
        model:       &ModelArtifact,
        transformer: &TransformerState,
        schema:      &SchemaArtifact,
        report:      &EvaluationReport,
    ) -> Result<()> {
        fs::create_dir(staging).map_err(|e| write_error(staging, e))?;
        write_json(&staging.join(MODEL_FILE), model)?;
        write_json(&staging.join(TRANSFORMER_FILE), transformer)?;
        write_json(&staging.join(SCHEMA_FILE), schema)?;
        write_json(&staging.join(REPORT_FILE), report)?;
        sync_dir(staging).map_err(|e| write_error(staging, e))
    }

    fn switch_current(&self, version: &str) -> Result<()> {
        let tmp = self.root.join(format!("{CURRENT_FILE}.tmp"));
        write_synced(&tmp, version.as_bytes())?;
        let current = self.root.join(CURRENT_FILE);
        fs::rename(&tmp, &current).map_err(|e| write_error(&current, e))?;
        sync_dir(&self.root).map_err(|e| write_error(&self.root, e))
    }

    /// UTC timestamp, made unique against existing versions
    fn next_version(&self) -> String {
        let base = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let mut version = base.clone();
        let mut n = 1;
        while self.version_dir(&version).exists() {
            version = format!("{base}-{n}");
            n += 1;
        }
        version
    }

    // ─── Load ─────────────────────────────────────────────────────────────────

    /// Active version, or None before the first publish
    pub fn current_version(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.root.join(CURRENT_FILE)) {
            Ok(s) => {
                let v = s.trim().to_string();
                Ok(if v.is_empty() { None } else { Some(v) })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the active version.
    ///
    /// # Errors
    /// ArtifactMissing when nothing has been published or any piece is
    /// absent; ArtifactCorrupt when a piece cannot be decoded.
    pub fn load(&self) -> Result<ChampionArtifact> {
        let version = self.current_version()?.ok_or_else(|| PipelineError::ArtifactMissing {
            piece: CURRENT_FILE.to_string(),
            path:  self.root.clone(),
        })?;
        self.load_version(&version)
    }

    pub fn load_version(&self, version: &str) -> Result<ChampionArtifact> {
        let dir = self.version_dir(version);
        let artifact = ChampionArtifact {
            version:     version.to_string(),
            model:       read_json(&dir, MODEL_FILE)?,
            transformer: read_json(&dir, TRANSFORMER_FILE)?,
            schema:      read_json(&dir, SCHEMA_FILE)?,
            report:      read_json(&dir, REPORT_FILE)?,
        };
        tracing::debug!("Loaded artifact version {} from '{}'", version, dir.display());
        Ok(artifact)
    }

    /// All published versions, oldest first
    pub fn versions(&self) -> Result<Vec<String>> {
        let dir = self.root.join(VERSIONS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        versions.sort();
        Ok(versions)
    }
}

// ─── Lock ─────────────────────────────────────────────────────────────────────
//
// The lock file records who took it and when. A publish that finds a
// lock older than STALE_LOCK_SECS assumes its owner crashed, removes
// it and tries once more. Unreadable locks are aged by file mtime.

/// A publish never legitimately holds the lock this long
pub const STALE_LOCK_SECS: i64 = 600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid:         u32,
    pub acquired_at: DateTime<Utc>,
}

/// Exclusive publish lock; the file is removed on drop
struct PublishLock {
    path: PathBuf,
}

impl PublishLock {
    fn acquire(path: &Path) -> Result<Self> {
        match Self::try_create(path) {
            Err(PipelineError::ArtifactWrite { .. }) if Self::is_stale(path) => {
                tracing::warn!("Removing stale publish lock '{}'", path.display());
                fs::remove_file(path).map_err(|e| write_error(path, e))?;
                Self::try_create(path)
            }
            other => other,
        }
    }

    fn try_create(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut f) => {
                let owner = LockOwner { pid: std::process::id(), acquired_at: Utc::now() };
                if let Ok(text) = serde_json::to_string(&owner) {
                    let _ = f.write_all(text.as_bytes());
                }
                Ok(Self { path: path.to_path_buf() })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(PipelineError::ArtifactWrite {
                path:   path.to_path_buf(),
                reason: match read_owner(path) {
                    Some(o) => format!("publish lock held by pid {} since {}", o.pid, o.acquired_at.to_rfc3339()),
                    None    => "another publish holds the lock".to_string(),
                },
            }),
            Err(e) => Err(write_error(path, e)),
        }
    }

    fn is_stale(path: &Path) -> bool {
        let taken = match read_owner(path) {
            Some(owner) => owner.acquired_at,
            None => match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(t)  => DateTime::<Utc>::from(t),
                Err(_) => return false,
            },
        };
        (Utc::now() - taken).num_seconds() > STALE_LOCK_SECS
    }
}

fn read_owner(path: &Path) -> Option<LockOwner> {
    fs::read(path).ok().and_then(|b| serde_json::from_slice(&b).ok())
}

impl Drop for PublishLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

// ─── File helpers ─────────────────────────────────────────────────────────────

fn write_error(path: &Path, e: io::Error) -> PipelineError {
    PipelineError::ArtifactWrite { path: path.to_path_buf(), reason: e.to_string() }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = File::create(path).map_err(|e| write_error(path, e))?;
    f.write_all(bytes).map_err(|e| write_error(path, e))?;
    f.sync_all().map_err(|e| write_error(path, e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::ArtifactWrite { path: path.to_path_buf(), reason: e.to_string() })?;
    write_synced(path, &bytes)
}

fn read_json<T: DeserializeOwned>(dir: &Path, piece: &str) -> Result<T> {
    let path = dir.join(piece);
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PipelineError::ArtifactMissing { piece: piece.to_string(), path });
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| PipelineError::ArtifactCorrupt { piece: piece.to_string(), reason: e.to_string() })
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::features::{FeatureBuilder, SelectionCriterion};
    use crate::data::preprocessor::{CategoricalEncoding, EncodingConfig, Preprocessor};
    use crate::data::splitter::split;
    use crate::domain::record::{Dataset, Label, Record};
    use crate::domain::schema::AttributeSpec;
    use crate::ml::evaluator::SelectionPolicy;
    use crate::ml::logistic::LogisticModel;

    /// A small but complete artifact set
    pub(crate) fn pieces() -> (ModelArtifact, TransformerState, SchemaArtifact, EvaluationReport) {
        let raw = RawSchema::new(vec![AttributeSpec::numeric("age"), AttributeSpec::categorical("workclass")]);
        let mut ds = Dataset::default();
        for i in 0..20 {
            let pos = i % 2 == 0;
            ds.push(
                Record::new().with("age", 20.0 + i as f64).with("workclass", if pos { "A" } else { "B" }),
                Some(if pos { Label::Positive } else { Label::Negative }),
            );
        }
        let s = split(&ds, 0.2, 1).unwrap();
        let transformer = Preprocessor::new(raw.clone(), EncodingConfig::default())
            .fit(s.training_view(&ds))
            .unwrap();
        let encoded: Vec<_> = s.training_view(&ds).iter().map(|r| transformer.transform(&r.record).unwrap()).collect();
        let targets: Vec<u8> = s.training_view(&ds).iter().map(|r| r.label.unwrap().as_target()).collect();
        let features = FeatureBuilder::new(vec![], CategoricalEncoding::OneHot, SelectionCriterion::All)
            .fit(&transformer, &encoded, &targets)
            .unwrap();
        let metrics = MetricSet { roc_auc: 0.9, f1: 0.8, brier: 0.1, accuracy: 0.85, precision: 0.8, recall: 0.8 };
        let model = ModelArtifact {
            candidate:  "lr".into(),
            family:     "logistic".into(),
            params:     serde_json::json!({ "epochs": 3 }),
            trained_at: Utc::now(),
            metrics,
            threshold:  0.5,
            model:      TrainedModel::Logistic(LogisticModel { weights: vec![0.1; features.width()], bias: -0.2 }),
        };
        let report = EvaluationReport {
            created_at:      Utc::now(),
            seed:            1,
            threshold:       0.5,
            policy:          SelectionPolicy::default(),
            training_rows:   16,
            evaluation_rows: 4,
            candidates:      vec![],
            champion:        Some("lr".into()),
        };
        let schema = SchemaArtifact { raw, labels: LabelConfig::default(), features };
        (model, transformer, schema, report)
    }

    fn publish(store: &ArtifactStore) -> Result<ChampionArtifact> {
        let (m, t, s, r) = pieces();
        store.publish(m, t, s, r)
    }

    #[test]
    fn test_publish_then_load_round_trips() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let published = publish(&store).unwrap();
        let loaded    = store.load().unwrap();
        assert_eq!(loaded, published);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_empty_store_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }

    #[test]
    fn test_missing_piece_is_reported() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let v     = publish(&store).unwrap().version;
        fs::remove_file(store.version_dir(&v).join(TRANSFORMER_FILE)).unwrap();
        match store.load().unwrap_err() {
            PipelineError::ArtifactMissing { piece, .. } => assert_eq!(piece, TRANSFORMER_FILE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_piece_is_reported() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let v     = publish(&store).unwrap().version;
        fs::write(store.version_dir(&v).join(MODEL_FILE), b"{ not json").unwrap();
        assert!(matches!(store.load(), Err(PipelineError::ArtifactCorrupt { .. })));
    }

    #[test]
    fn test_second_publish_replaces_current_and_keeps_old_version() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let first  = publish(&store).unwrap();
        let second = publish(&store).unwrap();
        assert_ne!(first.version, second.version);
        assert_eq!(store.current_version().unwrap(), Some(second.version.clone()));
        assert_eq!(store.versions().unwrap(), vec![first.version.clone(), second.version]);
        assert_eq!(store.load_version(&first.version).unwrap(), first);
    }

    #[test]
    fn test_held_lock_blocks_publish_and_keeps_current() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let first = publish(&store).unwrap();
        fs::write(dir.path().join(LOCK_FILE), b"other").unwrap();

        assert!(matches!(publish(&store), Err(PipelineError::ArtifactWrite { .. })));
        assert_eq!(store.current_version().unwrap(), Some(first.version));
        assert_eq!(store.versions().unwrap().len(), 1);
    }

    #[test]
    fn test_stale_lock_is_recovered() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let owner = LockOwner { pid: 1, acquired_at: Utc::now() - chrono::Duration::hours(1) };
        fs::write(dir.path().join(LOCK_FILE), serde_json::to_vec(&owner).unwrap()).unwrap();

        let published = publish(&store).unwrap();
        assert_eq!(store.current_version().unwrap(), Some(published.version));
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_fresh_lock_names_its_owner() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let owner = LockOwner { pid: 4242, acquired_at: Utc::now() };
        fs::write(dir.path().join(LOCK_FILE), serde_json::to_vec(&owner).unwrap()).unwrap();

        match publish(&store).unwrap_err() {
            PipelineError::ArtifactWrite { reason, .. } => assert!(reason.contains("4242")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_json_floats_read_back_bit_for_bit() {
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("floats.json");
        let values = vec![910336.1428572239_f64, 0.1 + 0.2, 1.0 / 3.0, -2.718281828459045e-7, 6.02214076e23];
        write_json(&path, &values).unwrap();
        let back: Vec<f64> = read_json(dir.path(), "floats.json").unwrap();
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&back), bits(&values));
    }

    #[test]
    fn test_failed_publish_leaves_no_staging() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        // a file where the versions directory should go
        fs::write(dir.path().join(VERSIONS_DIR), b"").unwrap();

        assert!(matches!(publish(&store), Err(PipelineError::ArtifactWrite { .. })));
        assert_eq!(store.current_version().unwrap(), None);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
            .collect();
        assert!(leftovers.is_empty());
        assert!(!dir.path().join(LOCK_FILE).exists());
    }
}
