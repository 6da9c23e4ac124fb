// ============================================================
// Layer 4 — Feature Dataset
// ============================================================
// Wraps one partition's feature rows so Burn's DataLoader can
// index, shuffle and batch them.
//
// Rows are stored as f32 because that is what the training
// backend consumes; the conversion happens once here, not per
// batch.
//
// Reference: Burn Book §4 (Dataset)

use burn::data::dataset::Dataset;

/// One feature row and its 0/1 target
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSample {
    pub features: Vec<f32>,
    pub target:   u8,
}

pub struct FeatureDataset {
    samples: Vec<FeatureSample>,
}

impl FeatureDataset {
    /// `rows` and `targets` are paired by position
    pub fn new(rows: &[Vec<f64>], targets: &[u8]) -> Self {
        let samples = rows
            .iter()
            .zip(targets)
            .map(|(row, &target)| FeatureSample {
                features: row.iter().map(|&x| x as f32).collect(),
                target,
            })
            .collect();
        Self { samples }
    }

    pub fn width(&self) -> usize {
        self.samples.first().map_or(0, |s| s.features.len())
    }
}

impl Dataset<FeatureSample> for FeatureDataset {
    fn get(&self, index: usize) -> Option<FeatureSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
