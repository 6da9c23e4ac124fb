// ============================================================
// Layer 4 — Feature Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<FeatureSample>
// into one input tensor and one target tensor.
//
// How batching works here:
//   Input:  N samples, each with D features
//   Output: FeatureBatch with features [N, D] and targets [N]
//
//   All rows are flattened into one Vec, then reshaped:
//   [r1_f1, ..., r1_fD, r2_f1, ..., rN_fD] → [N, D]
//
// Every row of a partition has the same width (the frozen
// FeatureSchema guarantees it), so no padding is needed.
//
// Reference: Burn Book §4 (Batcher)

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::FeatureSample;

/// A batch of feature rows ready for the forward pass
#[derive(Debug, Clone)]
pub struct FeatureBatch<B: Backend> {
    /// shape: [batch_size, n_features]
    pub features: Tensor<B, 2>,
    /// 0/1 class index per row, shape: [batch_size]
    pub targets:  Tensor<B, 1, Int>,
}

/// Holds the device tensors are created on
#[derive(Clone, Debug)]
pub struct FeatureBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> FeatureBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<FeatureSample, FeatureBatch<B>> for FeatureBatcher<B> {
    fn batch(&self, items: Vec<FeatureSample>) -> FeatureBatch<B> {
        let rows  = items.len();
        let width = items.first().map_or(0, |s| s.features.len());

        let flat: Vec<f32> = items.iter().flat_map(|s| s.features.iter().copied()).collect();
        let targets: Vec<i32> = items.iter().map(|s| s.target as i32).collect();

        let features = Tensor::<B, 1>::from_floats(flat.as_slice(), &self.device).reshape([rows, width]);
        let targets  = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), &self.device);

        FeatureBatch { features, targets }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    #[test]
    fn test_batch_shapes_and_values() {
        let batcher = FeatureBatcher::<NdArray>::new(NdArrayDevice::default());
        let items = vec![
            FeatureSample { features: vec![1.0, 2.0], target: 1 },
            FeatureSample { features: vec![3.0, 4.0], target: 0 },
            FeatureSample { features: vec![5.0, 6.0], target: 1 },
        ];
        let batch = batcher.batch(items);

        assert_eq!(batch.features.dims(), [3, 2]);
        assert_eq!(batch.targets.dims(), [3]);
        let features = batch.features.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_eq!(features, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 0, 1]);
    }
}
