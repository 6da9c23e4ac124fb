// ============================================================
// Layer 5 — Random Forest
// ============================================================
// Bagged Gini trees:
//   - each tree sees a bootstrap sample of the training rows
//   - each node considers sqrt(d) randomly chosen features
//   - P(pos) is the mean leaf positive-rate over all trees
//
// Tree t uses StdRng seeded with (seed, t), so the forest is
// reproducible regardless of how many trees were grown before.
//
// Why bagging helps:
//   A single deep tree memorises its training rows (low bias,
//   high variance). Averaging many trees that each saw different
//   rows and features keeps the low bias while the independent
//   errors cancel out.
//
// Reference: Breiman (2001) Random Forests

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ml::classifier::{CancelToken, FeatureMatrix, FitError};
use crate::ml::tree::{grow, BinnedMatrix, Gini, GrowParams, Tree};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees:          usize,
    pub max_depth:        usize,
    pub min_samples_leaf: usize,
    /// Features per node; None = sqrt(d)
    pub max_features:     Option<usize>,
    pub bootstrap:        bool,
    pub max_bins:         usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees:          100,
            max_depth:        10,
            min_samples_leaf: 1,
            max_features:     None,
            bootstrap:        true,
            max_bins:         64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    pub n_features: usize,
    pub trees:      Vec<Tree>,
}

impl ForestModel {
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }
}

impl ForestParams {
    pub fn fit(&self, data: &FeatureMatrix, seed: u64, cancel: &CancelToken) -> Result<ForestModel, FitError> {
        if self.n_trees == 0 {
            return Err(FitError::Invalid("n_trees must be > 0".to_string()));
        }

        let d      = data.n_features();
        let binned = BinnedMatrix::new(&data.rows, self.max_bins);
        let gini   = Gini { targets: &data.targets, min_samples_leaf: self.min_samples_leaf };
        let grow_params = GrowParams {
            max_depth:    self.max_depth,
            min_split:    2 * self.min_samples_leaf.max(1),
            min_gain:     1e-12,
            max_features: Some(self.max_features.unwrap_or_else(|| (d as f64).sqrt().round() as usize).clamp(1, d)),
        };

        let mut trees = Vec::with_capacity(self.n_trees);
        for t in 0..self.n_trees {
            cancel.check()?;
            let mut rng = StdRng::seed_from_u64(seed ^ (t as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));

            let rows: Vec<usize> = if self.bootstrap {
                (0..data.len()).map(|_| rng.gen_range(0..data.len())).collect()
            } else {
                (0..data.len()).collect()
            };
            trees.push(grow(&binned, rows, &gini, &grow_params, &mut rng, cancel)?);
        }

        tracing::debug!(
            "forest: {} trees, max depth reached {}",
            trees.len(),
            trees.iter().map(Tree::depth).max().unwrap_or(0),
        );
        Ok(ForestModel { n_features: d, trees })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> FeatureMatrix {
        let rows: Vec<Vec<f64>> = (0..60).map(|i| vec![(i % 10) as f64, (i / 10) as f64]).collect();
        let targets = rows.iter().map(|r| (r[0] >= 5.0) as u8).collect();
        FeatureMatrix { rows, targets, row_ids: (0..60).collect() }
    }

    #[test]
    fn test_forest_fits_simple_rule() {
        let p = ForestParams { n_trees: 15, max_features: Some(2), ..ForestParams::default() };
        let m = p.fit(&data(), 42, &CancelToken::new()).unwrap();
        assert_eq!(m.trees.len(), 15);
        assert!(m.predict_proba(&[8.0, 1.0]) > 0.5);
        assert!(m.predict_proba(&[1.0, 1.0]) < 0.5);
    }

    #[test]
    fn test_forest_is_deterministic() {
        let p = ForestParams { n_trees: 5, ..ForestParams::default() };
        let a = p.fit(&data(), 3, &CancelToken::new()).unwrap();
        let b = p.fit(&data(), 3, &CancelToken::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_trees_is_invalid() {
        let p = ForestParams { n_trees: 0, ..ForestParams::default() };
        assert!(matches!(p.fit(&data(), 1, &CancelToken::new()), Err(FitError::Invalid(_))));
    }
}
