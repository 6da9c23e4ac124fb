// ============================================================
// Layer 5 — Gradient-Boosted Trees
// ============================================================
// Additive logistic model F(x) = base + η·Σ tree_m(x), fit by
// second-order boosting on the log loss:
//
//   p_i = sigmoid(F(x_i))
//   g_i = p_i - y_i            (gradient)
//   h_i = p_i · (1 - p_i)      (hessian)
//   leaf weight = -Σg / (Σh + λ)
//
// Each round grows one tree on a row subsample drawn without
// replacement, then updates F on every row.
//
// Reference: Chen & Guestrin (2016) XGBoost, §2.2

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ml::classifier::{sigmoid, CancelToken, FeatureMatrix, FitError};
use crate::ml::tree::{grow, BinnedMatrix, Gradient, GrowParams, Tree};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators:     usize,
    pub learning_rate:    f64,
    pub max_depth:        usize,
    pub min_child_weight: f64,
    /// Share of rows each round sees, in (0, 1]
    pub subsample:        f64,
    /// L2 penalty on leaf weights
    pub lambda:           f64,
    pub max_bins:         usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators:     100,
            learning_rate:    0.1,
            max_depth:        3,
            min_child_weight: 1.0,
            subsample:        1.0,
            lambda:           1.0,
            max_bins:         64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    pub n_features:    usize,
    pub base_score:    f64,
    pub learning_rate: f64,
    pub trees:         Vec<Tree>,
}

impl BoostedModel {
    pub fn margin(&self, features: &[f64]) -> f64 {
        self.base_score + self.learning_rate * self.trees.iter().map(|t| t.predict(features)).sum::<f64>()
    }

    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        sigmoid(self.margin(features))
    }
}

impl BoostingParams {
    pub fn fit(&self, data: &FeatureMatrix, seed: u64, cancel: &CancelToken) -> Result<BoostedModel, FitError> {
        if self.n_estimators == 0 || !(self.learning_rate > 0.0) || !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(FitError::Invalid(format!("bad boosting params: {self:?}")));
        }

        let n      = data.len();
        let binned = BinnedMatrix::new(&data.rows, self.max_bins);
        let rate   = data.positive_rate().clamp(1e-6, 1.0 - 1e-6);
        let base   = (rate / (1.0 - rate)).ln();
        let grow_params = GrowParams {
            max_depth:    self.max_depth,
            min_split:    2,
            min_gain:     1e-12,
            max_features: None,
        };

        let mut rng    = StdRng::seed_from_u64(seed);
        let mut margin = vec![base; n];
        let mut grad   = vec![0.0; n];
        let mut hess   = vec![0.0; n];
        let mut trees  = Vec::with_capacity(self.n_estimators);
        let sample_n   = ((n as f64) * self.subsample).round().clamp(1.0, n as f64) as usize;
        let mut order: Vec<usize> = (0..n).collect();

        for round in 0..self.n_estimators {
            cancel.check()?;

            for i in 0..n {
                let p   = sigmoid(margin[i]);
                grad[i] = p - data.targets[i] as f64;
                hess[i] = p * (1.0 - p);
            }

            let rows = if sample_n < n {
                order.shuffle(&mut rng);
                let mut rows = order[..sample_n].to_vec();
                rows.sort_unstable();
                rows
            } else {
                order.clone()
            };

            let objective = Gradient {
                grad:             &grad,
                hess:             &hess,
                lambda:           self.lambda,
                min_child_weight: self.min_child_weight,
            };
            let tree = grow(&binned, rows, &objective, &grow_params, &mut rng, cancel)?;

            for (i, m) in margin.iter_mut().enumerate() {
                *m += self.learning_rate * tree.predict(&data.rows[i]);
            }
            if margin.iter().any(|m| !m.is_finite()) {
                return Err(FitError::Diverged(format!("non-finite margin after round {round}")));
            }
            trees.push(tree);
        }

        let loss = margin
            .iter()
            .zip(&data.targets)
            .map(|(m, &y)| {
                let p = sigmoid(*m).clamp(1e-15, 1.0 - 1e-15);
                if y == 1 { -p.ln() } else { -(1.0 - p).ln() }
            })
            .sum::<f64>()
            / n as f64;
        tracing::debug!("boosting: {} rounds, training log loss {:.5}", trees.len(), loss);

        Ok(BoostedModel {
            n_features:    data.n_features(),
            base_score:    base,
            learning_rate: self.learning_rate,
            trees,
        })
    }
}
