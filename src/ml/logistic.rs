// ============================================================
// Layer 5 — Logistic Regression (burn)
// ============================================================
// Trained as a 2-logit linear head with cross-entropy loss on
// Burn's CPU backend, then frozen into plain coefficients:
//
//   logits = x · W + b          W: [d, 2], b: [2]
//   P(pos) = softmax(logits)[1] = sigmoid(x · (W₁ - W₀) + (b₁ - b₀))
//
// so inference needs no tensor backend at all.
//
// Data flow:
//   FeatureMatrix → FeatureDataset → DataLoader(FeatureBatcher)
//   The loader reshuffles on every pass over the data, drawing from
//   one seeded RNG, and is built without worker threads so batch
//   order depends on the seed alone.
//
// Determinism:
//   - the head is zero-initialised (no random weights)
//   - mini-batch order comes from the loader's shuffle seed
//   - NdArray runs single-process on the CPU
//
// L2 regularisation is Adam's weight decay.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    data::dataloader::DataLoaderBuilder,
    nn::{loss::CrossEntropyLossConfig, Initializer, Linear, LinearConfig},
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::FeatureBatcher;
use crate::data::dataset::FeatureDataset;
use crate::ml::classifier::{sigmoid, CancelToken, FeatureMatrix, FitError};

type TrainBackend = Autodiff<NdArray>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub epochs:        usize,
    pub batch_size:    usize,
    /// L2 penalty applied through Adam's weight decay
    pub weight_decay:  f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            epochs:        20,
            batch_size:    256,
            weight_decay:  1e-4,
        }
    }
}

/// Frozen logistic model: plain coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias:    f64,
}

impl LogisticModel {
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let z: f64 = self.weights.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + self.bias;
        sigmoid(z)
    }
}

#[derive(Module, Debug)]
struct LinearHead<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> LinearHead<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(x)
    }
}

impl LogisticParams {
    pub fn fit(&self, data: &FeatureMatrix, seed: u64, cancel: &CancelToken) -> Result<LogisticModel, FitError> {
        if self.epochs == 0 || self.batch_size == 0 || !(self.learning_rate > 0.0) {
            return Err(FitError::Invalid(format!("bad logistic params: {self:?}")));
        }

        let device = NdArrayDevice::default();
        let d      = data.n_features();

        // ── Build zero-initialised head ──────────────────────────────────────
        let mut model = LinearHead::<TrainBackend> {
            linear: LinearConfig::new(d, 2)
                .with_initializer(Initializer::Zeros)
                .init(&device),
        };

        let mut optim = AdamConfig::new()
            .with_epsilon(1e-8)
            .with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay as f32)))
            .init();

        let loss_fn = CrossEntropyLossConfig::new().init(&device);

        // ── Training data loader ─────────────────────────────────────────────
        let loader = DataLoaderBuilder::new(FeatureBatcher::<TrainBackend>::new(device.clone()))
            .batch_size(self.batch_size)
            .shuffle(seed)
            .build(FeatureDataset::new(&data.rows, &data.targets));

        // ── Epoch loop ───────────────────────────────────────────────────────
        for epoch in 1..=self.epochs {
            cancel.check()?;

            let mut loss_sum = 0.0f64;
            let mut batches  = 0usize;

            for batch in loader.iter() {
                let loss = loss_fn.forward(model.forward(batch.features), batch.targets);
                let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
                if !loss_val.is_finite() {
                    return Err(FitError::Diverged(format!("non-finite loss at epoch {epoch}")));
                }
                loss_sum += loss_val;
                batches  += 1;

                // Backward pass + Adam update
                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(self.learning_rate, model, grads);
            }

            tracing::debug!("logistic epoch {:>3}: loss {:.5}", epoch, loss_sum / batches.max(1) as f64);
        }

        freeze(&model, d)
    }
}

/// Collapse the 2-logit head into a single coefficient vector
fn freeze(model: &LinearHead<TrainBackend>, d: usize) -> Result<LogisticModel, FitError> {
    let w: Vec<f32> = model
        .linear
        .weight
        .val()
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| FitError::Backend(format!("{e:?}")))?;
    let b: Vec<f32> = match &model.linear.bias {
        Some(bias) => bias
            .val()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| FitError::Backend(format!("{e:?}")))?,
        None => vec![0.0, 0.0],
    };
    if w.len() != d * 2 || b.len() != 2 {
        return Err(FitError::Backend(format!("unexpected head shape: {} weights, {} biases", w.len(), b.len())));
    }

    // weight layout is [d_input, d_output]
    let weights: Vec<f64> = (0..d).map(|i| (w[i * 2 + 1] - w[i * 2]) as f64).collect();
    let bias = (b[1] - b[0]) as f64;

    if weights.iter().any(|v| !v.is_finite()) || !bias.is_finite() {
        return Err(FitError::Diverged("non-finite coefficients".to_string()));
    }
    Ok(LogisticModel { weights, bias })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> FeatureMatrix {
        let mut rows    = Vec::new();
        let mut targets = Vec::new();
        for i in 0..80 {
            let t = (i % 2) as u8;
            let x = if t == 1 { 1.0 } else { -1.0 } + (i % 7) as f64 * 0.05;
            rows.push(vec![x, 0.3]);
            targets.push(t);
        }
        let row_ids = (0..80).collect();
        FeatureMatrix { rows, targets, row_ids }
    }

    #[test]
    fn test_learns_separable_data() {
        let data  = separable();
        let model = LogisticParams::default().fit(&data, 42, &CancelToken::new()).unwrap();
        assert!(model.weights[0] > 0.0);
        assert!(model.predict_proba(&[1.2, 0.3]) > 0.5);
        assert!(model.predict_proba(&[-1.2, 0.3]) < 0.5);
    }

    #[test]
    fn test_same_seed_same_coefficients() {
        let data = separable();
        let p    = LogisticParams { epochs: 5, ..LogisticParams::default() };
        let a    = p.fit(&data, 7, &CancelToken::new()).unwrap();
        let b    = p.fit(&data, 7, &CancelToken::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let err = LogisticParams::default().fit(&separable(), 1, &token).unwrap_err();
        assert_eq!(err, FitError::Cancelled);
    }

    #[test]
    fn test_zero_epochs_is_invalid() {
        let p = LogisticParams { epochs: 0, ..LogisticParams::default() };
        assert!(matches!(p.fit(&separable(), 1, &CancelToken::new()), Err(FitError::Invalid(_))));
    }
}
