// ============================================================
// Layer 5 — ML Layer
// ============================================================
// Model families, hyperparameter search, parallel training and
// champion selection. Everything here works on FeatureMatrix
// values; nothing knows about CSV files or raw records.
//
//   FeatureMatrix (training)
//       │
//       ▼
//   Trainer::train_all   → one worker per CandidateSpec
//       │                  (grid search on folds, refit)
//       ▼
//   ModelCandidate(s)
//       │
//       ▼
//   Evaluator            → metrics on the evaluation matrix,
//                          ranking, champion

/// Classifier trait, FamilySpec / TrainedModel, CancelToken
pub mod classifier;

/// Logistic regression trained with burn, frozen to coefficients
pub mod logistic;

/// Histogram-based CART shared by the tree ensembles
pub mod tree;

/// Bagged Gini trees
pub mod forest;

/// Second-order gradient-boosted trees
pub mod boosting;

/// Candidate specs, parameter grids, internal-fold search
pub mod search;

/// Parallel candidate training with timeouts
pub mod trainer;

/// Metrics, reports and champion selection
pub mod evaluator;
