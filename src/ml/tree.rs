// ============================================================
// Layer 5 — Decision Tree Core
// ============================================================
// Shared by the random forest and the boosted ensemble.
//
// Trees are grown on a pre-binned copy of the training matrix:
// each feature is cut into at most `max_bins` bins once per fit,
// and split search is a histogram scan per node:
//
//   for each candidate feature:
//       accumulate Stats per bin over the node's rows
//       prefix-sum the bins, score every boundary
//
// What a "good split" means is the Objective:
//   - Gini      (classification forest)  stats = (count, positives)
//   - Gradient  (boosting)               stats = (hessian, gradient)
//
// A split at bin boundary t sends x ≤ edges[t] left, so the frozen
// tree only stores the f64 threshold and never needs the bins.
//
// Nodes live in a flat arena (Vec<Node>) and refer to children by
// index.

use rand::{rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::data::preprocessor::quantile;
use crate::ml::classifier::{CancelToken, FitError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature:   usize,
        threshold: f64,
        left:      usize,
        right:     usize,
    },
}

/// A frozen tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    // width is checked when the artifact is loaded
                    let x = features[*feature];
                    i = if x <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match &nodes[i] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

// ─── Binned matrix ────────────────────────────────────────────────────────────

/// Training features quantised to bin indices
pub(crate) struct BinnedMatrix {
    /// Row-major bin indices
    bins:       Vec<u8>,
    n_features: usize,
    /// Upper edge of every bin but the last, per feature
    edges:      Vec<Vec<f64>>,
}

impl BinnedMatrix {
    pub(crate) fn new(rows: &[Vec<f64>], max_bins: usize) -> Self {
        let n_features = rows.first().map_or(0, Vec::len);
        let max_bins   = max_bins.clamp(2, 256);

        let edges: Vec<Vec<f64>> = (0..n_features)
            .map(|j| {
                let mut column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
                column.sort_by(f64::total_cmp);
                let mut distinct = column.clone();
                distinct.dedup();
                if distinct.len() <= max_bins {
                    distinct.pop();
                    distinct
                } else {
                    let mut cuts: Vec<f64> = (1..max_bins)
                        .map(|b| quantile(&column, b as f64 / max_bins as f64))
                        .collect();
                    cuts.dedup();
                    cuts
                }
            })
            .collect();

        let mut bins = Vec::with_capacity(rows.len() * n_features);
        for row in rows {
            for (j, x) in row.iter().enumerate() {
                bins.push(edges[j].partition_point(|e| *x > *e) as u8);
            }
        }

        Self { bins, n_features, edges }
    }

    fn bin(&self, row: usize, feature: usize) -> usize {
        self.bins[row * self.n_features + feature] as usize
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }

    pub(crate) fn n_features(&self) -> usize {
        self.n_features
    }
}

// ─── Objective ────────────────────────────────────────────────────────────────

/// Additive node statistics: (weight, signal)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Stats {
    pub weight: f64,
    pub signal: f64,
}

impl Stats {
    fn add(&mut self, other: Stats) {
        self.weight += other.weight;
        self.signal += other.signal;
    }

    fn minus(self, other: Stats) -> Stats {
        Stats { weight: self.weight - other.weight, signal: self.signal - other.signal }
    }
}

pub(crate) trait Objective {
    /// Statistics contributed by one training row
    fn sample(&self, row: usize) -> Stats;
    /// Node score; a split's gain is score(L) + score(R) - score(parent)
    fn score(&self, s: Stats) -> f64;
    fn leaf_value(&self, s: Stats) -> f64;
    /// Whether a child with these stats is allowed
    fn admissible(&self, s: Stats) -> bool;
}

/// Gini impurity over 0/1 targets. weight = count, signal = positives.
pub(crate) struct Gini<'a> {
    pub targets:          &'a [u8],
    pub min_samples_leaf: usize,
}

impl Objective for Gini<'_> {
    fn sample(&self, row: usize) -> Stats {
        Stats { weight: 1.0, signal: self.targets[row] as f64 }
    }

    // n·(1 - Gini) - n, so gain equals the drop in weighted impurity
    fn score(&self, s: Stats) -> f64 {
        if s.weight <= 0.0 {
            return 0.0;
        }
        let neg = s.weight - s.signal;
        (s.signal * s.signal + neg * neg) / s.weight - s.weight
    }

    fn leaf_value(&self, s: Stats) -> f64 {
        if s.weight > 0.0 { s.signal / s.weight } else { 0.0 }
    }

    fn admissible(&self, s: Stats) -> bool {
        s.weight >= self.min_samples_leaf.max(1) as f64
    }
}

/// Second-order gradient objective. weight = Σh, signal = Σg.
pub(crate) struct Gradient<'a> {
    pub grad:             &'a [f64],
    pub hess:             &'a [f64],
    pub lambda:           f64,
    pub min_child_weight: f64,
}

impl Objective for Gradient<'_> {
    fn sample(&self, row: usize) -> Stats {
        Stats { weight: self.hess[row], signal: self.grad[row] }
    }

    fn score(&self, s: Stats) -> f64 {
        s.signal * s.signal / (s.weight + self.lambda)
    }

    fn leaf_value(&self, s: Stats) -> f64 {
        -s.signal / (s.weight + self.lambda)
    }

    fn admissible(&self, s: Stats) -> bool {
        s.weight >= self.min_child_weight && s.weight > 0.0
    }
}

// ─── Growth ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct GrowParams {
    pub max_depth:    usize,
    pub min_split:    usize,
    pub min_gain:     f64,
    /// Features considered per node; None = all
    pub max_features: Option<usize>,
}

struct Candidate {
    gain:    f64,
    feature: usize,
    bin:     usize,
}

/// Grow one tree over `rows` (positions into `binned`; duplicates allowed)
pub(crate) fn grow<O: Objective>(
    binned:    &BinnedMatrix,
    rows:      Vec<usize>,
    objective: &O,
    params:    &GrowParams,
    rng:       &mut StdRng,
    cancel:    &CancelToken,
) -> Result<Tree, FitError> {
    let mut nodes    = vec![Node::Leaf { value: 0.0 }];
    let mut features: Vec<usize> = (0..binned.n_features()).collect();
    let mut stack    = vec![(0usize, rows, 0usize)];

    while let Some((index, rows, depth)) = stack.pop() {
        cancel.check()?;

        let mut total = Stats::default();
        for &r in &rows {
            total.add(objective.sample(r));
        }
        let leaf = Node::Leaf { value: objective.leaf_value(total) };

        if depth >= params.max_depth || rows.len() < params.min_split.max(2) {
            nodes[index] = leaf;
            continue;
        }

        // ── Candidate features for this node ─────────────────────────────────
        let considered = match params.max_features {
            Some(k) if k < features.len() => {
                features.shuffle(rng);
                let mut sub = features[..k.max(1)].to_vec();
                sub.sort_unstable();
                sub
            }
            _ => (0..binned.n_features()).collect(),
        };

        // ── Histogram scan ───────────────────────────────────────────────────
        let parent_score = objective.score(total);
        let mut best: Option<Candidate> = None;

        for &f in &considered {
            let n_bins = binned.n_bins(f);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![Stats::default(); n_bins];
            for &r in &rows {
                hist[binned.bin(r, f)].add(objective.sample(r));
            }

            let mut left = Stats::default();
            for (t, h) in hist.iter().enumerate().take(n_bins - 1) {
                left.add(*h);
                let right = total.minus(left);
                if !objective.admissible(left) || !objective.admissible(right) {
                    continue;
                }
                let gain = objective.score(left) + objective.score(right) - parent_score;
                if gain > params.min_gain && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Candidate { gain, feature: f, bin: t });
                }
            }
        }

        let Some(split) = best else {
            nodes[index] = leaf;
            continue;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| binned.bin(r, split.feature) <= split.bin);

        let left  = nodes.len();
        let right = left + 1;
        nodes.push(Node::Leaf { value: 0.0 });
        nodes.push(Node::Leaf { value: 0.0 });
        nodes[index] = Node::Split {
            feature:   split.feature,
            threshold: binned.edges[split.feature][split.bin],
            left,
            right,
        };

        stack.push((right, right_rows, depth + 1));
        stack.push((left, left_rows, depth + 1));
    }

    Ok(Tree { nodes })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(depth: usize) -> GrowParams {
        GrowParams { max_depth: depth, min_split: 2, min_gain: 1e-12, max_features: None }
    }

    #[test]
    fn test_binning_small_cardinality_uses_distinct_values() {
        let rows = vec![vec![0.0], vec![1.0], vec![0.0], vec![1.0]];
        let b = BinnedMatrix::new(&rows, 32);
        assert_eq!(b.edges[0], vec![0.0]);
        assert_eq!(b.bin(0, 0), 0);
        assert_eq!(b.bin(1, 0), 1);
    }

    #[test]
    fn test_binning_caps_bin_count() {
        let rows: Vec<Vec<f64>> = (0..1000).map(|i| vec![i as f64]).collect();
        let b = BinnedMatrix::new(&rows, 16);
        assert!(b.n_bins(0) <= 16);
    }

    #[test]
    fn test_gini_tree_separates_threshold() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let targets: Vec<u8> = (0..20).map(|i| (i >= 12) as u8).collect();
        let binned = BinnedMatrix::new(&rows, 32);
        let gini = Gini { targets: &targets, min_samples_leaf: 1 };
        let mut rng = StdRng::seed_from_u64(0);
        let tree = grow(&binned, (0..20).collect(), &gini, &params(3), &mut rng, &CancelToken::new()).unwrap();

        assert_eq!(tree.predict(&[3.0, 0.0]), 0.0);
        assert_eq!(tree.predict(&[15.0, 0.0]), 1.0);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_depth_zero_is_single_leaf() {
        let rows    = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![0, 0, 1, 1];
        let binned  = BinnedMatrix::new(&rows, 32);
        let gini    = Gini { targets: &targets, min_samples_leaf: 1 };
        let mut rng = StdRng::seed_from_u64(0);
        let tree = grow(&binned, (0..4).collect(), &gini, &params(0), &mut rng, &CancelToken::new()).unwrap();
        assert_eq!(tree.nodes, vec![Node::Leaf { value: 0.5 }]);
    }

    #[test]
    fn test_gradient_leaf_is_newton_step() {
        let rows   = vec![vec![0.0], vec![0.0]];
        let grad   = vec![0.5, 0.5];
        let hess   = vec![0.25, 0.25];
        let binned = BinnedMatrix::new(&rows, 32);
        let obj    = Gradient { grad: &grad, hess: &hess, lambda: 0.0, min_child_weight: 0.0 };
        let mut rng = StdRng::seed_from_u64(0);
        let tree = grow(&binned, vec![0, 1], &obj, &params(2), &mut rng, &CancelToken::new()).unwrap();
        assert!((tree.predict(&[0.0]) + 2.0).abs() < 1e-12);
    }

    fn stump() -> Tree {
        Tree {
            nodes: vec![
                Node::Split { feature: 1, threshold: 0.5, left: 1, right: 2 },
                Node::Leaf { value: -1.0 },
                Node::Leaf { value: 1.0 },
            ],
        }
    }

    #[test]
    fn test_predict_follows_split() {
        assert_eq!(stump().predict(&[9.0, 0.0]), -1.0);
        assert_eq!(stump().predict(&[9.0, 1.0]), 1.0);
    }

    #[test]
    #[should_panic]
    fn test_short_feature_vector_is_not_scored() {
        stump().predict(&[9.0]);
    }
}
