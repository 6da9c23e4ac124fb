// ============================================================
// Layer 4 — Feature Builder
// ============================================================
// Extends the encoded base record and freezes the final column
// layout:
//
//   EncodedRecord ──build──▶ extended vector ──select──▶ FeatureVector
//
// build:
//   scaled numerics
//   + categorical codes (one-hot or ordinal)
//   + derived features computed from the imputed raw numerics
//     (buckets, quantile buckets, indicators, ratios)
//
// select:
//   keep a column subset chosen once on training data
//   (ANOVA F-score k-best, variance threshold, or all)
//
// Everything data-dependent (quantile bucket edges, ratio scaling,
// selected columns) is resolved during `fit` and stored in the
// FeatureSchema, so inference rebuilds the same columns in the same
// order without any access to the training data.

use serde::{Deserialize, Serialize};

use crate::data::preprocessor::{mean, quantile, CategoricalEncoding, EncodedRecord, TransformerState, UNKNOWN_LABEL};
use crate::domain::error::{PipelineError, Result, Stage};

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn holds(self, x: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => x > threshold,
            Comparison::Ge => x >= threshold,
            Comparison::Lt => x < threshold,
            Comparison::Le => x <= threshold,
        }
    }
}

/// A feature derived from raw numeric attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedFeature {
    /// Right-closed bins over fixed edges
    Bucket {
        name:   String,
        source: String,
        edges:  Vec<f64>,
        #[serde(default)]
        labels: Vec<String>,
    },
    /// Bins over training quantiles (edges resolved at fit)
    QuantileBucket {
        name:      String,
        source:    String,
        quantiles: usize,
        #[serde(default)]
        labels:    Vec<String>,
    },
    /// 1.0 when `source op threshold` holds, else 0.0
    Indicator {
        name:      String,
        source:    String,
        op:        Comparison,
        threshold: f64,
    },
    /// numerator / (denominator + offset), standardised on training
    Ratio {
        name:        String,
        numerator:   String,
        denominator: String,
        #[serde(default)]
        offset:      f64,
    },
}

impl DerivedFeature {
    pub fn name(&self) -> &str {
        match self {
            DerivedFeature::Bucket { name, .. }
            | DerivedFeature::QuantileBucket { name, .. }
            | DerivedFeature::Indicator { name, .. }
            | DerivedFeature::Ratio { name, .. } => name,
        }
    }

    /// Raw numeric attributes this feature reads
    pub fn sources(&self) -> Vec<&str> {
        match self {
            DerivedFeature::Bucket { source, .. }
            | DerivedFeature::QuantileBucket { source, .. }
            | DerivedFeature::Indicator { source, .. } => vec![source.as_str()],
            DerivedFeature::Ratio { numerator, denominator, .. } => vec![numerator.as_str(), denominator.as_str()],
        }
    }
}

/// The census derived features: age bands, retirement flag, working
/// hours bands, capital gain/loss flags and ratio, education quartiles
pub fn census_features() -> Vec<DerivedFeature> {
    let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    vec![
        DerivedFeature::Bucket {
            name:   "age_band".into(),
            source: "age".into(),
            edges:  vec![0.0, 25.0, 35.0, 45.0, 55.0, 65.0, 100.0],
            labels: strings(&["18-25", "26-35", "36-45", "46-55", "56-65", "65+"]),
        },
        DerivedFeature::Indicator {
            name:      "retirement_age".into(),
            source:    "age".into(),
            op:        Comparison::Ge,
            threshold: 65.0,
        },
        DerivedFeature::Bucket {
            name:   "workload".into(),
            source: "hours-per-week".into(),
            edges:  vec![0.0, 20.0, 40.0, 60.0, 168.0],
            labels: strings(&["part-time", "standard", "overtime", "extended"]),
        },
        DerivedFeature::Indicator {
            name:      "has_capital_gain".into(),
            source:    "capital-gain".into(),
            op:        Comparison::Gt,
            threshold: 0.0,
        },
        DerivedFeature::Indicator {
            name:      "has_capital_loss".into(),
            source:    "capital-loss".into(),
            op:        Comparison::Gt,
            threshold: 0.0,
        },
        DerivedFeature::Ratio {
            name:        "capital_ratio".into(),
            numerator:   "capital-gain".into(),
            denominator: "capital-loss".into(),
            offset:      1.0,
        },
        DerivedFeature::QuantileBucket {
            name:      "education_level".into(),
            source:    "education-num".into(),
            quantiles: 4,
            labels:    strings(&["basic", "intermediate", "higher", "advanced"]),
        },
    ]
}

/// How the final column subset is chosen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SelectionCriterion {
    All,
    /// Drop columns whose training variance is below `min`
    VarianceThreshold { min: f64 },
    /// Keep the `k` columns with the highest ANOVA F-score
    KBest { k: usize },
}

impl Default for SelectionCriterion {
    fn default() -> Self {
        SelectionCriterion::KBest { k: 20 }
    }
}

// ─── Frozen schema ────────────────────────────────────────────────────────────

/// A derived feature with every data-dependent parameter resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedFeature {
    Bucket {
        name:   String,
        source: usize,
        edges:  Vec<f64>,
        labels: Vec<String>,
    },
    Indicator {
        name:      String,
        source:    usize,
        op:        Comparison,
        threshold: f64,
    },
    Ratio {
        name:        String,
        numerator:   usize,
        denominator: usize,
        offset:      f64,
        center:      f64,
        scale:       f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    pub column: String,
    pub score:  f64,
}

/// Frozen description of the final feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub categorical_encoding: CategoricalEncoding,
    /// One-hot width (cardinality incl. unknown) per categorical attribute
    pub category_widths:      Vec<usize>,
    pub derived:              Vec<ResolvedFeature>,
    /// Names of every extended column, in build order
    pub columns:              Vec<String>,
    /// Indices into `columns` kept by selection, ascending
    pub selected:             Vec<usize>,
    pub criterion:            SelectionCriterion,
    /// Training scores used by the criterion, highest first
    pub scores:               Vec<FeatureScore>,
}

/// Final fixed-order numeric representation of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub Vec<f64>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FeatureSchema {
    /// Extended vector: every column before selection
    pub fn build(&self, base: &EncodedRecord) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.columns.len());
        out.extend_from_slice(&base.numeric_scaled);

        for (code, width) in base.codes.iter().zip(&self.category_widths) {
            match self.categorical_encoding {
                CategoricalEncoding::OneHot => {
                    let start = out.len();
                    out.resize(start + width, 0.0);
                    let slot = (*code as usize).min(width - 1);
                    out[start + slot] = 1.0;
                }
                CategoricalEncoding::Ordinal => out.push(*code as f64),
            }
        }

        for feature in &self.derived {
            match feature {
                ResolvedFeature::Bucket { source, edges, labels, .. } => {
                    let b = bucket_index(base.numeric_raw[*source], edges);
                    match self.categorical_encoding {
                        CategoricalEncoding::OneHot => {
                            let start = out.len();
                            out.resize(start + labels.len(), 0.0);
                            out[start + b] = 1.0;
                        }
                        CategoricalEncoding::Ordinal => out.push(b as f64),
                    }
                }
                ResolvedFeature::Indicator { source, op, threshold, .. } => {
                    let hit = op.holds(base.numeric_raw[*source], *threshold);
                    out.push(if hit { 1.0 } else { 0.0 });
                }
                ResolvedFeature::Ratio { numerator, denominator, offset, center, scale, .. } => {
                    let r = ratio(base.numeric_raw[*numerator], base.numeric_raw[*denominator], *offset);
                    out.push((r - center) / scale);
                }
            }
        }

        out
    }

    /// Keep the frozen column subset, in the frozen order
    pub fn select(&self, extended: &[f64]) -> FeatureVector {
        FeatureVector(self.selected.iter().map(|&i| extended[i]).collect())
    }

    /// build + select
    pub fn vectorize(&self, base: &EncodedRecord) -> FeatureVector {
        self.select(&self.build(base))
    }

    pub fn selected_columns(&self) -> Vec<&str> {
        self.selected.iter().map(|&i| self.columns[i].as_str()).collect()
    }

    pub fn width(&self) -> usize {
        self.selected.len()
    }
}

// ─── Builder (fitting) ────────────────────────────────────────────────────────

pub struct FeatureBuilder {
    derived:   Vec<DerivedFeature>,
    encoding:  CategoricalEncoding,
    criterion: SelectionCriterion,
}

impl FeatureBuilder {
    pub fn new(derived: Vec<DerivedFeature>, encoding: CategoricalEncoding, criterion: SelectionCriterion) -> Self {
        Self { derived, encoding, criterion }
    }

    /// Resolve derived features and choose the column subset from the
    /// encoded training rows. `targets` is only used for scoring columns.
    pub fn fit(
        &self,
        state:    &TransformerState,
        training: &[EncodedRecord],
        targets:  &[u8],
    ) -> Result<FeatureSchema> {
        if training.is_empty() || training.len() != targets.len() {
            return Err(PipelineError::data(
                Stage::Features,
                format!("{} training rows but {} targets", training.len(), targets.len()),
            ));
        }

        // ── Step 1: Column names for numerics and categoricals ───────────────
        let mut columns: Vec<String> = state.schema.numeric().map(|a| a.name.clone()).collect();
        let mut category_widths = Vec::new();
        for (name, map) in state.encoding_maps() {
            category_widths.push(map.cardinality());
            match self.encoding {
                CategoricalEncoding::OneHot => {
                    columns.push(format!("{name}={UNKNOWN_LABEL}"));
                    columns.extend(map.categories().into_iter().map(|(c, _)| format!("{name}={c}")));
                }
                CategoricalEncoding::Ordinal => columns.push(name.to_string()),
            }
        }

        // ── Step 2: Resolve derived features on training values ──────────────
        let mut derived = Vec::with_capacity(self.derived.len());
        for feature in &self.derived {
            let resolved = self.resolve(feature, state, training)?;
            match (&resolved, self.encoding) {
                (ResolvedFeature::Bucket { name, labels, .. }, CategoricalEncoding::OneHot) => {
                    columns.extend(labels.iter().map(|l| format!("{name}={l}")));
                }
                _ => columns.push(feature.name().to_string()),
            }
            derived.push(resolved);
        }

        let mut schema = FeatureSchema {
            categorical_encoding: self.encoding,
            category_widths,
            derived,
            columns,
            selected:  Vec::new(),
            criterion: self.criterion.clone(),
            scores:    Vec::new(),
        };

        // ── Step 3: Score columns and freeze the selection ───────────────────
        let extended: Vec<Vec<f64>> = training.iter().map(|r| schema.build(r)).collect();
        let n_cols = schema.columns.len();

        let (selected, scores) = match &self.criterion {
            SelectionCriterion::All => ((0..n_cols).collect(), Vec::new()),
            SelectionCriterion::VarianceThreshold { min } => {
                let vars: Vec<f64> = (0..n_cols).map(|j| column_variance(&extended, j)).collect();
                let keep = (0..n_cols).filter(|&j| vars[j] >= *min).collect();
                (keep, ranked(&schema.columns, &vars))
            }
            SelectionCriterion::KBest { k } => {
                let f: Vec<f64> = (0..n_cols).map(|j| anova_f(&extended, targets, j)).collect();
                let mut order: Vec<usize> = (0..n_cols).collect();
                order.sort_by(|&a, &b| f[b].total_cmp(&f[a]).then(a.cmp(&b)));
                let mut keep: Vec<usize> = order.into_iter().take((*k).max(1)).collect();
                keep.sort_unstable();
                (keep, ranked(&schema.columns, &f))
            }
        };

        if selected.is_empty() {
            return Err(PipelineError::data(Stage::Features, "feature selection kept no columns"));
        }

        for s in scores.iter().take(10) {
            tracing::debug!("Feature score {:>10.2}  {}", s.score, s.column);
        }

        schema.selected = selected;
        schema.scores   = scores;

        tracing::info!(
            "Feature schema: {} extended columns, {} selected",
            schema.columns.len(),
            schema.selected.len(),
        );
        Ok(schema)
    }

    fn resolve(
        &self,
        feature:  &DerivedFeature,
        state:    &TransformerState,
        training: &[EncodedRecord],
    ) -> Result<ResolvedFeature> {
        let index = |source: &str| {
            state.numeric_index(source).ok_or_else(|| {
                PipelineError::Config(format!(
                    "derived feature '{}' reads '{}', which is not a numeric attribute",
                    feature.name(),
                    source,
                ))
            })
        };

        Ok(match feature {
            DerivedFeature::Bucket { name, source, edges, labels } => {
                if edges.len() < 2 || edges.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(PipelineError::Config(format!(
                        "bucket '{name}' needs at least two strictly increasing edges"
                    )));
                }
                ResolvedFeature::Bucket {
                    name:   name.clone(),
                    source: index(source)?,
                    edges:  edges.clone(),
                    labels: bucket_labels(edges, labels),
                }
            }
            DerivedFeature::QuantileBucket { name, source, quantiles, labels } => {
                let src = index(source)?;
                let mut values: Vec<f64> = training.iter().map(|r| r.numeric_raw[src]).collect();
                values.sort_by(f64::total_cmp);
                let q = (*quantiles).max(1);
                let mut edges: Vec<f64> = (0..=q).map(|i| quantile(&values, i as f64 / q as f64)).collect();
                edges.dedup();
                if edges.len() < 2 {
                    // Constant column: one bucket
                    let v = edges.first().copied().unwrap_or(0.0);
                    edges = vec![v, v + 1.0];
                }
                ResolvedFeature::Bucket {
                    name:   name.clone(),
                    source: src,
                    labels: bucket_labels(&edges, labels),
                    edges,
                }
            }
            DerivedFeature::Indicator { name, source, op, threshold } => ResolvedFeature::Indicator {
                name:      name.clone(),
                source:    index(source)?,
                op:        *op,
                threshold: *threshold,
            },
            DerivedFeature::Ratio { name, numerator, denominator, offset } => {
                let (num, den) = (index(numerator)?, index(denominator)?);
                let values: Vec<f64> = training
                    .iter()
                    .map(|r| ratio(r.numeric_raw[num], r.numeric_raw[den], *offset))
                    .collect();
                let center = mean(&values);
                let var    = values.iter().map(|v| (v - center).powi(2)).sum::<f64>() / values.len() as f64;
                let scale  = if var.sqrt() > f64::EPSILON { var.sqrt() } else { 1.0 };
                ResolvedFeature::Ratio {
                    name: name.clone(),
                    numerator: num,
                    denominator: den,
                    offset: *offset,
                    center,
                    scale,
                }
            }
        })
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Bin index for right-closed bins; values outside the edges go to the
/// first or last bin.
fn bucket_index(x: f64, edges: &[f64]) -> usize {
    let bins = edges.len() - 1;
    (0..bins).find(|&i| x <= edges[i + 1]).unwrap_or(bins - 1)
}

fn bucket_labels(edges: &[f64], labels: &[String]) -> Vec<String> {
    let bins = edges.len() - 1;
    if labels.len() == bins {
        return labels.to_vec();
    }
    edges.windows(2).map(|w| format!("({}, {}]", w[0], w[1])).collect()
}

fn ratio(numerator: f64, denominator: f64, offset: f64) -> f64 {
    let d = denominator + offset;
    if d == 0.0 { 0.0 } else { numerator / d }
}

fn column_variance(rows: &[Vec<f64>], j: usize) -> f64 {
    let n = rows.len() as f64;
    let m = rows.iter().map(|r| r[j]).sum::<f64>() / n;
    rows.iter().map(|r| (r[j] - m).powi(2)).sum::<f64>() / n
}

/// One-way ANOVA F statistic of column `j` between the two classes.
/// A column with no within-class spread scores +inf if the class means
/// differ, 0 otherwise.
fn anova_f(rows: &[Vec<f64>], targets: &[u8], j: usize) -> f64 {
    let mut n   = [0f64; 2];
    let mut sum = [0f64; 2];
    for (r, &t) in rows.iter().zip(targets) {
        n[t as usize]   += 1.0;
        sum[t as usize] += r[j];
    }
    if n[0] == 0.0 || n[1] == 0.0 {
        return 0.0;
    }
    let means = [sum[0] / n[0], sum[1] / n[1]];
    let grand = (sum[0] + sum[1]) / (n[0] + n[1]);

    let ssb: f64 = (0..2).map(|c| n[c] * (means[c] - grand).powi(2)).sum();
    let ssw: f64 = rows
        .iter()
        .zip(targets)
        .map(|(r, &t)| (r[j] - means[t as usize]).powi(2))
        .sum();

    let df_within = n[0] + n[1] - 2.0;
    if ssw <= f64::EPSILON || df_within <= 0.0 {
        return if ssb > f64::EPSILON { f64::INFINITY } else { 0.0 };
    }
    ssb / (ssw / df_within)
}

/// Pair columns with scores, highest first. Infinite scores are stored
/// as f64::MAX so the schema stays valid JSON.
fn ranked(columns: &[String], scores: &[f64]) -> Vec<FeatureScore> {
    let mut out: Vec<FeatureScore> = columns
        .iter()
        .zip(scores)
        .map(|(c, s)| FeatureScore {
            column: c.clone(),
            score:  if s.is_finite() { *s } else if *s > 0.0 { f64::MAX } else { 0.0 },
        })
        .collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out
}
