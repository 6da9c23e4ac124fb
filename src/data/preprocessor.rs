// ============================================================
// Layer 4 — Encoder / Scaler Store
// ============================================================
// Turns raw records into numbers, and remembers exactly how.
//
//   fit(training rows)          → TransformerState (frozen)
//   transform(record, &state)   → EncodedRecord
//
// Fitting reads the Training partition only (it takes a
// TrainingView, which only the splitter can hand out).
//
// Numeric attributes, in order:
//   1. impute missing values  (median / mean / mode / constant)
//   2. clip outliers           (IQR or z-score bounds, optional)
//   3. scale                   (standard, min-max, or none)
//
// Categorical attributes:
//   1. impute missing values  (mode or constant)
//   2. map category → code    (lexical order, 1..=n)
//   3. anything not in the map → UNKNOWN_CODE (0)
//
// Code assignment depends only on the set of categories seen in
// training, never on row order or hash order, so two fits over
// the same data produce identical maps.
//
// Reference: scikit-learn StandardScaler / SimpleImputer semantics
//            Rust Book §8 (Hash Maps), §13 (Iterators)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::splitter::TrainingView;
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{RawValue, Record};
use crate::domain::schema::{AttributeKind, AttributeSpec, MissingPolicy, RawSchema};

/// Code reserved for categories absent from the training data
pub const UNKNOWN_CODE: u32 = 0;

/// Display name of the unknown bucket
pub const UNKNOWN_LABEL: &str = "<unknown>";

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMethod {
    /// (x - mean) / std, population std
    Standard,
    /// (x - min) / (max - min)
    MinMax,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum OutlierPolicy {
    None,
    /// Clip to [Q1 - factor·IQR, Q3 + factor·IQR]
    Iqr { factor: f64 },
    /// Clip to mean ± factor·std (sample std)
    ZScore { factor: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalEncoding {
    /// One column per known category plus one for unknown
    OneHot,
    /// A single column holding the integer code
    Ordinal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub categorical:            CategoricalEncoding,
    pub scaling:                ScalingMethod,
    pub outliers:               OutlierPolicy,
    /// Categories seen fewer times than this in training map to unknown
    pub min_category_frequency: usize,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            categorical:            CategoricalEncoding::OneHot,
            scaling:                ScalingMethod::Standard,
            outliers:               OutlierPolicy::Iqr { factor: 1.5 },
            min_category_frequency: 1,
        }
    }
}

// ─── EncodingMap ──────────────────────────────────────────────────────────────

/// Append-only collector used while fitting. Freezing it is the only
/// way to get an EncodingMap.
#[derive(Debug, Default)]
pub struct EncodingMapBuilder {
    counts: BTreeMap<String, usize>,
}

impl EncodingMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, category: &str) {
        *self.counts.entry(category.to_string()).or_insert(0) += 1;
    }

    /// Assign codes 1..=n in lexical order to every category seen at
    /// least `min_frequency` times.
    pub fn freeze(self, min_frequency: usize) -> EncodingMap {
        let mut codes       = BTreeMap::new();
        let mut frequencies = BTreeMap::new();
        let mut next        = UNKNOWN_CODE + 1;
        for (category, count) in self.counts {
            if count >= min_frequency.max(1) {
                codes.insert(category.clone(), next);
                frequencies.insert(category, count);
                next += 1;
            }
        }
        EncodingMap { codes, frequencies }
    }
}

/// Frozen category → code table with an unknown fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingMap {
    codes:       BTreeMap<String, u32>,
    frequencies: BTreeMap<String, usize>,
}

impl EncodingMap {
    /// Code for a category; unseen categories get UNKNOWN_CODE
    pub fn code(&self, category: &str) -> u32 {
        self.codes.get(category).copied().unwrap_or(UNKNOWN_CODE)
    }

    /// Number of codes including the unknown code
    pub fn cardinality(&self) -> usize {
        self.codes.len() + 1
    }

    /// Known categories ordered by code
    pub fn categories(&self) -> Vec<(&str, u32)> {
        let mut v: Vec<(&str, u32)> = self.codes.iter().map(|(k, c)| (k.as_str(), *c)).collect();
        v.sort_by_key(|(_, c)| *c);
        v
    }

    /// Training frequency of a known category
    pub fn frequency(&self, category: &str) -> Option<usize> {
        self.frequencies.get(category).copied()
    }

    /// Category text for a code (UNKNOWN_LABEL for the unknown code)
    pub fn label(&self, code: u32) -> &str {
        self.codes
            .iter()
            .find(|(_, c)| **c == code)
            .map(|(k, _)| k.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }
}

// ─── ScalingParams ────────────────────────────────────────────────────────────

/// Frozen normalisation for one numeric attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingParams {
    pub method: ScalingMethod,
    pub center: f64,
    pub scale:  f64,
    /// Outlier clipping bounds fitted on training
    pub clip:   Option<(f64, f64)>,
}

impl ScalingParams {
    pub fn apply(&self, x: f64) -> f64 {
        let x = match self.clip {
            Some((lo, hi)) => x.clamp(lo, hi),
            None           => x,
        };
        (x - self.center) / self.scale
    }
}

// ─── Fitted state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericState {
    /// Value substituted for missing entries
    pub imputed: f64,
    pub scaling: ScalingParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalState {
    /// Category substituted for missing entries
    pub imputed:  String,
    pub encoding: EncodingMap,
}

/// Everything learnt from training that inference must reproduce.
/// Owned and immutable; passed by reference to training and serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerState {
    pub schema:      RawSchema,
    pub numeric:     BTreeMap<String, NumericState>,
    pub categorical: BTreeMap<String, CategoricalState>,
}

/// Base numeric representation of one record, in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    /// Imputed numeric values before clipping/scaling
    pub numeric_raw:    Vec<f64>,
    pub numeric_scaled: Vec<f64>,
    pub codes:          Vec<u32>,
}

impl TransformerState {
    /// Per-attribute encoding maps, in schema order
    pub fn encoding_maps(&self) -> Vec<(&str, &EncodingMap)> {
        self.schema
            .categorical()
            .filter_map(|a| self.categorical.get(&a.name).map(|s| (a.name.as_str(), &s.encoding)))
            .collect()
    }

    /// Per-attribute scaling parameters, in schema order
    pub fn scaling_params(&self) -> Vec<(&str, &ScalingParams)> {
        self.schema
            .numeric()
            .filter_map(|a| self.numeric.get(&a.name).map(|s| (a.name.as_str(), &s.scaling)))
            .collect()
    }

    /// Position of a numeric attribute in `EncodedRecord::numeric_*`
    pub fn numeric_index(&self, name: &str) -> Option<usize> {
        self.schema.numeric().position(|a| a.name == name)
    }

    /// Encode one record. The record is only read.
    ///
    /// # Errors
    /// SchemaMismatch when a required attribute key is absent or a numeric
    /// attribute holds text; SchemaMismatch for a missing value under the
    /// `reject` policy.
    pub fn transform(&self, record: &Record) -> Result<EncodedRecord> {
        let mut numeric_raw    = Vec::new();
        let mut numeric_scaled = Vec::new();
        let mut codes          = Vec::new();

        for spec in &self.schema.attributes {
            let value = match record.get(&spec.name) {
                Some(v) => v,
                None if spec.required => {
                    return Err(PipelineError::schema(&spec.name, "required attribute is missing"));
                }
                None => &RawValue::Missing,
            };
            if value.is_missing() && spec.missing == MissingPolicy::Reject {
                return Err(PipelineError::schema(&spec.name, "missing value is not allowed"));
            }

            match spec.kind {
                AttributeKind::Numeric => {
                    let state = self.numeric_state(&spec.name)?;
                    let raw = match value {
                        RawValue::Number(x) => *x,
                        RawValue::Missing   => state.imputed,
                        RawValue::Text(t)   => {
                            return Err(PipelineError::schema(
                                &spec.name,
                                format!("expected a number, got '{t}'"),
                            ));
                        }
                    };
                    numeric_raw.push(raw);
                    numeric_scaled.push(state.scaling.apply(raw));
                }
                AttributeKind::Categorical => {
                    let state = self.categorical_state(&spec.name)?;
                    let code = match category_text(value) {
                        Some(c) => state.encoding.code(&c),
                        None    => state.encoding.code(&state.imputed),
                    };
                    codes.push(code);
                }
            }
        }

        Ok(EncodedRecord { numeric_raw, numeric_scaled, codes })
    }

    fn numeric_state(&self, name: &str) -> Result<&NumericState> {
        self.numeric
            .get(name)
            .ok_or_else(|| PipelineError::schema(name, "no fitted numeric state"))
    }

    fn categorical_state(&self, name: &str) -> Result<&CategoricalState> {
        self.categorical
            .get(name)
            .ok_or_else(|| PipelineError::schema(name, "no fitted encoding map"))
    }
}

/// Free-function form of `TransformerState::transform`
pub fn transform(record: &Record, state: &TransformerState) -> Result<EncodedRecord> {
    state.transform(record)
}

/// Text form of a categorical cell. Numeric-looking categories keep
/// an integer rendering ("1", not "1.0").
fn category_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Text(t)   => Some(t.clone()),
        RawValue::Number(n) if n.fract() == 0.0 => Some(format!("{n:.0}")),
        RawValue::Number(n) => Some(n.to_string()),
        RawValue::Missing   => None,
    }
}

// ─── Preprocessor (fitting) ───────────────────────────────────────────────────

pub struct Preprocessor {
    schema: RawSchema,
    config: EncodingConfig,
}

impl Preprocessor {
    pub fn new(schema: RawSchema, config: EncodingConfig) -> Self {
        Self { schema, config }
    }

    /// Fit imputation defaults, clipping bounds, scaling parameters and
    /// encoding maps from the training rows.
    pub fn fit(&self, training: TrainingView<'_>) -> Result<TransformerState> {
        if training.is_empty() {
            return Err(PipelineError::data(Stage::Encode, "training partition is empty"));
        }

        let mut numeric     = BTreeMap::new();
        let mut categorical = BTreeMap::new();

        for spec in &self.schema.attributes {
            match spec.kind {
                AttributeKind::Numeric => {
                    let state = self.fit_numeric(spec, training)?;
                    tracing::debug!(
                        "Numeric '{}': imputed={:.4} center={:.4} scale={:.4} clip={:?}",
                        spec.name, state.imputed, state.scaling.center, state.scaling.scale, state.scaling.clip,
                    );
                    numeric.insert(spec.name.clone(), state);
                }
                AttributeKind::Categorical => {
                    let state = self.fit_categorical(spec, training)?;
                    tracing::debug!(
                        "Categorical '{}': {} known categories, imputed='{}'",
                        spec.name,
                        state.encoding.cardinality() - 1,
                        state.imputed,
                    );
                    categorical.insert(spec.name.clone(), state);
                }
            }
        }

        tracing::info!(
            "Fitted encoder/scaler store: {} numeric, {} categorical attributes on {} rows",
            numeric.len(),
            categorical.len(),
            training.len(),
        );

        Ok(TransformerState { schema: self.schema.clone(), numeric, categorical })
    }

    fn fit_numeric(&self, spec: &AttributeSpec, training: TrainingView<'_>) -> Result<NumericState> {
        let mut observed = Vec::with_capacity(training.len());
        let mut missing  = 0usize;

        for (row, id) in training.iter().zip(training.row_ids()) {
            match row.record.get(&spec.name).unwrap_or(&RawValue::Missing) {
                RawValue::Number(x) => observed.push(*x),
                RawValue::Missing   => missing += 1,
                RawValue::Text(t)   => {
                    return Err(PipelineError::data_at(
                        Stage::Encode,
                        Some(*id),
                        &spec.name,
                        format!("expected a number, got '{t}'"),
                    ));
                }
            }
        }

        if observed.is_empty() {
            return Err(PipelineError::data_at(
                Stage::Encode,
                None,
                &spec.name,
                "no observed values in the training partition",
            ));
        }

        observed.sort_by(f64::total_cmp);
        let imputed = match &spec.missing {
            MissingPolicy::Default | MissingPolicy::Median | MissingPolicy::Reject => quantile(&observed, 0.5),
            MissingPolicy::Mean         => mean(&observed),
            MissingPolicy::MostFrequent => numeric_mode(&observed),
            MissingPolicy::Constant(v)  => v.trim().parse::<f64>().map_err(|_| {
                PipelineError::Config(format!("constant '{v}' for numeric attribute '{}' is not a number", spec.name))
            })?,
        };

        // Statistics are taken after imputation, as a fitted imputer
        // followed by a fitted scaler would see them.
        let mut filled = observed;
        filled.extend(std::iter::repeat(imputed).take(missing));
        filled.sort_by(f64::total_cmp);

        let clip = match self.config.outliers {
            OutlierPolicy::None => None,
            OutlierPolicy::Iqr { factor } => {
                let q1  = quantile(&filled, 0.25);
                let q3  = quantile(&filled, 0.75);
                let iqr = q3 - q1;
                Some((q1 - factor * iqr, q3 + factor * iqr))
            }
            OutlierPolicy::ZScore { factor } => {
                let m = mean(&filled);
                let s = sample_std(&filled, m);
                Some((m - factor * s, m + factor * s))
            }
        };

        let clipped: Vec<f64> = match clip {
            Some((lo, hi)) => filled.iter().map(|x| x.clamp(lo, hi)).collect(),
            None           => filled,
        };

        let (center, scale) = match self.config.scaling {
            ScalingMethod::Standard => {
                let m = mean(&clipped);
                (m, non_zero(population_std(&clipped, m)))
            }
            ScalingMethod::MinMax => {
                let lo = clipped.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = clipped.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (lo, non_zero(hi - lo))
            }
            ScalingMethod::None => (0.0, 1.0),
        };

        Ok(NumericState {
            imputed,
            scaling: ScalingParams { method: self.config.scaling, center, scale, clip },
        })
    }

    fn fit_categorical(&self, spec: &AttributeSpec, training: TrainingView<'_>) -> Result<CategoricalState> {
        let mut builder = EncodingMapBuilder::new();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();

        for row in training.iter() {
            if let Some(c) = category_text(row.record.get(&spec.name).unwrap_or(&RawValue::Missing)) {
                builder.observe(&c);
                *counts.entry(c).or_insert(0) += 1;
            }
        }

        let imputed = match &spec.missing {
            MissingPolicy::Constant(v) => v.clone(),
            _ => {
                // Mode; ties go to the lexically smallest category
                let mut best: Option<(&String, usize)> = None;
                for (k, &n) in &counts {
                    if best.map_or(true, |(_, b)| n > b) {
                        best = Some((k, n));
                    }
                }
                match best {
                    Some((k, _)) => k.clone(),
                    None => {
                        return Err(PipelineError::data_at(
                            Stage::Encode,
                            None,
                            &spec.name,
                            "no observed categories in the training partition",
                        ));
                    }
                }
            }
        };

        Ok(CategoricalState {
            imputed,
            encoding: builder.freeze(self.config.min_category_frequency),
        })
    }
}

// ─── Statistics helpers ───────────────────────────────────────────────────────

/// Linear-interpolation quantile over sorted values
pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos  = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo   = pos.floor() as usize;
    let hi   = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len().max(1) as f64;
    var.sqrt()
}

fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Most frequent value of a sorted slice; ties go to the smallest
fn numeric_mode(sorted: &[f64]) -> f64 {
    let mut best     = sorted[0];
    let mut best_n   = 0usize;
    let mut i        = 0usize;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > best_n {
            best   = sorted[i];
            best_n = j - i;
        }
        i = j;
    }
    best
}

fn non_zero(scale: f64) -> f64 {
    if scale.abs() < f64::EPSILON || !scale.is_finite() { 1.0 } else { scale }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::splitter::split;
    use crate::domain::record::{Dataset, Label};
    use crate::domain::schema::AttributeSpec;
    use proptest::prelude::*;

    fn small_schema() -> RawSchema {
        RawSchema::new(vec![
            AttributeSpec::numeric("age"),
            AttributeSpec::categorical("workclass"),
            AttributeSpec::numeric("hours_per_week"),
        ])
    }

    fn small_dataset() -> Dataset {
        let rows = [
            (39.0, "Private", 40.0, Label::Negative),
            (52.0, "Self-emp", 60.0, Label::Positive),
            (28.0, "Private", 38.0, Label::Negative),
            (45.0, "Federal-gov", 50.0, Label::Positive),
            (23.0, "Private", 20.0, Label::Negative),
            (61.0, "Self-emp", 45.0, Label::Positive),
            (33.0, "Local-gov", 40.0, Label::Negative),
            (48.0, "Private", 55.0, Label::Positive),
            (19.0, "Private", 15.0, Label::Negative),
            (57.0, "Federal-gov", 42.0, Label::Positive),
        ];
        let mut ds = Dataset::default();
        for (age, wc, hours, label) in rows {
            ds.push(
                Record::new().with("age", age).with("workclass", wc).with("hours_per_week", hours),
                Some(label),
            );
        }
        ds
    }

    fn fitted() -> (Dataset, TransformerState) {
        let ds    = small_dataset();
        let s     = split(&ds, 0.2, 42).unwrap();
        let state = Preprocessor::new(small_schema(), EncodingConfig::default())
            .fit(s.training_view(&ds))
            .unwrap();
        (ds, state)
    }

    #[test]
    fn test_codes_are_lexical_and_start_after_unknown() {
        let mut b = EncodingMapBuilder::new();
        for c in ["b", "a", "c", "a"] {
            b.observe(c);
        }
        let map = b.freeze(1);
        assert_eq!(map.code("a"), 1);
        assert_eq!(map.code("b"), 2);
        assert_eq!(map.code("c"), 3);
        assert_eq!(map.code("zzz"), UNKNOWN_CODE);
        assert_eq!(map.cardinality(), 4);
        assert_eq!(map.frequency("a"), Some(2));
        assert_eq!(map.label(UNKNOWN_CODE), UNKNOWN_LABEL);
    }

    #[test]
    fn test_rare_categories_fall_to_unknown() {
        let mut b = EncodingMapBuilder::new();
        for c in ["x", "x", "y"] {
            b.observe(c);
        }
        let map = b.freeze(2);
        assert_eq!(map.code("x"), 1);
        assert_eq!(map.code("y"), UNKNOWN_CODE);
    }

    #[test]
    fn test_quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&v, 0.0), 1.0);
        assert_eq!(quantile(&v, 1.0), 4.0);
        assert!((quantile(&v, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile(&v, 0.25) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_unseen_category_maps_to_unknown() {
        let (_, state) = fitted();
        let r = Record::new()
            .with("age", 30.0)
            .with("workclass", "Never-worked-here")
            .with("hours_per_week", 40.0);
        let enc = state.transform(&r).unwrap();
        assert_eq!(enc.codes, vec![UNKNOWN_CODE]);
    }

    #[test]
    fn test_missing_values_are_imputed() {
        let (_, state) = fitted();
        let r = Record::new()
            .with("age", RawValue::Missing)
            .with("workclass", RawValue::Missing)
            .with("hours_per_week", 40.0);
        let enc = state.transform(&r).unwrap();
        assert_eq!(enc.numeric_raw[0], state.numeric["age"].imputed);
        let wc = &state.categorical["workclass"];
        assert_eq!(enc.codes[0], wc.encoding.code(&wc.imputed));
        assert_ne!(enc.codes[0], UNKNOWN_CODE);
    }

    #[test]
    fn test_missing_required_key_is_schema_mismatch() {
        let (_, state) = fitted();
        let r = Record::new().with("age", 30.0).with("workclass", "Private");
        let err = state.transform(&r).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { ref attribute, .. } if attribute == "hours_per_week"));
    }

    #[test]
    fn test_text_in_numeric_is_schema_mismatch() {
        let (_, state) = fitted();
        let r = Record::new().with("age", "old").with("workclass", "Private").with("hours_per_week", 40.0);
        assert!(matches!(state.transform(&r), Err(PipelineError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_fit_uses_training_rows_only() {
        let ds = small_dataset();
        let s  = split(&ds, 0.2, 42).unwrap();
        let state = Preprocessor::new(
            small_schema(),
            EncodingConfig { outliers: OutlierPolicy::None, ..EncodingConfig::default() },
        )
        .fit(s.training_view(&ds))
        .unwrap();

        let train_ages: Vec<f64> = s
            .training
            .rows
            .iter()
            .map(|&id| match ds.row(id).unwrap().record.get("age") {
                Some(RawValue::Number(a)) => *a,
                _ => unreachable!(),
            })
            .collect();
        let expected = train_ages.iter().sum::<f64>() / train_ages.len() as f64;
        assert!((state.numeric["age"].scaling.center - expected).abs() < 1e-9);
    }

    #[test]
    fn test_standard_scaling_of_constant_column() {
        let mut ds = Dataset::default();
        for i in 0..6 {
            let label = if i % 2 == 0 { Label::Negative } else { Label::Positive };
            ds.push(Record::new().with("x", 5.0), Some(label));
        }
        let s = split(&ds, 0.34, 1).unwrap();
        let state = Preprocessor::new(RawSchema::new(vec![AttributeSpec::numeric("x")]), EncodingConfig::default())
            .fit(s.training_view(&ds))
            .unwrap();
        assert_eq!(state.numeric["x"].scaling.scale, 1.0);
        let enc = state.transform(&Record::new().with("x", 5.0)).unwrap();
        assert_eq!(enc.numeric_scaled, vec![0.0]);
    }

    #[test]
    fn test_state_survives_json_bit_for_bit() {
        let (ds, state) = fitted();
        let json   = serde_json::to_string(&state).unwrap();
        let loaded: TransformerState = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, state);
        for row in ds.rows() {
            assert_eq!(loaded.transform(&row.record).unwrap(), state.transform(&row.record).unwrap());
        }
    }

    proptest! {
        #[test]
        fn prop_transform_is_deterministic(age in 0.0f64..120.0, hours in 0.0f64..100.0, wc in "[A-Za-z-]{1,12}") {
            let (_, state) = fitted();
            let r = Record::new().with("age", age).with("workclass", wc.as_str()).with("hours_per_week", hours);
            let a = state.transform(&r).unwrap();
            let b = state.transform(&r).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_unknown_categories_never_fail(wc in "zz[a-z]{1,10}") {
            let (_, state) = fitted();
            let r = Record::new().with("age", 40.0).with("workclass", wc.as_str()).with("hours_per_week", 40.0);
            let enc = state.transform(&r).unwrap();
            prop_assert_eq!(enc.codes[0], UNKNOWN_CODE);
        }
    }
}
