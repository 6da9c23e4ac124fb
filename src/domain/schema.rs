// ============================================================
// Layer 3 — Raw Attribute Schema
// ============================================================
// Describes which raw attributes a record must carry, whether
// each one is numeric or categorical, and what to do when a
// value is missing. The schema is frozen into the published
// artifact so inference validates input against exactly the
// attributes the champion was trained on.
//
// Example (census default, abridged):
//   age            numeric      missing → training median
//   hours-per-week numeric      missing → training median
//   workclass      categorical  missing → training mode
// All census attributes are required keys at inference time.
//
// Reference: Rust Book §5 (Structs), §6 (Enums)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Numeric,
    Categorical,
}

/// What a missing value becomes. Fitted defaults come from the
/// Training partition only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy", content = "value")]
pub enum MissingPolicy {
    /// Median for numeric attributes, mode for categorical ones
    Default,
    Mean,
    Median,
    MostFrequent,
    Constant(String),
    /// A missing value is a data error
    Reject,
}

impl Default for MissingPolicy {
    fn default() -> Self {
        MissingPolicy::Default
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub missing: MissingPolicy,
    /// Required attributes must be present as keys at inference time
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl AttributeSpec {
    pub fn numeric(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: AttributeKind::Numeric, missing: MissingPolicy::Default, required: true }
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: AttributeKind::Categorical, missing: MissingPolicy::Default, required: true }
    }

    pub fn with_missing(mut self, policy: MissingPolicy) -> Self {
        self.missing = policy;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Ordered attribute list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSchema {
    pub attributes: Vec<AttributeSpec>,
}

impl RawSchema {
    pub fn new(attributes: Vec<AttributeSpec>) -> Self {
        Self { attributes }
    }

    /// The census income attributes
    pub fn census() -> Self {
        let numeric = ["age", "fnlwgt", "education-num", "capital-gain", "capital-loss", "hours-per-week"];
        let categorical = [
            "workclass", "education", "marital-status", "occupation",
            "relationship", "race", "sex", "native-country",
        ];
        let mut attributes: Vec<AttributeSpec> = numeric.iter().map(|n| AttributeSpec::numeric(*n)).collect();
        attributes.extend(categorical.iter().map(|n| {
            AttributeSpec::categorical(*n).with_missing(MissingPolicy::MostFrequent)
        }));
        Self { attributes }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn numeric(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.iter().filter(|a| a.kind == AttributeKind::Numeric)
    }

    pub fn categorical(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.iter().filter(|a| a.kind == AttributeKind::Categorical)
    }

    pub fn names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }
}

impl Default for RawSchema {
    fn default() -> Self {
        Self::census()
    }
}
