use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Scalar metadata value. Integers and floats compare numerically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    pub fn matches(&self, other: &MetaValue) -> bool {
        match (self, other) {
            (MetaValue::Int(a), MetaValue::Float(b)) | (MetaValue::Float(b), MetaValue::Int(a)) => {
                (*a as f64) == *b
            }
            (a, b) => a == b,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

pub type Metadata = BTreeMap<String, MetaValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: u32,
    pub text: String,
    pub text_sha256: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_uri: String,
    pub chunks: Vec<Chunk>,
}

/// Metadata equality constraints. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeFilter {
    #[serde(default)]
    pub constraints: BTreeMap<String, MetaValue>,
}

impl ScopeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.constraints
            .iter()
            .all(|(k, want)| metadata.get(k).map(|have| have.matches(want)).unwrap_or(false))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// distance = 1 - cos(a, b), in [0, 2].
    Cosine,
    /// distance = -dot(a, b).
    InnerProduct,
}

impl Metric {
    /// Monotonically decreasing map from distance to [0, 1].
    pub fn relevance(&self, distance: f32) -> f64 {
        let d = distance as f64;
        if !d.is_finite() {
            return 0.0;
        }
        let r = match self {
            Metric::Cosine => 1.0 / (1.0 + d.max(0.0)),
            Metric::InnerProduct => 1.0 / (1.0 + d.exp()),
        };
        r.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Arc<Chunk>,
    pub source_uri: String,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub source_uri: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub chunk_count: usize,
    pub replaced_chunks: usize,
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filter_requires_every_constraint() {
        let mut meta = Metadata::new();
        meta.insert("region".to_string(), MetaValue::from("north"));
        meta.insert("year".to_string(), MetaValue::Int(2024));

        assert!(ScopeFilter::new().matches(&meta));
        assert!(ScopeFilter::new().with("region", "north").matches(&meta));
        assert!(ScopeFilter::new().with("year", 2024.0).matches(&meta));
        assert!(!ScopeFilter::new().with("region", "north").with("year", 2023i64).matches(&meta));
        assert!(!ScopeFilter::new().with("missing", true).matches(&meta));
    }

    #[test]
    fn relevance_decreases_with_distance() {
        for metric in [Metric::Cosine, Metric::InnerProduct] {
            let near = metric.relevance(-0.5);
            let mid = metric.relevance(0.2);
            let far = metric.relevance(1.5);
            assert!(near >= mid && mid > far, "{metric:?}");
            assert!((0.0..=1.0).contains(&near) && (0.0..=1.0).contains(&far));
        }
        assert_eq!(Metric::Cosine.relevance(0.0), 1.0);
        assert_eq!(Metric::InnerProduct.relevance(f32::NAN), 0.0);
    }

    #[test]
    fn metadata_deserializes_scalars() {
        let m: Metadata = serde_json::from_str(r#"{"a": 1, "b": 1.5, "c": "x", "d": false}"#).unwrap();
        assert_eq!(m["a"], MetaValue::Int(1));
        assert_eq!(m["b"], MetaValue::Float(1.5));
        assert_eq!(m["c"], MetaValue::Text("x".to_string()));
        assert_eq!(m["d"], MetaValue::Bool(false));
    }
}
