use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_INGEST_CONCURRENCY: usize = 16;
pub const DEFAULT_EMBEDDING_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DistanceMetric {
    L2,
    #[default]
    Cosine,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "L2",
            DistanceMetric::Cosine => "COSINE",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "L2" | "EUCLIDEAN" => Ok(DistanceMetric::L2),
            "COSINE" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unsupported distance metric: {other}")),
        }
    }
}

/// Vector attribute parameters shared by every index. The algorithm (HNSW)
/// and element type (FLOAT32) are fixed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorConfig {
    pub dimension: usize,
    pub metric: DistanceMetric,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimension: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            metric: DistanceMetric::Cosine,
        }
    }
}

/// How NUMERIC values that do not parse are handled at ingestion time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NumericMode {
    /// Unparseable input becomes `0`.
    #[default]
    Lenient,
    /// Unparseable input fails the row.
    Strict,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CoercionOptions {
    #[serde(default)]
    pub numeric: NumericMode,
    /// Strip everything but word characters, whitespace and hyphens from
    /// TEXT values.
    #[serde(default)]
    pub sanitize_text: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub coercion: CoercionOptions,
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,
    #[serde(default = "default_archive_bucket")]
    pub archive_bucket: String,
}

fn default_ingest_concurrency() -> usize {
    DEFAULT_INGEST_CONCURRENCY
}

fn default_embedding_concurrency() -> usize {
    DEFAULT_EMBEDDING_CONCURRENCY
}

fn default_archive_bucket() -> String {
    "uploads".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            vector: VectorConfig::default(),
            coercion: CoercionOptions::default(),
            ingest_concurrency: default_ingest_concurrency(),
            embedding_concurrency: default_embedding_concurrency(),
            archive_bucket: default_archive_bucket(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"vector": {"dimension": 64, "metric": "L2"}}"#)
                .expect("valid config");
        assert_eq!(config.vector.dimension, 64);
        assert_eq!(config.vector.metric, DistanceMetric::L2);
        assert_eq!(config.ingest_concurrency, DEFAULT_INGEST_CONCURRENCY);
        assert_eq!(config.coercion.numeric, NumericMode::Lenient);
    }

    #[test]
    fn metric_parses_aliases() {
        assert_eq!("euclidean".parse::<DistanceMetric>(), Ok(DistanceMetric::L2));
        assert!("dot".parse::<DistanceMetric>().is_err());
    }
}
