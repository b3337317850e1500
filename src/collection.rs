//! Collection domain types. A collection is a named, indexed bucket of
//! documents sharing a vector dimension and distance metric; the name
//! `"default"` is guaranteed to exist once a store has been opened.

use serde::{Deserialize, Serialize};

use crate::config::defaults;

pub const DEFAULT_COLLECTION: &str = defaults::COLLECTION;
pub const DEFAULT_DIMENSIONS: usize = defaults::VECTOR_DIMENSIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    L2,
    Dot,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

impl DistanceMetric {
    /// The `distance_metric=` value accepted by a `vec0` virtual table
    /// column constraint.
    pub fn as_vec0_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::Dot => "dot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Enabled,
    Disabled,
    Pending,
}

impl Default for EmbeddingStatus {
    fn default() -> Self {
        EmbeddingStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Idle,
    Processing,
    Error,
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        ProcessingStatus::Idle
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub dimensions: usize,
    pub distance_metric: DistanceMetric,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            dimensions: DEFAULT_DIMENSIONS,
            distance_metric: DistanceMetric::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: Option<String>,
    pub dimensions: usize,
    pub status: EmbeddingStatus,
    pub processing_status: ProcessingStatus,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: None,
            dimensions: DEFAULT_DIMENSIONS,
            status: EmbeddingStatus::default(),
            processing_status: ProcessingStatus::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub schema_version: i64,
    pub config: CollectionConfig,
    pub embedding: EmbeddingConfig,
}

impl Collection {
    pub fn new(name: impl Into<String>, config: CollectionConfig, schema_version: i64) -> Self {
        let now = chrono::Utc::now();
        let dims = config.dimensions;
        Collection {
            name: name.into(),
            created_at: now,
            updated_at: now,
            schema_version,
            config,
            embedding: EmbeddingConfig {
                dimensions: dims,
                ..EmbeddingConfig::default()
            },
        }
    }

    /// The name of the `vec0` virtual table backing this collection's
    /// vectors. Dimension, not collection name, is the table discriminator
    /// (see `schema` module) — collections sharing a dimension share a table
    /// and are distinguished downstream by the `collection` column join.
    pub fn vector_table_name(&self) -> String {
        vector_table_name_for_dimensions(self.config.dimensions)
    }
}

pub fn vector_table_name_for_dimensions(dimensions: usize) -> String {
    if dimensions == DEFAULT_DIMENSIONS {
        "documents_vec".to_string()
    } else {
        format!("documents_vec_{dimensions}")
    }
}

/// Returned by `Store::list_collections` / `Store::get_collection_info`,
/// enriched with a live document count beyond the stored `Collection` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    #[serde(flatten)]
    pub collection: Collection,
    pub document_count: i64,
}
