//! Graph-store seam shared by the loader, the embedding backfill and the query gateway.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use extract::{NodeLabel, Properties, RelationType};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity or driver failure; nothing further can be written.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    #[error("relationship endpoint missing: {start} -> {end}")]
    MissingEndpoint { start: String, end: String },

    /// The store refused one statement (bad query, constraint violation, ...).
    #[error("graph store rejected the statement: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One result row, column name to value.
pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes_by_label: BTreeMap<String, usize>,
    pub node_count: usize,
    pub relationship_count: usize,
    pub embedded_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorIndexSpec {
    pub name: String,
    pub label: NodeLabel,
    pub property: String,
    pub dimensions: usize,
}

impl VectorIndexSpec {
    pub fn new(name: impl Into<String>, label: NodeLabel, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            label,
            property: "embedding".to_string(),
            dimensions,
        }
    }

    /// `company_name_index` and `content_text_index`, cosine over `embedding`.
    pub fn defaults(dimensions: usize) -> Vec<Self> {
        vec![
            Self::new("company_name_index", NodeLabel::Company, dimensions),
            Self::new("content_text_index", NodeLabel::Content, dimensions),
        ]
    }
}

/// A node whose embedding is still absent.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCandidate {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarNode {
    pub id: String,
    pub name: Option<String>,
    pub score: f64,
}

/// Write side of the property graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create-if-absent uniqueness constraint on `id` for one label.
    async fn ensure_unique_id(&self, label: NodeLabel) -> StoreResult<()>;

    /// Match-or-create the node keyed by `(label, id)`, then merge `properties` into it.
    async fn upsert_node(&self, label: NodeLabel, id: &str, properties: &Properties) -> StoreResult<()>;

    /// Match both endpoints by id, whatever their label, and merge one edge between them.
    ///
    /// Fails with [`StoreError::MissingEndpoint`] when either id is absent.
    async fn upsert_relationship(
        &self,
        rel_type: RelationType,
        start_id: &str,
        end_id: &str,
        properties: &Properties,
    ) -> StoreResult<()>;

    async fn nodes_missing_embedding(&self, label: NodeLabel) -> StoreResult<Vec<EmbeddingCandidate>>;

    async fn set_embedding(&self, label: NodeLabel, id: &str, vector: &[f32]) -> StoreResult<()>;

    async fn ensure_vector_index(&self, spec: &VectorIndexSpec) -> StoreResult<()>;

    async fn stats(&self) -> StoreResult<GraphStats>;
}

/// Read side used at question time.
#[async_trait]
pub trait GraphReader: Send + Sync {
    /// Run a read-only query and return its rows in order.
    async fn read(&self, cypher: &str) -> StoreResult<Vec<Record>>;

    async fn vector_search(&self, index: &str, k: usize, vector: &[f32]) -> StoreResult<Vec<SimilarNode>>;
}
