pub mod backfill;
pub mod embeddings;
pub mod loader;
pub mod memory_store;
pub mod neo4j_store;
pub mod store;

pub use backfill::{BackfillConfig, BackfillReport, EmbeddingBackfill, LabelBackfill};
pub use embeddings::{Embedder, EmbeddingClient};
pub use loader::{GraphLoader, LoadResult, LoadStatus};
pub use memory_store::MemoryGraphStore;
pub use neo4j_store::{Neo4jConfig, Neo4jStore};
pub use store::{
    EmbeddingCandidate, GraphReader, GraphStats, GraphStore, Record, SimilarNode, StoreError,
    StoreResult, VectorIndexSpec,
};
