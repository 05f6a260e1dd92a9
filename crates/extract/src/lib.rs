pub mod checkpoint;
pub mod graph;
pub mod llm;
pub mod merge;
pub mod normalizer;
pub mod pipeline;
pub mod prompt;
pub mod schema;

pub use checkpoint::Checkpoint;
pub use graph::{ConsolidatedGraph, Node, Relationship};
pub use llm::{OllamaClient, StructuredExtractor};
pub use merge::merge_graphs;
pub use normalizer::normalize_id;
pub use pipeline::{BatchOutcome, ExtractionPipeline, PipelineConfig, PipelineReport};
pub use schema::{
    NodeLabel, PartialGraph, PartialNode, PartialRelationship, Properties, PropertyValue,
    QuarantinedRecord, RecordKind, RelationType, ValidatedPartial, validate_partial,
};
