use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use extract::{ConsolidatedGraph, Node, NodeLabel, Properties, PropertyValue};

use crate::store::{GraphStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadResult {
    pub status: LoadStatus,
    pub node_count: usize,
    /// Relationships attempted, including failed ones.
    pub relationship_count: usize,
    pub failed_relationships: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadResult {
    fn empty() -> Self {
        Self {
            status: LoadStatus::Success,
            node_count: 0,
            relationship_count: 0,
            failed_relationships: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == LoadStatus::Success
    }
}

/// Idempotent upsert of a consolidated graph: constraints, then nodes, then relationships.
pub struct GraphLoader {
    store: Arc<dyn GraphStore>,
}

impl GraphLoader {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, graph: &ConsolidatedGraph) -> LoadResult {
        let mut result = LoadResult::empty();

        if let Err(e) = self.write(graph, &mut result).await {
            error!(error = %e, "Graph load failed");
            result.status = LoadStatus::Failure;
            result.error = Some(e.to_string());
            return result;
        }

        info!(
            nodes = result.node_count,
            relationships = result.relationship_count,
            failed_relationships = result.failed_relationships,
            "Graph load finished"
        );
        result
    }

    async fn write(&self, graph: &ConsolidatedGraph, result: &mut LoadResult) -> Result<(), StoreError> {
        for label in NodeLabel::ALL {
            self.store.ensure_unique_id(label).await?;
        }

        info!("Loading {} nodes", graph.nodes.len());
        for node in &graph.nodes {
            self.store
                .upsert_node(node.label, &node.id, &node_properties(node))
                .await?;
            result.node_count += 1;
        }

        info!("Linking {} relationships", graph.relationships.len());
        for rel in &graph.relationships {
            result.relationship_count += 1;

            match self
                .store
                .upsert_relationship(rel.rel_type, &rel.start_node_id, &rel.end_node_id, &rel.properties)
                .await
            {
                Ok(()) => {}
                Err(e @ StoreError::Unavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        rel_type = %rel.rel_type,
                        start = %rel.start_node_id,
                        end = %rel.end_node_id,
                        error = %e,
                        "Relationship not written"
                    );
                    result.failed_relationships += 1;
                }
            }
        }

        Ok(())
    }
}

/// Everything but `id` and `label`; `name` joins the other properties.
fn node_properties(node: &Node) -> Properties {
    let mut properties = node.properties.clone();
    if let Some(name) = &node.name {
        properties.insert("name".to_string(), PropertyValue::Text(name.clone()));
    }
    properties
}
