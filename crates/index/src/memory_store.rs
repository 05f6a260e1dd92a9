use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use extract::{NodeLabel, Properties, PropertyValue, RelationType};

use crate::store::{
    EmbeddingCandidate, GraphStats, GraphStore, StoreError, StoreResult, VectorIndexSpec,
};

#[derive(Debug, Clone)]
struct StoredNode {
    label: NodeLabel,
    properties: Properties,
    embedding: Option<Vec<f32>>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, StoredNode>,
    /// Insertion order of node ids.
    order: Vec<String>,
    relationships: BTreeMap<(RelationType, String, String), Properties>,
    constraints: BTreeSet<NodeLabel>,
    vector_indexes: BTreeMap<String, VectorIndexSpec>,
}

/// In-process graph store with the same upsert semantics as the Neo4j one.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
    offline: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    pub async fn node_property(&self, id: &str, key: &str) -> Option<PropertyValue> {
        let inner = self.inner.read().await;
        inner.nodes.get(id)?.properties.get(key).cloned()
    }

    pub async fn embedding(&self, id: &str) -> Option<Vec<f32>> {
        let inner = self.inner.read().await;
        inner.nodes.get(id)?.embedding.clone()
    }

    pub async fn node_ids(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    pub async fn has_relationship(&self, rel_type: RelationType, start_id: &str, end_id: &str) -> bool {
        let key = (rel_type, start_id.to_string(), end_id.to_string());
        self.inner.read().await.relationships.contains_key(&key)
    }

    pub async fn constraints(&self) -> Vec<NodeLabel> {
        self.inner.read().await.constraints.iter().copied().collect()
    }

    pub async fn vector_index(&self, name: &str) -> Option<VectorIndexSpec> {
        self.inner.read().await.vector_indexes.get(name).cloned()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ensure_unique_id(&self, label: NodeLabel) -> StoreResult<()> {
        self.check_online()?;
        self.inner.write().await.constraints.insert(label);
        Ok(())
    }

    async fn upsert_node(&self, label: NodeLabel, id: &str, properties: &Properties) -> StoreResult<()> {
        self.check_online()?;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        match inner.nodes.get_mut(id) {
            Some(node) => node.properties.extend(properties.clone()),
            None => {
                inner.nodes.insert(
                    id.to_string(),
                    StoredNode {
                        label,
                        properties: properties.clone(),
                        embedding: None,
                    },
                );
                inner.order.push(id.to_string());
            }
        }
        Ok(())
    }

    async fn upsert_relationship(
        &self,
        rel_type: RelationType,
        start_id: &str,
        end_id: &str,
        properties: &Properties,
    ) -> StoreResult<()> {
        self.check_online()?;
        let mut inner = self.inner.write().await;

        if !inner.nodes.contains_key(start_id) || !inner.nodes.contains_key(end_id) {
            return Err(StoreError::MissingEndpoint {
                start: start_id.to_string(),
                end: end_id.to_string(),
            });
        }

        inner
            .relationships
            .entry((rel_type, start_id.to_string(), end_id.to_string()))
            .or_default()
            .extend(properties.clone());
        Ok(())
    }

    async fn nodes_missing_embedding(&self, label: NodeLabel) -> StoreResult<Vec<EmbeddingCandidate>> {
        self.check_online()?;
        let inner = self.inner.read().await;

        let candidates = inner
            .order
            .iter()
            .filter_map(|id| inner.nodes.get(id).map(|node| (id, node)))
            .filter(|(_, node)| node.label == label && node.embedding.is_none())
            .map(|(id, node)| EmbeddingCandidate {
                id: id.clone(),
                name: match node.properties.get("name") {
                    Some(PropertyValue::Text(name)) if !name.is_empty() => Some(name.clone()),
                    _ => None,
                },
            })
            .collect();
        Ok(candidates)
    }

    async fn set_embedding(&self, label: NodeLabel, id: &str, vector: &[f32]) -> StoreResult<()> {
        self.check_online()?;
        let mut inner = self.inner.write().await;

        match inner.nodes.get_mut(id) {
            Some(node) if node.label == label => {
                node.embedding = Some(vector.to_vec());
                Ok(())
            }
            _ => Err(StoreError::Rejected(format!("no {} node with id {}", label, id))),
        }
    }

    async fn ensure_vector_index(&self, spec: &VectorIndexSpec) -> StoreResult<()> {
        self.check_online()?;
        self.inner
            .write()
            .await
            .vector_indexes
            .entry(spec.name.clone())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    async fn stats(&self) -> StoreResult<GraphStats> {
        self.check_online()?;
        let inner = self.inner.read().await;

        let mut stats = GraphStats {
            node_count: inner.nodes.len(),
            relationship_count: inner.relationships.len(),
            embedded_count: inner.nodes.values().filter(|n| n.embedding.is_some()).count(),
            ..Default::default()
        };
        for node in inner.nodes.values() {
            *stats.nodes_by_label.entry(node.label.to_string()).or_default() += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Properties {
        let mut p = Properties::new();
        p.insert("name".into(), PropertyValue::Text(name.into()));
        p
    }

    #[tokio::test]
    async fn test_upsert_merges_properties() {
        let store = MemoryGraphStore::new();
        store.upsert_node(NodeLabel::Company, "Company_acme", &named("Acme")).await.unwrap();

        let mut more = Properties::new();
        more.insert("sector".into(), PropertyValue::Text("Tech".into()));
        store.upsert_node(NodeLabel::Company, "Company_acme", &more).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.node_count, 1);
        assert_eq!(
            store.node_property("Company_acme", "name").await,
            Some(PropertyValue::Text("Acme".into()))
        );
        assert_eq!(
            store.node_property("Company_acme", "sector").await,
            Some(PropertyValue::Text("Tech".into()))
        );
    }

    #[tokio::test]
    async fn test_relationship_needs_both_endpoints() {
        let store = MemoryGraphStore::new();
        store.upsert_node(NodeLabel::Company, "Company_acme", &named("Acme")).await.unwrap();

        let err = store
            .upsert_relationship(RelationType::HasReport, "Company_acme", "Report_x", &Properties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingEndpoint { .. }));
    }

    #[tokio::test]
    async fn test_offline_store_is_unavailable() {
        let store = MemoryGraphStore::new();
        store.set_offline(true);
        let err = store.ensure_unique_id(NodeLabel::Company).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
