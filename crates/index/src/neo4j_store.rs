use async_trait::async_trait;
use neo4rs::{BoltType, ConfigBuilder, Graph, Query, Txn, query};
use std::collections::HashMap;
use tracing::{debug, info};

use extract::{NodeLabel, Properties, PropertyValue, RelationType};

use crate::store::{
    EmbeddingCandidate, GraphReader, GraphStats, GraphStore, Record, SimilarNode, StoreError,
    StoreResult, VectorIndexSpec,
};

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
        }
    }
}

/// Neo4j-backed store. One connection pool per process, dropped with the store.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    /// Connect and check the server answers.
    pub async fn connect(config: &Neo4jConfig) -> StoreResult<Self> {
        let neo4j_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .build()
            .map_err(classify)?;

        let graph = Graph::connect(neo4j_config).await.map_err(classify)?;
        let store = Self { graph };
        store.run(query("RETURN 1")).await?;

        info!(uri = %config.uri, database = %config.database, "Connected to Neo4j");
        Ok(store)
    }

    async fn run(&self, q: Query) -> StoreResult<()> {
        self.graph.run(q).await.map_err(classify)
    }

    async fn count(&self, cypher: &str) -> StoreResult<usize> {
        let mut stream = self.graph.execute(query(cypher)).await.map_err(classify)?;
        let count = match stream.next().await.map_err(classify)? {
            Some(row) => row.get::<i64>("count").unwrap_or(0),
            None => 0,
        };
        Ok(count.max(0) as usize)
    }
}

/// Connectivity problems abort a whole stage; anything else is local to one statement.
fn classify(e: neo4rs::Error) -> StoreError {
    match e {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError { .. } => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Rejected(other.to_string()),
    }
}

fn to_bolt(properties: &Properties) -> HashMap<String, BoltType> {
    properties
        .iter()
        .map(|(key, value)| {
            let bolt: BoltType = match value {
                PropertyValue::Bool(b) => (*b).into(),
                PropertyValue::Int(i) => (*i).into(),
                PropertyValue::Float(f) => (*f).into(),
                PropertyValue::Text(s) => s.clone().into(),
            };
            (key.clone(), bolt)
        })
        .collect()
}

async fn collect_records(txn: &mut Txn, cypher: &str) -> StoreResult<Vec<Record>> {
    let mut records = Vec::new();
    let mut stream = txn.execute(query(cypher)).await.map_err(classify)?;

    while let Some(row) = stream.next(txn.handle()).await.map_err(classify)? {
        let record = row
            .to::<Record>()
            .map_err(|e| StoreError::Rejected(format!("unreadable row: {}", e)))?;
        records.push(record);
    }

    Ok(records)
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_unique_id(&self, label: NodeLabel) -> StoreResult<()> {
        let cypher = format!(
            "CREATE CONSTRAINT {}_id_unique IF NOT EXISTS FOR (n:`{}`) REQUIRE n.id IS UNIQUE",
            label.as_str().to_lowercase(),
            label
        );
        self.run(query(&cypher)).await
    }

    async fn upsert_node(&self, label: NodeLabel, id: &str, properties: &Properties) -> StoreResult<()> {
        let cypher = format!("MERGE (n:`{}` {{id: $id}}) SET n += $props", label);
        let q = query(&cypher)
            .param("id", id)
            .param("props", to_bolt(properties));
        self.run(q).await
    }

    async fn upsert_relationship(
        &self,
        rel_type: RelationType,
        start_id: &str,
        end_id: &str,
        properties: &Properties,
    ) -> StoreResult<()> {
        let cypher = format!(
            "MATCH (a {{id: $start_id}}), (b {{id: $end_id}})
             MERGE (a)-[r:`{}`]->(b)
             SET r += $props
             RETURN count(r) AS merged",
            rel_type
        );
        let q = query(&cypher)
            .param("start_id", start_id)
            .param("end_id", end_id)
            .param("props", to_bolt(properties));

        let mut stream = self.graph.execute(q).await.map_err(classify)?;
        let merged = match stream.next().await.map_err(classify)? {
            Some(row) => row.get::<i64>("merged").unwrap_or(0),
            None => 0,
        };

        if merged == 0 {
            return Err(StoreError::MissingEndpoint {
                start: start_id.to_string(),
                end: end_id.to_string(),
            });
        }
        Ok(())
    }

    async fn nodes_missing_embedding(&self, label: NodeLabel) -> StoreResult<Vec<EmbeddingCandidate>> {
        let cypher = format!(
            "MATCH (n:`{}`) WHERE n.embedding IS NULL RETURN n.id AS id, n.name AS name",
            label
        );

        let mut candidates = Vec::new();
        let mut stream = self.graph.execute(query(&cypher)).await.map_err(classify)?;
        while let Some(row) = stream.next().await.map_err(classify)? {
            let id: String = row.get("id").unwrap_or_default();
            let name: String = row.get("name").unwrap_or_default();
            if !id.is_empty() {
                candidates.push(EmbeddingCandidate {
                    id,
                    name: Some(name).filter(|n| !n.is_empty()),
                });
            }
        }

        debug!(%label, missing = candidates.len(), "Scanned for missing embeddings");
        Ok(candidates)
    }

    async fn set_embedding(&self, label: NodeLabel, id: &str, vector: &[f32]) -> StoreResult<()> {
        let cypher = format!(
            "MATCH (n:`{}` {{id: $id}}) CALL db.create.setNodeVectorProperty(n, 'embedding', $vector)",
            label
        );
        let vector: Vec<f64> = vector.iter().map(|v| *v as f64).collect();
        self.run(query(&cypher).param("id", id).param("vector", vector)).await
    }

    async fn ensure_vector_index(&self, spec: &VectorIndexSpec) -> StoreResult<()> {
        let cypher = format!(
            "CREATE VECTOR INDEX {} IF NOT EXISTS
             FOR (n:`{}`) ON (n.{})
             OPTIONS {{indexConfig: {{
                 `vector.dimensions`: {},
                 `vector.similarity_function`: 'cosine'
             }}}}",
            spec.name, spec.label, spec.property, spec.dimensions
        );
        self.run(query(&cypher)).await
    }

    async fn stats(&self) -> StoreResult<GraphStats> {
        let mut stats = GraphStats::default();

        let mut stream = self
            .graph
            .execute(query("MATCH (n) UNWIND labels(n) AS label RETURN label, count(*) AS count"))
            .await
            .map_err(classify)?;
        while let Some(row) = stream.next().await.map_err(classify)? {
            let label: String = row.get("label").unwrap_or_default();
            let count = row.get::<i64>("count").unwrap_or(0).max(0) as usize;
            stats.nodes_by_label.insert(label, count);
        }

        stats.node_count = self.count("MATCH (n) RETURN count(n) AS count").await?;
        stats.relationship_count = self.count("MATCH ()-[r]->() RETURN count(r) AS count").await?;
        stats.embedded_count = self
            .count("MATCH (n) WHERE n.embedding IS NOT NULL RETURN count(n) AS count")
            .await?;

        Ok(stats)
    }
}

#[async_trait]
impl GraphReader for Neo4jStore {
    /// Runs `cypher` in an explicit transaction that is always rolled back,
    /// so nothing a read statement writes is ever persisted.
    async fn read(&self, cypher: &str) -> StoreResult<Vec<Record>> {
        let mut txn = self.graph.start_txn().await.map_err(classify)?;
        let collected = collect_records(&mut txn, cypher).await;
        let rolled_back = txn.rollback().await.map_err(classify);

        let records = collected?;
        rolled_back?;
        Ok(records)
    }

    async fn vector_search(&self, index: &str, k: usize, vector: &[f32]) -> StoreResult<Vec<SimilarNode>> {
        let vector: Vec<f64> = vector.iter().map(|v| *v as f64).collect();
        let q = query(
            "CALL db.index.vector.queryNodes($index, $k, $vector)
             YIELD node, score
             RETURN node.id AS id, node.name AS name, score",
        )
        .param("index", index)
        .param("k", k as i64)
        .param("vector", vector);

        let mut hits = Vec::new();
        let mut stream = self.graph.execute(q).await.map_err(classify)?;
        while let Some(row) = stream.next().await.map_err(classify)? {
            let name: String = row.get("name").unwrap_or_default();
            hits.push(SimilarNode {
                id: row.get("id").unwrap_or_default(),
                name: Some(name).filter(|n| !n.is_empty()),
                score: row.get("score").unwrap_or(0.0),
            });
        }

        Ok(hits)
    }
}
