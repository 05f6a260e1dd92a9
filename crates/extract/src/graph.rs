use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::schema::{NodeLabel, Properties, RelationType};

/// Node keyed by its normalized id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: NodeLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub properties: Properties,
}

/// Directed edge, identified by `(rel_type, start_node_id, end_node_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub rel_type: RelationType,
    pub start_node_id: String,
    pub end_node_id: String,
    #[serde(flatten)]
    pub properties: Properties,
}

impl Relationship {
    pub fn key(&self) -> (RelationType, &str, &str) {
        (self.rel_type, &self.start_node_id, &self.end_node_id)
    }
}

/// The merged, deduplicated graph handed from extraction to loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl ConsolidatedGraph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Relationships whose endpoints are not among this graph's nodes.
    pub fn dangling_relationships(&self) -> impl Iterator<Item = &Relationship> {
        let ids: std::collections::HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.relationships.iter().filter(move |r| {
            !ids.contains(r.start_node_id.as_str()) || !ids.contains(r.end_node_id.as_str())
        })
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .await
            .context(format!("Failed to write consolidated graph: {:?}", path))?;
        Ok(())
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .await
            .context(format!("Failed to read consolidated graph: {:?}", path))?;
        serde_json::from_str(&json).context("Failed to parse consolidated graph")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyValue;
    use serde_json::json;

    #[test]
    fn test_properties_sit_beside_fixed_fields() {
        let mut properties = Properties::new();
        properties.insert("year".into(), PropertyValue::Int(2023));

        let graph = ConsolidatedGraph {
            nodes: vec![Node {
                id: "Report_esg_2023".into(),
                label: NodeLabel::Report,
                name: Some("ESG 2023".into()),
                properties,
            }],
            relationships: vec![Relationship {
                rel_type: RelationType::HasReport,
                start_node_id: "Company_acme".into(),
                end_node_id: "Report_esg_2023".into(),
                properties: Properties::new(),
            }],
        };

        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(
            value,
            json!({
                "nodes": [{"id": "Report_esg_2023", "label": "Report", "name": "ESG 2023", "year": 2023}],
                "relationships": [{"type": "HAS_REPORT", "start_node_id": "Company_acme", "end_node_id": "Report_esg_2023"}]
            })
        );
        assert_eq!(graph.dangling_relationships().count(), 1);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/final.json");
        let graph = ConsolidatedGraph::default();

        graph.write_to(&path).await.unwrap();
        assert_eq!(ConsolidatedGraph::read_from(&path).await.unwrap(), graph);
    }
}
