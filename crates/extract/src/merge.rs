use std::collections::{HashMap, HashSet};

use crate::graph::{ConsolidatedGraph, Node, Relationship};
use crate::normalizer::normalize_id;
use crate::schema::{PartialGraph, RelationType};

/// Merge per-batch partial graphs, in order, into one consolidated graph.
///
/// Batch-local ids are replaced by normalized ids. A later node with the same
/// id overwrites the earlier one's name and properties but keeps its position.
/// Relationship endpoints not defined in their own batch are passed through
/// unchanged. Relationships are deduplicated on `(type, start, end)` and the
/// first occurrence's properties are kept. `None` entries are skipped.
pub fn merge_graphs(partials: &[Option<PartialGraph>]) -> ConsolidatedGraph {
    partials
        .iter()
        .flatten()
        .fold(Accumulator::default(), Accumulator::absorb)
        .finish()
}

#[derive(Default)]
struct Accumulator {
    nodes: Vec<Node>,
    node_idx: HashMap<String, usize>,
    relationships: Vec<Relationship>,
    seen: HashSet<(RelationType, String, String)>,
}

impl Accumulator {
    fn absorb(mut self, partial: &PartialGraph) -> Self {
        let mut id_map: HashMap<&str, String> = HashMap::new();

        for node in &partial.nodes {
            let id = normalize_id(node.label, node.name.as_deref());
            id_map.insert(node.id.as_str(), id.clone());

            let merged = Node {
                id: id.clone(),
                label: node.label,
                name: node.name.clone(),
                properties: node.properties.clone(),
            };

            match self.node_idx.get(&id) {
                Some(&idx) => self.nodes[idx] = merged,
                None => {
                    self.node_idx.insert(id, self.nodes.len());
                    self.nodes.push(merged);
                }
            }
        }

        for rel in &partial.relationships {
            let resolve = |raw: &str| id_map.get(raw).cloned().unwrap_or_else(|| raw.to_string());
            let start = resolve(&rel.start_node_id);
            let end = resolve(&rel.end_node_id);

            if self.seen.insert((rel.rel_type, start.clone(), end.clone())) {
                self.relationships.push(Relationship {
                    rel_type: rel.rel_type,
                    start_node_id: start,
                    end_node_id: end,
                    properties: rel.properties.clone(),
                });
            }
        }

        self
    }

    fn finish(self) -> ConsolidatedGraph {
        ConsolidatedGraph {
            nodes: self.nodes,
            relationships: self.relationships,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NodeLabel, PartialNode, PartialRelationship, Properties, PropertyValue};

    fn node(id: &str, label: NodeLabel, name: &str) -> PartialNode {
        PartialNode {
            id: id.into(),
            label,
            name: Some(name.into()),
            properties: Properties::new(),
        }
    }

    fn rel(rel_type: RelationType, start: &str, end: &str) -> PartialRelationship {
        PartialRelationship {
            rel_type,
            start_node_id: start.into(),
            end_node_id: end.into(),
            properties: Properties::new(),
        }
    }

    fn acme_batch() -> PartialGraph {
        PartialGraph {
            nodes: vec![
                node("1", NodeLabel::Company, "Acme"),
                node("2", NodeLabel::Report, "Acme ESG Report"),
                node("3", NodeLabel::Rating, "A"),
            ],
            relationships: vec![
                rel(RelationType::HasReport, "1", "2"),
                rel(RelationType::HasRating, "2", "3"),
            ],
        }
    }

    #[test]
    fn test_single_batch_uses_normalized_ids() {
        let merged = merge_graphs(&[Some(acme_batch())]);

        let ids: Vec<&str> = merged.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["Company_acme", "Report_acme_esg_report", "Rating_a"]);
        assert_eq!(merged.relationships.len(), 2);
        assert_eq!(merged.relationships[0].start_node_id, "Company_acme");
        assert_eq!(merged.relationships[1].end_node_id, "Rating_a");
        assert_eq!(merged.dangling_relationships().count(), 0);
    }

    #[test]
    fn test_same_company_across_batches_collapses() {
        let second = PartialGraph {
            nodes: vec![node("E7", NodeLabel::Company, "ACME"), node("E8", NodeLabel::Report, "Acme 2024")],
            relationships: vec![rel(RelationType::HasReport, "E7", "E8")],
        };

        let merged = merge_graphs(&[Some(acme_batch()), Some(second)]);
        let companies: Vec<&Node> = merged.nodes.iter().filter(|n| n.label == NodeLabel::Company).collect();

        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].id, "Company_acme");
        // last seen wins for the name, first position is kept
        assert_eq!(companies[0].name.as_deref(), Some("ACME"));
        assert_eq!(merged.nodes[0].id, "Company_acme");
        assert_eq!(merged.relationships.len(), 3);
    }

    #[test]
    fn test_duplicate_relationships_keep_first_properties() {
        let mut first = rel(RelationType::HasRating, "2", "3");
        first.properties.insert("source".into(), PropertyValue::Text("msci".into()));
        let mut again = rel(RelationType::HasRating, "r", "x");
        again.properties.insert("source".into(), PropertyValue::Text("sustainalytics".into()));

        let batch_one = PartialGraph {
            nodes: vec![node("2", NodeLabel::Report, "R"), node("3", NodeLabel::Rating, "AA")],
            relationships: vec![first.clone(), first],
        };
        let batch_two = PartialGraph {
            nodes: vec![node("r", NodeLabel::Report, "r"), node("x", NodeLabel::Rating, "aa")],
            relationships: vec![again],
        };

        let merged = merge_graphs(&[Some(batch_one), Some(batch_two)]);
        assert_eq!(merged.relationships.len(), 1);
        assert_eq!(
            merged.relationships[0].properties.get("source"),
            Some(&PropertyValue::Text("msci".into()))
        );
    }

    #[test]
    fn test_cross_batch_reference_is_kept() {
        let batch = PartialGraph {
            nodes: vec![node("1", NodeLabel::Report, "Acme ESG Report")],
            relationships: vec![rel(RelationType::HasTheme, "Pillar_environmental", "1")],
        };

        let merged = merge_graphs(&[Some(batch)]);
        assert_eq!(merged.relationships.len(), 1);
        assert_eq!(merged.relationships[0].start_node_id, "Pillar_environmental");
        assert_eq!(merged.relationships[0].end_node_id, "Report_acme_esg_report");
        assert_eq!(merged.dangling_relationships().count(), 1);
    }

    #[test]
    fn test_empty_and_missing_partials_are_skipped() {
        let merged = merge_graphs(&[None, Some(PartialGraph::default()), Some(acme_batch()), None]);
        assert_eq!(merged.nodes.len(), 3);
        assert!(merge_graphs(&[]).nodes.is_empty());
    }

    #[test]
    fn test_merge_is_deterministic() {
        let partials = vec![Some(acme_batch()), None, Some(acme_batch())];
        let a = serde_json::to_string(&merge_graphs(&partials)).unwrap();
        let b = serde_json::to_string(&merge_graphs(&partials)).unwrap();
        assert_eq!(a, b);
    }
}
