use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Node labels of the ESG graph. Anything else is rejected at the extraction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    Company,
    Report,
    Rating,
    Pillar,
    Theme,
    Content,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 6] = [
        NodeLabel::Company,
        NodeLabel::Report,
        NodeLabel::Rating,
        NodeLabel::Pillar,
        NodeLabel::Theme,
        NodeLabel::Content,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Company => "Company",
            NodeLabel::Report => "Report",
            NodeLabel::Rating => "Rating",
            NodeLabel::Pillar => "Pillar",
            NodeLabel::Theme => "Theme",
            NodeLabel::Content => "Content",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown node label: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    HasReport,
    HasRating,
    HasContent,
    HasCategory,
    HasTheme,
}

impl RelationType {
    pub const ALL: [RelationType; 5] = [
        RelationType::HasReport,
        RelationType::HasRating,
        RelationType::HasContent,
        RelationType::HasCategory,
        RelationType::HasTheme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::HasReport => "HAS_REPORT",
            RelationType::HasRating => "HAS_RATING",
            RelationType::HasContent => "HAS_CONTENT",
            RelationType::HasCategory => "HAS_CATEGORY",
            RelationType::HasTheme => "HAS_THEME",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar property value. Arrays and objects are not accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// Node as returned for one batch. `id` is only meaningful inside that batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialNode {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub label: NodeLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialRelationship {
    #[serde(rename = "type")]
    pub rel_type: RelationType,
    #[serde(deserialize_with = "string_or_number")]
    pub start_node_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub end_node_id: String,
    #[serde(flatten)]
    pub properties: Properties,
}

/// One batch's extraction output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialGraph {
    #[serde(default)]
    pub nodes: Vec<PartialNode>,
    #[serde(default)]
    pub relationships: Vec<PartialRelationship>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Node,
    Relationship,
}

/// A record that did not fit the schema, kept aside with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct QuarantinedRecord {
    pub kind: RecordKind,
    pub reason: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedPartial {
    pub graph: PartialGraph,
    pub quarantined: Vec<QuarantinedRecord>,
}

/// Check raw extractor output against the schema record by record.
///
/// Returns `None` for null or non-object input. Missing or non-array
/// `nodes` / `relationships` count as empty.
pub fn validate_partial(raw: &Value) -> Option<ValidatedPartial> {
    let object = raw.as_object()?;
    let mut validated = ValidatedPartial::default();

    for item in records(object.get("nodes")) {
        match serde_json::from_value::<PartialNode>(item.clone()) {
            Ok(node) => validated.graph.nodes.push(node),
            Err(e) => validated.quarantined.push(QuarantinedRecord {
                kind: RecordKind::Node,
                reason: e.to_string(),
                raw: item.clone(),
            }),
        }
    }

    for item in records(object.get("relationships")) {
        match serde_json::from_value::<PartialRelationship>(item.clone()) {
            Ok(rel) => validated.graph.relationships.push(rel),
            Err(e) => validated.quarantined.push(QuarantinedRecord {
                kind: RecordKind::Relationship,
                reason: e.to_string(),
                raw: item.clone(),
            }),
        }
    }

    Some(validated)
}

fn records(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value.and_then(Value::as_array).into_iter().flatten()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, found {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_labels_round_trip_as_plain_strings() {
        assert_eq!(serde_json::to_value(NodeLabel::Pillar).unwrap(), json!("Pillar"));
        assert_eq!(serde_json::to_value(RelationType::HasCategory).unwrap(), json!("HAS_CATEGORY"));
        assert_eq!("company".parse::<NodeLabel>().unwrap(), NodeLabel::Company);
        assert!("Person".parse::<NodeLabel>().is_err());
    }

    #[test]
    fn test_out_of_schema_records_are_quarantined() {
        let raw = json!({
            "nodes": [
                {"id": "1", "label": "Company", "name": "Acme"},
                {"id": "2", "label": "Person", "name": "Jane"},
                {"id": 3, "label": "Rating", "name": "A", "score": 7.5}
            ],
            "relationships": [
                {"type": "HAS_REPORT", "start_node_id": "1", "end_node_id": "9"},
                {"type": "EMPLOYS", "start_node_id": "1", "end_node_id": "2"}
            ]
        });

        let validated = validate_partial(&raw).unwrap();
        assert_eq!(validated.graph.nodes.len(), 2);
        assert_eq!(validated.graph.nodes[1].id, "3");
        assert_eq!(
            validated.graph.nodes[1].properties.get("score"),
            Some(&PropertyValue::Float(7.5))
        );
        assert_eq!(validated.graph.relationships.len(), 1);
        assert_eq!(validated.quarantined.len(), 2);
        assert_eq!(validated.quarantined[0].kind, RecordKind::Node);
        assert_eq!(validated.quarantined[1].kind, RecordKind::Relationship);
    }

    #[test]
    fn test_missing_keys_are_empty() {
        let validated = validate_partial(&json!({"nodes": "oops"})).unwrap();
        assert!(validated.graph.nodes.is_empty());
        assert!(validated.graph.relationships.is_empty());
        assert!(validated.quarantined.is_empty());

        assert!(validate_partial(&Value::Null).is_none());
        assert!(validate_partial(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_nested_property_is_rejected() {
        let raw = json!({"nodes": [{"id": "1", "label": "Theme", "name": "Water", "tags": ["a"]}]});
        let validated = validate_partial(&raw).unwrap();
        assert!(validated.graph.nodes.is_empty());
        assert_eq!(validated.quarantined.len(), 1);
    }
}
