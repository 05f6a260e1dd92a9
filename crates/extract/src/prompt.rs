use crate::schema::{NodeLabel, RelationType};

pub fn build_extraction_prompt(batch_text: &str) -> String {
    let labels = NodeLabel::ALL.map(|l| l.as_str()).join("|");
    let rel_types = RelationType::ALL.map(|r| r.as_str()).join("|");

    format!(
        r#"You are an ESG Knowledge Graph engineer.
Extract ALL entities and relationships from the provided CSV data.
Multiple rows are provided. Process them all into one connected graph.

GRAPH SCHEMA:
- (Company)-[:HAS_REPORT]->(Report)
- (Report)-[:HAS_RATING]->(Rating)
- (Report)-[:HAS_CONTENT]->(Content)
- (Report)-[:HAS_CATEGORY]->(Pillar)-[:HAS_THEME]->(Theme)

OUTPUT FORMAT:
{{
  "nodes": [
    {{"id": "1", "label": "{labels}", "name": "entity name as written in the data"}}
  ],
  "relationships": [
    {{"type": "{rel_types}", "start_node_id": "1", "end_node_id": "2"}}
  ]
}}

RULES:
- label must be exactly one of: {labels}
- type must be exactly one of: {rel_types}
- ids only need to be unique within this answer
- Every relationship must point at node ids defined in "nodes"
- Extra node attributes must be plain strings, numbers or booleans
- Output ONLY the JSON object, no markdown, no explanations

Input CSV Data (Multiple Rows):
{batch_text}

JSON OUTPUT:"#
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_closed_enumerations() {
        let prompt = build_extraction_prompt("[Row 1]\nCompany: Acme\n");
        assert!(prompt.contains("Company|Report|Rating|Pillar|Theme|Content"));
        assert!(prompt.contains("HAS_REPORT|HAS_RATING|HAS_CONTENT|HAS_CATEGORY|HAS_THEME"));
        assert!(prompt.contains("(Report)-[:HAS_CATEGORY]->(Pillar)-[:HAS_THEME]->(Theme)"));
        assert!(prompt.contains("Company: Acme"));
    }
}
