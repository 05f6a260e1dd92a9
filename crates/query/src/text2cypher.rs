//! Question to bounded, read-only Cypher.

use regex::Regex;
use thiserror::Error;

use extract::{NodeLabel, RelationType};

/// Question/query pairs shown to the model before the real question.
pub const FEW_SHOTS: [(&str, &str); 2] = [
    (
        "'Climate Change' 테마는 어떤 Pillar에 속해 있어?",
        "MATCH (t:Theme) WHERE toLower(t.name) CONTAINS toLower('Climate Change') MATCH (p:Pillar)-[:HAS_THEME]->(t) RETURN p.name, t.name",
    ),
    (
        "NetApp의 환경 등급?",
        "MATCH (c:Company) WHERE toLower(c.name) CONTAINS toLower('NetApp') MATCH (c)-[:HAS_REPORT]->(rep)-[:HAS_RATING]->(rat) RETURN c.name, rat.name",
    ),
];

pub fn build_cypher_prompt(question: &str) -> String {
    let labels = NodeLabel::ALL.map(|l| l.as_str()).join(", ");
    let rel_types = RelationType::ALL.map(|r| r.as_str()).join(", ");

    let examples = FEW_SHOTS
        .iter()
        .map(|(q, cypher)| format!("Question: {}\nCypher: {}", q, cypher))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"Task: Generate a Cypher query to explore an ESG Knowledge Graph.

Graph Schema:
- Node labels: {labels}
- Relationship types: {rel_types}
- (c:Company)-[:HAS_REPORT]->(rep:Report)
- (rep:Report)-[:HAS_RATING]->(rat:Rating)
- (rep:Report)-[:HAS_CONTENT]->(ct:Content)
- (rep:Report)-[:HAS_CATEGORY]->(p:Pillar)
- (p:Pillar)-[:HAS_THEME]->(t:Theme)
- Every node has the properties id and name.

Rules:
1. ALWAYS use 'toLower(node.name) CONTAINS toLower("search_term")' for flexible filtering.
2. Only read from the graph. Never create, update or delete anything.
3. Output only the Cypher query, no explanations, no markdown.

Examples:
{examples}

Question: {question}
Cypher:"#
    )
}

/// Strip markdown fences, `Answer:` / `Cypher:` prefixes and a trailing semicolon.
pub fn clean_generated(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        let body = match rest.split_once('\n') {
            Some((tag, body)) if tag.trim().chars().all(|c| c.is_ascii_alphabetic()) => body,
            _ => rest,
        };
        text = body.trim_end().strip_suffix("```").unwrap_or(body).trim();
    }

    loop {
        let before = text;
        for prefix in ["Answer:", "Cypher:", "cypher:", "answer:"] {
            if let Some(rest) = text.strip_prefix(prefix) {
                text = rest.trim_start();
            }
        }
        if text == before {
            break;
        }
    }

    text.trim().trim_end_matches(';').trim_end().to_string()
}

#[derive(Debug, Error, PartialEq)]
pub enum GuardError {
    #[error("generated query is empty")]
    Empty,
    #[error("generated query is not read-only: {0}")]
    WriteClause(String),
    #[error("generated query calls a procedure outside the read allowlist: {0}")]
    Procedure(String),
}

/// Procedures a generated query may `CALL`. Subqueries (`CALL { ... }`) are checked clause by clause.
pub const READ_PROCEDURES: [&str; 5] = [
    "db.index.vector.queryNodes",
    "db.labels",
    "db.relationshipTypes",
    "db.propertyKeys",
    "db.schema.visualization",
];

/// Rejects writing or administrative Cypher and bounds the row count.
pub struct ReadOnlyGuard {
    literals: Regex,
    write_clause: Regex,
    procedure: Regex,
    limit: Regex,
    row_limit: usize,
}

impl ReadOnlyGuard {
    pub fn new(row_limit: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            literals: Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#)?,
            write_clause: Regex::new(
                r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP|FOREACH|LOAD\s+CSV|CALL\s+db\.create\w*|CALL\s+apoc\.(?:create|merge|refactor|periodic|atomic)\w*)\b",
            )?,
            procedure: Regex::new(r"(?i)\bCALL\s+(`?[A-Za-z_][\w.`]*)")?,
            limit: Regex::new(r"(?i)\bLIMIT\s+\d+\s*$")?,
            row_limit,
        })
    }

    pub fn row_limit(&self) -> usize {
        self.row_limit
    }

    /// Return `cypher` ready to run: read-only, ending in a `LIMIT`.
    pub fn check(&self, cypher: &str) -> Result<String, GuardError> {
        let cypher = cypher.trim().trim_end_matches(';').trim_end();
        if cypher.is_empty() {
            return Err(GuardError::Empty);
        }

        // keywords inside string literals do not count
        let code = self.literals.replace_all(cypher, "''");
        if let Some(found) = self.write_clause.find(&code) {
            return Err(GuardError::WriteClause(found.as_str().to_uppercase()));
        }
        for call in self.procedure.captures_iter(&code) {
            let name = call[1].replace('`', "");
            if !READ_PROCEDURES.iter().any(|p| p.eq_ignore_ascii_case(&name)) {
                return Err(GuardError::Procedure(name));
            }
        }

        if self.limit.is_match(&code) {
            Ok(cypher.to_string())
        } else {
            Ok(format!("{} LIMIT {}", cypher, self.row_limit))
        }
    }
}
