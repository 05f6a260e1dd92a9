//! Stable entity identity.
//!
//! Every node id in the consolidated graph comes from [`normalize_id`], so the
//! same `(label, name)` pair always lands on the same node no matter which
//! batch, run or machine produced it.

use crate::schema::NodeLabel;

/// Suffix shared by every nameless entity of a label.
///
/// All nodes of one label without a usable name collapse onto a single
/// `{label}_unknown` node.
pub const UNKNOWN_SUFFIX: &str = "unknown";

/// Map `(label, name)` to its normalized id.
///
/// Characters other than letters, digits, `_` and whitespace are dropped, the
/// rest is trimmed and lowercased, and each whitespace run becomes one `_`.
/// A missing name, or one with nothing left after cleaning, yields
/// `{label}_unknown`. Every nameless or punctuation-only entity of a label
/// therefore collapses into that single node; this collision is deliberate.
pub fn normalize_id(label: NodeLabel, name: Option<&str>) -> String {
    let cleaned = name.map(clean_name).unwrap_or_default();

    if cleaned.is_empty() {
        format!("{}_{}", label, UNKNOWN_SUFFIX)
    } else {
        format!("{}_{}", label, cleaned)
    }
}

fn clean_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    kept.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}
