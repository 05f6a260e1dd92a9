//! Incremental embedding backfill.
//!
//! Only nodes whose `embedding` is absent are touched, so a rerun picks up
//! where an interrupted one stopped without any checkpoint of its own.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use extract::NodeLabel;

use crate::embeddings::Embedder;
use crate::store::{GraphStore, VectorIndexSpec};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub target_labels: Vec<NodeLabel>,
    pub indexes: Vec<VectorIndexSpec>,
}

impl BackfillConfig {
    pub fn new(target_labels: Vec<NodeLabel>, dimensions: usize) -> Self {
        Self {
            target_labels,
            indexes: VectorIndexSpec::defaults(dimensions),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelBackfill {
    pub label: String,
    pub missing: usize,
    pub embedded: usize,
    /// Nodes without name text; never sent to the embedder.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub labels: Vec<LabelBackfill>,
}

impl BackfillReport {
    pub fn embedded(&self) -> usize {
        self.labels.iter().map(|l| l.embedded).sum()
    }

    pub fn failed(&self) -> usize {
        self.labels.iter().map(|l| l.failed).sum()
    }
}

impl std::fmt::Display for BackfillReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Embedding backfill: {} embedded, {} failed",
            self.embedded(),
            self.failed()
        )
    }
}

pub struct EmbeddingBackfill {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    config: BackfillConfig,
}

impl EmbeddingBackfill {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Arc<dyn Embedder>, config: BackfillConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Create the vector indexes if absent. A failure is logged and does not stop the backfill.
    pub async fn ensure_indexes(&self) {
        for spec in &self.config.indexes {
            match self.store.ensure_vector_index(spec).await {
                Ok(()) => info!(index = %spec.name, label = %spec.label, "Vector index ready"),
                Err(e) => warn!(index = %spec.name, error = %e, "Vector index not created, continuing"),
            }
        }
    }

    pub async fn run(&self) -> Result<BackfillReport> {
        self.ensure_indexes().await;

        let mut report = BackfillReport::default();
        for label in &self.config.target_labels {
            report.labels.push(self.backfill_label(*label).await?);
        }

        info!("{report}");
        Ok(report)
    }

    async fn backfill_label(&self, label: NodeLabel) -> Result<LabelBackfill> {
        let candidates = self
            .store
            .nodes_missing_embedding(label)
            .await
            .context(format!("Failed to scan {} nodes for missing embeddings", label))?;

        let mut stats = LabelBackfill {
            label: label.to_string(),
            missing: candidates.len(),
            ..Default::default()
        };
        info!(%label, missing = stats.missing, "Updating embeddings");

        for candidate in candidates {
            let Some(name) = candidate.name.as_deref().filter(|n| !n.trim().is_empty()) else {
                stats.skipped += 1;
                continue;
            };

            let vector = match self.embedder.embed(name).await {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(%label, id = %candidate.id, error = %e, "Embedding failed");
                    stats.failed += 1;
                    continue;
                }
            };

            match self.store.set_embedding(label, &candidate.id, &vector).await {
                Ok(()) => stats.embedded += 1,
                Err(e) => {
                    warn!(%label, id = %candidate.id, error = %e, "Failed to write embedding");
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryGraphStore;
    use async_trait::async_trait;
    use extract::{Properties, PropertyValue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), fail_on: None }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(text) {
                anyhow::bail!("rate limited");
            }
            Ok(vec![text.len() as f32, 1.0, 0.0])
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    async fn seeded_store() -> Arc<MemoryGraphStore> {
        let store = Arc::new(MemoryGraphStore::new());
        let nodes = [
            (NodeLabel::Company, "Company_acme", Some("Acme")),
            (NodeLabel::Company, "Company_unknown", None),
            (NodeLabel::Content, "Content_scope_1", Some("Scope 1 emissions")),
            (NodeLabel::Report, "Report_acme", Some("Acme report")),
        ];
        for (label, id, name) in nodes {
            let mut properties = Properties::new();
            if let Some(name) = name {
                properties.insert("name".into(), PropertyValue::Text(name.into()));
            }
            store.upsert_node(label, id, &properties).await.unwrap();
        }
        store
    }

    fn backfill(store: Arc<MemoryGraphStore>, embedder: Arc<CountingEmbedder>) -> EmbeddingBackfill {
        EmbeddingBackfill::new(
            store,
            embedder,
            BackfillConfig::new(vec![NodeLabel::Company, NodeLabel::Content], 3),
        )
    }

    #[tokio::test]
    async fn test_second_run_makes_no_calls() {
        let store = seeded_store().await;
        let embedder = Arc::new(CountingEmbedder::new());
        let job = backfill(store.clone(), embedder.clone());

        let first = job.run().await.unwrap();
        assert_eq!(first.embedded(), 2);
        assert_eq!(embedder.calls(), 2);
        assert!(store.embedding("Company_acme").await.is_some());
        assert!(store.embedding("Report_acme").await.is_none());

        let second = job.run().await.unwrap();
        assert_eq!(second.embedded(), 0);
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn test_nameless_nodes_are_skipped() {
        let store = seeded_store().await;
        let embedder = Arc::new(CountingEmbedder::new());

        let report = backfill(store.clone(), embedder).run().await.unwrap();
        let company = &report.labels[0];
        assert_eq!(company.missing, 2);
        assert_eq!(company.skipped, 1);
        assert!(store.embedding("Company_unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let store = seeded_store().await;
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: Some("Acme"),
        });

        let report = backfill(store.clone(), embedder).run().await.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.embedded(), 1);
        assert!(store.embedding("Content_scope_1").await.is_some());

        // the gap is picked up by the next run
        let retry = backfill(store.clone(), Arc::new(CountingEmbedder::new())).run().await.unwrap();
        assert_eq!(retry.embedded(), 1);
    }

    #[tokio::test]
    async fn test_vector_indexes_are_created() {
        let store = seeded_store().await;
        backfill(store.clone(), Arc::new(CountingEmbedder::new())).run().await.unwrap();

        let index = store.vector_index("company_name_index").await.unwrap();
        assert_eq!(index.label, NodeLabel::Company);
        assert_eq!(index.dimensions, 3);
        assert!(store.vector_index("content_text_index").await.is_some());
    }
}
