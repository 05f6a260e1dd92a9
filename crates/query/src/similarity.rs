use anyhow::{Context, Result, bail};
use std::sync::Arc;

use index::{Embedder, GraphReader, SimilarNode};

/// Nearest named nodes to a phrase, through one of the vector indexes.
pub struct SimilaritySearch {
    reader: Arc<dyn GraphReader>,
    embedder: Arc<dyn Embedder>,
}

impl SimilaritySearch {
    pub fn new(reader: Arc<dyn GraphReader>, embedder: Arc<dyn Embedder>) -> Self {
        Self { reader, embedder }
    }

    pub async fn search(&self, index: &str, phrase: &str, k: usize) -> Result<Vec<SimilarNode>> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            bail!("Search phrase is empty");
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed(phrase)
            .await
            .context("Failed to embed search phrase")?;

        let mut hits = self
            .reader
            .vector_search(index, k, &vector)
            .await
            .context(format!("Vector search on {} failed", index))?;

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}
