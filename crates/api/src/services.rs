use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};

use extract::{ConsolidatedGraph, ExtractionPipeline, OllamaClient, PipelineReport, StructuredExtractor};
use index::{
    BackfillConfig, BackfillReport, Embedder, EmbeddingBackfill, EmbeddingClient, GraphLoader,
    GraphReader, GraphStats, GraphStore, LoadResult, Neo4jStore, SimilarNode,
};
use query::{ConversationContext, GatewayAnswer, QueryGateway, QueryLLM, ReadOnlyGuard, SimilaritySearch, TextGenerator};

use crate::config::AppConfig;
use crate::metrics::{Metrics, TimedOperation};

/// Write and read handles onto the same graph store.
#[derive(Clone)]
pub struct Stores {
    pub writer: Arc<dyn GraphStore>,
    pub reader: Arc<dyn GraphReader>,
}

impl Stores {
    pub fn neo4j(store: Neo4jStore) -> Self {
        let store = Arc::new(store);
        Self {
            writer: store.clone(),
            reader: store,
        }
    }
}

/// External model endpoints used by the stages.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn StructuredExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub query_llm: Arc<dyn TextGenerator>,
    pub answer_llm: Arc<dyn TextGenerator>,
}

impl Collaborators {
    pub fn from_config(config: &AppConfig) -> Self {
        let extractor = OllamaClient::new(&config.llm.base_url, &config.llm.extraction_model)
            .with_max_repairs(config.llm.json_repairs);
        let embedder = EmbeddingClient::new(
            &config.embedding.base_url,
            &config.embedding.model,
            config.embedding.dimensions,
        );
        let query_llm = QueryLLM::new(&config.llm.base_url, &config.llm.query_model);
        let answer_llm = QueryLLM::new(&config.llm.base_url, &config.llm.query_model).with_temperature(0.2);

        Self {
            extractor: Arc::new(extractor),
            embedder: Arc::new(embedder),
            query_llm: Arc::new(query_llm),
            answer_llm: Arc::new(answer_llm),
        }
    }
}

/// Extraction rewrites one checkpoint file, so only one run may hold it.
#[derive(Debug, Error)]
#[error("an extraction run is already in progress")]
pub struct ExtractionBusy;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub graph_store: String,
}

/// Every pipeline stage behind one handle. The graph store connection is opened on
/// first use and shared for the life of the process.
pub struct Services {
    config: AppConfig,
    metrics: Arc<Metrics>,
    collaborators: Collaborators,
    stores: OnceCell<Stores>,
    extraction: Mutex<()>,
}

impl Services {
    pub fn new(config: AppConfig, metrics: Arc<Metrics>) -> Self {
        let collaborators = Collaborators::from_config(&config);
        Self {
            config,
            metrics,
            collaborators,
            stores: OnceCell::new(),
            extraction: Mutex::new(()),
        }
    }

    /// Services over already-open stores and the given collaborators.
    pub fn with_parts(config: AppConfig, metrics: Arc<Metrics>, collaborators: Collaborators, stores: Stores) -> Self {
        Self {
            config,
            metrics,
            collaborators,
            stores: OnceCell::new_with(Some(stores)),
            extraction: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn stores(&self) -> Result<&Stores> {
        self.stores
            .get_or_try_init(|| async {
                let neo4j = self.config.neo4j_config();
                let store = Neo4jStore::connect(&neo4j)
                    .await
                    .with_context(|| format!("Failed to connect to graph store at {}", neo4j.uri))?;
                Ok::<_, anyhow::Error>(Stores::neo4j(store))
            })
            .await
    }

    /// Run extraction over the input table. `retry_failed` re-extracts only the empty checkpoint slots.
    ///
    /// Fails with [`ExtractionBusy`] while another run or retry is active.
    pub async fn extract(&self, path: Option<PathBuf>, retry_failed: bool) -> Result<PipelineReport> {
        let _running = self.extraction.try_lock().map_err(|_| ExtractionBusy)?;
        let timer = TimedOperation::start();
        let path = path.unwrap_or_else(|| self.config.pipeline.data_file.clone());

        let rows = ingest::ingest_table(&path, &self.config.pipeline.input_encodings).await?;
        let pipeline = ExtractionPipeline::new(self.collaborators.extractor.clone(), self.config.pipeline_config())?;

        let report = if retry_failed {
            pipeline.retry_failed(&rows).await?
        } else {
            pipeline.run(&rows).await?
        };

        self.metrics.record_extract(timer.elapsed(), &report);
        Ok(report)
    }

    /// Load the consolidated graph file into the store.
    pub async fn load(&self) -> Result<LoadResult> {
        let timer = TimedOperation::start();
        let path = self.config.consolidated_path();
        let graph = ConsolidatedGraph::read_from(&path).await?;

        let stores = self.stores().await?;
        let result = GraphLoader::new(stores.writer.clone()).load(&graph).await;

        self.metrics.record_load(timer.elapsed(), &result);
        Ok(result)
    }

    pub async fn embed(&self) -> Result<BackfillReport> {
        let timer = TimedOperation::start();
        let config = BackfillConfig::new(self.config.target_labels()?, self.config.embedding.dimensions);

        let stores = self.stores().await?;
        let backfill = EmbeddingBackfill::new(stores.writer.clone(), self.collaborators.embedder.clone(), config);
        let report = backfill.run().await?;

        self.metrics.record_embed(timer.elapsed(), &report);
        Ok(report)
    }

    pub async fn gateway(&self) -> Result<QueryGateway> {
        let stores = self.stores().await?;
        let guard = ReadOnlyGuard::new(self.config.query.row_limit).context("Failed to build query guard")?;

        Ok(QueryGateway::new(
            stores.reader.clone(),
            self.collaborators.query_llm.clone(),
            self.collaborators.answer_llm.clone(),
            guard,
        ))
    }

    /// Answer one question within `conversation`. Only a store that cannot be reached is an error.
    pub async fn ask(&self, question: &str, conversation: &mut ConversationContext) -> Result<GatewayAnswer> {
        let gateway = self.gateway().await?;

        let timer = TimedOperation::start();
        let answer = gateway.answer(question, conversation).await;
        self.metrics.record_question(timer.elapsed(), &answer);

        Ok(answer)
    }

    pub async fn similar(&self, index: &str, phrase: &str, k: usize) -> Result<Vec<SimilarNode>> {
        let stores = self.stores().await?;
        SimilaritySearch::new(stores.reader.clone(), self.collaborators.embedder.clone())
            .search(index, phrase, k)
            .await
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        let stores = self.stores().await?;
        stores.writer.stats().await.context("Failed to read graph statistics")
    }

    pub async fn health(&self) -> HealthReport {
        let graph_store = match self.stats().await {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("error: {:#}", e),
        };
        HealthReport { graph_store }
    }
}
