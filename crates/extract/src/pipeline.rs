use anyhow::{Result, bail};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use ingest::{Batcher, Row, RowBatch};

use crate::checkpoint::Checkpoint;
use crate::graph::ConsolidatedGraph;
use crate::llm::StructuredExtractor;
use crate::merge::merge_graphs;
use crate::schema::{ValidatedPartial, validate_partial};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub checkpoint_path: PathBuf,
    pub output_path: PathBuf,
    /// Pause after a failed batch before moving on.
    pub failure_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            checkpoint_path: PathBuf::from("output/checkpoint_graphs.json"),
            output_path: PathBuf::from("output/final_merged_graph_full.json"),
            failure_backoff: Duration::from_secs(5),
        }
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchOutcome {
    Extracted {
        offset: usize,
        nodes: usize,
        relationships: usize,
        quarantined: usize,
    },
    Failed {
        offset: usize,
        error: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub total_rows: usize,
    /// Row offset the run started from.
    pub resumed_from: usize,
    pub batches_extracted: usize,
    pub batches_failed: usize,
    /// Checkpoint slots still empty after this run.
    pub pending_failed: usize,
    pub quarantined: usize,
    pub nodes: usize,
    pub relationships: usize,
    pub dangling_relationships: usize,
    pub output_path: PathBuf,
}

impl PipelineReport {
    fn count(&mut self, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Extracted { quarantined, .. } => {
                self.batches_extracted += 1;
                self.quarantined += quarantined;
            }
            BatchOutcome::Failed { .. } => self.batches_failed += 1,
        }
    }
}

/// Batched extraction with a per-batch checkpoint, ending in one consolidated graph file.
pub struct ExtractionPipeline {
    extractor: Arc<dyn StructuredExtractor>,
    batcher: Batcher,
    config: PipelineConfig,
}

impl ExtractionPipeline {
    pub fn new(extractor: Arc<dyn StructuredExtractor>, config: PipelineConfig) -> Result<Self> {
        let batcher = Batcher::new(config.batch_size)?;
        Ok(Self {
            extractor,
            batcher,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Extract every batch the checkpoint does not cover yet, then merge and write the result.
    ///
    /// A failed batch is logged, recorded as an empty slot and skipped after the backoff.
    pub async fn run(&self, rows: &[Row]) -> Result<PipelineReport> {
        let mut checkpoint = Checkpoint::open(&self.config.checkpoint_path).await?;
        let start = checkpoint.resume_offset(self.batcher.batch_size());

        let mut report = PipelineReport {
            total_rows: rows.len(),
            resumed_from: start,
            ..Default::default()
        };

        if start > 0 {
            info!(
                offset = start,
                batches = checkpoint.len(),
                "Checkpoint found, resuming"
            );
        }
        if start > rows.len() {
            warn!(
                offset = start,
                rows = rows.len(),
                "Checkpoint covers more rows than the input holds"
            );
        }

        for batch in self.batcher.batches(rows, start) {
            info!("[{}/{}] Extracting batch", batch.end(), rows.len());

            let outcome = match self.extract_batch(&batch).await {
                Ok(validated) => {
                    let outcome = extracted(batch.offset, &validated);
                    checkpoint.record(Some(validated.graph)).await?;
                    outcome
                }
                Err(e) => {
                    error!(offset = batch.offset, error = %e, "Batch extraction failed");
                    checkpoint.record(None).await?;
                    tokio::time::sleep(self.config.failure_backoff).await;
                    BatchOutcome::Failed {
                        offset: batch.offset,
                        error: format!("{:#}", e),
                    }
                }
            };
            report.count(&outcome);
        }

        self.finish(&checkpoint, report).await
    }

    /// Re-extract only the batches whose checkpoint slot is empty, then merge again.
    pub async fn retry_failed(&self, rows: &[Row]) -> Result<PipelineReport> {
        let mut checkpoint = Checkpoint::open(&self.config.checkpoint_path).await?;
        let failed = checkpoint.failed_slots();
        let batch_size = self.batcher.batch_size();

        let mut report = PipelineReport {
            total_rows: rows.len(),
            resumed_from: checkpoint.resume_offset(batch_size),
            ..Default::default()
        };
        info!(failed = failed.len(), "Retrying failed batches");

        for slot in failed {
            let Some(batch) = self.batcher.batch_at(rows, slot * batch_size) else {
                warn!(slot, "Failed slot lies beyond the input, skipping");
                continue;
            };

            let outcome = match self.extract_batch(&batch).await {
                Ok(validated) => {
                    let outcome = extracted(batch.offset, &validated);
                    checkpoint.fill(slot, validated.graph).await?;
                    outcome
                }
                Err(e) => {
                    error!(offset = batch.offset, error = %e, "Batch extraction failed again");
                    tokio::time::sleep(self.config.failure_backoff).await;
                    BatchOutcome::Failed {
                        offset: batch.offset,
                        error: format!("{:#}", e),
                    }
                }
            };
            report.count(&outcome);
        }

        self.finish(&checkpoint, report).await
    }

    async fn extract_batch(&self, batch: &RowBatch<'_>) -> Result<ValidatedPartial> {
        let raw = self.extractor.extract(&batch.to_text()).await?;

        let Some(validated) = validate_partial(&raw) else {
            bail!("Extractor did not return a graph object");
        };

        for record in &validated.quarantined {
            warn!(
                offset = batch.offset,
                kind = ?record.kind,
                reason = %record.reason,
                "Quarantined out-of-schema record"
            );
        }

        Ok(validated)
    }

    async fn finish(&self, checkpoint: &Checkpoint, mut report: PipelineReport) -> Result<PipelineReport> {
        info!("Merging {} checkpoint entries", checkpoint.len());
        let graph: ConsolidatedGraph = merge_graphs(checkpoint.entries());
        graph.write_to(&self.config.output_path).await?;

        report.pending_failed = checkpoint.failed_slots().len();
        report.nodes = graph.nodes.len();
        report.relationships = graph.relationships.len();
        report.dangling_relationships = graph.dangling_relationships().count();
        report.output_path = self.config.output_path.clone();

        info!(
            nodes = report.nodes,
            relationships = report.relationships,
            dangling = report.dangling_relationships,
            pending_failed = report.pending_failed,
            path = %report.output_path.display(),
            "Consolidated graph written"
        );
        Ok(report)
    }
}

fn extracted(offset: usize, validated: &ValidatedPartial) -> BatchOutcome {
    BatchOutcome::Extracted {
        offset,
        nodes: validated.graph.nodes.len(),
        relationships: validated.graph.relationships.len(),
        quarantined: validated.quarantined.len(),
    }
}
