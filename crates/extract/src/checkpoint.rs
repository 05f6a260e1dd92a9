use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::schema::{PartialGraph, validate_partial};

/// Durable, ordered record of every batch attempted so far.
///
/// Slot `i` covers rows `i * batch_size .. (i + 1) * batch_size`. A `None`
/// slot is a batch that failed; it keeps the offset arithmetic exact and
/// marks the batch for [`crate::ExtractionPipeline::retry_failed`].
pub struct Checkpoint {
    path: PathBuf,
    entries: Vec<Option<PartialGraph>>,
}

impl Checkpoint {
    /// Load the checkpoint at `path`, or start empty if there is none.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let exists = fs::try_exists(&path)
            .await
            .context(format!("Failed to check for checkpoint: {:?}", path))?;
        if !exists {
            return Ok(Self { path, entries: Vec::new() });
        }

        let json = fs::read_to_string(&path)
            .await
            .context(format!("Failed to read checkpoint: {:?}", path))?;
        let raw: Vec<Value> = serde_json::from_str(&json)
            .context(format!("Checkpoint is not a JSON array: {:?}", path))?;

        let entries = raw
            .iter()
            .enumerate()
            .map(|(slot, value)| {
                if value.is_null() {
                    return None;
                }
                match validate_partial(value) {
                    Some(validated) => Some(validated.graph),
                    None => {
                        warn!(slot, "Unreadable checkpoint entry, treating it as failed");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        info!(
            path = %path.display(),
            entries = entries.len(),
            failed = entries.iter().filter(|e| e.is_none()).count(),
            "Loaded checkpoint"
        );
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Option<PartialGraph>] {
        &self.entries
    }

    /// First row not yet covered by a slot.
    pub fn resume_offset(&self, batch_size: usize) -> usize {
        self.entries.len() * batch_size
    }

    /// Slots whose batch failed.
    pub fn failed_slots(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Append one batch outcome and persist before returning.
    pub async fn record(&mut self, entry: Option<PartialGraph>) -> Result<()> {
        self.entries.push(entry);
        self.persist().await
    }

    /// Overwrite an existing slot and persist.
    pub async fn fill(&mut self, slot: usize, graph: PartialGraph) -> Result<()> {
        let entry = self
            .entries
            .get_mut(slot)
            .with_context(|| format!("Checkpoint has no slot {}", slot))?;
        *entry = Some(graph);
        self.persist().await
    }

    /// Write the whole checkpoint to a sibling temp file, then rename over the original.
    async fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .context(format!("Failed to write checkpoint: {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .await
            .context(format!("Failed to replace checkpoint: {:?}", self.path))?;

        Ok(())
    }
}
