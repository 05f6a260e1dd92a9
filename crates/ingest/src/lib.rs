pub mod batcher;
pub mod reader;
pub mod row;

pub use batcher::{Batcher, RowBatch, batch_text};
pub use reader::{TableReader, parse_csv};
pub use row::{Cell, Row};

use anyhow::{Result, bail};
use std::path::Path;

/// Read the source table, aborting early when the file is absent.
pub async fn ingest_table(file_path: &Path, encodings: &[String]) -> Result<Vec<Row>> {
    if !file_path.is_file() {
        bail!("Input file not found: {}", file_path.display());
    }

    let reader = TableReader::from_labels(encodings)?;
    let rows = reader.read_file(file_path).await?;
    tracing::info!(rows = rows.len(), "Loaded input table");

    Ok(rows)
}
