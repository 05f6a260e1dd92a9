use anyhow::{Result, bail};

use crate::row::Row;

/// A contiguous slice of the table handed to one extraction call.
#[derive(Debug, Clone, Copy)]
pub struct RowBatch<'a> {
    /// Index of the first row of this batch in the full table.
    pub offset: usize,
    pub rows: &'a [Row],
}

impl<'a> RowBatch<'a> {
    /// Offset one past the last row of this batch.
    pub fn end(&self) -> usize {
        self.offset + self.rows.len()
    }

    pub fn to_text(&self) -> String {
        batch_text(self.rows)
    }
}

pub struct Batcher {
    batch_size: usize,
}

impl Batcher {
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            bail!("Batch size must be at least 1");
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches covering `rows[start..]`, each `batch_size` rows long except possibly the last.
    pub fn batches<'a>(&self, rows: &'a [Row], start: usize) -> impl Iterator<Item = RowBatch<'a>> {
        let size = self.batch_size;
        (start..rows.len()).step_by(size).map(move |offset| RowBatch {
            offset,
            rows: &rows[offset..(offset + size).min(rows.len())],
        })
    }

    /// The single batch beginning at `offset`, if the table reaches that far.
    pub fn batch_at<'a>(&self, rows: &'a [Row], offset: usize) -> Option<RowBatch<'a>> {
        if offset >= rows.len() {
            return None;
        }
        Some(RowBatch {
            offset,
            rows: &rows[offset..(offset + self.batch_size).min(rows.len())],
        })
    }
}

/// Flatten rows into the text block sent to the extractor: a `[Row n]` header
/// per row, one `column: value` line per non-missing cell, blank line between rows.
pub fn batch_text(rows: &[Row]) -> String {
    let mut text = String::new();

    for row in rows {
        text.push_str(&format!("[Row {}]\n", row.index + 1));
        for (column, value) in row.present() {
            text.push_str(&format!("{}: {}\n", column, value));
        }
        text.push('\n');
    }

    text
}
