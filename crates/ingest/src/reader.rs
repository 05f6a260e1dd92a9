use anyhow::{Context, Result, bail};
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::row::{Cell, Row};

pub struct TableReader {
    encodings: Vec<&'static Encoding>,
}

impl TableReader {
    pub fn new(encodings: Vec<&'static Encoding>) -> Self {
        Self { encodings }
    }

    /// Resolve encoding labels such as `utf-8` or `cp949`, keeping their order.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        let mut encodings = Vec::with_capacity(labels.len());
        for label in labels {
            let label = label.as_ref().trim();
            let encoding = resolve_label(label)
                .with_context(|| format!("Unknown input encoding: {}", label))?;
            encodings.push(encoding);
        }
        if encodings.is_empty() {
            bail!("At least one input encoding is required");
        }
        Ok(Self::new(encodings))
    }

    pub async fn read_file(&self, path: &Path) -> Result<Vec<Row>> {
        let bytes = fs::read(path)
            .await
            .context(format!("Failed to read file: {:?}", path))?;

        let (text, encoding) = self.decode(&bytes).with_context(|| {
            format!("Could not decode {:?} with any configured encoding", path)
        })?;
        info!(path = %path.display(), encoding = encoding.name(), "Decoded input table");

        parse_csv(&text)
    }

    /// Try each encoding in order; the first one that decodes without
    /// replacement characters wins.
    pub fn decode<'b>(&self, bytes: &'b [u8]) -> Result<(Cow<'b, str>, &'static Encoding)> {
        for &encoding in &self.encodings {
            let decoded = if encoding == UTF_8 {
                let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                std::str::from_utf8(body).ok().map(Cow::Borrowed)
            } else {
                encoding.decode_without_bom_handling_and_without_replacement(bytes)
            };

            match decoded {
                Some(text) => return Ok((text, encoding)),
                None => debug!(encoding = encoding.name(), "Input is not valid in this encoding"),
            }
        }

        let tried: Vec<&str> = self.encodings.iter().map(|e| e.name()).collect();
        bail!("Tried encodings: {}", tried.join(", "))
    }
}

/// WHATWG labels plus the Windows code page names the WHATWG list lacks.
fn resolve_label(label: &str) -> Option<&'static Encoding> {
    match label.to_ascii_lowercase().as_str() {
        "cp949" | "ms949" | "uhc" => Some(encoding_rs::EUC_KR),
        "cp932" | "ms932" => Some(encoding_rs::SHIFT_JIS),
        "cp936" | "ms936" => Some(encoding_rs::GBK),
        _ => Encoding::for_label(label.as_bytes()),
    }
}

impl Default for TableReader {
    fn default() -> Self {
        Self::new(vec![UTF_8, encoding_rs::EUC_KR])
    }
}

/// Parse CSV text with a header row into rows of named cells.
pub fn parse_csv(text: &str) -> Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV record at row {}", index + 1))?;

        let cells = headers
            .iter()
            .enumerate()
            .map(|(i, column)| Cell::new(column.clone(), record.get(i).map(str::to_string)))
            .collect();
        rows.push(Row::new(index, cells));
    }

    Ok(rows)
}
