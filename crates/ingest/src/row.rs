use serde::{Deserialize, Serialize};

/// One record of the source table, cells kept in header order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Zero-based position in the source table.
    pub index: usize,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub column: String,
    /// `None` when the source cell was empty.
    pub value: Option<String>,
}

impl Row {
    pub fn new(index: usize, cells: Vec<Cell>) -> Self {
        Self { index, cells }
    }

    /// Build a row from `(column, value)` pairs. Blank values count as missing.
    pub fn from_pairs<I, K, V>(index: usize, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let cells = pairs
            .into_iter()
            .map(|(column, value)| Cell::new(column.into(), Some(value.into())))
            .collect();
        Self::new(index, cells)
    }

    /// Cells that carry a value, in column order.
    pub fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells
            .iter()
            .filter_map(|c| c.value.as_deref().map(|v| (c.column.as_str(), v)))
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|c| c.column == column)
            .and_then(|c| c.value.as_deref())
    }
}

impl Cell {
    pub fn new(column: String, value: Option<String>) -> Self {
        let value = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Self { column, value }
    }
}
