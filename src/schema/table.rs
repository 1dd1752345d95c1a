//! The draw table — an owned, append-only column store.
//!
//! Built fresh per draw call (or copied from caller data) and handed back
//! by value; never shared between calls.

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("column '{column}' has {len} rows but the table has {rows}")]
    LengthMismatch {
        column: String,
        len: usize,
        rows: usize,
    },
}

/// Row-indexed tabular container: one named `f64` column per produced alias,
/// columns kept in insertion order, all columns the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawTable {
    columns: IndexMap<String, Vec<f64>>,
}

impl DrawTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero-row table with the given column set, in order.
    pub fn with_empty_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = names.into_iter().map(|n| (n.into(), Vec::new())).collect();
        DrawTable { columns }
    }

    pub fn nrows(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Insert (or overwrite) a column. The length must match the existing
    /// row count unless the table holds no columns yet.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), TableError> {
        let name = name.into();
        if !self.columns.is_empty() && values.len() != self.nrows() && !self.columns.contains_key(&name)
        {
            return Err(TableError::LengthMismatch {
                column: name,
                len: values.len(),
                rows: self.nrows(),
            });
        }
        if let Some(existing) = self.columns.get(&name) {
            if values.len() != existing.len() {
                return Err(TableError::LengthMismatch {
                    column: name,
                    len: values.len(),
                    rows: existing.len(),
                });
            }
        }
        self.columns.insert(name, values);
        Ok(())
    }
}
