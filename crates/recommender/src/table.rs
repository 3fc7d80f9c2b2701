use serde::{Deserialize, Serialize};

use crate::errors::DataError;

pub const USER_ID: &str = "user_id";
pub const ITEM_ID: &str = "item_id";
pub const INTERACTION: &str = "interaction";

/// Columns every interaction log must carry, in canonical order.
pub const REQUIRED_COLUMNS: [&str; 3] = [USER_ID, ITEM_ID, INTERACTION];

/// One (user, item, signal) event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: u64,
    pub item_id: u64,
    pub interaction: f64,
}

impl InteractionRecord {
    pub fn new(user_id: u64, item_id: u64, interaction: f64) -> Self {
        Self {
            user_id,
            item_id,
            interaction,
        }
    }
}

/// Column-named numeric table as read from the raw log.
///
/// The table itself does not enforce the interaction schema: columns may be
/// missing or extra. [`crate::loader::validate_schema`] and
/// [`crate::matrix::InteractionMatrix::build`] decide what is acceptable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InteractionTable {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl InteractionTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Canonical three-column table from typed records.
    pub fn from_records(records: &[InteractionRecord]) -> Self {
        let mut table = Self::new(REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect());
        table.rows = records
            .iter()
            .map(|r| vec![r.user_id as f64, r.item_id as f64, r.interaction])
            .collect();
        table
    }

    /// Convenience for tests and fixtures: `(user, item, signal)` tuples.
    pub fn from_triples(triples: &[(u64, u64, f64)]) -> Self {
        let records: Vec<InteractionRecord> = triples
            .iter()
            .map(|&(u, i, v)| InteractionRecord::new(u, i, v))
            .collect();
        Self::from_records(&records)
    }

    pub fn push_row(&mut self, row: Vec<f64>) -> Result<(), DataError> {
        if row.len() != self.columns.len() {
            return Err(DataError::Format {
                source_name: "table".to_string(),
                reason: format!(
                    "row has {} fields, header has {}",
                    row.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Required columns absent from this table.
    pub fn missing_columns(&self) -> Vec<String> {
        REQUIRED_COLUMNS
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy of the table without `name`; used to exercise schema failures.
    pub fn without_column(&self, name: &str) -> Self {
        let Some(drop_idx) = self.column_index(name) else {
            return self.clone();
        };
        let columns = self
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != drop_idx)
            .map(|(_, c)| c.clone())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(i, _)| *i != drop_idx)
                    .map(|(_, v)| *v)
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }
}
