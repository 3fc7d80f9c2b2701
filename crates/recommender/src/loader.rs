//! Reading and schema-checking raw interaction logs.
//!
//! The loader only turns CSV text into a numeric [`InteractionTable`]; it does
//! not know about users or items. Schema checks live in [`validate_schema`].

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use tracing::{debug, error, info};

use crate::errors::DataError;
use crate::table::InteractionTable;

/// Load a CSV log from disk.
pub fn load_table(path: impl AsRef<Path>) -> Result<InteractionTable, DataError> {
    let path = path.as_ref();
    let source_name = path.display().to_string();

    let file = File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            error!(path = %source_name, "File not found, check the data path");
            DataError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            error!(path = %source_name, error = %e, "Failed to open interaction log");
            DataError::Format {
                source_name: source_name.clone(),
                reason: e.to_string(),
            }
        }
    })?;

    let table = load_table_from_reader(file, &source_name)?;
    info!(
        path = %source_name,
        rows = table.len(),
        columns = table.columns().len(),
        "Interaction log loaded"
    );
    Ok(table)
}

/// Load a CSV log from any byte stream. `source_name` is used in errors and logs.
pub fn load_table_from_reader<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<InteractionTable, DataError> {
    let format_error = |reason: String| DataError::Format {
        source_name: source_name.to_string(),
        reason,
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| format_error(format!("header: {e}")))?
        .clone();

    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        error!(source = source_name, "Loaded data is empty");
        return Err(DataError::Empty {
            source_name: source_name.to_string(),
        });
    }

    let columns: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    for (i, name) in columns.iter().enumerate() {
        if columns[..i].contains(name) {
            return Err(format_error(format!("duplicate column '{name}'")));
        }
    }

    let mut table = InteractionTable::new(columns.clone());
    for (row_no, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| format_error(format!("row {}: {e}", row_no + 1)))?;

        let mut row = Vec::with_capacity(columns.len());
        for (field, column) in record.iter().zip(columns.iter()) {
            let value: f64 = field.parse().map_err(|_| {
                format_error(format!(
                    "row {}: column '{column}' has non-numeric value '{field}'",
                    row_no + 1
                ))
            })?;
            if !value.is_finite() {
                return Err(format_error(format!(
                    "row {}: column '{column}' has non-finite value '{field}'",
                    row_no + 1
                )));
            }
            row.push(value);
        }
        table.push_row(row).map_err(|e| match e {
            DataError::Format { reason, .. } => format_error(format!("row {}: {reason}", row_no + 1)),
            other => other,
        })?;
    }

    if table.is_empty() {
        error!(source = source_name, "Loaded data is empty");
        return Err(DataError::Empty {
            source_name: source_name.to_string(),
        });
    }

    debug!(source = source_name, rows = table.len(), "Parsed interaction rows");
    Ok(table)
}

/// Check that the table carries `user_id`, `item_id`, `interaction` and has rows.
pub fn validate_schema(table: &InteractionTable) -> Result<(), DataError> {
    let missing = table.missing_columns();
    if !missing.is_empty() {
        error!(
            missing = ?missing,
            "Invalid data format: user_id, item_id and interaction columns are required"
        );
        return Err(DataError::Schema { missing });
    }
    if table.is_empty() {
        return Err(DataError::Empty {
            source_name: "table".to_string(),
        });
    }

    let extra: Vec<&String> = table
        .columns()
        .iter()
        .filter(|c| !crate::table::REQUIRED_COLUMNS.contains(&c.as_str()))
        .collect();
    if !extra.is_empty() {
        debug!(extra = ?extra, "Ignoring extra columns");
    }
    Ok(())
}
