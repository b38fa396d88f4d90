//! Text Output for Tool Results
//!
//! Row-producing operations return CSV; mutating operations return a one-line summary.
//!
//! # Output Contract
//! - CSV: header row first, one record per row, `,` delimiter, `\n` terminator, quoting
//!   only where a value contains a delimiter, a quote or a line break
//! - Cells render with their default text form; NULL renders as an empty field
//! - A record that is a single empty field is written as `""`, so it is not read back as
//!   a blank line
//! - Mutations: `<n> rows affected` plus `, last insert id: <id>` for inserts

use std::collections::HashMap;
use std::fmt;

use crate::engine::{CellValue, MutationOutcome, TabularResult};
use crate::error::{GatewayError, Result};

/// Encode headers and rows as CSV text
///
/// Every header is looked up in every row; a missing key fails the whole encoding
/// rather than producing an empty cell.
///
/// # Errors
/// `EncodingFailed` on a missing key or a writer failure.
pub fn encode_csv(headers: &[String], rows: &[HashMap<String, CellValue>]) -> Result<String> {
    // A header-less record is an empty line
    if headers.is_empty() {
        return Ok("\n".repeat(rows.len() + 1));
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b',')
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer
        .write_record(headers)
        .map_err(|e| GatewayError::encoding_failed(format!("failed to write header: {e}")))?;

    let mut record = Vec::with_capacity(headers.len());
    for row in rows {
        record.clear();
        for header in headers {
            let value = row.get(header).ok_or_else(|| {
                GatewayError::encoding_failed(format!("key '{header}' not found in map"))
            })?;
            record.push(value.to_string());
        }
        writer
            .write_record(&record)
            .map_err(|e| GatewayError::encoding_failed(format!("failed to write row: {e}")))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| GatewayError::encoding_failed(format!("failed to flush CSV writer: {e}")))?;

    String::from_utf8(bytes)
        .map_err(|e| GatewayError::encoding_failed(format!("CSV output is not UTF-8: {e}")))
}

impl TabularResult {
    /// Encode this result as CSV
    ///
    /// # Errors
    /// See [`encode_csv`].
    pub fn to_csv(&self) -> Result<String> {
        encode_csv(&self.columns, &self.rows)
    }

    /// Number of materialized rows
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl fmt::Display for MutationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_insert_id {
            Some(id) => write!(f, "{} rows affected, last insert id: {id}", self.rows_affected),
            None => write!(f, "{} rows affected", self.rows_affected),
        }
    }
}
