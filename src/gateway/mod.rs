//! Guarded Execution Gateway
//!
//! The gateway owns the shared database handle and runs every operation as one call
//! chain: optional plan check, the statement itself, then materialization.
//!
//! # Operations
//! - Reads return a [`TabularResult`] (and CSV text through [`Gateway::read_query`])
//! - Writes return a [`MutationOutcome`]; only inserts carry a generated identifier
//! - Schema introspection lives in [`introspect`]
//!
//! Every operation takes a [`CancellationToken`]. Cancelling it, or exceeding the
//! configured statement timeout, fails the operation with `Cancelled` once the driver
//! has stopped the in-flight statement on the server.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{
    CellValue, ConnectionProvider, Connector, ExecutionScope, MutationOutcome, RowSet,
    SqlConnection, TabularResult,
};
use crate::error::{GatewayError, Result};
use crate::guard::{PlanGuard, StatementKind};

pub mod introspect;

/// Behaviour switches fixed at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Hide every mutating operation
    pub read_only: bool,

    /// Run the plan guard before checked statements
    pub explain_check: bool,

    /// Upper bound for each statement, including the `EXPLAIN`
    pub statement_timeout: Option<Duration>,
}

/// Entry point for every database operation
pub struct Gateway<K: Connector> {
    provider: ConnectionProvider<K>,
    guard: PlanGuard,
    settings: GatewaySettings,
}

impl<K: Connector> Gateway<K> {
    /// Build a gateway; no connection is opened until the first operation
    pub fn new(connector: K, settings: GatewaySettings) -> Self {
        Self {
            provider: ConnectionProvider::new(connector),
            guard: PlanGuard::new(settings.explain_check),
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Whether the shared handle has been opened yet
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.provider.is_connected()
    }

    /// Close the shared handle
    pub async fn shutdown(mut self) -> Result<()> {
        self.provider.shutdown().await
    }

    fn scope<'a>(&self, cancel: &'a CancellationToken) -> ExecutionScope<'a> {
        ExecutionScope::new(cancel, self.settings.statement_timeout)
    }

    /// Read executor: verify, run, materialize
    ///
    /// # Errors
    /// Connection, plan, query and cancellation failures; no partial result is returned.
    pub async fn fetch(
        &self,
        statement: &str,
        kind: StatementKind,
        cancel: &CancellationToken,
    ) -> Result<TabularResult> {
        let conn = self.provider.acquire().await?;
        let scope = self.scope(cancel);

        self.guard.verify(conn, statement, kind, scope).await?;
        let rows = conn.query(statement, scope).await?;

        debug!(%kind, columns = rows.columns.len(), rows = rows.rows.len(), "statement returned rows");
        materialize(rows)
    }

    /// Write executor: verify, run, report
    ///
    /// # Errors
    /// Connection, plan, query and cancellation failures.
    pub async fn execute(
        &self,
        statement: &str,
        kind: StatementKind,
        cancel: &CancellationToken,
    ) -> Result<MutationOutcome> {
        let conn = self.provider.acquire().await?;
        let scope = self.scope(cancel);

        self.guard.verify(conn, statement, kind, scope).await?;
        let summary = conn.execute(statement, scope).await?;

        let last_insert_id = match kind {
            // The protocol reports 0 when nothing was generated
            StatementKind::Insert => Some(summary.last_insert_id.unwrap_or(0)),
            StatementKind::Unchecked
            | StatementKind::Select
            | StatementKind::Update
            | StatementKind::Delete => None,
        };

        info!(%kind, rows_affected = summary.affected_rows, "statement executed");
        Ok(MutationOutcome { rows_affected: summary.affected_rows, last_insert_id })
    }

    async fn query_text(
        &self,
        statement: &str,
        kind: StatementKind,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.fetch(statement, kind, cancel).await?.to_csv()
    }

    async fn exec_text(
        &self,
        statement: &str,
        kind: StatementKind,
        cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(self.execute(statement, kind, cancel).await?.to_string())
    }

    /// Run a read statement and return CSV
    pub async fn read_query(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        self.query_text(query, StatementKind::Select, cancel).await
    }

    /// Run an insert; the summary includes the generated identifier
    pub async fn write_query(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        self.exec_text(query, StatementKind::Insert, cancel).await
    }

    pub async fn update_query(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        self.exec_text(query, StatementKind::Update, cancel).await
    }

    pub async fn delete_query(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        self.exec_text(query, StatementKind::Delete, cancel).await
    }

    /// DDL runs unchecked: `EXPLAIN` has no plan for it
    pub async fn create_table(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        self.exec_text(query, StatementKind::Unchecked, cancel).await
    }

    pub async fn alter_table(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        self.exec_text(query, StatementKind::Unchecked, cancel).await
    }
}

/// Turn positional rows into header-keyed rows
///
/// Repeated column names keep their first header position; the rightmost value wins in
/// the row map. Bytes are decoded to text.
///
/// # Errors
/// `QueryFailed` when a row's cell count differs from the column count.
fn materialize(rows: RowSet) -> Result<TabularResult> {
    let RowSet { columns: raw_columns, rows: raw_rows } = rows;

    let mut columns: Vec<String> = Vec::with_capacity(raw_columns.len());
    for name in &raw_columns {
        if !columns.contains(name) {
            columns.push(name.clone());
        }
    }

    let rows = raw_rows
        .into_iter()
        .enumerate()
        .map(|(index, cells)| {
            if cells.len() != raw_columns.len() {
                return Err(GatewayError::query_failed(format!(
                    "row {index} has {} cells for {} columns",
                    cells.len(),
                    raw_columns.len()
                )));
            }
            let mut row: HashMap<String, CellValue> = HashMap::with_capacity(columns.len());
            for (name, cell) in raw_columns.iter().zip(cells) {
                row.insert(name.clone(), cell.normalized());
            }
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TabularResult { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_materialize_decodes_bytes() {
        let rows = RowSet::new(
            vec!["id".to_string(), "name".to_string()],
            vec![vec![CellValue::Integer(1), CellValue::Bytes(b"alice".to_vec())]],
        );
        let result = materialize(rows).unwrap();

        assert_eq!(result.columns, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(result.rows[0]["name"], CellValue::Text("alice".to_string()));
        assert_eq!(result.rows[0]["id"], CellValue::Integer(1));
    }

    #[test]
    fn test_materialize_duplicate_columns() {
        let rows = RowSet::new(
            vec!["a".to_string(), "b".to_string(), "a".to_string()],
            vec![vec![CellValue::from("first"), CellValue::from("mid"), CellValue::from("last")]],
        );
        let result = materialize(rows).unwrap();

        assert_eq!(result.columns, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.rows[0]["a"], CellValue::from("last"));
        assert_eq!(result.to_csv().unwrap(), "a,b\nlast,mid\n");
    }

    #[test]
    fn test_materialize_empty_result_keeps_header() {
        let result = materialize(RowSet::new(vec!["Database".to_string()], Vec::new())).unwrap();
        assert_eq!(result.to_csv().unwrap(), "Database\n");
    }

    #[test]
    fn test_materialize_rejects_ragged_rows() {
        let short = RowSet::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![CellValue::from("x"), CellValue::from("y")], vec![CellValue::from("x")]],
        );
        let err = materialize(short).unwrap_err();
        assert_eq!(err.error_code(), "QUERY_FAILED");
        assert_eq!(err.message(), "row 1 has 1 cells for 2 columns");

        let long = RowSet::new(
            vec!["a".to_string()],
            vec![vec![CellValue::from("x"), CellValue::from("y")]],
        );
        assert!(matches!(materialize(long), Err(GatewayError::QueryFailed(_))));
    }
}
