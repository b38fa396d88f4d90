//! Schema Introspection
//!
//! Fixed statements that never go through the plan guard. Table and database names are
//! interpolated into the statement text as given.

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Gateway;
use crate::engine::{CellValue, Connector, SqlConnection};
use crate::error::{GatewayError, Result};
use crate::guard::StatementKind;

/// DDL columns of `SHOW CREATE TABLE`, for tables and views respectively
const DDL_COLUMNS: [&str; 2] = ["Create Table", "Create View"];

impl<K: Connector> Gateway<K> {
    /// `SHOW DATABASES` as CSV
    pub async fn list_databases(&self, cancel: &CancellationToken) -> Result<String> {
        self.query_text("SHOW DATABASES", StatementKind::Unchecked, cancel).await
    }

    /// `SHOW TABLES` of the active database as CSV
    pub async fn list_tables(&self, cancel: &CancellationToken) -> Result<String> {
        self.query_text("SHOW TABLES", StatementKind::Unchecked, cancel).await
    }

    /// The `CREATE` statement of a table or view, unmodified
    ///
    /// # Errors
    /// `NotFound` when the server returns no row.
    pub async fn describe_table(&self, name: &str, cancel: &CancellationToken) -> Result<String> {
        let result = self
            .fetch(&format!("SHOW CREATE TABLE {name}"), StatementKind::Unchecked, cancel)
            .await?;

        let Some(row) = result.rows.first() else {
            return Err(GatewayError::not_found(name));
        };

        DDL_COLUMNS
            .iter()
            .find_map(|column| row.get(*column))
            .and_then(CellValue::as_text)
            .ok_or_else(|| {
                GatewayError::query_failed(format!("no DDL column in SHOW CREATE TABLE {name}"))
            })
    }

    /// Make `name` the default database for every later operation
    ///
    /// # Errors
    /// `ConnectionFailed` ("failed to switch database: ...") unless the caller cancelled.
    pub async fn use_database(&self, name: &str, cancel: &CancellationToken) -> Result<String> {
        let switch = async {
            let conn = self.provider.acquire().await?;
            let scope = self.scope(cancel);
            conn.execute(&format!("USE `{name}`"), scope).await?;
            scope.run(conn.retarget(name)).await
        };

        match switch.await {
            Ok(()) => {
                info!(database = name, "switched active database");
                Ok(format!("successfully switched to database: {name}"))
            }
            Err(e @ GatewayError::Cancelled(_)) => Err(e),
            Err(e) => Err(GatewayError::connection_failed(format!(
                "failed to switch database: {e}"
            ))),
        }
    }
}
