//! Database Connection Traits and Core Types
//!
//! This module defines the abstractions the gateway executes statements through.
//!
//! # Shared Handle
//! Unlike a per-call connection, the gateway holds exactly one database handle for the
//! life of the process. [`ConnectionProvider`] creates it lazily on first use through a
//! [`Connector`] and hands out borrows of it afterwards. The handle itself must support
//! concurrent use by several in-flight operations (a pool, for the MySQL engine).
//!
//! # Engine Isolation
//! The MySQL engine lives in [`mysql`] behind the `mysql` feature. Tests substitute a
//! scripted connection by implementing [`Connector`] and [`SqlConnection`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{GatewayError, Result};

#[cfg(feature = "mysql")]
pub mod mysql;

/// One cell of a result row
///
/// Raw byte sequences are what the text protocol hands back for most columns; they are
/// normalized to [`CellValue::Text`] before anything caller-visible is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
}

impl CellValue {
    /// Decode raw bytes to text; every other variant is returned unchanged
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Self::Text(text),
                Err(e) => Self::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
            },
            other => other,
        }
    }

    /// Textual value, `None` for NULL
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.to_string()),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Default textual rendering: NULL renders as an empty string
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Raw result of a row-producing statement, as the driver reports it
///
/// Column names keep the cursor's order and may contain duplicates; each row holds
/// one cell per column, positionally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    /// Position of a column by exact name
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Driver report for a non-row-producing statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecSummary {
    pub affected_rows: u64,
    /// Generated identifier, if the server reported one
    pub last_insert_id: Option<u64>,
}

/// Materialized result of a row-producing statement
///
/// `columns` is ordered and de-duplicated; every row maps each column name to a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Result rows (each row is a map of column name to value)
    pub rows: Vec<HashMap<String, CellValue>>,
}

/// Outcome of a mutating statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    /// Number of rows affected
    pub rows_affected: u64,

    /// Generated identifier, only present for inserts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
}

/// A live, shareable database handle
///
/// Implementations must tolerate concurrent calls from several in-flight operations.
///
/// Statements run inside an [`ExecutionScope`]. When the scope ends a statement early
/// (cancellation or timeout), the implementation must stop it on the server before
/// returning, not merely stop waiting for it.
pub trait SqlConnection: Send + Sync {
    /// Run a statement and return every row it produces
    fn query(&self, sql: &str, scope: ExecutionScope<'_>) -> impl Future<Output = Result<RowSet>> + Send;

    /// Run a statement for its side effects
    fn execute(
        &self,
        sql: &str,
        scope: ExecutionScope<'_>,
    ) -> impl Future<Output = Result<ExecSummary>> + Send;

    /// Make `database` the default database for every later statement
    ///
    /// Called after a successful `USE`. Handles that multiplex several sessions use this
    /// to carry the switch over to sessions that did not run the `USE` themselves.
    fn retarget(&self, database: &str) -> impl Future<Output = Result<()>> + Send {
        let _ = database;
        async { Ok(()) }
    }

    /// Release the handle
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

impl<C: SqlConnection> SqlConnection for Arc<C> {
    fn query(&self, sql: &str, scope: ExecutionScope<'_>) -> impl Future<Output = Result<RowSet>> + Send {
        (**self).query(sql, scope)
    }

    fn execute(
        &self,
        sql: &str,
        scope: ExecutionScope<'_>,
    ) -> impl Future<Output = Result<ExecSummary>> + Send {
        (**self).execute(sql, scope)
    }

    fn retarget(&self, database: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).retarget(database)
    }

    async fn close(self) -> Result<()> {
        match Arc::try_unwrap(self) {
            Ok(inner) => inner.close().await,
            // Other owners keep the handle alive
            Err(_) => Ok(()),
        }
    }
}

/// Factory for the shared handle
pub trait Connector: Send + Sync {
    type Connection: SqlConnection;

    /// Establish a new handle
    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;

    /// Human-readable target, safe to log (no credentials)
    fn describe(&self) -> String {
        "database".to_string()
    }
}

/// Lazily created, memoized database handle
///
/// The first [`acquire`](Self::acquire) connects; later calls return the same handle.
/// Concurrent first calls connect only once.
pub struct ConnectionProvider<K: Connector> {
    connector: K,
    connection: OnceCell<K::Connection>,
}

impl<K: Connector> ConnectionProvider<K> {
    pub fn new(connector: K) -> Self {
        Self { connector, connection: OnceCell::new() }
    }

    /// Borrow the shared handle, connecting on first use
    ///
    /// # Errors
    /// `ConnectionFailed` if the handle cannot be established. A failed attempt is not
    /// memoized; the next call tries again.
    pub async fn acquire(&self) -> Result<&K::Connection> {
        self.connection
            .get_or_try_init(|| async {
                let target = self.connector.describe();
                debug!(%target, "establishing database connection");
                let connection = self.connector.connect().await?;
                info!(%target, "database connection established");
                Ok::<_, GatewayError>(connection)
            })
            .await
    }

    /// Whether the handle has been established
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Release the handle; a later `acquire` reconnects
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => {
                debug!(target = %self.connector.describe(), "closing database connection");
                connection.close().await
            }
            None => Ok(()),
        }
    }
}

/// Cancellation and timeout bounds for the statements of one invocation
#[derive(Debug, Clone, Copy)]
pub struct ExecutionScope<'a> {
    cancel: &'a CancellationToken,
    timeout: Option<Duration>,
}

impl<'a> ExecutionScope<'a> {
    pub const fn new(cancel: &'a CancellationToken, timeout: Option<Duration>) -> Self {
        Self { cancel, timeout }
    }

    /// Drive one statement to completion unless the caller cancels or it times out
    ///
    /// An early end only drops `statement`. Dropping a driver future does not stop the
    /// server; [`SqlConnection`] implementations follow a `Cancelled` result with their
    /// own server-side abort.
    pub async fn run<T, F>(&self, statement: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(GatewayError::cancelled("statement cancelled by caller"));
        }

        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, statement).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::cancelled(format!(
                        "statement exceeded timeout of {}ms",
                        limit.as_millis()
                    ))),
                },
                None => statement.await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                Err(GatewayError::cancelled("statement cancelled by caller"))
            }
            result = bounded => result,
        }
    }
}
