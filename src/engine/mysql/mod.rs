//! MySQL Connection Implementation
//!
//! This module implements [`Connector`] and [`SqlConnection`] for MySQL (including MariaDB).
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - The shared handle is a `mysql_async::Pool`, so concurrent operations each check out
//!   their own session
//! - Statements go over the text protocol; most cells therefore arrive as raw bytes
//! - A database switch rebuilds the pool with the new default database, because a `USE`
//!   only affects the single pooled session that ran it
//! - Binary-protocol DATE/TIME values are rendered in MySQL's own text format
//! - A statement cut short by its scope is stopped with `KILL QUERY` from a second
//!   session; a dropped `Conn` would otherwise wait in the pool for the statement to end

use mysql_async::{prelude::*, Conn, Opts, OptsBuilder, Pool, Row, Value};
use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::{CellValue, Connector, ExecSummary, ExecutionScope, RowSet, SqlConnection};
use crate::error::{GatewayError, Result};

/// Connects to MySQL from a `mysql://` connection URL
pub struct MySqlConnector {
    url: String,
    redacted: String,
}

impl MySqlConnector {
    /// `redacted` is the loggable form of `url`
    pub fn new(url: impl Into<String>, redacted: impl Into<String>) -> Self {
        Self { url: url.into(), redacted: redacted.into() }
    }
}

impl Connector for MySqlConnector {
    type Connection = MySqlConnection;

    async fn connect(&self) -> Result<MySqlConnection> {
        let opts = Opts::from_url(&self.url).map_err(|e| {
            GatewayError::connection_failed(format!("failed to establish database connection: {e}"))
        })?;

        let pool = open_pool(opts.clone()).await.map_err(|e| {
            GatewayError::connection_failed(format!("failed to establish database connection: {e}"))
        })?;

        Ok(MySqlConnection { target: RwLock::new(Target { opts, pool }) })
    }

    fn describe(&self) -> String {
        self.redacted.clone()
    }
}

/// Pool plus the options it was built from
#[derive(Clone)]
struct Target {
    opts: Opts,
    pool: Pool,
}

/// Shared MySQL handle backed by a connection pool
pub struct MySqlConnection {
    target: RwLock<Target>,
}

impl MySqlConnection {
    fn current(&self) -> Target {
        self.target.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run `work` on a pooled session within `scope`
    ///
    /// If the scope ends first, the statement still running on that session is killed
    /// before the `Cancelled` error is returned.
    async fn run_bounded<T, W, F>(&self, scope: ExecutionScope<'_>, work: W) -> Result<T>
    where
        W: FnOnce(Conn) -> F,
        F: Future<Output = Result<T>>,
    {
        let pool = self.current().pool;
        let conn = scope
            .run(async { pool.get_conn().await.map_err(|e| GatewayError::connection_failed(e.to_string())) })
            .await?;
        let session_id = conn.id();

        match scope.run(work(conn)).await {
            Err(e @ GatewayError::Cancelled(_)) => {
                kill_query(&pool, session_id).await;
                Err(e)
            }
            outcome => outcome,
        }
    }
}

/// Upper bound on the `KILL QUERY` round trip
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Stop whatever statement session `session_id` is running
///
/// Failures are logged; the caller already reports the cancellation.
async fn kill_query(pool: &Pool, session_id: u32) {
    let killed = tokio::time::timeout(KILL_TIMEOUT, async {
        let mut conn = pool.get_conn().await?;
        conn.query_drop(format!("KILL QUERY {session_id}")).await
    })
    .await;

    match killed {
        Ok(Ok(())) => info!(session_id, "killed interrupted statement"),
        Ok(Err(e)) => warn!(session_id, "failed to kill interrupted statement: {e}"),
        Err(_) => warn!(session_id, "timed out killing interrupted statement"),
    }
}

impl SqlConnection for MySqlConnection {
    async fn query(&self, sql: &str, scope: ExecutionScope<'_>) -> Result<RowSet> {
        self.run_bounded(scope, |mut conn| async move {
            let mut result = conn
                .query_iter(sql)
                .await
                .map_err(|e| GatewayError::query_failed(e.to_string()))?;

            // Column names come from the cursor so that empty result sets keep their header
            let columns: Vec<String> =
                result.columns_ref().iter().map(|col| col.name_str().to_string()).collect();

            let rows: Vec<Row> =
                result.collect().await.map_err(|e| GatewayError::query_failed(e.to_string()))?;

            // Discard any further result sets so the session returns to the pool clean
            result.drop_result().await.map_err(|e| GatewayError::query_failed(e.to_string()))?;

            let rows = rows.iter().map(row_to_cells).collect::<Result<Vec<_>>>()?;

            Ok(RowSet { columns, rows })
        })
        .await
    }

    async fn execute(&self, sql: &str, scope: ExecutionScope<'_>) -> Result<ExecSummary> {
        self.run_bounded(scope, |mut conn| async move {
            conn.query_drop(sql).await.map_err(|e| GatewayError::query_failed(e.to_string()))?;

            Ok(ExecSummary {
                affected_rows: conn.affected_rows(),
                last_insert_id: conn.last_insert_id(),
            })
        })
        .await
    }

    async fn retarget(&self, database: &str) -> Result<()> {
        let current = self.current();
        let opts: Opts = OptsBuilder::from_opts(current.opts).db_name(Some(database)).into();

        let pool = open_pool(opts.clone())
            .await
            .map_err(|e| GatewayError::connection_failed(e.to_string()))?;

        let previous = {
            let mut target = self.target.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *target, Target { opts, pool })
        };
        debug!(database, "connection pool retargeted");

        // Sessions still checked out from the old pool finish on their own
        tokio::spawn(async move {
            if let Err(e) = previous.pool.disconnect().await {
                warn!("failed to close previous connection pool: {e}");
            }
        });

        Ok(())
    }

    async fn close(self) -> Result<()> {
        let target = self.target.into_inner().unwrap_or_else(PoisonError::into_inner);
        target
            .pool
            .disconnect()
            .await
            .map_err(|e| GatewayError::connection_failed(format!("failed to disconnect: {e}")))
    }
}

/// Build a pool and prove the target is reachable with one round trip
async fn open_pool(opts: Opts) -> std::result::Result<Pool, mysql_async::Error> {
    let pool = Pool::new(opts);

    let verified = async {
        let mut conn = pool.get_conn().await?;
        conn.ping().await
    }
    .await;

    match verified {
        Ok(()) => Ok(pool),
        Err(e) => {
            if let Err(close_err) = pool.disconnect().await {
                debug!("failed to close unverified pool: {close_err}");
            }
            Err(e)
        }
    }
}

/// Convert a MySQL row to positional cells
fn row_to_cells(row: &Row) -> Result<Vec<CellValue>> {
    (0..row.len())
        .map(|idx| {
            row.as_ref(idx).map(value_to_cell).ok_or_else(|| {
                GatewayError::query_failed(format!("Failed to get value at index {idx}"))
            })
        })
        .collect()
}

/// Convert MySQL value to a cell
fn value_to_cell(value: &Value) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,

        // Decoded to text by the read path
        Value::Bytes(bytes) => CellValue::Bytes(bytes.clone()),

        Value::Int(i) => CellValue::Integer(*i),

        // Values above i64::MAX keep their exact decimal form
        Value::UInt(u) => i64::try_from(*u)
            .map_or_else(|_| CellValue::Text(u.to_string()), CellValue::Integer),

        Value::Float(f) => CellValue::Float(f64::from(*f)),

        Value::Double(d) => CellValue::Float(*d),

        Value::Date(year, month, day, hour, minute, second, micro) => {
            CellValue::Text(format_datetime(*year, *month, *day, *hour, *minute, *second, *micro))
        }

        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            CellValue::Text(format_time(*is_negative, *days, *hours, *minutes, *seconds, *micros))
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`, fractional part only when non-zero
#[allow(clippy::too_many_arguments)]
fn format_datetime(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8, micro: u32) -> String {
    let mut text =
        format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
    if micro != 0 {
        text.push_str(&format!(".{micro:06}"));
    }
    text
}

/// `[-]HHH:MM:SS[.ffffff]` with days folded into hours
fn format_time(is_negative: bool, days: u32, hours: u8, minutes: u8, seconds: u8, micros: u32) -> String {
    let sign = if is_negative { "-" } else { "" };
    let total_hours = days * 24 + u32::from(hours);
    let mut text = format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
    if micros != 0 {
        text.push_str(&format!(".{micros:06}"));
    }
    text
}
