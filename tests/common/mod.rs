//! Scripted database double shared by the integration tests
//!
//! `FakeConnection` answers each statement from a script keyed by the exact statement
//! text and records every statement it receives, so tests can assert both on results and
//! on what reached the database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlgate::{
    CellValue, Connector, ExecSummary, ExecutionScope, Gateway, GatewayError, GatewaySettings,
    Result, RowSet, SqlConnection,
};

pub const EXPLAIN_COLUMNS: [&str; 12] = [
    "id",
    "select_type",
    "table",
    "partitions",
    "type",
    "possible_keys",
    "key",
    "key_len",
    "ref",
    "rows",
    "filtered",
    "Extra",
];

/// Scripted answer to one statement
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(RowSet),
    Exec(ExecSummary),
    Fail(String),
    /// Never answers within a test's lifetime
    Hang,
    /// Panics inside the statement
    Panic,
}

#[derive(Default)]
pub struct FakeConnection {
    script: Mutex<HashMap<String, Reply>>,
    log: Mutex<Vec<String>>,
    retargets: Mutex<Vec<String>>,
    interrupted: Mutex<Vec<String>>,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `statement` with `reply` from now on
    pub fn on(&self, statement: &str, reply: Reply) -> &Self {
        self.script.lock().unwrap().insert(statement.to_string(), reply);
        self
    }

    /// Every statement received so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn explain_count(&self) -> usize {
        self.statements().iter().filter(|s| s.starts_with("EXPLAIN ")).count()
    }

    pub fn retargets(&self) -> Vec<String> {
        self.retargets.lock().unwrap().clone()
    }

    /// Statements stopped server-side after their scope ended early
    pub fn interrupted(&self) -> Vec<String> {
        self.interrupted.lock().unwrap().clone()
    }

    async fn answer(&self, sql: &str) -> Reply {
        self.log.lock().unwrap().push(sql.to_string());
        let reply = self.script.lock().unwrap().get(sql).cloned();
        match reply {
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Reply::Fail("hang elapsed".to_string())
            }
            Some(Reply::Panic) => panic!("scripted panic for {sql}"),
            Some(reply) => reply,
            None => Reply::Fail(format!("unexpected statement: {sql}")),
        }
    }

    /// Answer within `scope`, recording an interruption like a server-side kill
    async fn bounded(&self, sql: &str, scope: ExecutionScope<'_>) -> Result<Reply> {
        let outcome = scope.run(async { Ok(self.answer(sql).await) }).await;
        if let Err(GatewayError::Cancelled(_)) = &outcome {
            self.interrupted.lock().unwrap().push(sql.to_string());
        }
        outcome
    }
}

impl SqlConnection for FakeConnection {
    async fn query(&self, sql: &str, scope: ExecutionScope<'_>) -> Result<RowSet> {
        match self.bounded(sql, scope).await? {
            Reply::Rows(rows) => Ok(rows),
            Reply::Exec(_) => Ok(RowSet::default()),
            Reply::Fail(message) => Err(GatewayError::query_failed(message)),
            Reply::Hang | Reply::Panic => unreachable!("resolved in answer"),
        }
    }

    async fn execute(&self, sql: &str, scope: ExecutionScope<'_>) -> Result<ExecSummary> {
        match self.bounded(sql, scope).await? {
            Reply::Exec(summary) => Ok(summary),
            Reply::Rows(_) => Ok(ExecSummary::default()),
            Reply::Fail(message) => Err(GatewayError::query_failed(message)),
            Reply::Hang | Reply::Panic => unreachable!("resolved in answer"),
        }
    }

    async fn retarget(&self, database: &str) -> Result<()> {
        self.retargets.lock().unwrap().push(database.to_string());
        Ok(())
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}

/// Hands out the same scripted connection and counts connection attempts
pub struct FakeConnector {
    connection: Arc<FakeConnection>,
    connects: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(connection: Arc<FakeConnection>) -> Self {
        Self { connection, connects: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

impl Connector for FakeConnector {
    type Connection = Arc<FakeConnection>;

    async fn connect(&self) -> Result<Arc<FakeConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.connection))
    }

    fn describe(&self) -> String {
        "fake://test".to_string()
    }
}

/// Gateway over a fresh scripted connection
pub fn gateway(settings: GatewaySettings) -> (Gateway<FakeConnector>, Arc<FakeConnection>) {
    let connection = FakeConnection::new();
    let gateway = Gateway::new(FakeConnector::new(Arc::clone(&connection)), settings);
    (gateway, connection)
}

pub fn guarded() -> GatewaySettings {
    GatewaySettings { explain_check: true, ..Default::default() }
}

/// Rows as the driver delivers them: text columns as raw bytes
pub fn rows(columns: &[&str], data: &[&[&str]]) -> Reply {
    Reply::Rows(RowSet::new(
        columns.iter().map(ToString::to_string).collect(),
        data.iter()
            .map(|row| row.iter().map(|cell| CellValue::Bytes(cell.as_bytes().to_vec())).collect())
            .collect(),
    ))
}

/// An `EXPLAIN` report with one plan row per label
pub fn explain(labels: &[&str]) -> Reply {
    Reply::Rows(RowSet::new(
        EXPLAIN_COLUMNS.iter().map(ToString::to_string).collect(),
        labels
            .iter()
            .map(|label| {
                let mut cells = vec![CellValue::Null; EXPLAIN_COLUMNS.len()];
                cells[0] = CellValue::Integer(1);
                cells[1] = CellValue::Bytes(label.as_bytes().to_vec());
                cells[2] = CellValue::from("t");
                cells[4] = CellValue::from("ALL");
                cells
            })
            .collect(),
    ))
}

pub fn exec(affected_rows: u64, last_insert_id: Option<u64>) -> Reply {
    Reply::Exec(ExecSummary { affected_rows, last_insert_id })
}
