//! Plan Guard: EXPLAIN-Verified Statement Intent
//!
//! Before a checked statement runs, the guard asks MySQL how it would execute it
//! (`EXPLAIN <statement>`) and compares the reported plan type (`select_type`) with the
//! caller's declared [`StatementKind`].
//!
//! # Classification Strategy
//! - Mutations (Insert/Update/Delete): positive match. The label must equal the verb.
//! - Reads (Select): negative match. Any label except `INSERT`, `UPDATE`, `DELETE` passes,
//!   since read plans report an open-ended vocabulary (`SIMPLE`, `PRIMARY`, `SUBQUERY`,
//!   `UNION`, `DERIVED`, ...).
//! - The report must contain exactly one plan row, whatever its content.
//! - Unchecked statements bypass the guard entirely.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::engine::{CellValue, ExecutionScope, RowSet, SqlConnection};
use crate::error::{GatewayError, Result};

/// Plan-type labels reported for mutating statements
const MUTATION_LABELS: [&str; 3] = ["INSERT", "UPDATE", "DELETE"];

/// Declared intent of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// No plan check, whatever the guard setting
    Unchecked,
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unchecked => "unchecked",
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether a plan with this `select_type` label is consistent with the declared kind
    #[must_use]
    pub fn accepts(&self, label: &str) -> bool {
        match self {
            Self::Unchecked => true,
            Self::Select => !MUTATION_LABELS.contains(&label),
            Self::Insert => label == "INSERT",
            Self::Update => label == "UPDATE",
            Self::Delete => label == "DELETE",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of MySQL's `EXPLAIN` output
///
/// Only `select_type` drives the decision; the other fields are kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRow {
    pub id: Option<String>,
    pub select_type: Option<String>,
    pub table: Option<String>,
    pub partitions: Option<String>,
    pub access_type: Option<String>,
    pub possible_keys: Option<String>,
    pub key: Option<String>,
    pub key_len: Option<String>,
    pub reference: Option<String>,
    pub rows: Option<String>,
    pub filtered: Option<String>,
    pub extra: Option<String>,
}

impl PlanRow {
    /// Read a plan row by column name; absent columns and NULLs become `None`
    #[must_use]
    pub fn from_cells(columns: &[String], cells: &[CellValue]) -> Self {
        let field = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .and_then(|idx| cells.get(idx))
                .and_then(CellValue::as_text)
        };

        Self {
            id: field("id"),
            select_type: field("select_type"),
            table: field("table"),
            partitions: field("partitions"),
            access_type: field("type"),
            possible_keys: field("possible_keys"),
            key: field("key"),
            key_len: field("key_len"),
            reference: field("ref"),
            rows: field("rows"),
            filtered: field("filtered"),
            extra: field("Extra"),
        }
    }
}

/// Statement sent to obtain the plan of `statement`
#[must_use]
pub fn explain_statement(statement: &str) -> String {
    format!("EXPLAIN {statement}")
}

/// Decide whether an `EXPLAIN` report allows running a statement of the expected kind
///
/// # Errors
/// - `PlanUnavailable` unless the report has exactly one row with a `select_type` label
/// - `PlanMismatch` if the label contradicts `expected`
pub fn classify(report: &RowSet, expected: StatementKind) -> Result<PlanRow> {
    let [cells] = report.rows.as_slice() else {
        debug!(rows = report.rows.len(), "EXPLAIN did not return exactly one plan row");
        return Err(GatewayError::PlanUnavailable);
    };

    let plan = PlanRow::from_cells(&report.columns, cells);
    let label = plan.select_type.as_deref().ok_or(GatewayError::PlanUnavailable)?;

    if expected.accepts(label) {
        Ok(plan)
    } else {
        Err(GatewayError::PlanMismatch)
    }
}

/// Pre-execution plan check, switched on or off once at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanGuard {
    enabled: bool,
}

impl PlanGuard {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Verify `statement` against its declared kind
    ///
    /// Returns without touching the database when the guard is off or the kind is
    /// `Unchecked`. The statement itself is never run here.
    pub async fn verify<C: SqlConnection>(
        &self,
        conn: &C,
        statement: &str,
        expected: StatementKind,
        scope: ExecutionScope<'_>,
    ) -> Result<()> {
        if !self.enabled || expected == StatementKind::Unchecked {
            return Ok(());
        }

        let report = conn.query(&explain_statement(statement), scope).await?;

        match classify(&report, expected) {
            Ok(plan) => {
                debug!(
                    kind = %expected,
                    select_type = plan.select_type.as_deref().unwrap_or_default(),
                    table = plan.table.as_deref().unwrap_or_default(),
                    access_type = plan.access_type.as_deref().unwrap_or_default(),
                    "query plan accepted"
                );
                Ok(())
            }
            Err(e) => {
                warn!(kind = %expected, code = e.error_code(), "refusing to execute: {e}");
                Err(e)
            }
        }
    }
}
