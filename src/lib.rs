//! sqlgate - Guarded MySQL Gateway for AI Agents
//!
//! sqlgate exposes a fixed set of MySQL operations as MCP tools. An optional plan guard
//! asks MySQL to `EXPLAIN` each statement first and refuses to run it when the plan
//! contradicts the caller's declared intent (a "read" that would insert, an "update"
//! that is really a select, ...).
//!
//! # Core Principles
//! - One shared connection pool, opened on first use
//! - Read-only mode removes every mutating tool from the catalog
//! - Results are plain text: CSV for rows, a one-line summary for mutations
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`engine`] - Connection traits, cell values and the MySQL driver
//! - [`guard`] - Statement kinds and the EXPLAIN-based plan guard
//! - [`gateway`] - Read/write executors and schema introspection
//! - [`output`] - CSV encoding and mutation summaries
//! - [`config`] - Configuration resolution
//! - [`mcp`] - MCP server (manual JSON-RPC 2.0 over stdio)

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod mcp;
pub mod output;

// Re-export commonly used types for convenience
pub use engine::{
    CellValue, ConnectionProvider, Connector, ExecSummary, ExecutionScope, MutationOutcome,
    RowSet, SqlConnection, TabularResult,
};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewaySettings};
pub use guard::{PlanGuard, PlanRow, StatementKind};
pub use output::encode_csv;
