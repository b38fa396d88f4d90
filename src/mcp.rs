//! MCP (Model Context Protocol) Server
//!
//! This module implements an MCP server using manual JSON-RPC 2.0 over stdio.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (one JSON document per line)
//! - **Dependencies**: `serde_json`, `schemars` for tool input schemas, anyhow for I/O
//! - **Concurrency**: each `tools/call` runs in its own task against the shared gateway;
//!   responses are written as calls finish, so their order may differ from the requests
//! - **Shutdown**: after stdin closes, unfinished calls get a grace period and are then
//!   cancelled; a call task that panics is answered with an internal error
//!
//! # Supported Methods
//!
//! - `initialize`, `ping`, `tools/list`, `tools/call`
//! - `notifications/cancelled` cancels the in-flight call it names
//! - Every other notification is ignored
//!
//! # MCP Tools
//!
//! `list_database`, `list_table`, `desc_table`, `use_database`, `read_query` are always
//! available. `create_table`, `alter_table`, `write_query`, `update_query`,
//! `delete_query` are left out of the catalog in read-only mode.
//!
//! # Usage
//!
//! Configure in an MCP client:
//! ```json
//! {
//!   "mcpServers": {
//!     "sqlgate": {
//!       "command": "sqlgate",
//!       "args": ["--db", "shop", "--with-explain-check"]
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::Connector;
use crate::error::GatewayError;
use crate::gateway::Gateway;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// How long unfinished calls may keep running once stdin has closed
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request (a notification when `id` is absent)
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    #[serde(default)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn new(id: Value, outcome: std::result::Result<Value, JsonRpcError>) -> Self {
        match outcome {
            Ok(value) => Self { jsonrpc: "2.0".to_string(), id, result: Some(value), error: None },
            Err(error) => Self { jsonrpc: "2.0".to_string(), id, result: None, error: Some(error) },
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    fn parse_error(message: impl Into<String>) -> Self {
        Self::new(-32700, message)
    }

    fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Unknown method: {method}"))
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }
}

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

/// Text content block for MCP tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

impl TextContent {
    fn new(text: String) -> Self {
        Self { content_type: "text".to_string(), text }
    }
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    fn success(text: String) -> Self {
        Self { content: vec![TextContent::new(text)], is_error: false }
    }

    /// Tool-level failure: delivered as a result so the agent sees the message
    fn failure(error: &GatewayError) -> Self {
        Self { content: vec![TextContent::new(error.message())], is_error: true }
    }
}

// ============================================================================
// Tool Catalog
// ============================================================================

/// Arguments of the statement-taking tools
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryArgs {
    /// The SQL statement to run
    pub query: String,
}

/// Arguments of `desc_table`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TableNameArgs {
    /// Name of the table to describe
    pub name: String,
}

/// Arguments of `use_database`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DatabaseNameArgs {
    /// Name of the database to switch to
    pub name: String,
}

/// Tools without arguments
#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoArgs {}

/// Every operation the server can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    ListDatabase,
    ListTable,
    CreateTable,
    AlterTable,
    DescTable,
    UseDatabase,
    ReadQuery,
    WriteQuery,
    UpdateQuery,
    DeleteQuery,
}

impl Tool {
    pub const ALL: [Self; 10] = [
        Self::ListDatabase,
        Self::ListTable,
        Self::CreateTable,
        Self::AlterTable,
        Self::DescTable,
        Self::UseDatabase,
        Self::ReadQuery,
        Self::WriteQuery,
        Self::UpdateQuery,
        Self::DeleteQuery,
    ];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListDatabase => "list_database",
            Self::ListTable => "list_table",
            Self::CreateTable => "create_table",
            Self::AlterTable => "alter_table",
            Self::DescTable => "desc_table",
            Self::UseDatabase => "use_database",
            Self::ReadQuery => "read_query",
            Self::WriteQuery => "write_query",
            Self::UpdateQuery => "update_query",
            Self::DeleteQuery => "delete_query",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::ListDatabase => "List all databases on the MySQL server. Returns CSV.",
            Self::ListTable => "List all tables in the current database. Returns CSV.",
            Self::CreateTable => {
                "Create a new table in the MySQL server. Make sure the table and every column carry a proper comment."
            }
            Self::AlterTable => {
                "Alter an existing table in the MySQL server. Update the comment of every modified column. Never drop a table or an existing column!"
            }
            Self::DescTable => "Describe the structure of a table. Returns its CREATE TABLE statement.",
            Self::UseDatabase => {
                "Switch the current database. Runs a USE statement; every later call uses the new database."
            }
            Self::ReadQuery => {
                "Run a read-only SQL query. Know the table structure before writing WHERE conditions; call `desc_table` first if needed. Returns CSV."
            }
            Self::WriteQuery => {
                "Run an INSERT statement. Know the table structure first and make sure values match the column types. Returns the affected rows and the last insert id."
            }
            Self::UpdateQuery => {
                "Run an UPDATE statement. Know the table structure first and always include a WHERE condition; call `desc_table` first if needed."
            }
            Self::DeleteQuery => {
                "Run a DELETE statement. Know the table structure first and always include a WHERE condition; call `desc_table` first if needed."
            }
        }
    }

    /// Whether the tool can change data or schema
    #[must_use]
    pub const fn mutates(&self) -> bool {
        match self {
            Self::CreateTable
            | Self::AlterTable
            | Self::WriteQuery
            | Self::UpdateQuery
            | Self::DeleteQuery => true,
            Self::ListDatabase
            | Self::ListTable
            | Self::DescTable
            | Self::UseDatabase
            | Self::ReadQuery => false,
        }
    }

    fn input_schema(&self) -> Value {
        let schema = match self {
            Self::ListDatabase | Self::ListTable => schemars::schema_for!(NoArgs),
            Self::DescTable => schemars::schema_for!(TableNameArgs),
            Self::UseDatabase => schemars::schema_for!(DatabaseNameArgs),
            Self::CreateTable
            | Self::AlterTable
            | Self::ReadQuery
            | Self::WriteQuery
            | Self::UpdateQuery
            | Self::DeleteQuery => schemars::schema_for!(QueryArgs),
        };

        let mut value = serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(object) = value.as_object_mut() {
            object.remove("$schema");
            object.remove("title");
        }
        value
    }
}

/// Tools exposed in the given mode, in catalog order
#[must_use]
pub fn catalog(read_only: bool) -> Vec<Tool> {
    Tool::ALL.into_iter().filter(|tool| !(read_only && tool.mutates())).collect()
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> crate::error::Result<T> {
    // A missing `arguments` object is an empty one
    let arguments = if arguments.is_null() { Value::Object(serde_json::Map::new()) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| GatewayError::invalid_input(e.to_string()))
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: Value,
    #[serde(default)]
    reason: Option<String>,
}

// ============================================================================
// MCP Server
// ============================================================================

/// Serves the tool catalog of one gateway
pub struct McpServer<K: Connector> {
    gateway: Arc<Gateway<K>>,
    drain_grace: Duration,
}

impl<K: Connector> Clone for McpServer<K> {
    fn clone(&self) -> Self {
        Self { gateway: Arc::clone(&self.gateway), drain_grace: self.drain_grace }
    }
}

/// Tool calls spawned by the serve loop that have not been answered yet
#[derive(Default)]
struct InFlight {
    /// Cancellation handle per request id, keyed by its JSON text
    tokens: HashMap<String, CancellationToken>,
    /// Request id per call task
    requests: HashMap<task::Id, Value>,
}

impl InFlight {
    fn track(&mut self, task_id: task::Id, request_id: Value, cancel: CancellationToken) {
        self.tokens.insert(request_id.to_string(), cancel);
        self.requests.insert(task_id, request_id);
    }

    /// Forget a finished task and return the request it answers
    fn finish(&mut self, task_id: task::Id) -> Option<Value> {
        let request_id = self.requests.remove(&task_id)?;
        self.tokens.remove(&request_id.to_string());
        Some(request_id)
    }

    fn cancel_all(&self) {
        for token in self.tokens.values() {
            token.cancel();
        }
    }
}

impl<K: Connector + 'static> McpServer<K> {
    pub fn new(gateway: Arc<Gateway<K>>) -> Self {
        Self { gateway, drain_grace: DEFAULT_DRAIN_GRACE }
    }

    /// Time unfinished calls get after stdin closes before they are cancelled
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    fn exposes(&self, tool: Tool) -> bool {
        !(self.gateway.settings().read_only && tool.mutates())
    }

    /// Run the server until `reader` reaches EOF and every in-flight call has answered
    ///
    /// Calls still running [`drain_grace`](Self::with_drain_grace) after EOF are cancelled,
    /// so the loop always ends once its input does.
    ///
    /// # Protocol
    ///
    /// - Each request is a single line of JSON
    /// - Each response is a single line of JSON
    /// - Errors are returned as JSON-RPC error responses
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the stream fails.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut in_flight = InFlight::default();
        let mut calls: JoinSet<JsonRpcResponse> = JoinSet::new();
        let mut input_open = true;
        let mut drain_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                line = lines.next_line(), if input_open => {
                    match line.context("failed to read request")? {
                        Some(line) => {
                            if let Some(response) = self.dispatch(&line, &mut in_flight, &mut calls) {
                                write_response(&mut writer, &response).await?;
                            }
                        }
                        None => {
                            debug!(pending = calls.len(), "input closed");
                            input_open = false;
                            drain_deadline = Some(Instant::now() + self.drain_grace);
                        }
                    }
                }
                Some(joined) = calls.join_next_with_id(), if !calls.is_empty() => {
                    let response = match joined {
                        Ok((task_id, response)) => {
                            in_flight.finish(task_id);
                            response
                        }
                        Err(e) => {
                            error!("tool call task failed: {e}");
                            let request_id = in_flight.finish(e.id()).unwrap_or(Value::Null);
                            JsonRpcResponse::new(
                                request_id,
                                Err(JsonRpcError::internal(format!("tool call failed: {e}"))),
                            )
                        }
                    };
                    write_response(&mut writer, &response).await?;
                }
                () = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                    if drain_deadline.is_some() && !calls.is_empty() =>
                {
                    warn!(pending = calls.len(), "input closed, cancelling unfinished tool calls");
                    in_flight.cancel_all();
                    drain_deadline = None;
                }
                else => break,
            }
        }

        Ok(())
    }

    /// Handle one input line; returns the response to write now, if any
    ///
    /// `tools/call` requests are spawned and answered from the serve loop.
    fn dispatch(
        &self,
        line: &str,
        in_flight: &mut InFlight,
        calls: &mut JoinSet<JsonRpcResponse>,
    ) -> Option<JsonRpcResponse> {
        if line.trim().is_empty() {
            return None;
        }

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::new(
                    Value::Null,
                    Err(JsonRpcError::parse_error(format!("Parse error: {e}"))),
                ));
            }
        };

        let Some(id) = request.id else {
            self.handle_notification(&request.method, request.params, in_flight);
            return None;
        };

        if request.method == "tools/call" {
            let cancel = CancellationToken::new();
            let server = self.clone();
            let (request_id, call_cancel) = (id.clone(), cancel.clone());
            let handle = calls.spawn(async move {
                let outcome = server.call_tool(request.params, &call_cancel).await;
                JsonRpcResponse::new(request_id, outcome)
            });
            in_flight.track(handle.id(), id, cancel);
            return None;
        }

        Some(JsonRpcResponse::new(id, self.handle_request(&request.method, request.params)))
    }

    /// Answer the methods that need no database access
    fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        match method {
            "initialize" => Ok(handle_initialize(params)),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(self.handle_list_tools()),
            _ => Err(JsonRpcError::method_not_found(method)),
        }
    }

    fn handle_notification(
        &self,
        method: &str,
        params: Option<Value>,
        in_flight: &InFlight,
    ) {
        match method {
            "notifications/cancelled" => {
                let Ok(cancelled) = parse_params::<CancelledParams>(params) else {
                    debug!("ignoring malformed cancellation");
                    return;
                };
                let key = cancelled.request_id.to_string();
                match in_flight.tokens.get(&key) {
                    Some(token) => {
                        info!(request = %key, reason = cancelled.reason.as_deref().unwrap_or_default(), "cancelling tool call");
                        token.cancel();
                    }
                    None => debug!(request = %key, "cancellation for unknown or finished call"),
                }
            }
            _ => debug!(method, "ignoring notification"),
        }
    }

    fn handle_list_tools(&self) -> Value {
        let tools: Vec<Value> = catalog(self.gateway.settings().read_only)
            .into_iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.input_schema(),
                })
            })
            .collect();

        serde_json::json!({ "tools": tools })
    }

    /// Handle tools/call request
    async fn call_tool(
        &self,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(params)?;

        let tool = Tool::from_name(&params.name)
            .filter(|tool| self.exposes(*tool))
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name)))?;

        debug!(tool = tool.name(), "tool call started");
        let result = match self.run_tool(tool, params.arguments, cancel).await {
            Ok(text) => CallToolResult::success(text),
            Err(e) => {
                warn!(tool = tool.name(), code = e.error_code(), "tool call failed: {e}");
                CallToolResult::failure(&e)
            }
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }

    async fn run_tool(
        &self,
        tool: Tool,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> crate::error::Result<String> {
        let gateway = &self.gateway;

        match tool {
            Tool::ListDatabase => gateway.list_databases(cancel).await,
            Tool::ListTable => gateway.list_tables(cancel).await,
            Tool::DescTable => {
                let args: TableNameArgs = parse_args(arguments)?;
                gateway.describe_table(&args.name, cancel).await
            }
            Tool::UseDatabase => {
                let args: DatabaseNameArgs = parse_args(arguments)?;
                gateway.use_database(&args.name, cancel).await
            }
            Tool::CreateTable => {
                let args: QueryArgs = parse_args(arguments)?;
                gateway.create_table(&args.query, cancel).await
            }
            Tool::AlterTable => {
                let args: QueryArgs = parse_args(arguments)?;
                gateway.alter_table(&args.query, cancel).await
            }
            Tool::ReadQuery => {
                let args: QueryArgs = parse_args(arguments)?;
                gateway.read_query(&args.query, cancel).await
            }
            Tool::WriteQuery => {
                let args: QueryArgs = parse_args(arguments)?;
                gateway.write_query(&args.query, cancel).await
            }
            Tool::UpdateQuery => {
                let args: QueryArgs = parse_args(arguments)?;
                gateway.update_query(&args.query, cancel).await
            }
            Tool::DeleteQuery => {
                let args: QueryArgs = parse_args(arguments)?;
                gateway.delete_query(&args.query, cancel).await
            }
        }
    }
}

/// Handle MCP initialize request
///
/// Returns server capabilities and metadata.
fn handle_initialize(_params: Option<Value>) -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "sqlgate",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await.context("failed to write response")?;
    writer.flush().await.context("failed to flush response")?;
    Ok(())
}

/// Serve the gateway over the process's stdin and stdout
///
/// # Errors
///
/// Returns an error if stdio communication fails.
pub async fn serve_stdio<K: Connector + 'static>(gateway: Arc<Gateway<K>>) -> Result<()> {
    info!(protocol = PROTOCOL_VERSION, "serving MCP over stdio");
    McpServer::new(gateway).serve(tokio::io::stdin(), tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(Tool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(Tool::from_name("drop_everything"), None);
    }

    #[test]
    fn test_read_only_catalog() {
        let full = catalog(false);
        assert_eq!(full.len(), 10);

        let names: Vec<_> = catalog(true).iter().map(Tool::name).collect();
        assert_eq!(names, vec!["list_database", "list_table", "desc_table", "use_database", "read_query"]);
    }

    #[test]
    fn test_input_schemas() {
        let schema = Tool::ReadQuery.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], serde_json::json!(["query"]));
        assert!(schema.get("$schema").is_none());

        let schema = Tool::DescTable.input_schema();
        assert_eq!(schema["required"], serde_json::json!(["name"]));

        let schema = Tool::ListDatabase.input_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("required").is_none());
    }

    #[test]
    fn test_parse_args() {
        let args: QueryArgs = parse_args(serde_json::json!({"query": "SELECT 1"})).unwrap();
        assert_eq!(args.query, "SELECT 1");

        let _: NoArgs = parse_args(Value::Null).unwrap();

        let err = parse_args::<QueryArgs>(serde_json::json!({"sql": "SELECT 1"})).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        let err = parse_args::<QueryArgs>(serde_json::json!({"query": 5})).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_error_response_shape() {
        let response = JsonRpcResponse::new(serde_json::json!(7), Err(JsonRpcError::method_not_found("nope")));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }
}
