//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Stdio-based server communication

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// MCP protocol revision implemented by this server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "mcp-decision-tree";

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Request identifier, `null` when the request could not be parsed.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub tools: ToolCapabilities,
}

#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Capabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Reads one JSON-RPC message per line from stdin and writes responses to
/// stdout. Logs go to stderr.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP decision tree server starting...");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            if let Some(response) = self.handle_line(trimmed).await {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle one raw protocol line. Returns `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                error!(error = %e, "Failed to parse request");
                Some(JsonRpcResponse::error(
                    None,
                    -32700,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Handle a single JSON-RPC request.
    /// Returns None for notifications (requests without id).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" | "notifications/cancelled" => {
                debug!(method = %request.method, "Received notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");
        JsonRpcResponse::success(id, json!({ "tools": tool_definitions() }))
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => {
                    info!(tool = %params.name, error = %e, "Tool call failed");
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text: format!("Error: {}", e),
                        },
                        Some(true),
                    )
                }
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool the server exposes, in listing order.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        tree_create_tool(),
        tree_get_tool(),
        tree_list_tool(),
        tree_save_tool(),
        tree_edit_tool(),
        tree_validate_tool(),
        tree_activate_tool(),
        tree_archive_tool(),
        tree_new_version_tool(),
        tree_route_tool(),
        strategy_save_tool(),
        strategy_get_tool(),
        strategy_evaluate_tool(),
        decision_run_tool(),
        catalog_get_tool(),
    ]
}

fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn node_array_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "description": description,
        "items": {
            "type": "object",
            "properties": {
                "node_key": { "type": "string" },
                "node_type": {
                    "type": "string",
                    "enum": ["condition", "strategy", "assessment", "scorecard_gate", "annotation"]
                },
                "label": { "type": "string" },
                "condition_type": {
                    "type": "string",
                    "enum": ["binary", "categorical", "numeric_range", "compound"]
                },
                "attribute": { "type": "string" },
                "branches": {
                    "type": ["array", "object"],
                    "description": "Ordered [{name, ...definition}] list, or a name to definition map"
                },
                "null_branch": { "type": "string" },
                "parent_node_key": { "type": "string" },
                "branch_label": { "type": "string" },
                "is_root": { "type": "boolean" },
                "strategy_id": { "type": "string" },
                "assessment_id": { "type": "string" },
                "scorecard_id": { "type": "string" },
                "compound_conditions": { "type": "array" },
                "compound_logic": { "type": "string", "enum": ["AND", "OR"] }
            },
            "required": ["node_key", "node_type"]
        }
    })
}

fn tree_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tree_id": { "type": "string", "description": "Decision tree ID" }
        },
        "required": ["tree_id"]
    })
}

fn application_schema() -> Value {
    json!({
        "type": "object",
        "description": "Application fields by name. Dotted names reach into nested objects; null counts as missing."
    })
}

fn tree_create_tool() -> Tool {
    tool(
        "tree_create",
        "Create a draft decision tree for a loan product, optionally with initial nodes.",
        json!({
            "type": "object",
            "properties": {
                "product_id": { "type": "string" },
                "name": { "type": "string" },
                "nodes": node_array_schema("Initial node records")
            },
            "required": ["product_id", "name"]
        }),
    )
}

fn tree_get_tool() -> Tool {
    tool(
        "tree_get",
        "Get a tree with its nodes, by tree_id or as the active tree of product_id.",
        json!({
            "type": "object",
            "properties": {
                "tree_id": { "type": "string" },
                "product_id": { "type": "string" }
            }
        }),
    )
}

fn tree_list_tool() -> Tool {
    tool(
        "tree_list",
        "List tree headers, newest first.",
        json!({
            "type": "object",
            "properties": {
                "product_id": { "type": "string", "description": "Only trees for this product" }
            }
        }),
    )
}

fn tree_save_tool() -> Tool {
    tool(
        "tree_save",
        "Replace the full node set of a draft tree. Returns the validation result of the saved nodes.",
        json!({
            "type": "object",
            "properties": {
                "tree_id": { "type": "string" },
                "nodes": node_array_schema("Complete node set")
            },
            "required": ["tree_id", "nodes"]
        }),
    )
}

fn tree_edit_tool() -> Tool {
    tool(
        "tree_edit",
        "Apply edit intents (add_node, update_node, remove_node, connect, relabel, disconnect) to a tree. Refused edits leave the tree unchanged and report a reason.",
        json!({
            "type": "object",
            "properties": {
                "tree_id": { "type": "string" },
                "intents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {
                                "type": "string",
                                "enum": ["add_node", "update_node", "remove_node", "connect", "relabel", "disconnect"]
                            }
                        },
                        "required": ["type"]
                    }
                },
                "save": {
                    "type": "boolean",
                    "description": "Persist the result (draft trees only)",
                    "default": false
                }
            },
            "required": ["tree_id", "intents"]
        }),
    )
}

fn tree_validate_tool() -> Tool {
    tool(
        "tree_validate",
        "Validate a stored tree or an unsaved node list. Errors block activation; warnings do not.",
        json!({
            "type": "object",
            "properties": {
                "tree_id": { "type": "string" },
                "nodes": node_array_schema("Nodes to validate instead of a stored tree")
            }
        }),
    )
}

fn tree_activate_tool() -> Tool {
    tool(
        "tree_activate",
        "Activate a valid draft tree. The product's previously active tree is archived.",
        tree_id_schema(),
    )
}

fn tree_archive_tool() -> Tool {
    tool("tree_archive", "Archive an active tree.", tree_id_schema())
}

fn tree_new_version_tool() -> Tool {
    tool(
        "tree_new_version",
        "Copy a tree's nodes into a new draft with the next version number.",
        tree_id_schema(),
    )
}

fn tree_route_tool() -> Tool {
    tool(
        "tree_route",
        "Route an application through a tree and return the path and terminal reached.",
        json!({
            "type": "object",
            "properties": {
                "tree_id": { "type": "string" },
                "product_id": { "type": "string" },
                "application": application_schema()
            },
            "required": ["application"]
        }),
    )
}

fn strategy_save_tool() -> Tool {
    tool(
        "strategy_save",
        "Create or replace a strategy with its rule lists and assessments. Duplicate rule ids and malformed thresholds are rejected.",
        json!({
            "type": "object",
            "properties": {
                "strategy": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "evaluation_mode": {
                            "type": "string",
                            "enum": ["sequential", "dual_path", "scoring", "hybrid"]
                        },
                        "knock_out_rules": { "type": "array" },
                        "overlay_rules": { "type": "array" },
                        "score_cutoffs": { "type": ["array", "object"] },
                        "base_score": { "type": "number" },
                        "dual_path": { "type": "object" },
                        "decision_tree_id": { "type": "string" },
                        "assessments": { "type": "array" }
                    },
                    "required": ["id"]
                }
            },
            "required": ["strategy"]
        }),
    )
}

fn strategy_get_tool() -> Tool {
    tool(
        "strategy_get",
        "Get a strategy by id.",
        json!({
            "type": "object",
            "properties": {
                "strategy_id": { "type": "string" }
            },
            "required": ["strategy_id"]
        }),
    )
}

fn strategy_evaluate_tool() -> Tool {
    tool(
        "strategy_evaluate",
        "Evaluate a strategy, or one of its assessments, against an application.",
        json!({
            "type": "object",
            "properties": {
                "strategy_id": { "type": "string" },
                "assessment_id": { "type": "string" },
                "application": application_schema()
            },
            "required": ["strategy_id", "application"]
        }),
    )
}

fn decision_run_tool() -> Tool {
    tool(
        "decision_run",
        "Route an application through a tree and evaluate the strategy or assessment it reaches.",
        json!({
            "type": "object",
            "properties": {
                "tree_id": { "type": "string" },
                "product_id": { "type": "string", "description": "Use the product's active tree" },
                "application": application_schema()
            },
            "required": ["application"]
        }),
    )
}

fn catalog_get_tool() -> Tool {
    tool(
        "catalog_get",
        "Get the attribute catalog used to seed branches and check attributes.",
        json!({ "type": "object", "properties": {} }),
    )
}
