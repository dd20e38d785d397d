//! Reference MCP server exposing a single `add` tool over stdio.
//!
//! Used by the `mcpcalc-server` binary, by integration tests and as an
//! in-process peer for session tests. It speaks the same newline-delimited
//! JSON-RPC 2.0 as any MCP stdio server.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::models::wire::{
    CallToolResult, Implementation, InitializeResult, ListToolsResult, PROTOCOL_VERSION,
};
use crate::models::ToolDescriptor;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use crate::session::{read_message, write_message};

/// Name announced in `serverInfo`.
pub const SERVER_NAME: &str = "mcpcalc-server";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// MCP server that communicates over stdio using newline-delimited JSON-RPC 2.0.
pub struct McpServer {
    initialized: bool,
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl McpServer {
    pub fn new() -> Self {
        Self { initialized: false }
    }

    /// Serve requests until the reader reaches end of input.
    pub async fn serve<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let line = match read_message(&mut reader).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Unreadable message: {:#}", e);
                    let resp = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    write_response(&mut writer, &resp).await?;
                    continue;
                }
            };

            if let Some(resp) = self.handle_line(&line) {
                write_response(&mut writer, &resp).await?;
            }
        }

        info!("Client closed the connection");
        Ok(())
    }

    /// Handle one raw message. Returns the response to send, if any.
    pub fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                warn!("Parse error: {}", e);
                return Some(JsonRpcResponse::error(None, JsonRpcError::parse_error()));
            }
        };
        self.handle_request(req)
    }

    pub fn handle_request(&mut self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if req.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                req.id,
                JsonRpcError::invalid_request("Invalid Request"),
            ));
        }

        // Only `initialize` is allowed before the handshake completes.
        if !self.initialized && req.method != "initialize" {
            if req.is_notification() {
                return None;
            }
            return Some(JsonRpcResponse::error(
                req.id,
                JsonRpcError::invalid_request("Server not initialized"),
            ));
        }

        if req.is_notification() {
            debug!(method = %req.method, "notification");
            return None;
        }

        debug!(method = %req.method, "request");
        let outcome = match req.method.as_str() {
            "initialize" => {
                self.initialized = true;
                initialize_result()
            }
            "ping" => Ok(json!({})),
            "tools/list" => list_tools_result(),
            "tools/call" => call_tool_result(req.params.clone()),
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(req.id, result),
            Err(error) => JsonRpcResponse::error(req.id, error),
        })
    }
}

/// Tools this server exposes.
pub fn tools() -> Vec<ToolDescriptor> {
    vec![ToolDescriptor {
        name: "add".into(),
        description: "Add two numbers".into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "a": {"type": "number", "description": "First operand"},
                "b": {"type": "number", "description": "Second operand"}
            },
            "required": ["a", "b"]
        }),
    }]
}

fn initialize_result() -> Result<Value, JsonRpcError> {
    to_result(&InitializeResult {
        protocol_version: PROTOCOL_VERSION.into(),
        capabilities: json!({"tools": {}}),
        server_info: Implementation::new(SERVER_NAME, env!("CARGO_PKG_VERSION")),
    })
}

fn list_tools_result() -> Result<Value, JsonRpcError> {
    to_result(&ListToolsResult {
        tools: tools(),
        next_cursor: None,
    })
}

fn call_tool_result(params: Option<Value>) -> Result<Value, JsonRpcError> {
    let params: CallParams = params
        .ok_or_else(|| JsonRpcError::invalid_params("Missing params"))
        .and_then(|p| {
            serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {e}")))
        })?;

    let result = match params.name.as_str() {
        "add" => match add(&params.arguments) {
            Ok(sum) => CallToolResult::text(sum),
            Err(message) => CallToolResult::error(message),
        },
        other => CallToolResult::error(format!("Unknown tool: {other}")),
    };
    to_result(&result)
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| {
        JsonRpcError::new(
            crate::protocol::error_codes::INTERNAL_ERROR,
            format!("Internal error: {e}"),
        )
    })
}

/// Sum `a` and `b`. Integer operands give integer text.
fn add(arguments: &Map<String, Value>) -> Result<String, String> {
    let a = operand(arguments, "a")?;
    let b = operand(arguments, "b")?;

    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a
            .checked_add(b)
            .map(|sum| sum.to_string())
            .ok_or_else(|| "Integer overflow".to_string());
    }

    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => Ok((a + b).to_string()),
        _ => Err("Arguments 'a' and 'b' must be numbers".into()),
    }
}

fn operand<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a serde_json::Number, String> {
    match arguments.get(key) {
        Some(Value::Number(n)) => Ok(n),
        Some(other) => Err(format!("Argument '{key}' must be a number, got {other}")),
        None => Err(format!("Missing argument '{key}'")),
    }
}

async fn write_response<W>(writer: &mut W, resp: &JsonRpcResponse) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let out = serde_json::to_string(resp)?;
    write_message(writer, &out)
        .await
        .map_err(|e| ServerError::Transport(format!("{:#}", e)))
}
