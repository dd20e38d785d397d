//! Data models shared by the session, the bridge and the UI.
//!
//! `ToolDescriptor` and `ToolResult` are the client-facing shapes; the
//! `wire` submodule holds the MCP payloads exactly as they travel over
//! JSON-RPC and converts them into the client-facing types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool advertised by the server during discovery.
///
/// Descriptors are immutable once received. Two `tools/list` calls against
/// an unchanged server produce descriptors that compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique within a session.
    pub name: String,
    /// Human-readable description (empty when the server sends none).
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the accepted arguments.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Names of the arguments declared in the input schema, sorted by name.
    ///
    /// JSON object keys are not kept in document order, so the schema's own
    /// ordering is lost.
    pub fn argument_names(&self) -> Vec<String> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// A single tool invocation.
///
/// `call_tool` takes the call by value, so a `ToolCall` is sent once and
/// cannot be reused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    /// Add an argument (builder style).
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Short `name(k=v, ...)` rendering used in logs and the activity view.
    pub fn label(&self) -> String {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}({})", self.name, args.join(", "))
    }
}

/// Outcome of a tool call as reported by the remote tool.
///
/// A remote tool reporting failure (for example an unknown tool name) is a
/// normal outcome, not a transport failure, so it lives here rather than in
/// `SessionError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResult {
    Content(String),
    Error(String),
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error(_))
    }

    /// The text payload regardless of variant.
    pub fn text(&self) -> &str {
        match self {
            ToolResult::Content(text) | ToolResult::Error(text) => text,
        }
    }
}

impl From<wire::CallToolResult> for ToolResult {
    fn from(result: wire::CallToolResult) -> Self {
        let text = result
            .content
            .iter()
            .filter_map(|block| match block {
                wire::ContentBlock::Text { text } => Some(text.as_str()),
                wire::ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error.unwrap_or(false) {
            ToolResult::Error(text)
        } else {
            ToolResult::Content(text)
        }
    }
}

/// MCP payloads as they appear inside JSON-RPC messages.
pub mod wire {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    use super::ToolDescriptor;

    /// Protocol revision the client asks for and the server answers with.
    pub const PROTOCOL_VERSION: &str = "2024-11-05";

    /// Name/version pair used for both `clientInfo` and `serverInfo`.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Implementation {
        pub name: String,
        #[serde(default)]
        pub version: String,
    }

    impl Implementation {
        pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                version: version.into(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InitializeParams {
        pub protocol_version: String,
        pub capabilities: Value,
        pub client_info: Implementation,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InitializeResult {
        pub protocol_version: String,
        #[serde(default)]
        pub capabilities: Value,
        pub server_info: Implementation,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListToolsResult {
        pub tools: Vec<ToolDescriptor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub next_cursor: Option<String>,
    }

    /// A content block inside a tool result. Only text is rendered by this
    /// client; other block types are accepted and skipped.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "lowercase")]
    pub enum ContentBlock {
        Text {
            text: String,
        },
        #[serde(other)]
        Other,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CallToolResult {
        pub content: Vec<ContentBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub is_error: Option<bool>,
    }

    impl CallToolResult {
        pub fn text(text: impl Into<String>) -> Self {
            Self {
                content: vec![ContentBlock::Text { text: text.into() }],
                is_error: None,
            }
        }

        pub fn error(text: impl Into<String>) -> Self {
            Self {
                content: vec![ContentBlock::Text { text: text.into() }],
                is_error: Some(true),
            }
        }
    }
}
