//! MCP session: handshake, tool discovery, tool invocation and close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::transport::{spawn, ServerTarget};
use crate::config::ClientConfig;
use crate::models::wire::{
    CallToolResult, Implementation, InitializeParams, InitializeResult, ListToolsResult,
    PROTOCOL_VERSION,
};
use crate::models::{ToolCall, ToolDescriptor, ToolResult};

/// Name announced in `clientInfo`.
pub const CLIENT_NAME: &str = "mcpcalc";

/// How long a closed server gets to exit on its own before it is killed.
const CHILD_EXIT_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on `tools/list` pages, guarding against a server that keeps
/// returning cursors.
const MAX_TOOL_PAGES: usize = 100;

/// Session-level failures.
///
/// A tool reporting failure is not one of these; see [`ToolResult::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The server could not be started or reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Malformed or unexpected message, including a failed handshake.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No response within the request timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The session closed while the request was pending, or before it was sent.
    #[error("Server disconnected")]
    Disconnected,

    /// JSON-RPC error reply to a non-tool method.
    #[error("Server error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i32,
        /// Error message
        message: String,
    },
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                SessionError::Connection(err.to_string())
            }
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => {
                SessionError::Disconnected
            }
            _ => SessionError::Protocol(err.to_string()),
        }
    }
}

/// An initialized MCP session.
///
/// A `Session` only exists after a successful `initialize` handshake, so
/// every `list_tools`/`call_tool` runs against an initialized server. Calls
/// take `&self` and may overlap; responses are matched by correlation id.
///
/// # Lifecycle
///
/// - `connect()` / `from_streams()` - open the transport and handshake
/// - `list_tools()` / `call_tool()` - exchanges
/// - `close()` - release the transport (first caller wins)
pub struct Session {
    dispatcher: Dispatcher,
    child: AsyncMutex<Option<Child>>,
    released: AtomicBool,
    server_info: Implementation,
    protocol_version: String,
    label: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.label)
            .field("server_info", &self.server_info)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Launch the server described by `target` and perform the handshake.
    ///
    /// # Errors
    ///
    /// - `Connection` if the process cannot be started
    /// - `Protocol` if the handshake reply is an error or malformed
    /// - `Timeout` / `Disconnected` if the server does not answer
    ///
    /// On error the process has already been released.
    pub async fn connect(target: &ServerTarget, config: &ClientConfig) -> Result<Self, SessionError> {
        let transport = spawn(target)?;
        let dispatcher = Dispatcher::new(transport.stdout, transport.stdin, config.request_timeout);
        Self::open(dispatcher, Some(transport.child), target.to_string()).await
    }

    /// Open a session over arbitrary byte streams (in-process servers, tests).
    pub async fn from_streams<R, W>(
        reader: R,
        writer: W,
        config: &ClientConfig,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let dispatcher = Dispatcher::new(BufReader::new(reader), writer, config.request_timeout);
        Self::open(dispatcher, None, "in-process server".into()).await
    }

    async fn open(
        dispatcher: Dispatcher,
        child: Option<Child>,
        label: String,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            dispatcher,
            child: AsyncMutex::new(child),
            released: AtomicBool::new(false),
            server_info: Implementation::default(),
            protocol_version: String::new(),
            label,
        };

        if let Err(e) = session.initialize().await {
            warn!("Handshake with {} failed: {}", session.label, e);
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn initialize(&mut self) -> Result<(), SessionError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: json!({}),
            client_info: Implementation::new(CLIENT_NAME, env!("CARGO_PKG_VERSION")),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| SessionError::Protocol(format!("Failed to encode initialize: {e}")))?;

        let raw = self
            .dispatcher
            .request("initialize", params)
            .await
            .map_err(|e| match e {
                SessionError::Remote { code, message } => SessionError::Protocol(format!(
                    "Server rejected initialize ({code}): {message}"
                )),
                other => other,
            })?;

        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| SessionError::Protocol(format!("Malformed initialize response: {e}")))?;

        if result.protocol_version != PROTOCOL_VERSION {
            warn!(
                "Server answered with protocol version {} (requested {})",
                result.protocol_version, PROTOCOL_VERSION
            );
        }

        self.dispatcher
            .notify("notifications/initialized", json!({}))
            .await?;

        info!(
            "Connected to {} {} via {}",
            result.server_info.name, result.server_info.version, self.label
        );
        self.server_info = result.server_info;
        self.protocol_version = result.protocol_version;
        Ok(())
    }

    /// Fetch the server's tool list, following pagination.
    ///
    /// Every call queries the server; nothing is cached.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let raw = self.dispatcher.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(raw)
                .map_err(|e| SessionError::Protocol(format!("Malformed tools/list response: {e}")))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    debug!("Discovered {} tool(s)", tools.len());
                    return Ok(tools);
                }
            }
        }

        Err(SessionError::Protocol(format!(
            "tools/list did not finish after {MAX_TOOL_PAGES} pages"
        )))
    }

    /// Invoke a tool.
    ///
    /// A tool-level failure (including a JSON-RPC error reply to
    /// `tools/call`) is `Ok(ToolResult::Error(..))`; only transport problems
    /// are `Err`.
    pub async fn call_tool(&self, call: ToolCall) -> Result<ToolResult, SessionError> {
        let label = call.label();
        let params = json!({
            "name": call.name,
            "arguments": Value::Object(call.arguments),
        });

        debug!("Calling {}", label);
        match self.dispatcher.request("tools/call", params).await {
            Ok(raw) => {
                let result: CallToolResult = serde_json::from_value(raw).map_err(|e| {
                    SessionError::Protocol(format!("Malformed tools/call response: {e}"))
                })?;
                let result = ToolResult::from(result);
                debug!("{} -> {:?}", label, result);
                Ok(result)
            }
            Err(SessionError::Remote { code, message }) => {
                debug!("{} rejected by server ({}): {}", label, code, message);
                Ok(ToolResult::Error(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Release the transport.
    ///
    /// Pending calls fail with `Disconnected`, stdin is closed and the server
    /// gets a short grace period to exit before it is killed. Returns `true`
    /// for the caller that performed the release and `false` for every
    /// other call, including concurrent ones.
    pub async fn close(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("Closing session with {}", self.label);
        self.dispatcher.shutdown().await;

        let child = self.child.lock().await.take();
        if let Some(child) = child {
            release_child(child).await;
        }
        true
    }

    /// Resolves once the session has closed, either through `close()` or
    /// because the server went away.
    pub async fn closed(&self) {
        self.dispatcher.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }
}

async fn release_child(mut child: Child) {
    match timeout(CHILD_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!("Server process exited: {}", status),
        Ok(Err(e)) => warn!("Failed to wait for server process: {}", e),
        Err(_) => {
            warn!("Server did not exit after stdin closed, killing it");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill server process: {}", e);
            }
        }
    }
}
