//! Bridge between the synchronous UI thread and the async MCP session.
//!
//! The async bridge (BridgeHandle) spawns a dedicated worker thread that runs
//! a current-thread tokio runtime and owns the [`Session`], allowing the main
//! UI thread to remain responsive at 60fps while requests are in flight.
//!
//! The UI enqueues requests with `try_send` (never blocks) and drains
//! responses once per frame with `poll_response`. Every response carries the
//! `request_id` or call sequence number of the request that produced it, so
//! the UI can discard stale completions.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError, Receiver, Sender};

use crate::config::ClientConfig;
use crate::models::{ToolCall, ToolDescriptor, ToolResult};
use crate::session::{ServerTarget, Session, SessionError};

// =============================================================================
// Service Trait for Dependency Injection
// =============================================================================

/// Trait for session bridge operations.
///
/// This trait abstracts the worker thread to enable:
/// - Dependency injection for testing with mock implementations
/// - Testing the UI state machine without spawning a server
pub trait BridgeService {
    /// Launch the server at `server`, handshake and discover its tools.
    fn request_connect(&self, server: PathBuf, request_id: usize) -> Result<()>;

    /// Re-run tool discovery on the current session.
    fn request_list_tools(&self, request_id: usize) -> Result<()>;

    /// Invoke a tool. `seq` is echoed back in the response.
    fn request_call_tool(&self, call: ToolCall, seq: u64) -> Result<()>;

    /// Close the current session.
    fn request_disconnect(&self, request_id: usize) -> Result<()>;

    /// Take the next completed response, if any (non-blocking).
    fn poll_response(&mut self) -> Option<BridgeResponse>;
}

// =============================================================================
// Async Bridge Types
// =============================================================================

/// Request types for the bridge worker thread.
#[derive(Debug)]
pub enum BridgeRequest {
    /// Graceful shutdown signal - worker closes the session and exits.
    Shutdown,
    Connect {
        server: PathBuf,
        request_id: usize,
    },
    ListTools {
        request_id: usize,
    },
    CallTool {
        call: ToolCall,
        seq: u64,
    },
    Disconnect {
        request_id: usize,
    },
}

/// What the UI learns about a freshly opened session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub server_name: String,
    pub server_version: String,
    pub tools: Vec<ToolDescriptor>,
}

/// Response types from the bridge worker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeResponse {
    Connected {
        request_id: usize,
        result: Result<ConnectionInfo, SessionError>,
    },
    Tools {
        request_id: usize,
        result: Result<Vec<ToolDescriptor>, SessionError>,
    },
    ToolCalled {
        seq: u64,
        /// `name(k=v, ...)` rendering of the call, for the activity log.
        label: String,
        result: Result<ToolResult, SessionError>,
    },
    Disconnected {
        request_id: usize,
    },
    /// The server went away without being asked to.
    SessionLost {
        reason: String,
    },
}

/// Maximum number of pending requests/responses before backpressure.
const CHANNEL_BOUND: usize = 64;

/// Handle to the bridge worker thread.
///
/// Requests are sent via a bounded channel to a dedicated worker thread,
/// and responses are polled from another bounded channel.
///
/// When dropped, sends a Shutdown request and waits briefly for the worker
/// to exit.
pub struct BridgeHandle {
    request_tx: Sender<BridgeRequest>,
    response_rx: Receiver<BridgeResponse>,
    /// Handle to the worker thread for graceful shutdown.
    worker_handle: Option<thread::JoinHandle<()>>,
}

impl BridgeHandle {
    /// Create a new bridge handle by spawning a worker thread.
    pub fn spawn(config: ClientConfig) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<BridgeRequest>(CHANNEL_BOUND);
        let (response_tx, response_rx) = mpsc::channel::<BridgeResponse>(CHANNEL_BOUND);

        let worker_handle = thread::Builder::new()
            .name("mcpcalc-bridge".into())
            .spawn(move || bridge_worker_loop(config, request_rx, response_tx))
            .context("Failed to spawn bridge worker thread")?;

        Ok(Self {
            request_tx,
            response_rx,
            worker_handle: Some(worker_handle),
        })
    }

    /// Send a request to the bridge worker using try_send (non-blocking).
    ///
    /// Returns an error if the channel is full (backend busy) or disconnected.
    fn try_send_request(&self, request: BridgeRequest) -> Result<()> {
        match self.request_tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(anyhow::anyhow!("Backend busy - try again in a moment"))
            }
            Err(TrySendError::Closed(_)) => Err(anyhow::anyhow!("Bridge worker disconnected")),
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        // The worker may have already exited.
        let _ = self.request_tx.try_send(BridgeRequest::Shutdown);

        // Brief wait for quick shutdown, then detach if worker is slow.
        // Drop must not block the UI thread on a hung server.
        if let Some(handle) = self.worker_handle.take() {
            const QUICK_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);
            const MAX_QUICK_CHECKS: u32 = 10; // 100ms total for quick shutdown

            for _ in 0..MAX_QUICK_CHECKS {
                if handle.is_finished() {
                    if let Err(e) = handle.join() {
                        tracing::warn!("Bridge worker thread panicked during shutdown: {:?}", e);
                    } else {
                        tracing::debug!("Bridge worker thread shut down gracefully");
                    }
                    return;
                }
                std::thread::sleep(QUICK_CHECK_INTERVAL);
            }

            tracing::debug!(
                "Bridge worker still running after {}ms - detaching for background cleanup",
                QUICK_CHECK_INTERVAL.as_millis() * MAX_QUICK_CHECKS as u128
            );
        }
    }
}

impl BridgeService for BridgeHandle {
    fn request_connect(&self, server: PathBuf, request_id: usize) -> Result<()> {
        self.try_send_request(BridgeRequest::Connect { server, request_id })
    }

    fn request_list_tools(&self, request_id: usize) -> Result<()> {
        self.try_send_request(BridgeRequest::ListTools { request_id })
    }

    fn request_call_tool(&self, call: ToolCall, seq: u64) -> Result<()> {
        self.try_send_request(BridgeRequest::CallTool { call, seq })
    }

    fn request_disconnect(&self, request_id: usize) -> Result<()> {
        self.try_send_request(BridgeRequest::Disconnect { request_id })
    }

    fn poll_response(&mut self) -> Option<BridgeResponse> {
        match self.response_rx.try_recv() {
            Ok(response) => Some(response),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

fn bridge_worker_loop(
    config: ClientConfig,
    request_rx: Receiver<BridgeRequest>,
    response_tx: Sender<BridgeResponse>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start bridge runtime: {}", e);
            return;
        }
    };

    runtime.block_on(Worker::new(config, response_tx).run(request_rx));
    tracing::info!("Bridge worker exited");
}

/// Owns the session on the worker thread.
struct Worker {
    config: ClientConfig,
    session: Option<Arc<Session>>,
    response_tx: Sender<BridgeResponse>,
}

impl Worker {
    fn new(config: ClientConfig, response_tx: Sender<BridgeResponse>) -> Self {
        Self {
            config,
            session: None,
            response_tx,
        }
    }

    async fn run(mut self, mut request_rx: Receiver<BridgeRequest>) {
        loop {
            let request = match self.session.clone() {
                Some(session) => tokio::select! {
                    request = request_rx.recv() => request,
                    _ = session.closed() => {
                        self.on_session_lost().await;
                        continue;
                    }
                },
                None => request_rx.recv().await,
            };

            // UI dropped the handle without a Shutdown.
            let Some(request) = request else { break };

            match request {
                BridgeRequest::Shutdown => {
                    tracing::info!("Bridge worker received shutdown signal, exiting");
                    break;
                }
                BridgeRequest::Connect { server, request_id } => {
                    self.connect(server, request_id).await
                }
                BridgeRequest::ListTools { request_id } => self.spawn_list_tools(request_id),
                BridgeRequest::CallTool { call, seq } => self.spawn_call_tool(call, seq),
                BridgeRequest::Disconnect { request_id } => self.disconnect(request_id).await,
            }
        }

        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// Connect and discover inline, so requests queued behind a connect
    /// always see its session.
    async fn connect(&mut self, server: PathBuf, request_id: usize) {
        if let Some(previous) = self.session.take() {
            tracing::info!("Replacing existing session");
            previous.close().await;
        }

        let result = self.open_session(server).await;
        let result = match result {
            Ok((session, info)) => {
                self.session = Some(session);
                Ok(info)
            }
            Err(e) => Err(e),
        };
        self.respond(BridgeResponse::Connected { request_id, result })
            .await;
    }

    async fn open_session(
        &self,
        server: PathBuf,
    ) -> Result<(Arc<Session>, ConnectionInfo), SessionError> {
        let target = ServerTarget::resolve(&server, &self.config)?;
        let session = Session::connect(&target, &self.config).await?;

        match session.list_tools().await {
            Ok(tools) => {
                let info = ConnectionInfo {
                    server_name: session.server_info().name.clone(),
                    server_version: session.server_info().version.clone(),
                    tools,
                };
                Ok((Arc::new(session), info))
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    fn spawn_list_tools(&self, request_id: usize) {
        let session = self.session.clone();
        let tx = self.response_tx.clone();
        tokio::spawn(async move {
            let result = match session {
                Some(session) => session.list_tools().await,
                None => Err(SessionError::Disconnected),
            };
            let _ = tx.send(BridgeResponse::Tools { request_id, result }).await;
        });
    }

    fn spawn_call_tool(&self, call: ToolCall, seq: u64) {
        let session = self.session.clone();
        let tx = self.response_tx.clone();
        tokio::spawn(async move {
            let label = call.label();
            let result = match session {
                Some(session) => session.call_tool(call).await,
                None => Err(SessionError::Disconnected),
            };
            let _ = tx
                .send(BridgeResponse::ToolCalled { seq, label, result })
                .await;
        });
    }

    async fn disconnect(&mut self, request_id: usize) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.respond(BridgeResponse::Disconnected { request_id })
            .await;
    }

    async fn on_session_lost(&mut self) {
        if let Some(session) = self.session.take() {
            // Reap the exited process.
            session.close().await;
        }
        tracing::warn!("Server closed the session");
        self.respond(BridgeResponse::SessionLost {
            reason: "Server closed the connection".into(),
        })
        .await;
    }

    async fn respond(&self, response: BridgeResponse) {
        if self.response_tx.send(response).await.is_err() {
            tracing::debug!("UI dropped the response channel");
        }
    }
}
