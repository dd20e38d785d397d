//! Application state management.
//!
//! This module contains the central `App` struct that holds all application
//! state, and the methods that move the connection state machine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeHandle, BridgeResponse, BridgeService, ConnectionInfo};
use crate::config::ClientConfig;
use crate::models::{ToolCall, ToolDescriptor, ToolResult};
use crate::session::SessionError;

pub use crate::state::{Action, AppTab, CalculatorField, CalculatorForm, ConnectionState};

/// Maximum number of activity log lines kept in memory.
const MAX_LOG_LINES: usize = 500;

/// A tool call result currently on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedResult {
    pub seq: u64,
    pub label: String,
    pub outcome: Result<ToolResult, String>,
}

/// Main application state.
pub struct App<'a> {
    /// Flag to exit the application.
    pub should_quit: bool,

    /// Currently active tab.
    pub current_tab: AppTab,

    /// Last non-fatal error message (displayed in status bar, auto-clears).
    pub last_error: Option<String>,

    /// Timestamp when last_error was set (for auto-clear after 5 seconds).
    last_error_time: Option<Instant>,

    /// Dirty flag - set when UI needs to be redrawn.
    needs_redraw: bool,

    // ===== Session State =====
    pub connection: ConnectionState,

    /// `name version` of the connected server.
    pub server_label: Option<String>,

    /// Tools discovered on the current session.
    pub tools: Vec<ToolDescriptor>,

    /// Selected row in the tools table.
    pub tools_selected: usize,

    // ===== Calculator Tab State =====
    pub form: CalculatorForm<'a>,

    /// Newest call result that has been displayed.
    pub displayed: Option<DisplayedResult>,

    // ===== Log Tab State =====
    /// Timestamped activity log.
    pub log_lines: Vec<String>,

    /// Scroll offset for log view.
    pub log_scroll: usize,

    /// Keep the log view pinned to the newest line.
    pub log_follow: bool,

    // ===== Bridge =====
    /// Uses `Box<dyn BridgeService>` for dependency injection and testing.
    bridge: Box<dyn BridgeService>,

    /// Counter for connect/list/disconnect request IDs.
    next_request_id: usize,

    pending_connect: Option<usize>,
    pending_tools: Option<usize>,
    pending_disconnect: Option<usize>,

    /// Sequence number for the next tool call. Starts at 1.
    next_seq: u64,

    /// Sequence number of the newest displayed completion. Anything older
    /// is stale.
    last_displayed_seq: u64,

    /// Calls awaiting completion, keyed by sequence number.
    in_flight: BTreeMap<u64, Instant>,

    /// How long before the UI abandons an in-flight call.
    call_watchdog: Duration,

    /// Set once the user asked to quit; the app exits after the session closes.
    quit_requested: bool,
    closing_since: Option<Instant>,
}

impl<'a> App<'a> {
    /// Grace period on top of the request timeout before the UI gives up on
    /// a call the worker never answered.
    const WATCHDOG_SLACK: Duration = Duration::from_secs(5);

    /// How long quit waits for the session to close before exiting anyway.
    const QUIT_GRACE: Duration = Duration::from_secs(3);

    /// Create the application with a real bridge worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge worker thread fails to spawn.
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let bridge: Box<dyn BridgeService> = Box::new(
            BridgeHandle::spawn(config.clone()).context("Failed to spawn bridge worker thread")?,
        );
        Ok(Self::with_bridge(bridge, &config))
    }

    /// Create the application around any bridge implementation.
    pub fn with_bridge(bridge: Box<dyn BridgeService>, config: &ClientConfig) -> Self {
        Self {
            should_quit: false,
            current_tab: AppTab::Calculator,
            last_error: None,
            last_error_time: None,
            needs_redraw: true, // Initial draw required
            connection: ConnectionState::Disconnected,
            server_label: None,
            tools: Vec::new(),
            tools_selected: 0,
            form: CalculatorForm::default(),
            displayed: None,
            log_lines: Vec::new(),
            log_scroll: 0,
            log_follow: true,
            bridge,
            next_request_id: 0,
            pending_connect: None,
            pending_tools: None,
            pending_disconnect: None,
            next_seq: 1,
            last_displayed_seq: 0,
            in_flight: BTreeMap::new(),
            call_watchdog: config.request_timeout + Self::WATCHDOG_SLACK,
            quit_requested: false,
            closing_since: None,
        }
    }

    // ===== Dirty Flag (Rendering Optimization) =====

    /// Mark UI as needing redraw.
    pub fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// Check if redraw is needed and reset the flag.
    pub fn take_needs_redraw(&mut self) -> bool {
        std::mem::take(&mut self.needs_redraw)
    }

    // ===== Error Handling =====

    /// Set a non-fatal error to display in the UI.
    /// Errors auto-clear after 5 seconds.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.push_log(format!("error: {}", message));
        self.last_error = Some(message);
        self.last_error_time = Some(Instant::now());
        self.mark_dirty();
    }

    /// Clear the current error.
    pub fn clear_error(&mut self) {
        if self.last_error.is_some() {
            self.last_error = None;
            self.last_error_time = None;
            self.mark_dirty();
        }
    }

    /// Check if error should auto-clear (after 5 seconds).
    pub fn maybe_clear_error(&mut self) {
        const ERROR_DISPLAY_DURATION: Duration = Duration::from_secs(5);

        if let Some(error_time) = self.last_error_time {
            if error_time.elapsed() > ERROR_DISPLAY_DURATION {
                self.clear_error();
            }
        }
    }

    // ===== Activity Log =====

    /// Append a timestamped line to the activity log.
    pub fn push_log(&mut self, message: impl AsRef<str>) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.log_lines.push(format!("{} {}", stamp, message.as_ref()));
        if self.log_lines.len() > MAX_LOG_LINES {
            let excess = self.log_lines.len() - MAX_LOG_LINES;
            self.log_lines.drain(..excess);
            self.log_scroll = self.log_scroll.saturating_sub(excess);
        }
        self.mark_dirty();
    }

    pub fn scroll_log_up(&mut self) {
        self.log_follow = false;
        self.log_scroll = self.log_scroll.saturating_sub(1);
        self.mark_dirty();
    }

    pub fn scroll_log_down(&mut self) {
        self.log_follow = false;
        if self.log_scroll + 1 < self.log_lines.len() {
            self.log_scroll += 1;
        }
        self.mark_dirty();
    }

    pub fn scroll_log_top(&mut self) {
        self.log_follow = false;
        self.log_scroll = 0;
        self.mark_dirty();
    }

    pub fn scroll_log_bottom(&mut self) {
        self.log_follow = true;
        self.mark_dirty();
    }

    // ===== MVU/Reducer: Centralized State Update =====

    /// Process an action and update application state.
    pub fn update(&mut self, action: Action) {
        match action {
            Action::TabNext => self.set_tab(self.current_tab.next()),
            Action::TabPrev => self.set_tab(self.current_tab.prev()),
            Action::TabSet(tab) => self.set_tab(tab),

            Action::FieldNext => {
                self.form.focus_next();
                self.mark_dirty();
            }
            Action::FieldPrev => {
                self.form.focus_prev();
                self.mark_dirty();
            }
            Action::Connect => self.request_connect(),
            Action::Calculate => self.request_calculate(),
            Action::Disconnect => self.request_disconnect(),

            Action::ToolsRefresh => self.request_refresh_tools(),
            Action::ToolSelectNext => {
                if self.tools_selected + 1 < self.tools.len() {
                    self.tools_selected += 1;
                    self.mark_dirty();
                }
            }
            Action::ToolSelectPrev => {
                if self.tools_selected > 0 {
                    self.tools_selected -= 1;
                    self.mark_dirty();
                }
            }

            Action::LogScrollUp => self.scroll_log_up(),
            Action::LogScrollDown => self.scroll_log_down(),
            Action::LogScrollTop => self.scroll_log_top(),
            Action::LogScrollBottom => self.scroll_log_bottom(),

            Action::ErrorClear => self.clear_error(),
            Action::Quit => self.request_quit(),
        }
    }

    /// Set the current tab directly.
    pub fn set_tab(&mut self, tab: AppTab) {
        if self.current_tab != tab {
            self.current_tab = tab;
            self.mark_dirty();
        }
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection != state {
            debug!("Connection state {:?} -> {:?}", self.connection, state);
            self.connection = state;
            self.mark_dirty();
        }
    }

    // ===== Requests (Async Bridge) =====

    /// Generate a new unique request ID.
    fn next_request_id(&mut self) -> usize {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Launch the server in the server field (non-blocking).
    pub fn request_connect(&mut self) {
        match self.connection {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected | ConnectionState::Calling => {
                self.set_error("Already connected - disconnect first (Ctrl+D)");
                return;
            }
            ConnectionState::Connecting | ConnectionState::Closing | ConnectionState::Closed => {
                return;
            }
        }

        let server = self.form.value(CalculatorField::Server);
        if server.is_empty() {
            self.set_error("Enter a server path to connect");
            return;
        }

        let request_id = self.next_request_id();
        match self.bridge.request_connect(PathBuf::from(&server), request_id) {
            Ok(()) => {
                self.pending_connect = Some(request_id);
                self.set_connection(ConnectionState::Connecting);
                self.push_log(format!("connecting to {}", server));
            }
            Err(e) => self.set_error(format!("Failed to connect: {}", e)),
        }
    }

    /// Invoke the tool with the current operands (non-blocking).
    ///
    /// Every call gets a fresh sequence number; a completion older than the
    /// newest displayed one is ignored.
    pub fn request_calculate(&mut self) {
        if !self.connection.is_connected() {
            self.set_error("Not connected");
            return;
        }

        let call = match self.build_call() {
            Ok(call) => call,
            Err(message) => {
                self.set_error(message);
                return;
            }
        };

        let seq = self.next_seq;
        let label = call.label();
        match self.bridge.request_call_tool(call, seq) {
            Ok(()) => {
                self.next_seq += 1;
                self.in_flight.insert(seq, Instant::now());
                self.set_connection(ConnectionState::Calling);
                self.push_log(format!("#{} {}", seq, label));
            }
            Err(e) => self.set_error(format!("Failed to call {}: {}", label, e)),
        }
    }

    fn build_call(&self) -> Result<ToolCall, String> {
        let tool = self.form.value(CalculatorField::Tool);
        if tool.is_empty() {
            return Err("Enter a tool name".into());
        }
        let a = parse_operand(&self.form.value(CalculatorField::OperandA), "a")?;
        let b = parse_operand(&self.form.value(CalculatorField::OperandB), "b")?;
        Ok(ToolCall::new(tool).arg("a", a).arg("b", b))
    }

    /// Re-run tool discovery (non-blocking).
    pub fn request_refresh_tools(&mut self) {
        if !self.connection.is_connected() {
            self.set_error("Not connected");
            return;
        }
        if self.pending_tools.is_some() {
            // Already have a pending request - skip to avoid queue buildup
            return;
        }

        let request_id = self.next_request_id();
        match self.bridge.request_list_tools(request_id) {
            Ok(()) => self.pending_tools = Some(request_id),
            Err(e) => self.set_error(format!("Failed to list tools: {}", e)),
        }
    }

    /// Close the session (non-blocking).
    pub fn request_disconnect(&mut self) {
        if !matches!(
            self.connection,
            ConnectionState::Connected | ConnectionState::Calling | ConnectionState::Connecting
        ) {
            return;
        }

        let request_id = self.next_request_id();
        match self.bridge.request_disconnect(request_id) {
            Ok(()) => {
                self.pending_disconnect = Some(request_id);
                self.closing_since = Some(Instant::now());
                self.set_connection(ConnectionState::Closing);
                self.push_log("closing session");
            }
            Err(e) => self.set_error(format!("Failed to disconnect: {}", e)),
        }
    }

    /// Quit, closing the session first if there is one.
    pub fn request_quit(&mut self) {
        self.quit_requested = true;
        match self.connection {
            ConnectionState::Disconnected | ConnectionState::Closed => self.finish_quit(),
            ConnectionState::Closing => {}
            _ => {
                self.request_disconnect();
                if self.connection != ConnectionState::Closing {
                    // Bridge refused the disconnect; nothing left to wait for.
                    self.finish_quit();
                }
            }
        }
    }

    fn finish_quit(&mut self) {
        self.set_connection(ConnectionState::Closed);
        self.should_quit = true;
    }

    // ===== Response Handling =====

    /// Time-based housekeeping: call watchdog and quit grace.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, started)| now.duration_since(**started) > self.call_watchdog)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in expired {
            self.in_flight.remove(&seq);
            warn!("Call #{} abandoned after {:?}", seq, self.call_watchdog);
            self.set_error(format!(
                "Call #{} got no answer after {}s",
                seq,
                self.call_watchdog.as_secs()
            ));
        }
        self.settle_calling_state();

        if self.quit_requested && self.connection == ConnectionState::Closing {
            if let Some(since) = self.closing_since {
                if since.elapsed() > Self::QUIT_GRACE {
                    warn!("Session did not close within {:?}, quitting anyway", Self::QUIT_GRACE);
                    self.finish_quit();
                }
            }
        }
    }

    /// Drain all completed bridge responses (non-blocking).
    pub fn poll_bridge_responses(&mut self) {
        while let Some(response) = self.bridge.poll_response() {
            match response {
                BridgeResponse::Connected { request_id, result } => {
                    self.handle_connected(request_id, result)
                }
                BridgeResponse::Tools { request_id, result } => {
                    self.handle_tools(request_id, result)
                }
                BridgeResponse::ToolCalled { seq, label, result } => {
                    self.handle_tool_called(seq, label, result)
                }
                BridgeResponse::Disconnected { request_id } => {
                    self.handle_disconnected(request_id)
                }
                BridgeResponse::SessionLost { reason } => self.handle_session_lost(reason),
            }
        }
    }

    fn handle_connected(
        &mut self,
        request_id: usize,
        result: Result<ConnectionInfo, SessionError>,
    ) {
        if self.pending_connect != Some(request_id) {
            debug!("Ignoring stale connect response (request_id={})", request_id);
            return;
        }
        self.pending_connect = None;

        match result {
            Ok(info) => {
                let label = format!("{} {}", info.server_name, info.server_version)
                    .trim()
                    .to_string();
                info!("Connected to {} ({} tools)", label, info.tools.len());
                self.push_log(format!(
                    "connected to {} - {} tool(s): {}",
                    label,
                    info.tools.len(),
                    info.tools
                        .iter()
                        .map(|t| t.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
                self.server_label = Some(label);
                self.tools = info.tools;
                self.tools_selected = 0;
                // A quit or disconnect issued while connecting wins.
                if self.connection == ConnectionState::Connecting {
                    self.set_connection(ConnectionState::Connected);
                }
            }
            Err(e) => {
                if self.connection == ConnectionState::Connecting {
                    self.set_connection(ConnectionState::Disconnected);
                }
                self.set_error(format!("Connect failed: {}", e));
            }
        }
    }

    fn handle_tools(&mut self, request_id: usize, result: Result<Vec<ToolDescriptor>, SessionError>) {
        if self.pending_tools != Some(request_id) {
            debug!("Ignoring stale tools response (request_id={})", request_id);
            return;
        }
        self.pending_tools = None;

        match result {
            Ok(tools) => {
                self.push_log(format!("discovered {} tool(s)", tools.len()));
                self.tools = tools;
                self.tools_selected = self.tools_selected.min(self.tools.len().saturating_sub(1));
                self.mark_dirty();
            }
            Err(e) => self.set_error(format!("Tool discovery failed: {}", e)),
        }
    }

    fn handle_tool_called(
        &mut self,
        seq: u64,
        label: String,
        result: Result<ToolResult, SessionError>,
    ) {
        if self.in_flight.remove(&seq).is_none() {
            debug!("Ignoring completion for abandoned call #{}", seq);
            return;
        }

        if seq < self.last_displayed_seq {
            self.push_log(format!(
                "#{} {} finished after #{} - result ignored",
                seq, label, self.last_displayed_seq
            ));
            self.settle_calling_state();
            return;
        }

        self.last_displayed_seq = seq;
        let outcome = match result {
            Ok(result) => {
                match &result {
                    ToolResult::Content(text) => self.push_log(format!("#{} {} = {}", seq, label, text)),
                    ToolResult::Error(text) => {
                        self.push_log(format!("#{} {} tool error: {}", seq, label, text))
                    }
                }
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                self.set_error(format!("{} failed: {}", label, message));
                Err(message)
            }
        };
        self.displayed = Some(DisplayedResult {
            seq,
            label,
            outcome,
        });
        self.settle_calling_state();
        self.mark_dirty();
    }

    fn handle_disconnected(&mut self, request_id: usize) {
        if self.pending_disconnect != Some(request_id) {
            debug!("Ignoring stale disconnect response (request_id={})", request_id);
            return;
        }
        self.pending_disconnect = None;
        self.reset_session_state();
        self.push_log("session closed");

        if self.quit_requested {
            self.finish_quit();
        } else {
            self.set_connection(ConnectionState::Disconnected);
        }
    }

    fn handle_session_lost(&mut self, reason: String) {
        self.reset_session_state();
        self.pending_disconnect = None;
        self.set_error(format!("Session lost: {}", reason));

        if self.quit_requested {
            self.finish_quit();
        } else {
            self.set_connection(ConnectionState::Disconnected);
        }
    }

    fn reset_session_state(&mut self) {
        self.tools.clear();
        self.tools_selected = 0;
        self.server_label = None;
        self.pending_tools = None;
        self.in_flight.clear();
        self.closing_since = None;
        self.mark_dirty();
    }

    /// `Calling` while any call is in flight, `Connected` otherwise.
    fn settle_calling_state(&mut self) {
        match (self.connection, self.in_flight.is_empty()) {
            (ConnectionState::Calling, true) => self.set_connection(ConnectionState::Connected),
            (ConnectionState::Connected, false) => self.set_connection(ConnectionState::Calling),
            _ => {}
        }
    }

    /// Number of tool calls awaiting completion.
    pub fn calls_in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Operands are JSON numbers; anything else is rejected before sending.
fn parse_operand(text: &str, name: &str) -> Result<Value, String> {
    if text.is_empty() {
        return Err(format!("Enter a value for '{}'", name));
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Number(_)) => Ok(value),
        _ => Err(format!("'{}' must be a number, got '{}'", name, text)),
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod app_tests;
