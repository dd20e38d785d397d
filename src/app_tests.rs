// =========================================================================
// Tests
// =========================================================================

use super::*;
use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// Mock Bridge Service
struct MockBridgeService {
    requests: Arc<Mutex<Vec<String>>>,
    responses: Arc<Mutex<VecDeque<BridgeResponse>>>,
    fail_sends: bool,
}

impl MockBridgeService {
    fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            fail_sends: false,
        }
    }

    fn record(&self, request: String) -> Result<()> {
        if self.fail_sends {
            return Err(anyhow::anyhow!("Backend busy - try again in a moment"));
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

impl BridgeService for MockBridgeService {
    fn request_connect(&self, server: PathBuf, request_id: usize) -> Result<()> {
        self.record(format!(
            "Connect(server={}, request_id={})",
            server.display(),
            request_id
        ))
    }

    fn request_list_tools(&self, request_id: usize) -> Result<()> {
        self.record(format!("ListTools(request_id={})", request_id))
    }

    fn request_call_tool(&self, call: ToolCall, seq: u64) -> Result<()> {
        self.record(format!("CallTool({}, seq={})", call.label(), seq))
    }

    fn request_disconnect(&self, request_id: usize) -> Result<()> {
        self.record(format!("Disconnect(request_id={})", request_id))
    }

    fn poll_response(&mut self) -> Option<BridgeResponse> {
        self.responses.lock().unwrap().pop_front()
    }
}

struct Harness {
    app: App<'static>,
    requests: Arc<Mutex<Vec<String>>>,
    responses: Arc<Mutex<VecDeque<BridgeResponse>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_mock(MockBridgeService::new())
    }

    fn with_mock(mock: MockBridgeService) -> Self {
        let requests = Arc::clone(&mock.requests);
        let responses = Arc::clone(&mock.responses);
        let config = ClientConfig::default();
        Self {
            app: App::with_bridge(Box::new(mock), &config),
            requests,
            responses,
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(&mut self, response: BridgeResponse) {
        self.responses.lock().unwrap().push_back(response);
        self.app.poll_bridge_responses();
    }

    /// Drive the app into `Connected` with the add tool.
    fn connected() -> Self {
        let mut h = Self::new();
        h.app.form.set_value(CalculatorField::Server, "server.py");
        h.app.update(Action::Connect);
        h.respond(BridgeResponse::Connected {
            request_id: 0,
            result: Ok(add_connection()),
        });
        assert_eq!(h.app.connection, ConnectionState::Connected);
        h
    }

    fn calculate(&mut self, a: &str, b: &str) {
        self.app.form.set_value(CalculatorField::OperandA, a);
        self.app.form.set_value(CalculatorField::OperandB, b);
        self.app.update(Action::Calculate);
    }
}

fn add_connection() -> ConnectionInfo {
    ConnectionInfo {
        server_name: "mcpcalc-server".into(),
        server_version: "0.1.0".into(),
        tools: vec![ToolDescriptor {
            name: "add".into(),
            description: "Add two numbers".into(),
            input_schema: json!({"type": "object"}),
        }],
    }
}

fn called(seq: u64, result: Result<ToolResult, SessionError>) -> BridgeResponse {
    BridgeResponse::ToolCalled {
        seq,
        label: format!("add#{}", seq),
        result,
    }
}

#[test]
fn test_initial_state() {
    let h = Harness::new();
    assert_eq!(h.app.connection, ConnectionState::Disconnected);
    assert_eq!(h.app.current_tab, AppTab::Calculator);
    assert!(h.app.displayed.is_none());
    assert!(h.requests().is_empty());
}

#[test]
fn test_connect_moves_through_connecting_to_connected() {
    let mut h = Harness::new();
    h.app.form.set_value(CalculatorField::Server, "server.py");
    h.app.update(Action::Connect);

    assert_eq!(h.app.connection, ConnectionState::Connecting);
    assert_eq!(h.requests(), vec!["Connect(server=server.py, request_id=0)"]);

    h.respond(BridgeResponse::Connected {
        request_id: 0,
        result: Ok(add_connection()),
    });
    assert_eq!(h.app.connection, ConnectionState::Connected);
    assert_eq!(h.app.tools.len(), 1);
    assert_eq!(h.app.server_label.as_deref(), Some("mcpcalc-server 0.1.0"));
}

#[test]
fn test_connect_requires_server_path() {
    let mut h = Harness::new();
    h.app.update(Action::Connect);
    assert_eq!(h.app.connection, ConnectionState::Disconnected);
    assert!(h.app.last_error.is_some());
    assert!(h.requests().is_empty());
}

#[test]
fn test_connect_failure_returns_to_disconnected() {
    let mut h = Harness::new();
    h.app.form.set_value(CalculatorField::Server, "missing.py");
    h.app.update(Action::Connect);
    h.respond(BridgeResponse::Connected {
        request_id: 0,
        result: Err(SessionError::Connection("No such file".into())),
    });

    assert_eq!(h.app.connection, ConnectionState::Disconnected);
    let error = h.app.last_error.clone().unwrap();
    assert!(error.contains("Connection failed: No such file"), "{}", error);
}

#[test]
fn test_stale_connect_response_is_ignored() {
    let mut h = Harness::new();
    h.app.form.set_value(CalculatorField::Server, "server.py");
    h.app.update(Action::Connect);
    h.respond(BridgeResponse::Connected {
        request_id: 42,
        result: Ok(add_connection()),
    });
    assert_eq!(h.app.connection, ConnectionState::Connecting);
}

#[test]
fn test_add_result_is_displayed() {
    let mut h = Harness::connected();
    h.calculate("4", "5");

    assert_eq!(h.app.connection, ConnectionState::Calling);
    assert_eq!(
        h.requests().last().unwrap(),
        "CallTool(add(a=4, b=5), seq=1)"
    );

    h.respond(called(1, Ok(ToolResult::Content("9".into()))));
    assert_eq!(h.app.connection, ConnectionState::Connected);
    let displayed = h.app.displayed.clone().unwrap();
    assert_eq!(displayed.seq, 1);
    assert_eq!(displayed.outcome, Ok(ToolResult::Content("9".into())));
}

#[test]
fn test_unknown_tool_error_is_displayed_as_result() {
    let mut h = Harness::connected();
    h.app.form.set_value(CalculatorField::Tool, "subtract");
    h.calculate("4", "5");
    h.respond(called(
        1,
        Ok(ToolResult::Error("Unknown tool: subtract".into())),
    ));

    assert_eq!(h.app.connection, ConnectionState::Connected);
    assert_eq!(
        h.app.displayed.clone().unwrap().outcome,
        Ok(ToolResult::Error("Unknown tool: subtract".into()))
    );
}

#[test]
fn test_older_completion_after_newer_is_ignored() {
    let mut h = Harness::connected();
    h.calculate("1", "1");
    h.calculate("2", "2");
    assert_eq!(h.app.calls_in_flight(), 2);

    // Call 2 finishes first and is shown.
    h.respond(called(2, Ok(ToolResult::Content("4".into()))));
    assert_eq!(h.app.displayed.clone().unwrap().seq, 2);
    assert_eq!(h.app.connection, ConnectionState::Calling);

    // Call 1 arrives late and must not replace it.
    h.respond(called(1, Ok(ToolResult::Content("2".into()))));
    let displayed = h.app.displayed.clone().unwrap();
    assert_eq!(displayed.seq, 2);
    assert_eq!(displayed.outcome, Ok(ToolResult::Content("4".into())));
    assert_eq!(h.app.connection, ConnectionState::Connected);
    assert!(h
        .app
        .log_lines
        .iter()
        .any(|line| line.contains("result ignored")));
}

#[test]
fn test_in_order_completions_are_all_displayed() {
    let mut h = Harness::connected();
    h.calculate("1", "1");
    h.calculate("2", "2");

    h.respond(called(1, Ok(ToolResult::Content("2".into()))));
    assert_eq!(h.app.displayed.clone().unwrap().seq, 1);
    h.respond(called(2, Ok(ToolResult::Content("4".into()))));
    assert_eq!(h.app.displayed.clone().unwrap().seq, 2);
}

#[test]
fn test_call_timeout_returns_to_connected_with_error() {
    let mut h = Harness::connected();
    h.calculate("4", "5");
    h.respond(called(
        1,
        Err(SessionError::Timeout(Duration::from_secs(30))),
    ));

    assert_eq!(h.app.connection, ConnectionState::Connected);
    assert!(h.app.last_error.clone().unwrap().contains("timed out"));
    assert_eq!(
        h.app.displayed.clone().unwrap().outcome,
        Err("Request timed out after 30s".to_string())
    );
}

#[test]
fn test_non_numeric_operand_is_rejected_locally() {
    let mut h = Harness::connected();
    let before = h.requests().len();
    h.calculate("four", "5");

    assert_eq!(h.requests().len(), before);
    assert_eq!(h.app.connection, ConnectionState::Connected);
    assert!(h.app.last_error.clone().unwrap().contains("'a' must be a number"));
}

#[test]
fn test_calculate_requires_connection() {
    let mut h = Harness::new();
    h.calculate("4", "5");
    assert!(h.requests().is_empty());
    assert_eq!(h.app.last_error.as_deref(), Some("Not connected"));
}

#[test]
fn test_backend_busy_keeps_state() {
    let mut mock = MockBridgeService::new();
    mock.fail_sends = true;
    let mut h = Harness::with_mock(mock);
    h.app.form.set_value(CalculatorField::Server, "server.py");
    h.app.update(Action::Connect);

    assert_eq!(h.app.connection, ConnectionState::Disconnected);
    assert!(h.app.last_error.clone().unwrap().contains("Backend busy"));
}

#[test]
fn test_disconnect_goes_through_closing() {
    let mut h = Harness::connected();
    h.app.update(Action::Disconnect);
    assert_eq!(h.app.connection, ConnectionState::Closing);
    assert_eq!(h.requests().last().unwrap(), "Disconnect(request_id=1)");

    h.respond(BridgeResponse::Disconnected { request_id: 1 });
    assert_eq!(h.app.connection, ConnectionState::Disconnected);
    assert!(h.app.tools.is_empty());
    assert!(!h.app.should_quit);
}

#[test]
fn test_disconnect_with_call_outstanding() {
    let mut h = Harness::connected();
    h.calculate("4", "5");
    h.app.update(Action::Disconnect);

    // The worker fails the pending call, then confirms the close.
    h.respond(called(1, Err(SessionError::Disconnected)));
    assert_eq!(h.app.connection, ConnectionState::Closing);
    h.respond(BridgeResponse::Disconnected { request_id: 1 });

    assert_eq!(h.app.connection, ConnectionState::Disconnected);
    assert_eq!(h.app.calls_in_flight(), 0);
    assert_eq!(
        h.app.displayed.clone().unwrap().outcome,
        Err("Server disconnected".to_string())
    );
}

#[test]
fn test_session_lost_returns_to_disconnected() {
    let mut h = Harness::connected();
    h.calculate("4", "5");
    h.respond(BridgeResponse::SessionLost {
        reason: "Server closed the connection".into(),
    });

    assert_eq!(h.app.connection, ConnectionState::Disconnected);
    assert_eq!(h.app.calls_in_flight(), 0);
    assert!(h.app.last_error.clone().unwrap().contains("Session lost"));

    // Completion for the dropped call is ignored.
    h.respond(called(1, Err(SessionError::Disconnected)));
    assert!(h.app.displayed.is_none());
}

#[test]
fn test_quit_while_connected_closes_first() {
    let mut h = Harness::connected();
    h.app.update(Action::Quit);

    assert_eq!(h.app.connection, ConnectionState::Closing);
    assert!(!h.app.should_quit);

    h.respond(BridgeResponse::Disconnected { request_id: 1 });
    assert_eq!(h.app.connection, ConnectionState::Closed);
    assert!(h.app.should_quit);
}

#[test]
fn test_quit_while_disconnected_is_immediate() {
    let mut h = Harness::new();
    h.app.update(Action::Quit);
    assert_eq!(h.app.connection, ConnectionState::Closed);
    assert!(h.app.should_quit);
}

#[test]
fn test_quit_during_connect_keeps_closing() {
    let mut h = Harness::new();
    h.app.form.set_value(CalculatorField::Server, "server.py");
    h.app.update(Action::Connect);
    h.app.update(Action::Quit);
    assert_eq!(h.app.connection, ConnectionState::Closing);

    h.respond(BridgeResponse::Connected {
        request_id: 0,
        result: Ok(add_connection()),
    });
    assert_eq!(h.app.connection, ConnectionState::Closing);

    h.respond(BridgeResponse::Disconnected { request_id: 1 });
    assert!(h.app.should_quit);
}

#[test]
fn test_refresh_tools_updates_list() {
    let mut h = Harness::connected();
    h.app.update(Action::ToolsRefresh);
    // Second refresh while pending is skipped.
    h.app.update(Action::ToolsRefresh);
    assert_eq!(
        h.requests()
            .iter()
            .filter(|r| r.starts_with("ListTools"))
            .count(),
        1
    );

    h.respond(BridgeResponse::Tools {
        request_id: 1,
        result: Ok(Vec::new()),
    });
    assert!(h.app.tools.is_empty());
}

#[test]
fn test_tab_navigation_wraps() {
    let mut h = Harness::new();
    h.app.update(Action::TabPrev);
    assert_eq!(h.app.current_tab, AppTab::Log);
    h.app.update(Action::TabNext);
    assert_eq!(h.app.current_tab, AppTab::Calculator);
    h.app.update(Action::TabSet(AppTab::Tools));
    assert_eq!(h.app.current_tab, AppTab::Tools);
}

#[test]
fn test_error_clear_and_dirty_flag() {
    let mut h = Harness::new();
    assert!(h.app.take_needs_redraw());
    assert!(!h.app.take_needs_redraw());

    h.app.set_error("boom");
    assert!(h.app.take_needs_redraw());
    h.app.update(Action::ErrorClear);
    assert!(h.app.last_error.is_none());
}

#[test]
fn test_log_is_capped() {
    let mut h = Harness::new();
    for i in 0..(MAX_LOG_LINES + 25) {
        h.app.push_log(format!("line {}", i));
    }
    assert_eq!(h.app.log_lines.len(), MAX_LOG_LINES);
    assert!(h.app.log_lines.last().unwrap().ends_with(&format!("line {}", MAX_LOG_LINES + 24)));
}
