//! Request/response correlation for a single JSON-RPC connection.
//!
//! Every outgoing request gets a fresh correlation id and a `oneshot` slot in
//! the pending table. A reader task owns the input stream and hands each
//! response to the slot with the matching id, so responses may arrive in any
//! order. Responses for ids that are not pending (never sent, or already
//! timed out) are logged and dropped.
//!
//! When the input stream ends, a read fails, or [`Dispatcher::shutdown`] is
//! called, the table is closed: every pending slot resolves with
//! [`SessionError::Disconnected`] and later requests fail immediately.
//!
//! Writes are bounded as well: a write that cannot finish within the request
//! timeout (the server stopped reading its input) wedges the stream, so the
//! connection is closed. Closing cancels any write in progress.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace, warn};

use super::client::SessionError;
use super::framing::{read_message, write_message};
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Completion = oneshot::Sender<Result<JsonRpcResponse, SessionError>>;

/// How long `shutdown` waits for a cancelled write to let go of the writer.
const WRITER_RELEASE_GRACE: Duration = Duration::from_millis(200);

/// Monotonic correlation id source, starting at 1.
#[derive(Debug)]
struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Default)]
struct PendingTable {
    slots: HashMap<u64, Completion>,
    closed: bool,
}

/// State shared between the dispatcher and its reader task.
struct Shared {
    pending: Mutex<PendingTable>,
    writer: AsyncMutex<Option<BoxedWriter>>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        // The table holds no invariants a panicking holder could break.
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(
        &self,
        id: u64,
    ) -> Result<oneshot::Receiver<Result<JsonRpcResponse, SessionError>>, SessionError> {
        let mut table = self.table();
        if table.closed {
            return Err(SessionError::Disconnected);
        }
        let (tx, rx) = oneshot::channel();
        table.slots.insert(id, tx);
        Ok(rx)
    }

    fn release(&self, id: u64) -> Option<Completion> {
        self.table().slots.remove(&id)
    }

    /// Close the table and fail every pending slot. Returns how many were
    /// failed.
    fn fail_all(&self) -> usize {
        let drained: Vec<Completion> = {
            let mut table = self.table();
            table.closed = true;
            table.slots.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        for slot in drained {
            let _ = slot.send(Err(SessionError::Disconnected));
        }
        self.closed_tx.send_replace(true);
        count
    }

    /// Write one message. Resolves with `Disconnected` as soon as the
    /// connection closes, even if the write itself is stuck.
    async fn send(&self, body: &str) -> Result<(), SessionError> {
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow_and_update() {
            return Err(SessionError::Disconnected);
        }

        tokio::select! {
            result = self.write(body) => result,
            _ = closed.wait_for(|closed| *closed) => Err(SessionError::Disconnected),
        }
    }

    async fn write(&self, body: &str) -> Result<(), SessionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Disconnected)?;
        write_message(writer, body).await.map_err(|e| {
            debug!("Write to server failed: {:#}", e);
            SessionError::Disconnected
        })
    }

    /// `send` bounded by `deadline`. A write still in progress at the
    /// deadline may have left a partial frame behind, so the connection is
    /// closed.
    async fn send_until(
        &self,
        body: &str,
        deadline: Instant,
        request_timeout: Duration,
    ) -> Result<(), SessionError> {
        match timeout_at(deadline, self.send(body)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Server stopped reading its input, closing connection");
                self.fail_all();
                Err(SessionError::Timeout(request_timeout))
            }
        }
    }
}

/// Multiplexes JSON-RPC requests over one reader/writer pair.
pub struct Dispatcher {
    shared: Arc<Shared>,
    ids: RequestIdGenerator,
    request_timeout: Duration,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    closed_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Start dispatching over the given streams.
    ///
    /// Must be called from within a tokio runtime; the reader task is spawned
    /// immediately.
    pub fn new<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed_tx, closed_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingTable::default()),
            writer: AsyncMutex::new(Some(Box::new(writer))),
            closed_tx,
        });
        let reader_task = tokio::spawn(reader_loop(reader, Arc::clone(&shared)));

        Self {
            shared,
            ids: RequestIdGenerator::new(),
            request_timeout,
            reader_task: Mutex::new(Some(reader_task)),
            closed_rx,
        }
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// - `Timeout` if the request cannot be written, or no response arrives,
    ///   within the request timeout (a write timeout also closes the
    ///   connection)
    /// - `Disconnected` if the connection closes first or is already closed
    /// - `Remote` if the server answered with a JSON-RPC error
    /// - `Protocol` if the response carries neither result nor error
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        let id = self.ids.next_id();
        let completion = self.shared.register(id)?;

        let request = JsonRpcRequest::new(method, Some(params), id);
        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => {
                self.shared.release(id);
                return Err(SessionError::Protocol(format!(
                    "Failed to serialize {method} request: {e}"
                )));
            }
        };

        let deadline = Instant::now() + self.request_timeout;

        trace!(id, method, "sending request");
        if let Err(e) = self
            .shared
            .send_until(&body, deadline, self.request_timeout)
            .await
        {
            self.shared.release(id);
            return Err(e);
        }

        match timeout_at(deadline, completion).await {
            Ok(Ok(outcome)) => outcome.and_then(into_result),
            // Slot dropped without an answer: the dispatcher went away.
            Ok(Err(_)) => Err(SessionError::Disconnected),
            Err(_) => {
                self.shared.release(id);
                warn!(id, method, "Request timed out after {:?}", self.request_timeout);
                Err(SessionError::Timeout(self.request_timeout))
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), SessionError> {
        let notification = JsonRpcRequest::notification(method, Some(params));
        let body = serde_json::to_string(&notification).map_err(|e| {
            SessionError::Protocol(format!("Failed to serialize {method} notification: {e}"))
        })?;
        trace!(method, "sending notification");
        let deadline = Instant::now() + self.request_timeout;
        self.shared
            .send_until(&body, deadline, self.request_timeout)
            .await
    }

    /// Close the connection: fail pending calls, stop reading and drop the
    /// writer so the peer sees end of input.
    pub async fn shutdown(&self) {
        let failed = self.shared.fail_all();
        if failed > 0 {
            debug!("Shutdown failed {} pending request(s)", failed);
        }
        self.abort_reader();

        // fail_all cancelled any write in progress, so the lock frees up as
        // soon as that task runs again.
        let writer = match timeout(WRITER_RELEASE_GRACE, self.shared.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                warn!("Writer still busy after shutdown, leaving it to be dropped");
                None
            }
        };
        if let Some(mut writer) = writer {
            if timeout(WRITER_RELEASE_GRACE, writer.shutdown()).await.is_err() {
                debug!("Writer shutdown did not complete, dropping it");
            }
        }
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.table().slots.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves once the connection has closed for any reason.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn abort_reader(&self) {
        let task = self
            .reader_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.abort_reader();
        self.shared.fail_all();
    }
}

fn into_result(response: JsonRpcResponse) -> Result<Value, SessionError> {
    if let Some(error) = response.error {
        return Err(SessionError::Remote {
            code: error.code,
            message: error.message,
        });
    }
    response
        .result
        .ok_or_else(|| SessionError::Protocol("Response missing both result and error".into()))
}

async fn reader_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_message(&mut reader).await {
            Ok(Some(line)) => route_message(&line, &shared),
            Ok(None) => {
                debug!("Server closed its output stream");
                break;
            }
            Err(e) => {
                warn!("Failed to read from server: {:#}", e);
                break;
            }
        }
    }

    let failed = shared.fail_all();
    if failed > 0 {
        warn!("Connection closed with {} request(s) outstanding", failed);
    }
}

fn route_message(line: &str, shared: &Arc<Shared>) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring malformed message from server: {}", e);
            return;
        }
    };

    if value.get("method").is_some() {
        handle_server_message(value, shared);
        return;
    }

    let response: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(e) => {
            warn!("Ignoring invalid response from server: {}", e);
            return;
        }
    };

    let Some(id) = response.id.as_ref().and_then(RpcId::as_u64) else {
        warn!(
            "Dropping response without a usable id (error: {:?})",
            response.error
        );
        return;
    };

    match shared.release(id) {
        Some(slot) => {
            trace!(id, "routing response");
            // The receiver may have given up already; nothing to do then.
            let _ = slot.send(Ok(response));
        }
        None => warn!(id, "Dropping response for unknown correlation id"),
    }
}

/// Server notifications are logged; server-initiated requests get `ping`
/// answered and everything else rejected with method-not-found.
///
/// Replies are written from their own task so a stalled writer never stops
/// the reader from routing responses.
fn handle_server_message(value: Value, shared: &Arc<Shared>) {
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            warn!("Ignoring invalid message from server: {}", e);
            return;
        }
    };

    if request.is_notification() {
        debug!(method = %request.method, "Ignoring server notification");
        return;
    }

    let response = if request.method == "ping" {
        JsonRpcResponse::success(request.id, json!({}))
    } else {
        debug!(method = %request.method, "Rejecting server-initiated request");
        JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(&request.method))
    };

    match serde_json::to_string(&response) {
        Ok(body) => {
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                if let Err(e) = shared.send(&body).await {
                    debug!("Could not answer server request: {}", e);
                }
            });
        }
        Err(e) => warn!("Failed to serialize reply to server request: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, BufReader, DuplexStream, ReadHalf, WriteHalf};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// The far end of the dispatcher's streams, driven by the test.
    struct FakeServer {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn next_request(&mut self) -> JsonRpcRequest {
            let line = timeout(TEST_TIMEOUT, read_message(&mut self.reader))
                .await
                .expect("Timed out waiting for request")
                .expect("Read failed")
                .expect("Dispatcher closed its writer");
            serde_json::from_str(&line).expect("Invalid request JSON")
        }

        async fn send(&mut self, value: Value) {
            write_message(&mut self.writer, &value.to_string())
                .await
                .expect("Write failed");
        }

        async fn reply(&mut self, id: u64, result: Value) {
            self.send(json!({"jsonrpc": "2.0", "id": id, "result": result}))
                .await;
        }
    }

    fn pair(request_timeout: Duration) -> (Arc<Dispatcher>, FakeServer) {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = split(client);
        let (server_read, server_write) = split(server);
        let dispatcher = Dispatcher::new(BufReader::new(client_read), client_write, request_timeout);
        let fake = FakeServer {
            reader: BufReader::new(server_read),
            writer: server_write,
        };
        (Arc::new(dispatcher), fake)
    }

    fn request_id(request: &JsonRpcRequest) -> u64 {
        request.id.as_ref().and_then(RpcId::as_u64).expect("request id")
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let (dispatcher, mut server) = pair(TEST_TIMEOUT);

        let d = Arc::clone(&dispatcher);
        let first = tokio::spawn(async move { d.request("first", json!({})).await });
        let req = server.next_request().await;
        assert_eq!(request_id(&req), 1);
        server.reply(1, json!("one")).await;
        assert_eq!(first.await.unwrap().unwrap(), json!("one"));

        let d = Arc::clone(&dispatcher);
        let second = tokio::spawn(async move { d.request("second", json!({})).await });
        let req = server.next_request().await;
        assert_eq!(request_id(&req), 2);
        assert_eq!(req.method, "second");
        server.reply(2, json!("two")).await;
        assert_eq!(second.await.unwrap().unwrap(), json!("two"));
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (dispatcher, mut server) = pair(TEST_TIMEOUT);

        let d1 = Arc::clone(&dispatcher);
        let call1 = tokio::spawn(async move { d1.request("slow", json!({})).await });
        let req1 = server.next_request().await;

        let d2 = Arc::clone(&dispatcher);
        let call2 = tokio::spawn(async move { d2.request("fast", json!({})).await });
        let req2 = server.next_request().await;

        server.reply(request_id(&req2), json!({"who": "fast"})).await;
        server.reply(request_id(&req1), json!({"who": "slow"})).await;

        assert_eq!(call2.await.unwrap().unwrap(), json!({"who": "fast"}));
        assert_eq!(call1.await.unwrap().unwrap(), json!({"who": "slow"}));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let (dispatcher, mut server) = pair(TEST_TIMEOUT);

        let d = Arc::clone(&dispatcher);
        let call = tokio::spawn(async move { d.request("tools/list", json!({})).await });
        let req = server.next_request().await;

        server.reply(999, json!("stray")).await;
        server.reply(request_id(&req), json!("real")).await;

        assert_eq!(call.await.unwrap().unwrap(), json!("real"));
        assert!(!dispatcher.is_closed());
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_ignored() {
        let (dispatcher, mut server) = pair(Duration::from_millis(50));

        let d = Arc::clone(&dispatcher);
        let call = tokio::spawn(async move { d.request("tools/call", json!({})).await });
        let req = server.next_request().await;

        let result = call.await.unwrap();
        assert_eq!(result, Err(SessionError::Timeout(Duration::from_millis(50))));
        assert_eq!(dispatcher.pending_count(), 0);

        // Late answer for the abandoned id, then a fresh request still works.
        server.reply(request_id(&req), json!("late")).await;

        let d = Arc::clone(&dispatcher);
        let next = tokio::spawn(async move { d.request("ping", json!({})).await });
        let req = server.next_request().await;
        server.reply(request_id(&req), json!({})).await;
        assert_eq!(next.await.unwrap().unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_remote_error_and_empty_response() {
        let (dispatcher, mut server) = pair(TEST_TIMEOUT);

        let d = Arc::clone(&dispatcher);
        let call = tokio::spawn(async move { d.request("bogus", json!({})).await });
        let req = server.next_request().await;
        server
            .send(json!({
                "jsonrpc": "2.0",
                "id": request_id(&req),
                "error": {"code": -32601, "message": "Method not found: bogus"}
            }))
            .await;
        assert_eq!(
            call.await.unwrap(),
            Err(SessionError::Remote {
                code: -32601,
                message: "Method not found: bogus".into()
            })
        );

        let d = Arc::clone(&dispatcher);
        let call = tokio::spawn(async move { d.request("empty", json!({})).await });
        let req = server.next_request().await;
        server
            .send(json!({"jsonrpc": "2.0", "id": request_id(&req)}))
            .await;
        assert!(matches!(call.await.unwrap(), Err(SessionError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_and_rejects_new_requests() {
        let (dispatcher, mut server) = pair(TEST_TIMEOUT);

        let d = Arc::clone(&dispatcher);
        let call = tokio::spawn(async move { d.request("tools/call", json!({})).await });
        server.next_request().await;

        dispatcher.shutdown().await;

        let result = timeout(TEST_TIMEOUT, call)
            .await
            .expect("Pending call did not resolve")
            .unwrap();
        assert_eq!(result, Err(SessionError::Disconnected));
        assert!(dispatcher.is_closed());
        assert_eq!(
            dispatcher.request("tools/list", json!({})).await,
            Err(SessionError::Disconnected)
        );

        // The server sees end of input once the writer is dropped.
        let eof = timeout(TEST_TIMEOUT, read_message(&mut server.reader))
            .await
            .expect("Timed out waiting for EOF")
            .expect("Read failed");
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn test_server_eof_fails_pending_and_signals_closed() {
        let (dispatcher, mut server) = pair(TEST_TIMEOUT);

        let d = Arc::clone(&dispatcher);
        let call = tokio::spawn(async move { d.request("tools/call", json!({})).await });
        server.next_request().await;

        drop(server);

        let result = timeout(TEST_TIMEOUT, call).await.unwrap().unwrap();
        assert_eq!(result, Err(SessionError::Disconnected));
        timeout(TEST_TIMEOUT, dispatcher.closed())
            .await
            .expect("closed() did not resolve");
    }

    #[tokio::test]
    async fn test_server_ping_is_answered_and_notifications_ignored() {
        let (dispatcher, mut server) = pair(TEST_TIMEOUT);

        server
            .send(json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}))
            .await;
        server
            .send(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}))
            .await;

        let line = timeout(TEST_TIMEOUT, read_message(&mut server.reader))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let reply: JsonRpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(reply.id, Some(RpcId::Str("srv-1".into())));
        assert_eq!(reply.result, Some(json!({})));
        assert!(!dispatcher.is_closed());
    }

    /// A peer with a tiny buffer that the test never reads from.
    fn stalled_pair(request_timeout: Duration) -> (Arc<Dispatcher>, FakeServer) {
        let (client, server) = duplex(64);
        let (client_read, client_write) = split(client);
        let (server_read, server_write) = split(server);
        let dispatcher = Dispatcher::new(BufReader::new(client_read), client_write, request_timeout);
        let fake = FakeServer {
            reader: BufReader::new(server_read),
            writer: server_write,
        };
        (Arc::new(dispatcher), fake)
    }

    fn large_params() -> Value {
        json!({ "payload": "x".repeat(4096) })
    }

    #[tokio::test]
    async fn test_request_timeout_covers_blocked_write() {
        let (dispatcher, _server) = stalled_pair(Duration::from_millis(100));

        let result = timeout(Duration::from_secs(2), dispatcher.request("tools/call", large_params()))
            .await
            .expect("request stayed pending behind a blocked write");
        assert_eq!(result, Err(SessionError::Timeout(Duration::from_millis(100))));

        // A half-written frame leaves the stream unusable.
        assert!(dispatcher.is_closed());
        assert_eq!(dispatcher.pending_count(), 0);
        assert_eq!(
            dispatcher.request("tools/list", json!({})).await,
            Err(SessionError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_shutdown_with_blocked_write_is_bounded() {
        let (dispatcher, _server) = stalled_pair(TEST_TIMEOUT);

        let d = Arc::clone(&dispatcher);
        let call = tokio::spawn(async move { d.request("tools/call", large_params()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!call.is_finished());

        timeout(Duration::from_secs(1), dispatcher.shutdown())
            .await
            .expect("shutdown hung behind the blocked writer");

        let result = timeout(Duration::from_secs(1), call)
            .await
            .expect("blocked call did not resolve")
            .unwrap();
        assert_eq!(result, Err(SessionError::Disconnected));
        assert!(dispatcher.is_closed());
    }

    #[tokio::test]
    async fn test_server_request_does_not_block_routing_during_stalled_write() {
        let (dispatcher, mut server) = stalled_pair(TEST_TIMEOUT);

        let d = Arc::clone(&dispatcher);
        let small = tokio::spawn(async move { d.request("a", json!({})).await });
        let req = server.next_request().await;

        // The server stops reading; this write fills the pipe and stalls.
        let d = Arc::clone(&dispatcher);
        let blocked = tokio::spawn(async move { d.request("tools/call", large_params()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        server
            .send(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}))
            .await;
        server.reply(request_id(&req), json!("routed")).await;

        let result = timeout(Duration::from_secs(2), small)
            .await
            .expect("reader stopped behind the ping reply")
            .unwrap();
        assert_eq!(result, Ok(json!("routed")));

        dispatcher.shutdown().await;
        let result = timeout(Duration::from_secs(1), blocked).await.unwrap().unwrap();
        assert_eq!(result, Err(SessionError::Disconnected));
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let (dispatcher, mut server) = pair(TEST_TIMEOUT);

        let d = Arc::clone(&dispatcher);
        let call = tokio::spawn(async move { d.request("tools/list", json!({})).await });
        let req = server.next_request().await;

        write_message(&mut server.writer, "this is not json")
            .await
            .unwrap();
        server.reply(request_id(&req), json!({"tools": []})).await;

        assert_eq!(call.await.unwrap().unwrap(), json!({"tools": []}));
    }
}
