//! Connection session: one server, one handshake, one correlation table
//!
//! # Architecture
//!
//! ```text
//!   callers ──call()──► pending table ◄──resolve── read loop ◄── stdout
//!      │                                             │
//!      └──write (single-writer lock)──► stdin        └──► notification sink
//! ```
//!
//! A request takes the next id, parks a oneshot sender under it, writes its
//! line while holding the writer lock, then waits on the receiver with no
//! lock held until the response or its deadline arrives.
//!
//! Any transport or protocol failure drains the pending table, so every
//! outstanding request resolves exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::{McpError, McpResult};
use super::protocol::{self, methods, Inbound, InitializeResult, ListToolsPage, RpcError};
use super::spawn::{LineEvent, LineReader, LineWriter, ProcessHandle, ProcessLauncher, DEFAULT_SHUTDOWN_GRACE};
use super::types::{
    ConnectionState, ConnectionStatus, McpTool, Root, ServerInfo, ServerNotification, ToolCallResult,
};
use crate::config::{McpServerConfig, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STARTUP_TIMEOUT};

/// Receives notifications from every session it is attached to
pub type NotificationSink = mpsc::UnboundedSender<ServerNotification>;

/// Timed-out ids remembered so a late response is dropped instead of
/// being treated as a protocol violation
const MAX_EXPIRED_IDS: usize = 1024;

/// How often an idle read loop checks whether its server process has exited.
/// A grandchild inheriting stdout can hold the stream open after the server
/// itself is gone.
const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-session tunables
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Deadline for the `initialize` exchange
    pub startup_timeout: Duration,
    /// Default deadline for each request; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL on close
    pub shutdown_grace: Duration,
    /// Answer to `roots/list`
    pub roots: Vec<Root>,
    /// `clientInfo.name` sent in `initialize`
    pub client_name: String,
    pub notifications: Option<NotificationSink>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            roots: Vec::new(),
            client_name: "mcp-hub".to_string(),
            notifications: None,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &McpServerConfig) -> Self {
        Self {
            startup_timeout: config.startup_timeout(),
            request_timeout: config.request_timeout(),
            roots: config.roots(),
            ..Default::default()
        }
    }
}

struct PendingRequest {
    method: String,
    issued_at: Instant,
    reply: oneshot::Sender<McpResult<Value>>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
    expired: VecDeque<u64>,
    /// Set once on failure or close; no request may be registered afterwards
    closed: Option<McpError>,
}

struct Handshake {
    protocol_version: String,
    server_info: ServerInfo,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the session handle, its callers and its read loop
struct Shared {
    name: String,
    options: SessionOptions,
    state: Mutex<ConnectionState>,
    pending: Mutex<PendingTable>,
    writer: AsyncMutex<Option<LineWriter>>,
    process: AsyncMutex<Option<ProcessHandle>>,
    pid: Option<u32>,
    created_at: Instant,
    catalog: Mutex<Option<Vec<McpTool>>>,
    handshake: Mutex<Option<Handshake>>,
    next_id: AtomicU64,
}

/// Removes its request from the pending table when dropped before the
/// response arrived (deadline elapsed or caller cancelled)
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.expire(self.id);
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Error for a caller that finds the connection unusable
    fn unusable_error(&self) -> McpError {
        match self.state() {
            ConnectionState::Closed => McpError::ConnectionClosed(self.name.clone()),
            state => lock(&self.pending).closed.clone().unwrap_or(McpError::NotReady {
                server: self.name.clone(),
                state,
            }),
        }
    }

    fn register(&self, method: &str) -> McpResult<(u64, oneshot::Receiver<McpResult<Value>>)> {
        let (tx, rx) = oneshot::channel();
        let mut pending = lock(&self.pending);
        if let Some(err) = &pending.closed {
            return Err(err.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        pending.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                issued_at: Instant::now(),
                reply: tx,
            },
        );
        Ok((id, rx))
    }

    fn expire(&self, id: u64) {
        let mut pending = lock(&self.pending);
        if pending.entries.remove(&id).is_some() {
            if pending.expired.len() == MAX_EXPIRED_IDS {
                pending.expired.pop_front();
            }
            pending.expired.push_back(id);
        }
    }

    fn resolve(&self, id: u64, outcome: Result<Value, RpcError>) -> McpResult<()> {
        let entry = {
            let mut pending = lock(&self.pending);
            match pending.entries.remove(&id) {
                Some(entry) => Some(entry),
                None => {
                    if let Some(pos) = pending.expired.iter().position(|&e| e == id) {
                        pending.expired.remove(pos);
                        tracing::debug!(server = %self.name, id, "Dropping late response for expired request");
                        return Ok(());
                    }
                    None
                }
            }
        };

        let Some(entry) = entry else {
            return Err(McpError::protocol(
                &self.name,
                format!("response references unknown request id {}", id),
            ));
        };

        tracing::trace!(
            server = %self.name,
            id,
            method = %entry.method,
            elapsed = ?entry.issued_at.elapsed(),
            "Response received"
        );

        let result = outcome.map_err(|err| McpError::Application {
            server: self.name.clone(),
            code: err.code,
            message: err.message,
            data: err.data,
        });
        let _ = entry.reply.send(result);
        Ok(())
    }

    /// Move to Failed and reject everything outstanding. No-op once the
    /// session has already failed or closed.
    async fn fail(&self, err: McpError) {
        let drained: Vec<PendingRequest> = {
            let mut pending = lock(&self.pending);
            if pending.closed.is_some() {
                return;
            }
            pending.closed = Some(err.clone());
            pending.entries.drain().map(|(_, entry)| entry).collect()
        };
        {
            let mut state = lock(&self.state);
            if *state != ConnectionState::Closed {
                *state = ConnectionState::Failed;
            }
        }

        tracing::warn!(
            server = %self.name,
            pending = drained.len(),
            "MCP connection failed: {}",
            err
        );
        for entry in drained {
            let _ = entry.reply.send(Err(err.clone()));
        }

        self.terminate_process().await;
        if let Ok(mut writer) =
            tokio::time::timeout(self.options.shutdown_grace, self.writer.lock()).await
        {
            writer.take();
        }
    }

    async fn terminate_process(&self) {
        if let Some(process) = self.process.lock().await.as_mut() {
            let status = process.terminate(self.options.shutdown_grace).await;
            tracing::debug!(server = %self.name, status = ?status, "MCP server process ended");
        }
    }

    async fn exit_status(&self) -> Option<std::process::ExitStatus> {
        self.process
            .lock()
            .await
            .as_mut()
            .and_then(|process| process.try_exit_status())
    }

    async fn write_locked(&self, line: String) -> McpResult<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.write_line(&line).await,
            None => Err(self.unusable_error()),
        }
    }

    /// Write one line under the single-writer lock.
    ///
    /// The write runs on its own task: a caller that gives up (deadline or
    /// cancellation) never leaves a partial line on the stream, and a write
    /// failure still fails the session after the caller is gone.
    async fn send_line(self: &Arc<Self>, line: String) -> McpResult<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = shared.write_locked(line).await;
            if let Err(err) = &result {
                if err.is_fatal() {
                    shared.fail(err.clone()).await;
                }
            }
            result
        })
        .await
        .unwrap_or_else(|e| Err(McpError::transport(&self.name, format!("writer task failed: {}", e))))
    }

    async fn request(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let (id, rx) = self.register(method)?;
        let _guard = PendingGuard { shared: self, id };

        let line = protocol::encode_request(id, method, params.as_ref())
            .map_err(|e| McpError::protocol(&self.name, format!("failed to encode {}: {}", method, e)))?;
        tracing::trace!(server = %self.name, id, method, "Sending request");

        // A failure that drains the table resolves `rx` even while this
        // request's write is still queued behind the writer lock.
        let exchange = async {
            let mut rx = rx;
            let write = self.send_line(line);
            tokio::pin!(write);
            let received = tokio::select! {
                written = &mut write => {
                    written?;
                    (&mut rx).await
                }
                received = &mut rx => received,
            };
            received.unwrap_or_else(|_| {
                Err(McpError::transport(
                    &self.name,
                    "connection dropped before responding",
                ))
            })
        };

        let (Some(deadline), Some(limit)) = (deadline, timeout) else {
            return exchange.await;
        };
        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    server = %self.name,
                    id,
                    method,
                    "Request timed out after {:?}",
                    limit
                );
                Err(McpError::Timeout {
                    server: self.name.clone(),
                    method: method.to_string(),
                    id,
                    timeout: limit,
                })
            }
        }
    }

    async fn notify(self: &Arc<Self>, method: &str, params: Option<Value>) -> McpResult<()> {
        let line = protocol::encode_notification(method, params.as_ref())
            .map_err(|e| McpError::protocol(&self.name, format!("failed to encode {}: {}", method, e)))?;
        self.send_line(line).await
    }

    fn dispatch(self: &Arc<Self>, message: Inbound) -> McpResult<()> {
        match message {
            Inbound::Response { id, outcome } => self.resolve(id, outcome),
            Inbound::Notification { method, params } => {
                self.on_notification(method, params);
                Ok(())
            }
            Inbound::Request { id, method, params } => {
                self.on_server_request(id, &method, params);
                Ok(())
            }
        }
    }

    fn on_notification(&self, method: String, params: Option<Value>) {
        if method == methods::TOOLS_LIST_CHANGED {
            tracing::info!(server = %self.name, "Tool list changed, dropping cached catalog");
            lock(&self.catalog).take();
        } else {
            tracing::debug!(server = %self.name, method = %method, "Notification received");
        }

        if let Some(sink) = &self.options.notifications {
            let _ = sink.send(ServerNotification {
                server: self.name.clone(),
                method,
                params,
            });
        }
    }

    fn on_server_request(self: &Arc<Self>, id: Value, method: &str, _params: Option<Value>) {
        let reply = match method {
            methods::ROOTS_LIST => protocol::encode_result(&id, json!({ "roots": self.options.roots })),
            methods::PING => protocol::encode_result(&id, json!({})),
            other => {
                tracing::debug!(server = %self.name, method = other, "Rejecting unsupported server request");
                protocol::encode_error(
                    &id,
                    &RpcError {
                        code: protocol::METHOD_NOT_FOUND,
                        message: format!("Method not found: {}", other),
                        data: None,
                    },
                )
            }
        };

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = shared.write_locked(reply).await {
                tracing::debug!(server = %shared.name, "Failed to answer server request: {}", e);
            }
        });
    }

    async fn handshake(self: &Arc<Self>) -> McpResult<()> {
        let params = json!({
            "protocolVersion": protocol::PROTOCOL_VERSION,
            "capabilities": { "roots": { "listChanged": false } },
            "clientInfo": {
                "name": self.options.client_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self
            .request(methods::INITIALIZE, Some(params), Some(self.options.startup_timeout))
            .await?;

        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(&self.name, format!("malformed initialize result: {}", e)))?;

        if !protocol::SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(McpError::protocol(
                &self.name,
                format!("unsupported protocol version '{}'", init.protocol_version),
            ));
        }

        if !self.transition(ConnectionState::Initializing, ConnectionState::Initialized) {
            return Err(self.unusable_error());
        }

        tracing::info!(
            server = %self.name,
            protocol_version = %init.protocol_version,
            server_name = %init.server_info.name,
            server_version = %init.server_info.version,
            "MCP handshake complete"
        );
        *lock(&self.handshake) = Some(Handshake {
            protocol_version: init.protocol_version,
            server_info: init.server_info,
        });

        tokio::time::timeout(self.options.startup_timeout, self.notify(methods::INITIALIZED, None))
            .await
            .map_err(|_| McpError::Timeout {
                server: self.name.clone(),
                method: methods::INITIALIZED.to_string(),
                id: 0,
                timeout: self.options.startup_timeout,
            })??;

        if !self.transition(ConnectionState::Initialized, ConnectionState::Ready) {
            return Err(self.unusable_error());
        }
        Ok(())
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: LineReader) {
    let poll = shared.pid.map(|_| EXIT_POLL_INTERVAL);
    loop {
        let line = match reader.read_line(poll).await {
            Ok(LineEvent::Line(line)) => line,
            Ok(LineEvent::DeadlineElapsed) => {
                if let Some(status) = shared.exit_status().await {
                    let reason = format!("server exited ({})", status);
                    shared.fail(McpError::transport(&shared.name, reason)).await;
                    break;
                }
                continue;
            }
            Ok(LineEvent::Eof) => {
                let reason = match shared.exit_status().await {
                    Some(status) => format!("server exited ({})", status),
                    None => "server closed its output stream".to_string(),
                };
                shared.fail(McpError::transport(&shared.name, reason)).await;
                break;
            }
            Err(err) => {
                shared.fail(err).await;
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let handled = protocol::parse_inbound(&line)
            .map_err(|reason| McpError::protocol(&shared.name, reason))
            .and_then(|message| shared.dispatch(message));

        if let Err(err) = handled {
            shared.fail(err).await;
            break;
        }
    }

    tracing::debug!(server = %shared.name, "Read loop stopped");
}

/// A single MCP connection
///
/// Cheap to share behind an `Arc`; every method takes `&self` and concurrent
/// calls are pipelined over the one stream.
pub struct ConnectionSession {
    shared: Arc<Shared>,
    reader: Mutex<Option<LineReader>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Build a session over an already connected stream pair
    pub fn new(
        name: &str,
        reader: LineReader,
        writer: LineWriter,
        process: Option<ProcessHandle>,
        options: SessionOptions,
    ) -> Self {
        let pid = process.as_ref().and_then(|p| p.pid());
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                options,
                state: Mutex::new(ConnectionState::Uninitialized),
                pending: Mutex::new(PendingTable::default()),
                writer: AsyncMutex::new(Some(writer)),
                process: AsyncMutex::new(process),
                pid,
                created_at: Instant::now(),
                catalog: Mutex::new(None),
                handshake: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
            reader: Mutex::new(Some(reader)),
            reader_task: Mutex::new(None),
        }
    }

    /// Spawn the server described by `config` and bind a session to it
    pub fn spawn(name: &str, config: &McpServerConfig, options: SessionOptions) -> McpResult<Self> {
        let launched = ProcessLauncher::spawn(name, config)?;
        Ok(Self::new(
            name,
            launched.reader,
            launched.writer,
            Some(launched.handle),
            options,
        ))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.pid
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).entries.len()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        lock(&self.shared.handshake)
            .as_ref()
            .map(|h| h.server_info.clone())
    }

    pub fn protocol_version(&self) -> Option<String> {
        lock(&self.shared.handshake)
            .as_ref()
            .map(|h| h.protocol_version.clone())
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            name: self.shared.name.clone(),
            state: self.state(),
            pid: self.shared.pid,
            tool_count: lock(&self.shared.catalog).as_ref().map(|t| t.len()),
            pending_requests: self.pending_count(),
            uptime: self.shared.created_at.elapsed(),
            protocol_version: self.protocol_version(),
            server_info: self.server_info(),
        }
    }

    /// Run the initialize handshake and move to Ready.
    ///
    /// Any failure leaves the session Failed with its process terminated.
    pub async fn open(&self) -> McpResult<()> {
        if !self
            .shared
            .transition(ConnectionState::Uninitialized, ConnectionState::Initializing)
        {
            return match self.state() {
                ConnectionState::Ready => Ok(()),
                _ => Err(self.shared.unusable_error()),
            };
        }

        let Some(reader) = lock(&self.reader).take() else {
            return Err(self.shared.unusable_error());
        };
        let task = tokio::spawn(read_loop(Arc::clone(&self.shared), reader));
        *lock(&self.reader_task) = Some(task);

        tracing::info!(server = %self.shared.name, "Initializing MCP connection");

        match self.shared.handshake().await {
            Ok(()) => {
                tracing::info!(server = %self.shared.name, "MCP connection ready");
                Ok(())
            }
            Err(err) => {
                self.shared.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    fn ensure_ready(&self) -> McpResult<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed => Err(McpError::ConnectionClosed(self.shared.name.clone())),
            state => Err(McpError::NotReady {
                server: self.shared.name.clone(),
                state,
            }),
        }
    }

    /// Send a request with the session's default deadline
    pub async fn call(&self, method: &str, params: Value) -> McpResult<Value> {
        self.call_with_timeout(method, params, self.shared.options.request_timeout)
            .await
    }

    /// Send a request with an explicit deadline (`None` waits indefinitely)
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        self.ensure_ready()?;
        self.shared.request(method, Some(params), timeout).await
    }

    /// Tools advertised by the server, cached until invalidated
    pub async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        self.ensure_ready()?;
        if let Some(tools) = lock(&self.shared.catalog).as_ref() {
            return Ok(tools.clone());
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.call(methods::TOOLS_LIST, params).await?;
            let page: ListToolsPage = match serde_json::from_value(result) {
                Ok(page) => page,
                Err(e) => {
                    return Err(self
                        .payload_violation(format!("malformed tools/list result: {}", e))
                        .await)
                }
            };

            tools.extend(page.tools.into_iter().map(|t| McpTool {
                server: self.shared.name.clone(),
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        *lock(&self.shared.catalog) = Some(tools.clone());
        tracing::info!("Server '{}': {} tools (cached)", self.shared.name, tools.len());
        Ok(tools)
    }

    /// Call a tool with the session's default deadline
    pub async fn call_tool(&self, tool_name: &str, arguments: Option<Value>) -> McpResult<ToolCallResult> {
        self.call_tool_with_timeout(tool_name, arguments, self.shared.options.request_timeout)
            .await
    }

    pub async fn call_tool_with_timeout(
        &self,
        tool_name: &str,
        arguments: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<ToolCallResult> {
        let params = json!({
            "name": tool_name,
            "arguments": arguments.unwrap_or_else(|| json!({})),
        });
        let result = self
            .call_with_timeout(methods::TOOLS_CALL, params, timeout)
            .await?;
        match serde_json::from_value(result) {
            Ok(result) => Ok(result),
            Err(e) => Err(self
                .payload_violation(format!("malformed tools/call result: {}", e))
                .await),
        }
    }

    async fn payload_violation(&self, reason: String) -> McpError {
        let err = McpError::protocol(&self.shared.name, reason);
        self.shared.fail(err.clone()).await;
        err
    }

    /// Shut the connection down: reject outstanding and future calls, close
    /// stdin, then terminate the process. Idempotent.
    pub async fn close(&self) {
        let closed = McpError::ConnectionClosed(self.shared.name.clone());
        let drained: Vec<PendingRequest> = {
            let mut pending = lock(&self.shared.pending);
            if pending.closed.is_none() {
                pending.closed = Some(closed.clone());
            }
            pending.entries.drain().map(|(_, entry)| entry).collect()
        };
        let previous = std::mem::replace(&mut *lock(&self.shared.state), ConnectionState::Closed);

        for entry in drained {
            let _ = entry.reply.send(Err(closed.clone()));
        }

        // stdin EOF first so well-behaved servers exit on their own
        if let Ok(mut writer) =
            tokio::time::timeout(self.shared.options.shutdown_grace, self.shared.writer.lock()).await
        {
            if let Some(mut writer) = writer.take() {
                writer.shutdown().await;
            }
        }
        self.shared.terminate_process().await;
        if let Ok(mut writer) =
            tokio::time::timeout(self.shared.options.shutdown_grace, self.shared.writer.lock()).await
        {
            writer.take();
        }

        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }

        if previous != ConnectionState::Closed {
            tracing::info!(server = %self.shared.name, "MCP connection closed");
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // The read loop holds the shared state (and with it the process);
        // stopping it lets kill_on_drop reap the server.
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
    }
}
