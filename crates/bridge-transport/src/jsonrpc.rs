//! Generic JSON-RPC-over-stdio transport shared by the app-server and MCP
//! backends. Grounded in the teacher's `codex::mcp::jsonrpc::JsonRpcTransport`:
//! a writer task owns the child's stdin, a reader task demuxes responses
//! (by numeric id, via a pending-request map) from notifications (fanned
//! out to whatever listeners are registered), and a stderr task logs the
//! child's diagnostic output.
//!
//! Unlike the teacher, which hardcodes two notification shapes
//! (`CodexEvent`/`AppNotification`), this transport hands every notification
//! to its listeners as a raw `(method, params)` pair — canonicalization is
//! bridge-protocol's job, not the transport's.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::error::TransportError;

pub type RequestId = u64;
pub type NotificationStream = mpsc::UnboundedReceiver<(String, Value)>;

/// Launch configuration for a stdio JSON-RPC child process.
#[derive(Clone, Debug)]
pub struct StdioServerConfig {
    pub binary: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
    pub mirror_stdio: bool,
    pub startup_timeout: Duration,
}

impl Default for StdioServerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("codex"),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            mirror_stdio: false,
            startup_timeout: Duration::from_secs(20),
        }
    }
}

type PendingRequests =
    Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, TransportError>>>>>;
type Sinks = Arc<Mutex<Vec<mpsc::UnboundedSender<(String, Value)>>>>;

pub struct JsonRpcTransport {
    writer: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    sinks: Sinks,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
    child: Arc<Mutex<Option<Child>>>,
    startup_timeout: Duration,
}

impl JsonRpcTransport {
    pub async fn spawn(config: StdioServerConfig) -> Result<Self, TransportError> {
        let mut command = Command::new(&config.binary);
        command
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let command_debug = format!("{command:?}");
        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            command: command_debug,
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Transport("child stdout unavailable".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Transport("child stdin unavailable".into()))?;
        let stderr = child.stderr.take();

        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let sinks: Sinks = Arc::new(Mutex::new(Vec::new()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(writer_task(stdin, writer_rx));
        let reader_handle = tokio::spawn(reader_task(
            stdout,
            pending.clone(),
            sinks.clone(),
            config.mirror_stdio,
        ));
        let mut tasks = vec![writer_handle, reader_handle];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(stderr, config.mirror_stdio)));
        }

        Ok(Self {
            writer: writer_tx,
            pending,
            sinks,
            next_id: AtomicU64::new(1),
            tasks,
            child: Arc::new(Mutex::new(Some(child))),
            startup_timeout: config.startup_timeout,
        })
    }

    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    pub async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(RequestId, oneshot::Receiver<Result<Value, TransportError>>), TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let serialized = serde_json::to_string(&message)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = self.pending.lock().await;
            guard.insert(id, tx);
        }

        if self.writer.send(serialized).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::ChannelClosed);
        }

        Ok((id, rx))
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let (_, rx) = self.request(method, params).await?;
        recv_with_timeout(rx, timeout).await
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.writer
            .send(serde_json::to_string(&message)?)
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Registers a new listener for every inbound notification. Mirrors the
    /// teacher's `register_codex_listener`/`register_app_listener` pair,
    /// collapsed into one since this transport does not special-case method
    /// names.
    pub async fn register_listener(&self) -> NotificationStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().await.push(tx);
        rx
    }

    pub fn cancel(&self, request_id: RequestId) -> Result<(), TransportError> {
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "$/cancelRequest",
            "params": { "id": request_id },
        });
        self.writer
            .send(serde_json::to_string(&message)?)
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), TransportError> {
        if let Ok((_, rx)) = self.request("shutdown", Value::Null).await {
            let _ = recv_with_timeout(rx, Duration::from_secs(5)).await;
        }
        let exit_message =
            serde_json::json!({ "jsonrpc": "2.0", "method": "exit", "params": Value::Null });
        let _ = self
            .writer
            .send(serde_json::to_string(&exit_message).unwrap_or_default());
        Ok(())
    }
}

impl Drop for JsonRpcTransport {
    fn drop(&mut self) {
        for handle in &self.tasks {
            handle.abort();
        }
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Value,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcNotification {
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

async fn writer_task(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = rx.recv().await {
        if stdin.write_all(message.as_bytes()).await.is_err() {
            break;
        }
        if stdin.write_all(b"\n").await.is_err() {
            break;
        }
        let _ = stdin.flush().await;
    }
    let _ = stdin.shutdown().await;
}

async fn reader_task(
    stdout: ChildStdout,
    pending: PendingRequests,
    sinks: Sinks,
    mirror_stdio: bool,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if mirror_stdio {
            eprintln!("[bridge stdout] {line}");
        }
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                warn!("failed to parse transport stdout as JSON: {err}");
                continue;
            }
        };

        match decode_message(value) {
            Some(Incoming::Response(response)) => handle_response(response, &pending).await,
            Some(Incoming::Notification(notification)) => {
                let params = notification.params.unwrap_or(Value::Null);
                let mut guard = sinks.lock().await;
                guard.retain(|tx| {
                    tx.send((notification.method.clone(), params.clone()))
                        .is_ok()
                });
            }
            None => warn!("received malformed transport message"),
        }
    }

    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(TransportError::ChannelClosed));
    }
}

async fn stderr_task(stderr: ChildStderr, mirror_stdio: bool) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if mirror_stdio {
            eprintln!("[bridge stderr] {line}");
        } else {
            debug!("transport stderr: {line}");
        }
    }
}

enum Incoming {
    Response(RpcResponse),
    Notification(RpcNotification),
}

fn decode_message(value: Value) -> Option<Incoming> {
    if value.get("id").is_none() && value.get("method").is_some() {
        return serde_json::from_value(value)
            .ok()
            .map(Incoming::Notification);
    }
    if value.get("id").is_some() {
        return serde_json::from_value(value).ok().map(Incoming::Response);
    }
    None
}

async fn handle_response(response: RpcResponse, pending: &PendingRequests) {
    let Some(id) = parse_request_id(&response.id) else {
        warn!("received response without numeric id");
        return;
    };
    let Some(tx) = pending.lock().await.remove(&id) else {
        return;
    };
    if let Some(err) = response.error {
        let mapped = if err.code == -32800 {
            TransportError::Cancelled
        } else {
            TransportError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            }
        };
        let _ = tx.send(Err(mapped));
    } else if let Some(result) = response.result {
        let _ = tx.send(Ok(result));
    } else {
        let _ = tx.send(Err(TransportError::Transport(
            "response missing result and error".into(),
        )));
    }
}

fn parse_request_id(value: &Value) -> Option<RequestId> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

async fn recv_with_timeout(
    rx: oneshot::Receiver<Result<Value, TransportError>>,
    timeout: Duration,
) -> Result<Value, TransportError> {
    match time::timeout(timeout, rx).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(err),
        Ok(Err(_)) => Err(TransportError::ChannelClosed),
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}
