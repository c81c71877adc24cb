//! Thin app-server client: spawns `codex app-server`, performs the
//! `initialize` handshake, and exposes `thread/*` and `turn/*` calls plus a
//! raw notification stream. Grounded in the teacher's
//! `codex::mcp::client::CodexAppServer`.

use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::jsonrpc::{JsonRpcTransport, NotificationStream, RequestId, StdioServerConfig};

#[derive(Clone, Debug, serde::Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

pub struct AppServerTransport {
    transport: JsonRpcTransport,
}

impl AppServerTransport {
    pub async fn start(
        mut config: StdioServerConfig,
        client: ClientInfo,
    ) -> Result<Self, TransportError> {
        config.args.insert(0, "app-server".into());
        let transport = JsonRpcTransport::spawn(config).await?;
        let params = json!({
            "clientInfo": client,
            "protocolVersion": "2024-11-05",
            "capabilities": Value::Object(Default::default()),
        });
        transport
            .request_with_timeout("initialize", params, transport.startup_timeout())
            .await
            .map_err(|err| TransportError::Handshake(err.to_string()))?;
        Ok(Self { transport })
    }

    pub async fn thread_start(&self, thread_id: Option<String>) -> Result<String, TransportError> {
        let (_, rx) = self
            .transport
            .request("thread/start", json!({ "thread_id": thread_id }))
            .await?;
        let response = recv(rx).await?;
        extract_thread_id(&response).ok_or_else(|| {
            TransportError::Transport("thread/start response missing a thread id".into())
        })
    }

    pub async fn thread_resume(&self, thread_id: &str) -> Result<String, TransportError> {
        let (_, rx) = self
            .transport
            .request("thread/resume", json!({ "threadId": thread_id }))
            .await?;
        let response = recv(rx).await?;
        Ok(extract_thread_id(&response).unwrap_or_else(|| thread_id.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn turn_start(
        &self,
        thread_id: &str,
        input: Vec<Value>,
        model: Option<&str>,
        approval_policy: Option<&str>,
        sandbox: Option<&str>,
        reasoning_effort: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut config = serde_json::Map::new();
        if let Some(policy) = approval_policy {
            config.insert("approval_policy".into(), json!(policy));
        }
        if let Some(mode) = sandbox {
            config.insert("sandbox_mode".into(), json!(mode));
        }
        if let Some(effort) = reasoning_effort {
            config.insert("model_reasoning_effort".into(), json!(effort));
        }
        let (_, rx) = self
            .transport
            .request(
                "turn/start",
                json!({
                    "threadId": thread_id,
                    "input": input,
                    "model": model,
                    "config": config,
                }),
            )
            .await?;
        recv(rx).await?;
        Ok(())
    }

    pub async fn turn_interrupt(
        &self,
        thread_id: &str,
        turn_id: &str,
    ) -> Result<(), TransportError> {
        let (_, rx) = self
            .transport
            .request(
                "turn/interrupt",
                json!({ "threadId": thread_id, "turnId": turn_id }),
            )
            .await?;
        recv(rx).await?;
        Ok(())
    }

    pub fn cancel(&self, request_id: RequestId) -> Result<(), TransportError> {
        self.transport.cancel(request_id)
    }

    pub async fn notifications(&self) -> NotificationStream {
        self.transport.register_listener().await
    }

    pub async fn shutdown(&self) -> Result<(), TransportError> {
        self.transport.shutdown().await
    }
}

async fn recv(
    rx: oneshot::Receiver<Result<Value, TransportError>>,
) -> Result<Value, TransportError> {
    match rx.await {
        Ok(inner) => inner,
        Err(_) => Err(TransportError::ChannelClosed),
    }
}

/// Mirrors the teacher's `app_server_turns.rs` response-shape tolerance: the
/// id can show up as `thread_id`, `threadId`, or nested under `thread.id`
/// depending on server version.
fn extract_thread_id(response: &Value) -> Option<String> {
    response
        .get("thread_id")
        .or_else(|| response.get("threadId"))
        .or_else(|| response.get("thread").and_then(|t| t.get("id")))
        .and_then(Value::as_str)
        .map(str::to_string)
}
