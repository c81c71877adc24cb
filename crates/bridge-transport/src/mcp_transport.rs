//! Thin MCP client: spawns `codex mcp-server`, performs the `initialize`
//! handshake, and exposes `codex`/`codex-reply` tool calls, the approval
//! round-trip, and a raw notification stream. Grounded in the teacher's
//! `codex::mcp::client::CodexMcpServer`.

use serde_json::{json, Value};

use crate::app_server_transport::ClientInfo;
use crate::error::TransportError;
use crate::jsonrpc::{JsonRpcTransport, NotificationStream, RequestId, StdioServerConfig};

pub struct McpTransport {
    transport: JsonRpcTransport,
}

impl McpTransport {
    pub async fn start(
        mut config: StdioServerConfig,
        client: ClientInfo,
    ) -> Result<Self, TransportError> {
        config.args.insert(0, "mcp-server".into());
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

    /// Starts a fresh conversation via the `codex` tool call. Returns the
    /// conversation id the server assigns, extracted from the `tools/call`
    /// response (`conversationId`/`conversation_id`), grounded in the
    /// teacher's `CodexCallResult`.
    #[allow(clippy::too_many_arguments)]
    pub async fn codex(
        &self,
        prompt: &str,
        cwd: Option<&str>,
        approval_policy: Option<&str>,
        sandbox: Option<&str>,
        reasoning_effort: Option<&str>,
    ) -> Result<Option<String>, TransportError> {
        let mut arguments = json!({ "prompt": prompt, "cwd": cwd });
        let map = arguments.as_object_mut().expect("object literal");
        if let Some(policy) = approval_policy {
            map.insert("approval_policy".into(), json!(policy));
        }
        if let Some(mode) = sandbox {
            map.insert("sandbox".into(), json!(mode));
        }
        if let Some(effort) = reasoning_effort {
            map.insert("config".into(), json!({ "model_reasoning_effort": effort }));
        }
        let response = self.invoke_tool_call("codex", arguments).await?;
        Ok(extract_conversation_id(&response))
    }

    /// `codex-reply`'s params (per the teacher's `CodexReplyParams`) carry
    /// only `conversationId`/`prompt` — there is no per-reply approval,
    /// sandbox, or config surface to forward.
    pub async fn codex_reply(
        &self,
        conversation_id: &str,
        prompt: &str,
    ) -> Result<Option<String>, TransportError> {
        let response = self
            .invoke_tool_call(
                "codex-reply",
                json!({ "conversationId": conversation_id, "prompt": prompt }),
            )
            .await?;
        Ok(extract_conversation_id(&response).or_else(|| Some(conversation_id.to_string())))
    }

    /// Sends an approval decision back over `codex/approval`. `approved`
    /// picks `Approve`/`Reject`; `reason` is only sent on rejection.
    pub async fn send_approval(
        &self,
        approval_id: &str,
        approved: bool,
        reason: Option<&str>,
    ) -> Result<(), TransportError> {
        let decision = if approved {
            json!({ "type": "approve", "approval_id": approval_id })
        } else {
            json!({ "type": "reject", "approval_id": approval_id, "reason": reason })
        };
        let (_, rx) = self.transport.request("codex/approval", decision).await?;
        match rx.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(TransportError::ChannelClosed),
        }
    }

    pub fn cancel(&self, request_id: RequestId) -> Result<(), TransportError> {
        self.transport.cancel(request_id)
    }

    /// Notifications here arrive as `codex/event` and (when the MCP server
    /// wraps them) `event_msg`/`response_item` envelopes — unwrapped by
    /// `bridge-protocol::McpEnvelopeConverter`, not this transport.
    pub async fn notifications(&self) -> NotificationStream {
        self.transport.register_listener().await
    }

    pub async fn shutdown(&self) -> Result<(), TransportError> {
        self.transport.shutdown().await
    }

    async fn invoke_tool_call(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, TransportError> {
        let request = json!({ "name": tool_name, "arguments": arguments });
        let (_, rx) = self.transport.request("tools/call", request).await?;
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(TransportError::ChannelClosed),
        }
    }
}

fn extract_conversation_id(response: &Value) -> Option<String> {
    response
        .get("conversationId")
        .or_else(|| response.get("conversation_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_camel_case_conversation_id() {
        assert_eq!(
            extract_conversation_id(&json!({ "conversationId": "c-1" })),
            Some("c-1".to_string())
        );
    }

    #[test]
    fn extracts_snake_case_conversation_id() {
        assert_eq!(
            extract_conversation_id(&json!({ "conversation_id": "c-2" })),
            Some("c-2".to_string())
        );
    }

    #[test]
    fn missing_conversation_id_is_none() {
        assert_eq!(extract_conversation_id(&json!({})), None);
    }
}
