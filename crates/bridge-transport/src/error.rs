use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by any of the three bridge transports. Mirrors the
/// teacher's `codex::mcp::client::McpError` shape, generalized across
/// app-server, MCP, and SDK backends.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server did not respond to initialize: {0}")]
    Handshake(String),
    #[error("transport task failed: {0}")]
    Transport(String),
    #[error("server returned JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("request was cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transport channel closed unexpectedly")]
    ChannelClosed,
    #[error("sdk backend failed: {0}")]
    Sdk(String),
}
