#![forbid(unsafe_code)]
//! Stdio JSON-RPC and SDK transports backing the Codex remote agent bridge.
//! This crate is deliberately dumb: it moves bytes and demuxes JSON-RPC
//! envelopes, but never interprets event semantics — that is
//! `bridge-protocol`'s job.

pub mod app_server_transport;
pub mod error;
pub mod jsonrpc;
pub mod mcp_transport;
pub mod sdk_transport;

pub use app_server_transport::{AppServerTransport, ClientInfo};
pub use error::TransportError;
pub use jsonrpc::{JsonRpcTransport, NotificationStream, RequestId, StdioServerConfig};
pub use mcp_transport::McpTransport;
pub use sdk_transport::{SdkEventStream, SdkStreamRequest, SdkTransport};
