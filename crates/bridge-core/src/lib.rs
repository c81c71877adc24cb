#![forbid(unsafe_code)]
//! Session/turn orchestration for the Codex remote agent bridge: owns the
//! turn lifecycle, the hub-facing queue/buffer, permission round-tripping,
//! and the stream processors that sit between canonical events and the hub
//! (spec.md §3, §4.5-§4.9).

pub mod backend;
pub mod error;
pub mod hub;
pub mod launcher;
pub mod message_buffer;
pub mod message_queue;
pub mod model;
pub mod permission_handler;
pub mod processors;

pub use backend::{AppServerBackend, McpBackend, SdkBackend, TurnBackend};
pub use error::BridgeError;
pub use hub::{AgentState, HubClient, SessionEvent};
pub use launcher::RemoteLauncher;
pub use message_buffer::{BufferEntry, EntryKind, MessageBuffer};
pub use message_queue::MessageQueue;
pub use model::{
    ApprovalRequest, EnhancedMode, PermissionMode, QueuedMessage, Session, TransportKind, Turn,
};
pub use permission_handler::PermissionHandler;
pub use processors::{DiffProcessor, ReasoningProcessor, SyntheticEvent};
