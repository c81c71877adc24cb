#![forbid(unsafe_code)]
//! Canonical event model and per-transport event converters for the Codex
//! remote agent bridge. This crate owns the *only* contract between
//! transport adapters and the orchestrator: [`canonical::CanonicalEvent`].

pub mod app_server;
pub mod canonical;
pub mod mcp_envelope;
pub mod sdk;
pub mod throttle;

pub use app_server::AppServerConverter;
pub use canonical::CanonicalEvent;
pub use mcp_envelope::McpEnvelopeConverter;
pub use sdk::SdkEventMapper;
pub use throttle::ThrottledLogger;
