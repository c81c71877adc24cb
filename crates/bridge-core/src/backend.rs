//! Backend abstraction the orchestrator drives without knowing which
//! transport it is talking to (spec.md §4.3, §4.7 "transport selection").
//! Three concrete backends wire a `bridge-transport` transport to the
//! matching `bridge-protocol` converter; `RemoteLauncher` only ever sees
//! `dyn TurnBackend`.

use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;
use bridge_protocol::{AppServerConverter, CanonicalEvent, McpEnvelopeConverter, SdkEventMapper};
use bridge_transport::{
    AppServerTransport, ClientInfo, McpTransport, NotificationStream, SdkStreamRequest,
    SdkTransport, StdioServerConfig,
};
use tokio_stream::StreamExt;

use crate::error::BridgeError;
use crate::model::{EnhancedMode, TransportKind};

#[async_trait]
pub trait TurnBackend: Send {
    fn kind(&self) -> TransportKind;

    /// Starts (or resumes, when `resume_session_id` is `Some`) a thread and
    /// returns its id.
    async fn start_thread(
        &mut self,
        resume_session_id: Option<&str>,
    ) -> Result<String, BridgeError>;

    /// Starts a turn, forwarding `mode`'s approval policy / sandbox /
    /// reasoning effort to the wire. Returns `Some(id)` when the call itself
    /// is what reveals the thread/conversation id (MCP's `codex` tool call
    /// has no separate thread-start step), so the caller can update its
    /// notion of the current thread id.
    async fn start_turn(
        &mut self,
        thread_id: &str,
        message: &str,
        mode: &EnhancedMode,
    ) -> Result<Option<String>, BridgeError>;

    async fn interrupt_turn(&mut self, thread_id: &str, turn_id: &str) -> Result<(), BridgeError>;

    /// Blocks until the next canonical event is available, or `None` once
    /// the underlying stream ends.
    async fn next_event(&mut self) -> Option<CanonicalEvent>;

    /// Clears per-turn accumulator state (reasoning buffers, seen-ids) kept
    /// by the converter. Called on every `turn/started`.
    fn reset_turn(&mut self);

    /// `false` for the SDK backend, whose subprocess has no durable session
    /// to resume across a restart (spec.md §9 Open Question).
    fn supports_resume(&self) -> bool {
        true
    }

    /// Forwards an approval decision over the wire. A no-op for transports
    /// with no approval-callback channel (app-server uses `on-request` only
    /// when running interactively; SDK has none at all).
    async fn send_approval(
        &mut self,
        _id: &str,
        _approved: bool,
        _reason: Option<&str>,
    ) -> Result<(), BridgeError> {
        Ok(())
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        name: "codex-remote-bridge".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

pub struct AppServerBackend {
    transport: AppServerTransport,
    notifications: NotificationStream,
    converter: AppServerConverter,
    pending: VecDeque<CanonicalEvent>,
}

impl AppServerBackend {
    pub async fn start(config: StdioServerConfig) -> Result<Self, BridgeError> {
        let transport = AppServerTransport::start(config, client_info())
            .await
            .map_err(BridgeError::Transport)?;
        let notifications = transport.notifications().await;
        Ok(Self {
            transport,
            notifications,
            converter: AppServerConverter::new(),
            pending: VecDeque::new(),
        })
    }
}

#[async_trait]
impl TurnBackend for AppServerBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::AppServer
    }

    async fn start_thread(
        &mut self,
        resume_session_id: Option<&str>,
    ) -> Result<String, BridgeError> {
        if let Some(thread_id) = resume_session_id {
            let resumed = self.transport.thread_resume(thread_id).await?;
            Ok(resumed)
        } else {
            let started = self.transport.thread_start(None).await?;
            Ok(started)
        }
    }

    async fn start_turn(
        &mut self,
        thread_id: &str,
        message: &str,
        mode: &EnhancedMode,
    ) -> Result<Option<String>, BridgeError> {
        let input = vec![serde_json::json!({ "type": "text", "text": message })];
        self.transport
            .turn_start(
                thread_id,
                input,
                mode.model.as_deref(),
                Some(mode.approval_policy(TransportKind::AppServer)),
                Some(mode.sandbox()),
                mode.reasoning_effort_for_wire(),
            )
            .await?;
        Ok(None)
    }

    async fn interrupt_turn(&mut self, thread_id: &str, turn_id: &str) -> Result<(), BridgeError> {
        self.transport.turn_interrupt(thread_id, turn_id).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<CanonicalEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let (method, params) = self.notifications.recv().await?;
            self.pending
                .extend(self.converter.convert(&method, &params));
        }
    }

    fn reset_turn(&mut self) {
        self.converter.reset_turn();
    }
}

pub struct McpBackend {
    transport: McpTransport,
    notifications: NotificationStream,
    converter: McpEnvelopeConverter,
    pending: VecDeque<CanonicalEvent>,
    cwd: Option<PathBuf>,
}

impl McpBackend {
    pub async fn start(
        config: StdioServerConfig,
        cwd: Option<PathBuf>,
    ) -> Result<Self, BridgeError> {
        let transport = McpTransport::start(config, client_info())
            .await
            .map_err(BridgeError::Transport)?;
        let notifications = transport.notifications().await;
        Ok(Self {
            transport,
            notifications,
            converter: McpEnvelopeConverter::new(),
            pending: VecDeque::new(),
            cwd,
        })
    }
}

#[async_trait]
impl TurnBackend for McpBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Mcp
    }

    async fn start_thread(
        &mut self,
        resume_session_id: Option<&str>,
    ) -> Result<String, BridgeError> {
        // The MCP tool surface has no standalone thread-start call; the
        // first `codex` invocation implicitly creates the conversation, and
        // `codex-reply` resumes one by id.
        Ok(resume_session_id.unwrap_or_default().to_string())
    }

    async fn start_turn(
        &mut self,
        thread_id: &str,
        message: &str,
        mode: &EnhancedMode,
    ) -> Result<Option<String>, BridgeError> {
        if thread_id.is_empty() {
            let conversation_id = self
                .transport
                .codex(
                    message,
                    self.cwd.as_deref().and_then(|p| p.to_str()),
                    Some(mode.approval_policy(TransportKind::Mcp)),
                    Some(mode.sandbox()),
                    mode.reasoning_effort_for_wire(),
                )
                .await?;
            Ok(conversation_id)
        } else {
            let conversation_id = self.transport.codex_reply(thread_id, message).await?;
            Ok(conversation_id)
        }
    }

    async fn interrupt_turn(
        &mut self,
        _thread_id: &str,
        _turn_id: &str,
    ) -> Result<(), BridgeError> {
        // The MCP surface exposes no interrupt tool call; turns can only be
        // abandoned client-side (spec.md §4.7 "Abort semantics").
        Ok(())
    }

    async fn next_event(&mut self) -> Option<CanonicalEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let (_method, params) = self.notifications.recv().await?;
            self.pending.extend(self.converter.convert(&params));
        }
    }

    fn reset_turn(&mut self) {
        self.converter.reset_turn();
    }

    /// `false`: the MCP tool surface has no `thread/resume`-equivalent call,
    /// so a mode-hash change is treated like every other non-app-server
    /// transport (spec.md §4.7 step 2) and starts a fresh `codex`
    /// invocation rather than a `codex-reply` against the old conversation
    /// id (spec.md §9 Open Question: "the spec requires `clearSession()`
    /// and a fresh `startSession` on the next message").
    fn supports_resume(&self) -> bool {
        false
    }

    async fn send_approval(
        &mut self,
        id: &str,
        approved: bool,
        reason: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.transport.send_approval(id, approved, reason).await?;
        Ok(())
    }
}

pub struct SdkBackend {
    binary: PathBuf,
    cwd: Option<PathBuf>,
    converter: SdkEventMapper,
    transport: Option<SdkTransport>,
    pending: VecDeque<CanonicalEvent>,
}

impl SdkBackend {
    pub fn new(binary: PathBuf, cwd: Option<PathBuf>) -> Self {
        Self {
            binary,
            cwd,
            converter: SdkEventMapper::new(),
            transport: None,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl TurnBackend for SdkBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Sdk
    }

    /// The subprocess carries no durable session; each turn spawns a fresh
    /// `codex exec` invocation, so thread "start" is a no-op here.
    async fn start_thread(
        &mut self,
        _resume_session_id: Option<&str>,
    ) -> Result<String, BridgeError> {
        Ok(String::new())
    }

    async fn start_turn(
        &mut self,
        _thread_id: &str,
        message: &str,
        mode: &EnhancedMode,
    ) -> Result<Option<String>, BridgeError> {
        let request = SdkStreamRequest {
            binary: self.binary.clone(),
            prompt: message.to_string(),
            cwd: self.cwd.clone(),
            idle_timeout: None,
            model: mode.model.clone(),
            approval_policy: Some(mode.approval_policy(TransportKind::Sdk).to_string()),
            sandbox: Some(mode.sandbox().to_string()),
            reasoning_effort: mode.reasoning_effort_for_wire().map(str::to_string),
        };
        let transport = SdkTransport::spawn(request).await?;
        self.transport = Some(transport);
        Ok(None)
    }

    async fn interrupt_turn(
        &mut self,
        _thread_id: &str,
        _turn_id: &str,
    ) -> Result<(), BridgeError> {
        if let Some(transport) = self.transport.as_mut() {
            transport.cancel();
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<CanonicalEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let transport = self.transport.as_mut()?;
            let (kind, payload) = match transport.events.next().await? {
                Ok(pair) => pair,
                Err(_) => return None,
            };
            self.pending.extend(self.converter.convert(&kind, &payload));
        }
    }

    fn reset_turn(&mut self) {
        // SdkEventMapper resets its own per-turn state on `turn.started`;
        // nothing to do eagerly here.
    }

    fn supports_resume(&self) -> bool {
        false
    }
}
