//! The turn lifecycle orchestrator (spec.md §4.7, C7). Pulls one
//! [`QueuedMessage`] at a time off the [`MessageQueue`], starts (or resumes)
//! a thread when the mode hash changes, drives the active backend until a
//! terminal event, and fans out everything it sees to the hub, the
//! reasoning/diff stream processors, the approval tracker, and the replay
//! buffer. Cooperative: at most one turn is ever in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bridge_protocol::CanonicalEvent;

use crate::backend::TurnBackend;
use crate::error::BridgeError;
use crate::hub::{AgentState, HubClient, SessionEvent};
use crate::message_buffer::{EntryKind, MessageBuffer};
use crate::message_queue::MessageQueue;
use crate::model::{ApprovalRequest, QueuedMessage};
use crate::permission_handler::PermissionHandler;
use crate::processors::{DiffProcessor, ReasoningProcessor, SyntheticEvent};

/// Progress check cadence while a turn is in flight.
const WATCHDOG_TICK: Duration = Duration::from_secs(5);
/// No forward progress for this long after a turn starts notifies the hub
/// once, so a human can decide whether to keep waiting or interrupt.
const WATCHDOG_STALE: Duration = Duration::from_secs(90);

/// Substrings the backend's error text is checked against to decide whether
/// a stale thread/session id should be dropped and a fresh one started on
/// the next turn, rather than retried against a conversation the server has
/// already forgotten (spec.md §4.7 "Exit vs switch").
const SESSION_INVALID_MARKERS: &[&str] = &[
    "no active session",
    "session not found",
    "conversation not found",
    "invalid session",
    "invalid conversation",
    "thread not found",
];

/// Shareable handle onto the launcher's *current* abort controller. A fresh
/// [`CancellationToken`] is swapped in under this handle at the start of
/// every turn (spec.md §9 "install a fresh token after abort"), so a handle
/// obtained once at construction keeps working across turns: interrupting
/// while idle cancels a token nobody is waiting on and is silently
/// overwritten on the next turn (spec.md §8 invariant 6), while interrupting
/// mid-turn cancels the token the in-flight `select!` is actually polling.
#[derive(Clone)]
pub struct AbortHandle(Arc<std::sync::Mutex<CancellationToken>>);

impl AbortHandle {
    fn new() -> Self {
        Self(Arc::new(std::sync::Mutex::new(CancellationToken::new())))
    }

    pub fn cancel(&self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).cancel();
    }

    fn reset(&self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = CancellationToken::new();
    }

    fn current(&self) -> CancellationToken {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct RemoteLauncher<H: HubClient> {
    backend: Box<dyn TurnBackend>,
    hub: Arc<H>,
    queue: Arc<MessageQueue>,
    permission_handler: Arc<PermissionHandler>,
    buffer: MessageBuffer,
    reasoning: ReasoningProcessor,
    diff: DiffProcessor,
    was_created: bool,
    current_mode_hash: Option<String>,
    current_thread_id: Option<String>,
    abort_token: AbortHandle,
    inbound_tx: mpsc::UnboundedSender<SessionEvent>,
    inbound_rx: mpsc::UnboundedReceiver<SessionEvent>,
    switch_requested: Arc<AtomicBool>,
}

impl<H: HubClient> RemoteLauncher<H> {
    pub fn new(
        backend: Box<dyn TurnBackend>,
        hub: Arc<H>,
        queue: Arc<MessageQueue>,
        permission_handler: Arc<PermissionHandler>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            hub,
            queue,
            permission_handler,
            buffer: MessageBuffer::new(),
            reasoning: ReasoningProcessor::new(),
            diff: DiffProcessor::new(),
            was_created: false,
            current_mode_hash: None,
            current_thread_id: None,
            abort_token: AbortHandle::new(),
            inbound_tx,
            inbound_rx,
            switch_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    pub fn permission_handler(&self) -> Arc<PermissionHandler> {
        self.permission_handler.clone()
    }

    /// A cloneable handle that can request interruption of whatever turn is
    /// (or later becomes) current, independent of any `&mut` borrow on the
    /// launcher itself — this is what a hub RPC handler for `abort` holds
    /// onto, since it runs concurrently with [`RemoteLauncher::run`].
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_token.clone()
    }

    /// Interrupts whatever turn is currently in flight. A no-op if none is.
    pub fn request_interrupt(&self) {
        self.abort_token.cancel();
    }

    /// Connects the hub's inbound RPCs (`abort`, `switchToLocal`, approval
    /// decisions — spec.md §6.1) to this launcher's own handling, by handing
    /// the hub a sender it can forward [`SessionEvent`]s through. Call once,
    /// before [`RemoteLauncher::run`].
    pub fn register_with_hub(&self) {
        self.hub.register_handlers(self.inbound_tx.clone());
    }

    /// `true` once a `switchToLocal` RPC has been processed. The surrounding
    /// runner (out of scope for this crate — spec.md §1) polls this after
    /// [`RemoteLauncher::run`] returns to decide whether to hand the session
    /// back to a local run instead of just exiting.
    pub fn switch_requested(&self) -> bool {
        self.switch_requested.load(Ordering::SeqCst)
    }

    async fn handle_inbound(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Interrupt => self.abort_token.cancel(),
            SessionEvent::Switch => {
                self.switch_requested.store(true, Ordering::SeqCst);
                self.abort_token.cancel();
            }
            SessionEvent::ApprovalDecision {
                id,
                approved,
                reason,
            } => {
                self.handle_approval_decision(&id, approved, reason.as_deref())
                    .await;
            }
            // Inbound messages are enqueued directly through `queue()`
            // (spec.md §4.8); `Ready` is outbound-only.
            SessionEvent::Message { .. } | SessionEvent::Ready => {}
        }
    }

    pub async fn handle_approval_decision(
        &mut self,
        id: &str,
        approved: bool,
        reason: Option<&str>,
    ) {
        if self.permission_handler.on_complete(id).await.is_none() {
            debug!("approval decision for unknown or already-resolved request {id}");
            return;
        }
        if let Err(err) = self.backend.send_approval(id, approved, reason).await {
            warn!("failed to forward approval decision: {err}");
        }
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// Drains the queue, running one turn per message, until the queue is
    /// closed with nothing left pending.
    pub async fn run(&mut self) -> Result<(), BridgeError> {
        loop {
            let shutdown = CancellationToken::new();
            let queued = tokio::select! {
                queued = self.queue.wait_for_message(&shutdown) => queued,
                Some(event) = self.inbound_rx.recv() => {
                    self.handle_inbound(event).await;
                    continue;
                }
            };
            let Some(queued) = queued else {
                return Ok(());
            };
            self.run_turn(queued).await?;
        }
    }

    async fn ensure_thread(&mut self, queued: &QueuedMessage) -> Result<(), BridgeError> {
        let mode_changed = self.current_mode_hash.as_deref() != Some(queued.hash.as_str());
        if self.was_created && !mode_changed {
            return Ok(());
        }

        let resume_from = if self.was_created && self.backend.supports_resume() {
            self.current_thread_id.clone()
        } else {
            None
        };

        match self.backend.start_thread(resume_from.as_deref()).await {
            Ok(thread_id) => self.current_thread_id = Some(thread_id),
            Err(err) if is_session_invalid(&err) => {
                debug!("thread {resume_from:?} no longer valid, starting fresh: {err}");
                let thread_id = self.backend.start_thread(None).await?;
                self.current_thread_id = Some(thread_id);
            }
            Err(err) => return Err(err),
        }

        self.was_created = true;
        self.current_mode_hash = Some(queued.hash.clone());
        Ok(())
    }

    async fn run_turn(&mut self, queued: QueuedMessage) -> Result<(), BridgeError> {
        self.ensure_thread(&queued).await?;
        self.backend.reset_turn();
        self.abort_token.reset();

        self.buffer.push(queued.message.clone(), EntryKind::User);
        self.hub
            .update_agent_state(AgentState {
                thinking: true,
                turn_in_flight: true,
                session_id: self.current_thread_id.clone(),
            })
            .await;

        let thread_id = self.current_thread_id.clone().unwrap_or_default();
        if let Some(resolved_id) = self
            .backend
            .start_turn(&thread_id, &queued.message, &queued.mode)
            .await?
        {
            self.current_thread_id = Some(resolved_id);
        }

        let mut last_progress = Instant::now();
        let mut watchdog_notified = false;
        let mut current_turn_id: Option<String> = None;
        let mut reached_ready = false;
        let mut ticker = tokio::time::interval(WATCHDOG_TICK);
        let abort_token = self.abort_token.current();

        loop {
            tokio::select! {
                _ = abort_token.cancelled() => {
                    let _ = self
                        .backend
                        .interrupt_turn(&thread_id, current_turn_id.as_deref().unwrap_or_default())
                        .await;
                    self.permission_handler.reset().await;
                    for synthetic in self.reasoning.abort() {
                        self.emit_synthetic(synthetic).await;
                    }
                    self.hub.send_session_event("turn_aborted", serde_json::json!({ "turn_id": current_turn_id })).await;
                    break;
                }
                maybe_event = self.backend.next_event() => {
                    let Some(event) = maybe_event else {
                        warn!("backend event stream ended before a terminal event");
                        break;
                    };
                    last_progress = Instant::now();
                    watchdog_notified = false;
                    if let Some(turn_id) = event.turn_id() {
                        current_turn_id = Some(turn_id.to_string());
                    }
                    let terminal = event.is_turn_terminal();
                    // A `turn_aborted` delivered as a regular upstream event (rather
                    // than through the abort branch above, which already sends its
                    // own signal) still ends the turn, but only task_complete/
                    // task_failed count as "reached ready" for the hub.
                    reached_ready = matches!(event, CanonicalEvent::TaskComplete { .. } | CanonicalEvent::TaskFailed { .. });
                    self.dispatch_event(event).await;
                    if terminal {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !watchdog_notified && last_progress.elapsed() >= WATCHDOG_STALE {
                        watchdog_notified = true;
                        self.hub
                            .send_session_event(
                                "turn_stalled",
                                serde_json::json!({ "turn_id": current_turn_id, "message": "turn might be stuck: no progress for 90s" }),
                            )
                            .await;
                    }
                }
                Some(event) = self.inbound_rx.recv() => {
                    self.handle_inbound(event).await;
                }
            }
        }

        if let Some(diff) = self.diff.flush() {
            self.hub
                .send_session_event("turn_diff", serde_json::json!({ "unified_diff": diff }))
                .await;
        }

        self.hub
            .update_agent_state(AgentState {
                thinking: false,
                turn_in_flight: false,
                session_id: self.current_thread_id.clone(),
            })
            .await;

        if reached_ready {
            self.hub
                .send_session_event("ready", serde_json::json!({}))
                .await;
        }
        Ok(())
    }

    async fn dispatch_event(&mut self, event: CanonicalEvent) {
        match &event {
            CanonicalEvent::ThreadStarted { thread_id } => {
                self.current_thread_id = Some(thread_id.clone());
            }
            CanonicalEvent::AgentMessage { message, .. } => {
                self.buffer.push(message.clone(), EntryKind::Assistant);
                self.hub.send_codex_message(message).await;
            }
            CanonicalEvent::AgentReasoningDelta { delta, .. } => {
                for synthetic in self.reasoning.process_delta(delta) {
                    self.emit_synthetic(synthetic).await;
                }
            }
            CanonicalEvent::AgentReasoningSectionBreak { .. } => {
                for synthetic in self.reasoning.handle_section_break() {
                    self.emit_synthetic(synthetic).await;
                }
            }
            CanonicalEvent::TurnDiff { unified_diff, .. } => {
                self.diff.accumulate(unified_diff);
            }
            CanonicalEvent::ExecApprovalRequest {
                call_id,
                command,
                cwd,
                message,
                tool,
                ..
            } => {
                self.permission_handler
                    .on_request(ApprovalRequest {
                        id: call_id.clone(),
                        tool_name: tool.clone().unwrap_or_else(|| "shell".to_string()),
                        command: command.clone(),
                        cwd: cwd.clone(),
                        message: message.clone(),
                        tool: tool.clone(),
                    })
                    .await;
            }
            CanonicalEvent::TaskComplete { .. } | CanonicalEvent::TaskFailed { .. } => {
                for synthetic in self.reasoning.complete() {
                    self.emit_synthetic(synthetic).await;
                }
            }
            CanonicalEvent::TurnAborted { .. } => {
                for synthetic in self.reasoning.abort() {
                    self.emit_synthetic(synthetic).await;
                }
            }
            _ => {}
        }

        if let Some(message) = terminal_error_message(&event) {
            if is_session_invalid_text(message) {
                debug!(
                    "session invalidated mid-turn ({message}), forcing a fresh thread next turn"
                );
                self.current_thread_id = None;
                self.current_mode_hash = None;
                self.was_created = false;
            }
        }

        if let Ok(payload) = serde_json::to_value(&event) {
            let name = event_name(&event);
            self.hub.send_session_event(name, payload).await;
        }
    }

    async fn emit_synthetic(&mut self, event: SyntheticEvent) {
        match event {
            SyntheticEvent::ToolCall { name, call_id } => {
                self.hub
                    .send_session_event(
                        "tool_call",
                        serde_json::json!({ "name": name, "call_id": call_id }),
                    )
                    .await;
            }
            SyntheticEvent::ToolCallResult {
                call_id,
                output,
                status,
            } => {
                self.buffer.push(output.clone(), EntryKind::Tool);
                self.hub
                    .send_session_event(
                        "tool_call_result",
                        serde_json::json!({ "call_id": call_id, "output": output, "status": status }),
                    )
                    .await;
            }
        }
    }
}

/// Extracts the error text carried by a terminal failure event, so a
/// session-invalidation string surfacing mid-turn (rather than from a
/// transport `Err`) still forces `ensure_thread` to start fresh next turn.
fn terminal_error_message(event: &CanonicalEvent) -> Option<&str> {
    match event {
        CanonicalEvent::TaskFailed { error, .. } => error.as_deref(),
        CanonicalEvent::StreamError { message, .. } => Some(message.as_str()),
        CanonicalEvent::Error { message, .. } => Some(message.as_str()),
        _ => None,
    }
}

fn is_session_invalid(err: &BridgeError) -> bool {
    is_session_invalid_text(&err.to_string())
}

fn is_session_invalid_text(text: &str) -> bool {
    let text = text.to_lowercase();
    SESSION_INVALID_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

fn event_name(event: &CanonicalEvent) -> &'static str {
    match event {
        CanonicalEvent::ThreadStarted { .. } => "thread_started",
        CanonicalEvent::TaskStarted { .. } => "task_started",
        CanonicalEvent::TaskComplete { .. } => "task_complete",
        CanonicalEvent::TaskFailed { .. } => "task_failed",
        CanonicalEvent::TurnAborted { .. } => "turn_aborted",
        CanonicalEvent::StreamError { .. } => "stream_error",
        CanonicalEvent::Error { .. } => "error",
        CanonicalEvent::AgentMessage { .. } => "agent_message",
        CanonicalEvent::AgentReasoning { .. } => "agent_reasoning",
        CanonicalEvent::AgentReasoningDelta { .. } => "agent_reasoning_delta",
        CanonicalEvent::AgentReasoningSectionBreak { .. } => "agent_reasoning_section_break",
        CanonicalEvent::ExecCommandBegin { .. } => "exec_command_begin",
        CanonicalEvent::ExecCommandEnd { .. } => "exec_command_end",
        CanonicalEvent::ExecApprovalRequest { .. } => "exec_approval_request",
        CanonicalEvent::PatchApplyBegin { .. } => "patch_apply_begin",
        CanonicalEvent::PatchApplyEnd { .. } => "patch_apply_end",
        CanonicalEvent::TodoList { .. } => "todo_list",
        CanonicalEvent::TurnDiff { .. } => "turn_diff",
        CanonicalEvent::TokenCount { .. } => "token_count",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnhancedMode, PermissionMode, TransportKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex as TokioMutex;

    struct ScriptedBackend {
        events: TokioMutex<VecDeque<CanonicalEvent>>,
        started_threads: Arc<TokioMutex<Vec<Option<String>>>>,
    }

    impl ScriptedBackend {
        fn new(events: Vec<CanonicalEvent>) -> Self {
            Self {
                events: TokioMutex::new(events.into()),
                started_threads: Arc::new(TokioMutex::new(Vec::new())),
            }
        }

        fn new_tracked(
            events: Vec<CanonicalEvent>,
        ) -> (Self, Arc<TokioMutex<Vec<Option<String>>>>) {
            let backend = Self::new(events);
            let started_threads = backend.started_threads.clone();
            (backend, started_threads)
        }
    }

    #[async_trait]
    impl TurnBackend for ScriptedBackend {
        fn kind(&self) -> TransportKind {
            TransportKind::AppServer
        }

        async fn start_thread(
            &mut self,
            resume_session_id: Option<&str>,
        ) -> Result<String, BridgeError> {
            self.started_threads
                .lock()
                .await
                .push(resume_session_id.map(String::from));
            Ok("thread-1".to_string())
        }

        async fn start_turn(
            &mut self,
            _thread_id: &str,
            _message: &str,
            _mode: &EnhancedMode,
        ) -> Result<Option<String>, BridgeError> {
            Ok(None)
        }

        async fn interrupt_turn(
            &mut self,
            _thread_id: &str,
            _turn_id: &str,
        ) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn next_event(&mut self) -> Option<CanonicalEvent> {
            self.events.lock().await.pop_front()
        }

        fn reset_turn(&mut self) {}
    }

    fn mode() -> EnhancedMode {
        EnhancedMode {
            permission_mode: PermissionMode::Default,
            model: None,
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn a_single_turn_runs_to_completion_and_reports_idle_state() {
        let backend = ScriptedBackend::new(vec![
            CanonicalEvent::ThreadStarted {
                thread_id: "thread-1".to_string(),
            },
            CanonicalEvent::TaskStarted {
                turn_id: Some("turn-1".to_string()),
            },
            CanonicalEvent::AgentMessage {
                turn_id: Some("turn-1".to_string()),
                message: "hello".to_string(),
            },
            CanonicalEvent::TaskComplete {
                turn_id: Some("turn-1".to_string()),
            },
        ]);
        let hub = Arc::new(crate::hub::RecordingHubClient::new());
        let queue = MessageQueue::new();
        let permissions = Arc::new(PermissionHandler::new());
        let mut launcher =
            RemoteLauncher::new(Box::new(backend), hub.clone(), queue.clone(), permissions);

        queue.push(QueuedMessage::new("hi", mode(), false)).await;
        queue.close().await;

        launcher.run().await.unwrap();

        assert_eq!(hub.messages.lock().await.as_slice(), ["hello".to_string()]);
        let states = hub.states.lock().await;
        assert!(!states.last().unwrap().turn_in_flight);
    }

    /// A backend whose turn never naturally terminates, so the only way out
    /// of `run_turn`'s event loop is the abort branch.
    struct StalledBackend {
        started: TokioMutex<Option<tokio::sync::oneshot::Sender<()>>>,
    }

    impl StalledBackend {
        fn new(started_tx: tokio::sync::oneshot::Sender<()>) -> Self {
            Self {
                started: TokioMutex::new(Some(started_tx)),
            }
        }
    }

    #[async_trait]
    impl TurnBackend for StalledBackend {
        fn kind(&self) -> TransportKind {
            TransportKind::AppServer
        }

        async fn start_thread(
            &mut self,
            _resume_session_id: Option<&str>,
        ) -> Result<String, BridgeError> {
            Ok("thread-1".to_string())
        }

        async fn start_turn(
            &mut self,
            _thread_id: &str,
            _message: &str,
            _mode: &EnhancedMode,
        ) -> Result<Option<String>, BridgeError> {
            if let Some(tx) = self.started.lock().await.take() {
                let _ = tx.send(());
            }
            Ok(None)
        }

        async fn interrupt_turn(
            &mut self,
            _thread_id: &str,
            _turn_id: &str,
        ) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn next_event(&mut self) -> Option<CanonicalEvent> {
            std::future::pending().await
        }

        fn reset_turn(&mut self) {}
    }

    #[tokio::test]
    async fn interrupting_an_idle_session_is_a_no_op() {
        let backend = ScriptedBackend::new(vec![]);
        let hub = Arc::new(crate::hub::RecordingHubClient::new());
        let queue = MessageQueue::new();
        let permissions = Arc::new(PermissionHandler::new());
        let launcher = RemoteLauncher::new(Box::new(backend), hub, queue.clone(), permissions);

        // No turn has ever started; this must be ignored rather than
        // bleeding into whatever turn runs next (spec.md §8 invariant 6).
        launcher.request_interrupt();
        queue.close().await;

        assert_eq!(queue.size().await, 0);
    }

    #[tokio::test]
    async fn interrupting_an_in_flight_turn_resets_outstanding_approvals() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let backend = StalledBackend::new(started_tx);
        let hub = Arc::new(crate::hub::RecordingHubClient::new());
        let queue = MessageQueue::new();
        let permissions = Arc::new(PermissionHandler::new());
        permissions
            .on_request(ApprovalRequest {
                id: "approval-1".to_string(),
                tool_name: "shell".to_string(),
                command: None,
                cwd: None,
                message: None,
                tool: None,
            })
            .await;

        let mut launcher =
            RemoteLauncher::new(Box::new(backend), hub, queue.clone(), permissions.clone());
        let abort = launcher.abort_handle();

        queue.push(QueuedMessage::new("hi", mode(), false)).await;
        queue.close().await;

        let run_handle = tokio::spawn(async move { launcher.run().await });

        // Wait until the backend has actually started the turn before
        // interrupting, so this exercises abort-while-in-flight rather than
        // abort-while-idle.
        started_rx.await.unwrap();
        abort.cancel();

        run_handle.await.unwrap().unwrap();
        assert!(permissions.on_complete("approval-1").await.is_none());
    }

    #[tokio::test]
    async fn hub_interrupt_rpc_aborts_the_in_flight_turn() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let backend = StalledBackend::new(started_tx);
        let hub = Arc::new(crate::hub::RecordingHubClient::new());
        let queue = MessageQueue::new();
        let permissions = Arc::new(PermissionHandler::new());

        let mut launcher =
            RemoteLauncher::new(Box::new(backend), hub.clone(), queue.clone(), permissions);
        launcher.register_with_hub();

        queue.push(QueuedMessage::new("hi", mode(), false)).await;
        queue.close().await;

        let run_handle = tokio::spawn(async move { launcher.run().await });

        started_rx.await.unwrap();
        hub.dispatch(SessionEvent::Interrupt);

        run_handle.await.unwrap().unwrap();
        let names: Vec<_> = hub
            .events
            .lock()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        assert!(names.contains(&"turn_aborted".to_string()));
    }

    #[tokio::test]
    async fn a_terminal_session_invalid_error_forces_a_fresh_thread_next_turn() {
        let (backend, started_threads) = ScriptedBackend::new_tracked(vec![
            CanonicalEvent::ThreadStarted {
                thread_id: "thread-1".to_string(),
            },
            CanonicalEvent::TaskFailed {
                turn_id: Some("turn-1".to_string()),
                error: Some("session not found".to_string()),
            },
            CanonicalEvent::TaskComplete {
                turn_id: Some("turn-2".to_string()),
            },
        ]);
        let hub = Arc::new(crate::hub::RecordingHubClient::new());
        let queue = MessageQueue::new();
        let permissions = Arc::new(PermissionHandler::new());
        let mut launcher = RemoteLauncher::new(Box::new(backend), hub, queue.clone(), permissions);

        queue.push(QueuedMessage::new("first", mode(), false)).await;
        queue.push(QueuedMessage::new("second", mode(), true)).await;
        queue.close().await;

        launcher.run().await.unwrap();

        // Both turns started fresh (no resume id) because the mid-turn
        // session-invalid error after the first turn must force
        // `ensure_thread` to drop `was_created` rather than resuming.
        let started = started_threads.lock().await;
        assert_eq!(started.as_slice(), [None, None]);
    }

    #[tokio::test]
    async fn hub_switch_rpc_aborts_the_turn_and_flags_switch_requested() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let backend = StalledBackend::new(started_tx);
        let hub = Arc::new(crate::hub::RecordingHubClient::new());
        let queue = MessageQueue::new();
        let permissions = Arc::new(PermissionHandler::new());

        let mut launcher =
            RemoteLauncher::new(Box::new(backend), hub.clone(), queue.clone(), permissions);
        launcher.register_with_hub();
        assert!(!launcher.switch_requested());

        queue.push(QueuedMessage::new("hi", mode(), false)).await;
        queue.close().await;

        let run_handle = tokio::spawn(async move {
            let result = launcher.run().await;
            (launcher, result)
        });

        started_rx.await.unwrap();
        hub.dispatch(SessionEvent::Switch);

        let (launcher, result) = run_handle.await.unwrap();
        result.unwrap();
        assert!(launcher.switch_requested());
    }
}
