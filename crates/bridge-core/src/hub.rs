//! The bridge's only outward-facing surface: a thin client trait over the
//! hub's RPC handler registry and session-event stream (spec.md §6.1).
//! Grounded in the teacher's pattern of defining a small async trait for an
//! external service boundary and a recording test double rather than a real
//! network client, so `bridge-core`'s orchestration logic can be exercised
//! without a live hub.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::model::EnhancedMode;

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Ready,
    Message {
        message: String,
        mode: EnhancedMode,
        isolate: bool,
    },
    Interrupt,
    /// `switchToLocal` (spec.md §6.1): the user asked to hand the session
    /// back to a local run. `RemoteLauncher` treats this like an interrupt
    /// and additionally flags `switch_requested` for the surrounding runner
    /// to observe once `run()` returns.
    Switch,
    ApprovalDecision {
        id: String,
        approved: bool,
        reason: Option<String>,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentState {
    pub thinking: bool,
    pub turn_in_flight: bool,
    pub session_id: Option<String>,
}

#[async_trait]
pub trait HubClient: Send + Sync {
    async fn send_codex_message(&self, text: &str);
    async fn send_session_event(&self, event: &str, payload: serde_json::Value);
    async fn update_agent_state(&self, state: AgentState);

    /// Registers the channel `RemoteLauncher` polls for inbound hub RPCs
    /// (`abort`, `switchToLocal`, approval decisions — spec.md §6.1). The
    /// hub implementation holds onto `sender` and forwards each inbound RPC
    /// as a [`SessionEvent`]; this crate never dials out to the hub itself.
    /// A no-op default for test doubles with nothing to register against.
    fn register_handlers(&self, _sender: mpsc::UnboundedSender<SessionEvent>) {}
}

/// Test double that records every call instead of making one, used by
/// `bridge-core`'s own integration tests.
#[derive(Default)]
pub struct RecordingHubClient {
    pub messages: Mutex<Vec<String>>,
    pub events: Mutex<Vec<(String, serde_json::Value)>>,
    pub states: Mutex<Vec<AgentState>>,
    dispatch: std::sync::Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
}

impl RecordingHubClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an inbound hub RPC arriving, for tests exercising
    /// [`HubClient::register_handlers`] wiring.
    pub fn dispatch(&self, event: SessionEvent) {
        if let Some(sender) = self
            .dispatch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl HubClient for RecordingHubClient {
    async fn send_codex_message(&self, text: &str) {
        self.messages.lock().await.push(text.to_string());
    }

    async fn send_session_event(&self, event: &str, payload: serde_json::Value) {
        self.events.lock().await.push((event.to_string(), payload));
    }

    async fn update_agent_state(&self, state: AgentState) {
        self.states.lock().await.push(state);
    }

    fn register_handlers(&self, sender: mpsc::UnboundedSender<SessionEvent>) {
        *self.dispatch.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_client_captures_calls() {
        let client = RecordingHubClient::new();
        client.send_codex_message("hello").await;
        client
            .update_agent_state(AgentState {
                thinking: true,
                turn_in_flight: true,
                session_id: Some("s1".into()),
            })
            .await;

        assert_eq!(
            client.messages.lock().await.as_slice(),
            ["hello".to_string()]
        );
        assert_eq!(client.states.lock().await.len(), 1);
    }
}
