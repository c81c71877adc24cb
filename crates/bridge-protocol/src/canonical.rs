use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The union of event kinds the bridge emits inward. This is the *only*
/// contract between transport adapters and the orchestrator: adapters must
/// not emit anything else, and unrecognized upstream shapes map to nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    ThreadStarted {
        thread_id: String,
    },
    TaskStarted {
        turn_id: Option<String>,
    },
    TaskComplete {
        turn_id: Option<String>,
    },
    TaskFailed {
        turn_id: Option<String>,
        error: Option<String>,
    },
    TurnAborted {
        turn_id: Option<String>,
    },
    StreamError {
        message: String,
        additional_details: Option<Value>,
    },
    Error {
        message: String,
        thread_id: Option<String>,
        turn_id: Option<String>,
        additional_details: Option<Value>,
    },
    AgentMessage {
        turn_id: Option<String>,
        message: String,
    },
    AgentReasoning {
        turn_id: Option<String>,
        text: String,
    },
    AgentReasoningDelta {
        turn_id: Option<String>,
        delta: String,
    },
    AgentReasoningSectionBreak {
        turn_id: Option<String>,
    },
    ExecCommandBegin {
        turn_id: Option<String>,
        call_id: String,
        command: Option<String>,
        cwd: Option<String>,
        auto_approved: Option<bool>,
    },
    ExecCommandEnd {
        turn_id: Option<String>,
        call_id: String,
        command: Option<String>,
        cwd: Option<String>,
        auto_approved: Option<bool>,
        output: Option<String>,
        stderr: Option<String>,
        error: Option<String>,
        exit_code: Option<i64>,
        status: Option<String>,
    },
    ExecApprovalRequest {
        turn_id: Option<String>,
        call_id: String,
        command: Option<String>,
        cwd: Option<String>,
        message: Option<String>,
        tool: Option<String>,
    },
    PatchApplyBegin {
        turn_id: Option<String>,
        call_id: String,
        changes: Value,
        auto_approved: Option<bool>,
    },
    PatchApplyEnd {
        turn_id: Option<String>,
        call_id: String,
        changes: Value,
        auto_approved: Option<bool>,
        stdout: Option<String>,
        stderr: Option<String>,
        success: bool,
    },
    TodoList {
        turn_id: Option<String>,
        items: Value,
    },
    TurnDiff {
        turn_id: Option<String>,
        unified_diff: String,
    },
    TokenCount {
        turn_id: Option<String>,
        info: Value,
    },
}

impl CanonicalEvent {
    /// `true` for the three events that conclude a turn, per invariant 1 in
    /// spec.md §8 (a non-retryable `error`/`stream_error` also concludes the
    /// turn from the orchestrator's point of view, but is not itself one of
    /// the three named terminals).
    pub fn is_turn_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::TaskComplete { .. }
                | CanonicalEvent::TaskFailed { .. }
                | CanonicalEvent::TurnAborted { .. }
        )
    }

    pub fn turn_id(&self) -> Option<&str> {
        match self {
            CanonicalEvent::ThreadStarted { .. } => None,
            CanonicalEvent::TaskStarted { turn_id }
            | CanonicalEvent::TaskComplete { turn_id }
            | CanonicalEvent::TaskFailed { turn_id, .. }
            | CanonicalEvent::TurnAborted { turn_id }
            | CanonicalEvent::Error { turn_id, .. }
            | CanonicalEvent::AgentMessage { turn_id, .. }
            | CanonicalEvent::AgentReasoning { turn_id, .. }
            | CanonicalEvent::AgentReasoningDelta { turn_id, .. }
            | CanonicalEvent::AgentReasoningSectionBreak { turn_id }
            | CanonicalEvent::ExecCommandBegin { turn_id, .. }
            | CanonicalEvent::ExecCommandEnd { turn_id, .. }
            | CanonicalEvent::ExecApprovalRequest { turn_id, .. }
            | CanonicalEvent::PatchApplyBegin { turn_id, .. }
            | CanonicalEvent::PatchApplyEnd { turn_id, .. }
            | CanonicalEvent::TodoList { turn_id, .. }
            | CanonicalEvent::TurnDiff { turn_id, .. }
            | CanonicalEvent::TokenCount { turn_id, .. } => turn_id.as_deref(),
            CanonicalEvent::StreamError { .. } => None,
        }
    }
}

/// Normalizes the `turn_id|turnId`, `thread_id|threadId`,
/// `additional_details|additionalDetails` spelling variants onto a single
/// snake_case key, as required by spec.md §4.2.
pub fn field_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn field_value(value: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| value.get(key)).cloned()
}

pub const TURN_ID_KEYS: &[&str] = &["turn_id", "turnId"];
pub const THREAD_ID_KEYS: &[&str] = &["thread_id", "threadId"];
pub const ADDITIONAL_DETAILS_KEYS: &[&str] = &["additional_details", "additionalDetails"];
