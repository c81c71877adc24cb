//! Maps the native SDK's async event iterator output onto [`CanonicalEvent`]s
//! (spec.md §4.3). Unlike [`crate::app_server`], the SDK mapper must allocate
//! its own `turn_id` (the SDK does not always hand one back) and synthesizes
//! `call_id`s for approval requests that arrive without one.
//!
//! Grounded in the teacher's `codex::exec::ExecStream`, which plays the same
//! role of turning a native async iterator into the wrapper's normalized
//! event shape rather than parsing JSON-RPC off the wire.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::canonical::{
    field_str, field_value, CanonicalEvent, ADDITIONAL_DETAILS_KEYS, TURN_ID_KEYS,
};

#[derive(Debug, Clone, Default)]
struct CommandMeta {
    command: Option<String>,
    cwd: Option<String>,
    auto_approved: Option<bool>,
}

#[derive(Debug, Clone, Default)]
struct FileChangeMeta {
    changes: Value,
    auto_approved: Option<bool>,
}

#[derive(Debug, Default)]
struct TurnState {
    turn_id: Option<String>,
    seen_reasoning_ids: HashSet<String>,
    reasoning_buffers: HashMap<String, String>,
    command_meta: HashMap<String, CommandMeta>,
    command_output: HashMap<String, String>,
    filechange_meta: HashMap<String, FileChangeMeta>,
    mcp_labels: HashMap<String, String>,
    websearch_labels: HashMap<String, String>,
}

/// Stateful mapper for one SDK-driven turn iterator.
#[derive(Debug, Default)]
pub struct SdkEventMapper {
    state: TurnState,
    next_call_id: u64,
    local_turn_counter: u64,
}

impl SdkEventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_call_id(&mut self) -> String {
        self.next_call_id += 1;
        format!("sdk-call-{}", self.next_call_id)
    }

    fn allocate_turn_id(&mut self) -> String {
        self.local_turn_counter += 1;
        format!("sdk-turn-{}", self.local_turn_counter)
    }

    /// Converts one SDK event. `kind` is the event's discriminant (e.g.
    /// `"turn.started"`, `"item.completed"`); `payload` is its body.
    pub fn convert(&mut self, kind: &str, payload: &Value) -> Vec<CanonicalEvent> {
        match kind {
            "turn.started" => {
                let turn_id =
                    field_str(payload, TURN_ID_KEYS).unwrap_or_else(|| self.allocate_turn_id());
                self.state = TurnState {
                    turn_id: Some(turn_id.clone()),
                    ..Default::default()
                };
                vec![CanonicalEvent::TaskStarted {
                    turn_id: Some(turn_id),
                }]
            }
            "turn.completed" => {
                let turn_id = self.current_turn_id(payload);
                let mut events = Vec::new();
                if let Some(usage) = payload.get("usage") {
                    events.push(CanonicalEvent::TokenCount {
                        turn_id: turn_id.clone(),
                        info: usage.clone(),
                    });
                }
                let status = payload.get("status").and_then(Value::as_str).unwrap_or("");
                events.push(crate::app_server::terminal_from_status(
                    status, turn_id, payload,
                ));
                events
            }
            "turn.aborted" | "turn.interrupted" | "turn.cancelled" | "turn.canceled" => {
                vec![CanonicalEvent::TurnAborted {
                    turn_id: self.current_turn_id(payload),
                }]
            }
            "turn.failed" | "turn.error" => vec![CanonicalEvent::TaskFailed {
                turn_id: self.current_turn_id(payload),
                error: payload
                    .get("error")
                    .and_then(Value::as_str)
                    .map(String::from),
            }],
            "stream.error" | "stream_error" => {
                if is_retryable(payload) {
                    return vec![];
                }
                vec![CanonicalEvent::StreamError {
                    message: payload
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    additional_details: field_value(payload, ADDITIONAL_DETAILS_KEYS),
                }]
            }
            "error" => vec![CanonicalEvent::Error {
                message: payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                thread_id: None,
                turn_id: self.current_turn_id(payload),
                additional_details: field_value(payload, ADDITIONAL_DETAILS_KEYS),
            }],
            "exec_approval_request" | "exec.approval_request" | "approval.requested" => {
                let call_id = payload
                    .get("call_id")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| self.allocate_call_id());
                vec![CanonicalEvent::ExecApprovalRequest {
                    turn_id: self.current_turn_id(payload),
                    call_id,
                    command: payload
                        .get("command")
                        .and_then(Value::as_str)
                        .map(String::from),
                    cwd: payload.get("cwd").and_then(Value::as_str).map(String::from),
                    message: payload
                        .get("message")
                        .and_then(Value::as_str)
                        .map(String::from),
                    tool: payload
                        .get("tool")
                        .and_then(Value::as_str)
                        .map(String::from),
                }]
            }
            "item.started" => self.convert_item_started(payload),
            "item.updated" => self.convert_item_updated(payload),
            "item.completed" => self.convert_item_completed(payload),
            _ => vec![],
        }
    }

    fn current_turn_id(&self, payload: &Value) -> Option<String> {
        field_str(payload, TURN_ID_KEYS).or_else(|| self.state.turn_id.clone())
    }

    fn convert_item_started(&mut self, payload: &Value) -> Vec<CanonicalEvent> {
        let item = payload.get("item").unwrap_or(payload);
        let kind = normalized_item_type(item);
        let id = item_id(payload);
        let turn_id = self.current_turn_id(payload);

        match kind.as_str() {
            "reasoning" => {
                let mut events = Vec::new();
                if !self.state.seen_reasoning_ids.is_empty()
                    && !self.state.seen_reasoning_ids.contains(&id)
                {
                    events.push(CanonicalEvent::AgentReasoningSectionBreak {
                        turn_id: turn_id.clone(),
                    });
                }
                self.state.seen_reasoning_ids.insert(id);
                events
            }
            "commandexecution" => {
                let meta = CommandMeta {
                    command: item
                        .get("command")
                        .and_then(Value::as_str)
                        .map(String::from),
                    cwd: item.get("cwd").and_then(Value::as_str).map(String::from),
                    auto_approved: item
                        .get("auto_approved")
                        .or_else(|| item.get("autoApproved"))
                        .and_then(Value::as_bool),
                };
                let event = CanonicalEvent::ExecCommandBegin {
                    turn_id,
                    call_id: id.clone(),
                    command: meta.command.clone(),
                    cwd: meta.cwd.clone(),
                    auto_approved: meta.auto_approved,
                };
                self.state.command_meta.insert(id, meta);
                vec![event]
            }
            "filechange" => {
                let meta = FileChangeMeta {
                    changes: item.get("changes").cloned().unwrap_or(Value::Null),
                    auto_approved: item
                        .get("auto_approved")
                        .or_else(|| item.get("autoApproved"))
                        .and_then(Value::as_bool),
                };
                let event = CanonicalEvent::PatchApplyBegin {
                    turn_id,
                    call_id: id.clone(),
                    changes: meta.changes.clone(),
                    auto_approved: meta.auto_approved,
                };
                self.state.filechange_meta.insert(id, meta);
                vec![event]
            }
            "mcptoolcall" => {
                let server = item
                    .get("server")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let tool = item
                    .get("tool")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let label = format!("mcp:{server}/{tool}");
                let event = CanonicalEvent::ExecCommandBegin {
                    turn_id,
                    call_id: id.clone(),
                    command: Some(label.clone()),
                    cwd: None,
                    auto_approved: None,
                };
                self.state.mcp_labels.insert(id, label);
                vec![event]
            }
            "websearch" => {
                let query = item.get("query").and_then(Value::as_str);
                let label = match query {
                    Some(q) => format!("web_search {q}"),
                    None => "web_search".to_string(),
                };
                let event = CanonicalEvent::ExecCommandBegin {
                    turn_id,
                    call_id: id.clone(),
                    command: Some(label.clone()),
                    cwd: None,
                    auto_approved: None,
                };
                self.state.websearch_labels.insert(id, label);
                vec![event]
            }
            _ => vec![],
        }
    }

    fn convert_item_updated(&mut self, payload: &Value) -> Vec<CanonicalEvent> {
        let item = payload.get("item").unwrap_or(payload);
        let kind = normalized_item_type(item);
        let id = item_id(payload);
        let turn_id = self.current_turn_id(payload);

        match kind.as_str() {
            "reasoning" => {
                let full_text = item.get("text").and_then(Value::as_str).unwrap_or_default();
                let buffered = self.state.reasoning_buffers.entry(id).or_default();
                if full_text.len() > buffered.len() && full_text.starts_with(buffered.as_str()) {
                    let delta = full_text[buffered.len()..].to_string();
                    *buffered = full_text.to_string();
                    vec![CanonicalEvent::AgentReasoningDelta { turn_id, delta }]
                } else {
                    vec![]
                }
            }
            "commandexecution" => {
                if let Some(delta) = item.get("delta").and_then(Value::as_str) {
                    self.state
                        .command_output
                        .entry(id)
                        .or_default()
                        .push_str(delta);
                }
                vec![]
            }
            "todolist" => vec![CanonicalEvent::TodoList {
                turn_id,
                items: todo_items(item),
            }],
            _ => vec![],
        }
    }

    fn convert_item_completed(&mut self, payload: &Value) -> Vec<CanonicalEvent> {
        let item = payload.get("item").unwrap_or(payload);
        let kind = normalized_item_type(item);
        let id = item_id(payload);
        let turn_id = self.current_turn_id(payload);

        match kind.as_str() {
            "agentmessage" => vec![CanonicalEvent::AgentMessage {
                turn_id,
                message: item
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }],
            "reasoning" => {
                let buffered = self.state.reasoning_buffers.remove(&id).unwrap_or_default();
                let explicit = item.get("text").and_then(Value::as_str).map(String::from);
                vec![CanonicalEvent::AgentReasoning {
                    turn_id,
                    text: explicit.unwrap_or(buffered),
                }]
            }
            "commandexecution" => {
                let meta = self.state.command_meta.remove(&id).unwrap_or_default();
                let buffered = self.state.command_output.remove(&id);
                vec![CanonicalEvent::ExecCommandEnd {
                    turn_id,
                    call_id: id,
                    command: meta.command,
                    cwd: meta.cwd,
                    auto_approved: meta.auto_approved,
                    output: item
                        .get("output")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .or(buffered),
                    stderr: item.get("stderr").and_then(Value::as_str).map(String::from),
                    error: item.get("error").and_then(Value::as_str).map(String::from),
                    exit_code: item.get("exit_code").and_then(Value::as_i64),
                    status: item.get("status").and_then(Value::as_str).map(String::from),
                }]
            }
            "filechange" => {
                let meta = self.state.filechange_meta.remove(&id).unwrap_or_default();
                let success = item
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or_else(|| {
                        item.get("status").and_then(Value::as_str) == Some("completed")
                    });
                vec![CanonicalEvent::PatchApplyEnd {
                    turn_id,
                    call_id: id,
                    changes: meta.changes,
                    auto_approved: meta.auto_approved,
                    stdout: item.get("stdout").and_then(Value::as_str).map(String::from),
                    stderr: item.get("stderr").and_then(Value::as_str).map(String::from),
                    success,
                }]
            }
            "mcptoolcall" => {
                let label = self.state.mcp_labels.remove(&id);
                let result = item.get("result");
                let output = result.and_then(|r| {
                    r.get("structured_content")
                        .or_else(|| r.get("content"))
                        .map(to_text)
                });
                vec![CanonicalEvent::ExecCommandEnd {
                    turn_id,
                    call_id: id,
                    command: label,
                    cwd: None,
                    auto_approved: None,
                    output,
                    stderr: None,
                    error: item.get("error").and_then(Value::as_str).map(String::from),
                    exit_code: None,
                    status: item.get("status").and_then(Value::as_str).map(String::from),
                }]
            }
            "websearch" => {
                let query = item.get("query").and_then(Value::as_str);
                let output = match query {
                    Some(q) => format!("Searched web: {q}"),
                    None => "Web search completed".to_string(),
                };
                let label = self.state.websearch_labels.remove(&id);
                vec![CanonicalEvent::ExecCommandEnd {
                    turn_id,
                    call_id: id,
                    command: label,
                    cwd: None,
                    auto_approved: None,
                    output: Some(output),
                    stderr: None,
                    error: None,
                    exit_code: None,
                    status: Some("completed".to_string()),
                }]
            }
            "todolist" => vec![CanonicalEvent::TodoList {
                turn_id,
                items: todo_items(item),
            }],
            "error" => vec![CanonicalEvent::Error {
                message: item
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                thread_id: None,
                turn_id,
                additional_details: None,
            }],
            _ => vec![],
        }
    }
}

fn todo_items(item: &Value) -> Value {
    item.get("items")
        .or_else(|| item.get("todos"))
        .cloned()
        .unwrap_or_else(|| Value::Array(vec![]))
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_retryable(payload: &Value) -> bool {
    payload
        .get("will_retry")
        .or_else(|| payload.get("willRetry"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn item_id(payload: &Value) -> String {
    payload
        .get("item_id")
        .or_else(|| payload.get("itemId"))
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| {
            payload
                .get("item")
                .and_then(|item| item.get("id"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_default()
}

/// Lowercases and strips non-alphanumerics from an item's `type`, so
/// `commandExecution`, `command_execution` and `CommandExecution` all
/// dispatch identically.
fn normalized_item_type(item: &Value) -> String {
    item.get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_started_allocates_local_id_when_absent() {
        let mut m = SdkEventMapper::new();
        let events = m.convert("turn.started", &json!({}));
        match &events[0] {
            CanonicalEvent::TaskStarted { turn_id } => {
                assert_eq!(turn_id.as_deref(), Some("sdk-turn-1"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn second_reasoning_item_emits_section_break_on_start() {
        let mut m = SdkEventMapper::new();
        m.convert("turn.started", &json!({ "turn_id": "t1" }));
        m.convert(
            "item.started",
            &json!({ "item_id": "r1", "item": { "type": "reasoning" } }),
        );
        let events = m.convert(
            "item.started",
            &json!({ "item_id": "r2", "item": { "type": "reasoning" } }),
        );
        assert_eq!(
            events,
            vec![CanonicalEvent::AgentReasoningSectionBreak {
                turn_id: Some("t1".into())
            }]
        );
    }

    #[test]
    fn reasoning_update_emits_only_the_extension() {
        let mut m = SdkEventMapper::new();
        m.convert("turn.started", &json!({ "turn_id": "t1" }));
        m.convert(
            "item.started",
            &json!({ "item_id": "r1", "item": { "type": "reasoning" } }),
        );
        m.convert(
            "item.updated",
            &json!({ "item_id": "r1", "item": { "type": "reasoning", "text": "hel" } }),
        );
        let events = m.convert(
            "item.updated",
            &json!({ "item_id": "r1", "item": { "type": "reasoning", "text": "hello" } }),
        );
        assert_eq!(
            events,
            vec![CanonicalEvent::AgentReasoningDelta {
                turn_id: Some("t1".into()),
                delta: "lo".into()
            }]
        );
    }

    #[test]
    fn websearch_produces_labeled_begin_end() {
        let mut m = SdkEventMapper::new();
        m.convert("turn.started", &json!({ "turn_id": "t1" }));
        let begin = m.convert(
            "item.started",
            &json!({ "item_id": "w1", "item": { "type": "webSearch", "query": "rust async" } }),
        );
        assert_eq!(
            begin,
            vec![CanonicalEvent::ExecCommandBegin {
                turn_id: Some("t1".into()),
                call_id: "w1".into(),
                command: Some("web_search rust async".into()),
                cwd: None,
                auto_approved: None,
            }]
        );
        let end = m.convert(
            "item.completed",
            &json!({ "item_id": "w1", "item": { "type": "webSearch", "query": "rust async" } }),
        );
        assert_eq!(
            end,
            vec![CanonicalEvent::ExecCommandEnd {
                turn_id: Some("t1".into()),
                call_id: "w1".into(),
                command: Some("web_search rust async".into()),
                cwd: None,
                auto_approved: None,
                output: Some("Searched web: rust async".into()),
                stderr: None,
                error: None,
                exit_code: None,
                status: Some("completed".into()),
            }]
        );
    }

    #[test]
    fn approval_request_allocates_call_id_when_absent() {
        let mut m = SdkEventMapper::new();
        let events = m.convert("exec_approval_request", &json!({ "command": "rm -rf tmp" }));
        match &events[0] {
            CanonicalEvent::ExecApprovalRequest { call_id, .. } => {
                assert_eq!(call_id, "sdk-call-1")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn retryable_stream_error_is_suppressed() {
        let mut m = SdkEventMapper::new();
        let events = m.convert(
            "stream.error",
            &json!({ "message": "blip", "will_retry": true }),
        );
        assert!(events.is_empty());
    }
}
