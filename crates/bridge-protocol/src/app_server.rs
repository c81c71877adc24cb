//! Converts `codex app-server` JSON-RPC notifications into [`CanonicalEvent`]s.
//!
//! Grounded in the teacher's `codex::mcp::jsonrpc` notification demux
//! (`parse_app_notification`, `decode_message`) and `codex::mcp::protocol`'s
//! `AppNotification`/`thread/*`/`turn/*` method names — this module plays the
//! same role (stateful per-item JSON normalization) but targets the richer
//! `item/*` event surface spec.md §4.2 requires rather than the teacher's
//! coarser `TaskComplete`/`Item`/`Error` triad.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::canonical::{
    field_str, field_value, CanonicalEvent, ADDITIONAL_DETAILS_KEYS, THREAD_ID_KEYS, TURN_ID_KEYS,
};
use crate::throttle::ThrottledLogger;

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

/// Per-item accumulators held by the converter, scoped to the lifetime of one
/// turn. No item id may straddle two turns (spec.md §3 Invariants).
#[derive(Debug, Default)]
struct TurnState {
    seen_reasoning_ids: HashSet<String>,
    reasoning_buffers: HashMap<String, String>,
    agent_message_buffers: HashMap<String, String>,
    command_meta: HashMap<String, CommandMeta>,
    command_output: HashMap<String, String>,
    filechange_meta: HashMap<String, FileChangeMeta>,
}

/// Stateful converter for one app-server connection. Construct once per
/// transport lifetime; `reset_turn` is called by the orchestrator whenever a
/// new turn starts so accumulators never straddle turns.
#[derive(Debug, Default)]
pub struct AppServerConverter {
    state: TurnState,
    throttle: ThrottledLogger,
}

impl AppServerConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all per-item accumulators. Called on `turn/started` and on
    /// turn abort, so item ids from a finished/aborted turn never leak into
    /// the next one.
    pub fn reset_turn(&mut self) {
        self.state = TurnState::default();
    }

    /// Converts one JSON-RPC notification. Returns zero or more canonical
    /// events (most notifications produce exactly one; delta methods that
    /// only feed the buffer emit none; retryable errors are suppressed).
    pub fn convert(&mut self, method: &str, params: &Value) -> Vec<CanonicalEvent> {
        match method {
            "thread/started" | "thread/resumed" => {
                let thread_id = field_str(params, THREAD_ID_KEYS).unwrap_or_default();
                vec![CanonicalEvent::ThreadStarted { thread_id }]
            }
            "turn/started" => {
                self.reset_turn();
                vec![CanonicalEvent::TaskStarted {
                    turn_id: field_str(params, TURN_ID_KEYS),
                }]
            }
            "turn/completed" => {
                let turn_id = field_str(params, TURN_ID_KEYS);
                let status = params.get("status").and_then(Value::as_str).unwrap_or("");
                vec![terminal_from_status(status, turn_id, params)]
            }
            "thread/status/changed" => self.convert_status_changed(params),
            "turn/diff/updated" => vec![CanonicalEvent::TurnDiff {
                turn_id: field_str(params, TURN_ID_KEYS),
                unified_diff: params
                    .get("unified_diff")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }],
            "thread/tokenUsage/updated" | "thread/token_usage/updated" => {
                vec![CanonicalEvent::TokenCount {
                    turn_id: field_str(params, TURN_ID_KEYS),
                    info: params.get("info").cloned().unwrap_or(Value::Null),
                }]
            }
            "error" | "stream_error" => self.convert_error(method, params),
            "item/agentMessage/delta" | "item/agent_message/delta" => {
                let id = item_id(params);
                let delta = delta_text(params);
                self.state
                    .agent_message_buffers
                    .entry(id)
                    .or_default()
                    .push_str(&delta);
                vec![]
            }
            "item/reasoning/textDelta" | "item/reasoning/text_delta" => {
                self.convert_reasoning_delta(params)
            }
            "item/reasoning/summaryPartAdded" | "item/reasoning/summary_part_added" => {
                vec![CanonicalEvent::AgentReasoningSectionBreak {
                    turn_id: field_str(params, TURN_ID_KEYS),
                }]
            }
            "item/commandExecution/outputDelta" | "item/command_execution/output_delta" => {
                let id = item_id(params);
                let delta = delta_text(params);
                self.state
                    .command_output
                    .entry(id)
                    .or_default()
                    .push_str(&delta);
                vec![]
            }
            "item/started" => self.convert_item_started(params),
            "item/completed" => self.convert_item_completed(params),
            _ if method == "codex/event" || method.starts_with("codex/event/") => {
                self.convert_codex_event(method, params)
            }
            _ => {
                if let Some(suppressed) = self.throttle.should_log(method) {
                    debug!(method, suppressed, "unrecognized app-server notification");
                }
                vec![]
            }
        }
    }

    fn convert_status_changed(&mut self, params: &Value) -> Vec<CanonicalEvent> {
        let status = params.get("status").cloned().unwrap_or(Value::Null);
        let status_type = status.get("type").and_then(Value::as_str).unwrap_or("");
        if status_type == "systemError" {
            return vec![CanonicalEvent::Error {
                message: status
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                thread_id: field_str(params, THREAD_ID_KEYS),
                turn_id: field_str(params, TURN_ID_KEYS),
                additional_details: field_value(&status, ADDITIONAL_DETAILS_KEYS),
            }];
        }
        let turn_id = field_str(params, TURN_ID_KEYS);
        vec![terminal_from_status(status_type, turn_id, &status)]
    }

    fn convert_error(&mut self, method: &str, params: &Value) -> Vec<CanonicalEvent> {
        let will_retry = params
            .get("will_retry")
            .or_else(|| params.get("willRetry"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if will_retry {
            return vec![];
        }
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let additional_details = field_value(params, ADDITIONAL_DETAILS_KEYS);
        if method == "stream_error" {
            vec![CanonicalEvent::StreamError {
                message,
                additional_details,
            }]
        } else {
            vec![CanonicalEvent::Error {
                message,
                thread_id: field_str(params, THREAD_ID_KEYS),
                turn_id: field_str(params, TURN_ID_KEYS),
                additional_details,
            }]
        }
    }

    fn convert_reasoning_delta(&mut self, params: &Value) -> Vec<CanonicalEvent> {
        let id = item_id(params);
        let delta = delta_text(params);
        let turn_id = field_str(params, TURN_ID_KEYS);

        let mut events = Vec::new();
        let is_new_id = !self.state.seen_reasoning_ids.contains(&id);
        if is_new_id {
            let is_second_or_later = !self.state.seen_reasoning_ids.is_empty();
            self.state.seen_reasoning_ids.insert(id.clone());
            if is_second_or_later {
                events.push(CanonicalEvent::AgentReasoningSectionBreak {
                    turn_id: turn_id.clone(),
                });
            }
        }

        self.state
            .reasoning_buffers
            .entry(id)
            .or_default()
            .push_str(&delta);
        events.push(CanonicalEvent::AgentReasoningDelta { turn_id, delta });
        events
    }

    fn convert_item_started(&mut self, params: &Value) -> Vec<CanonicalEvent> {
        let item = params.get("item").unwrap_or(params);
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
        let id = item_id(params);
        let turn_id = field_str(params, TURN_ID_KEYS);

        match item_type {
            "commandExecution" => {
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
            "fileChange" => {
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
            _ => vec![],
        }
    }

    fn convert_item_completed(&mut self, params: &Value) -> Vec<CanonicalEvent> {
        let item = params.get("item").unwrap_or(params);
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
        let id = item_id(params);
        let turn_id = field_str(params, TURN_ID_KEYS);

        match item_type {
            "agentMessage" => {
                let buffered = self.state.agent_message_buffers.remove(&id);
                let explicit = item.get("text").and_then(Value::as_str).map(String::from);
                vec![CanonicalEvent::AgentMessage {
                    turn_id,
                    message: explicit.or(buffered).unwrap_or_default(),
                }]
            }
            "reasoning" => {
                let buffered = self.state.reasoning_buffers.remove(&id).unwrap_or_default();
                let explicit = item.get("text").and_then(Value::as_str).map(String::from);
                vec![CanonicalEvent::AgentReasoning {
                    turn_id,
                    text: explicit.unwrap_or(buffered),
                }]
            }
            "commandExecution" => {
                let meta = self.state.command_meta.remove(&id).unwrap_or_default();
                let buffered = self.state.command_output.remove(&id);
                let output = item
                    .get("output")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .or(buffered);
                vec![CanonicalEvent::ExecCommandEnd {
                    turn_id,
                    call_id: id,
                    command: meta.command,
                    cwd: meta.cwd,
                    auto_approved: meta.auto_approved,
                    output,
                    stderr: item.get("stderr").and_then(Value::as_str).map(String::from),
                    error: item.get("error").and_then(Value::as_str).map(String::from),
                    exit_code: item.get("exit_code").and_then(Value::as_i64),
                    status: item.get("status").and_then(Value::as_str).map(String::from),
                }]
            }
            "fileChange" => {
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
            _ => vec![],
        }
    }

    fn convert_codex_event(&mut self, method: &str, params: &Value) -> Vec<CanonicalEvent> {
        let suffix = method.strip_prefix("codex/event/").unwrap_or("");
        let inner = params
            .get("msg")
            .or_else(|| params.get("event"))
            .or_else(|| params.get("payload"))
            .or_else(|| params.get("data"))
            .unwrap_or(params);

        if suffix == "plan" {
            let entries = inner
                .get("entries")
                .cloned()
                .unwrap_or_else(|| Value::Array(vec![]));
            let mut todo = inner.clone();
            if let Value::Object(ref mut map) = todo {
                map.insert("items".to_string(), entries);
            }
            return vec![CanonicalEvent::TodoList {
                turn_id: field_str(params, TURN_ID_KEYS),
                items: todo.get("items").cloned().unwrap_or(Value::Null),
            }];
        }

        let inner_method = params
            .get("method")
            .or_else(|| inner.get("method"))
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| suffix.to_string());

        if inner_method.is_empty() || inner_method == method {
            if let Some(suppressed) = self.throttle.should_log(method) {
                debug!(
                    method,
                    suppressed, "codex/event with no recognizable inner shape"
                );
            }
            return vec![];
        }

        self.convert(&inner_method, inner)
    }
}

pub(crate) fn terminal_from_status(
    status: &str,
    turn_id: Option<String>,
    params: &Value,
) -> CanonicalEvent {
    match status.to_ascii_lowercase().as_str() {
        "completed" | "complete" | "done" => CanonicalEvent::TaskComplete { turn_id },
        "interrupted" | "cancelled" | "canceled" | "aborted" => {
            CanonicalEvent::TurnAborted { turn_id }
        }
        "failed" | "error" => CanonicalEvent::TaskFailed {
            turn_id,
            error: params
                .get("error")
                .and_then(Value::as_str)
                .map(String::from),
        },
        _ => CanonicalEvent::TaskComplete { turn_id },
    }
}

fn item_id(params: &Value) -> String {
    params
        .get("item_id")
        .or_else(|| params.get("itemId"))
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| {
            params
                .get("item")
                .and_then(|item| item.get("id"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_default()
}

fn delta_text(params: &Value) -> String {
    params
        .get("delta")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thread_started_normalizes_camel_case_id() {
        let mut c = AppServerConverter::new();
        let events = c.convert("thread/started", &json!({ "threadId": "t-1" }));
        assert_eq!(
            events,
            vec![CanonicalEvent::ThreadStarted {
                thread_id: "t-1".into()
            }]
        );
    }

    #[test]
    fn turn_completed_status_is_case_insensitive() {
        let mut c = AppServerConverter::new();
        let events = c.convert(
            "turn/completed",
            &json!({ "turn_id": "turn-1", "status": "Completed" }),
        );
        assert_eq!(
            events,
            vec![CanonicalEvent::TaskComplete {
                turn_id: Some("turn-1".into())
            }]
        );
    }

    #[test]
    fn retryable_error_is_suppressed() {
        let mut c = AppServerConverter::new();
        let events = c.convert(
            "error",
            &json!({ "message": "transient", "will_retry": true }),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn second_reasoning_item_emits_section_break_before_delta() {
        let mut c = AppServerConverter::new();
        c.convert("turn/started", &json!({ "turn_id": "t1" }));
        c.convert(
            "item/reasoning/textDelta",
            &json!({ "turn_id": "t1", "item_id": "r1", "delta": "first" }),
        );
        let events = c.convert(
            "item/reasoning/textDelta",
            &json!({ "turn_id": "t1", "item_id": "r2", "delta": "second" }),
        );
        assert_eq!(
            events,
            vec![
                CanonicalEvent::AgentReasoningSectionBreak {
                    turn_id: Some("t1".into())
                },
                CanonicalEvent::AgentReasoningDelta {
                    turn_id: Some("t1".into()),
                    delta: "second".into()
                },
            ]
        );
    }

    #[test]
    fn agent_message_falls_back_to_buffered_deltas() {
        let mut c = AppServerConverter::new();
        c.convert(
            "item/agentMessage/delta",
            &json!({ "item_id": "m1", "delta": "hel" }),
        );
        c.convert(
            "item/agentMessage/delta",
            &json!({ "item_id": "m1", "delta": "lo" }),
        );
        let events = c.convert(
            "item/completed",
            &json!({ "item": { "id": "m1", "type": "agentMessage" } }),
        );
        assert_eq!(
            events,
            vec![CanonicalEvent::AgentMessage {
                turn_id: None,
                message: "hello".into()
            }]
        );
    }

    #[test]
    fn exec_command_begin_end_round_trip() {
        let mut c = AppServerConverter::new();
        let begin = c.convert(
            "item/started",
            &json!({ "turn_id": "t1", "item": { "id": "c1", "type": "commandExecution", "command": "ls", "cwd": "/tmp" } }),
        );
        assert_eq!(
            begin,
            vec![CanonicalEvent::ExecCommandBegin {
                turn_id: Some("t1".into()),
                call_id: "c1".into(),
                command: Some("ls".into()),
                cwd: Some("/tmp".into()),
                auto_approved: None,
            }]
        );
        c.convert(
            "item/commandExecution/outputDelta",
            &json!({ "item_id": "c1", "delta": "file.txt\n" }),
        );
        let end = c.convert(
            "item/completed",
            &json!({ "turn_id": "t1", "item": { "id": "c1", "type": "commandExecution", "exit_code": 0, "status": "completed" } }),
        );
        assert_eq!(
            end,
            vec![CanonicalEvent::ExecCommandEnd {
                turn_id: Some("t1".into()),
                call_id: "c1".into(),
                command: Some("ls".into()),
                cwd: Some("/tmp".into()),
                auto_approved: None,
                output: Some("file.txt\n".into()),
                stderr: None,
                error: None,
                exit_code: Some(0),
                status: Some("completed".into()),
            }]
        );
    }

    #[test]
    fn codex_event_plan_becomes_todo_list() {
        let mut c = AppServerConverter::new();
        let events = c.convert(
            "codex/event/plan",
            &json!({ "entries": [{ "content": "ship", "status": "pending" }] }),
        );
        assert_eq!(
            events,
            vec![CanonicalEvent::TodoList {
                turn_id: None,
                items: json!([{ "content": "ship", "status": "pending" }]),
            }]
        );
    }

    #[test]
    fn unwrapping_is_idempotent_over_envelopes() {
        let mut c = AppServerConverter::new();
        let inner = json!({ "turn_id": "t1", "status": "Completed" });
        let direct = c.convert("turn/completed", &inner);
        let wrapped = c.convert(
            "codex/event",
            &json!({ "method": "turn/completed", "msg": inner }),
        );
        assert_eq!(direct, wrapped);
    }
}
