//! Strips the MCP transport's `event_msg`/`response_item` envelopes and
//! re-dispatches the inner event through [`crate::app_server::AppServerConverter`]
//! (spec.md §4.4) so the same canonicalization rules apply regardless of
//! which of the three transports is live.
//!
//! Grounded in the teacher's `wrapper_events::codex_adapter`, which performs
//! the analogous unwrap-then-normalize step before handing events to
//! `normalized::NormalizedEvent`.

use serde_json::Value;

use crate::app_server::AppServerConverter;
use crate::canonical::CanonicalEvent;

const ENVELOPE_TYPES: &[&str] = &["event_msg", "response_item"];

/// Wraps an [`AppServerConverter`] and feeds it events recovered from MCP's
/// envelope shape, so per-item accumulator state is shared with the parts of
/// the app-server vocabulary this layer delegates to.
#[derive(Debug, Default)]
pub struct McpEnvelopeConverter {
    inner: AppServerConverter,
}

impl McpEnvelopeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_turn(&mut self) {
        self.inner.reset_turn();
    }

    /// Converts one MCP notification. Messages that are not one of the
    /// known envelope shapes are dropped (they are not events this bridge
    /// understands).
    pub fn convert(&mut self, message: &Value) -> Vec<CanonicalEvent> {
        let envelope_type = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !ENVELOPE_TYPES.contains(&envelope_type) {
            return vec![];
        }
        let payload = match message.get("payload") {
            Some(p) => p,
            None => return vec![],
        };
        let raw_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        // A payload that is itself an envelope (double-wrapped notifications
        // have been observed from the MCP server) must be unwrapped one more
        // level rather than dispatched as an unrecognized app-server method,
        // so unwrapping stays idempotent: event_msg(event_msg(E)) == E.
        if ENVELOPE_TYPES.contains(&raw_type) {
            return self.convert(payload);
        }

        let normalized = normalize_type(raw_type);

        if normalized == "plan" {
            let entries = payload
                .get("entries")
                .cloned()
                .unwrap_or_else(|| Value::Array(vec![]));
            return vec![CanonicalEvent::TodoList {
                turn_id: crate::canonical::field_str(payload, crate::canonical::TURN_ID_KEYS),
                items: entries,
            }];
        }

        self.inner.convert(&normalized, payload)
    }
}

/// Strips a `codex/event/` prefix (if present) and lowercases camelCase
/// segments, without disturbing path separators — this layer's payload
/// types share the same slash-delimited vocabulary as the app-server
/// converter (`turn/completed`, `item/completed`, ...).
fn normalize_type(raw: &str) -> String {
    let stripped = raw.strip_prefix("codex/event/").unwrap_or(raw);
    let mut out = String::with_capacity(stripped.len());
    for (i, ch) in stripped.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_envelope_type_is_dropped() {
        let mut c = McpEnvelopeConverter::new();
        let events = c.convert(&json!({ "type": "something_else", "payload": {} }));
        assert!(events.is_empty());
    }

    #[test]
    fn event_msg_unwraps_and_dispatches() {
        let mut c = McpEnvelopeConverter::new();
        let events = c.convert(&json!({
            "type": "event_msg",
            "payload": { "type": "thread/started", "threadId": "t-9" }
        }));
        assert_eq!(
            events,
            vec![CanonicalEvent::ThreadStarted {
                thread_id: "t-9".into()
            }]
        );
    }

    #[test]
    fn response_item_remaps_plan_to_todo_list() {
        let mut c = McpEnvelopeConverter::new();
        let events = c.convert(&json!({
            "type": "response_item",
            "payload": { "type": "codex/event/plan", "entries": [{"content": "a"}] }
        }));
        assert_eq!(
            events,
            vec![CanonicalEvent::TodoList {
                turn_id: None,
                items: json!([{"content": "a"}]),
            }]
        );
    }

    #[test]
    fn double_nested_envelope_unwraps_to_the_same_result_as_single() {
        let inner = json!({
            "type": "event_msg",
            "payload": { "type": "thread/started", "threadId": "t-9" }
        });
        let doubled = json!({ "type": "event_msg", "payload": inner });

        let mut single = McpEnvelopeConverter::new();
        let mut nested = McpEnvelopeConverter::new();
        assert_eq!(single.convert(&inner), nested.convert(&doubled));
    }

    #[test]
    fn wrapped_reasoning_delta_is_buffered_and_flushed_on_completion() {
        let mut c = McpEnvelopeConverter::new();
        let delta = c.convert(&json!({
            "type": "event_msg",
            "payload": {
                "type": "item/reasoning/text_delta",
                "item_id": "r1",
                "delta": "thinking...",
            }
        }));
        assert_eq!(
            delta,
            vec![CanonicalEvent::AgentReasoningDelta {
                turn_id: None,
                delta: "thinking...".into(),
            }]
        );

        let completed = c.convert(&json!({
            "type": "event_msg",
            "payload": {
                "type": "item/completed",
                "item": {
                    "id": "r1",
                    "type": "reasoning",
                    "text": "thinking...",
                }
            }
        }));
        assert_eq!(
            completed,
            vec![CanonicalEvent::AgentReasoning {
                turn_id: None,
                text: "thinking...".into(),
            }]
        );
    }

    #[test]
    fn camel_case_payload_type_is_snake_cased() {
        let mut c = McpEnvelopeConverter::new();
        let events = c.convert(&json!({
            "type": "event_msg",
            "payload": { "type": "turn/completed", "turn_id": "t1", "status": "Completed" }
        }));
        assert_eq!(
            events,
            vec![CanonicalEvent::TaskComplete {
                turn_id: Some("t1".into())
            }]
        );
    }
}
