//! Stream processors that translate canonical reasoning/diff events into the
//! shapes the hub actually wants to render (spec.md §4.6, C6).
//!
//! The hub has no native "reasoning" concept; it renders reasoning as a
//! synthetic tool call named `CodexReasoning` that opens when the first
//! delta of a section arrives and closes (with the accumulated text as its
//! result) on the next section break, turn completion, or abort.

#[derive(Clone, Debug, PartialEq)]
pub enum SyntheticEvent {
    ToolCall {
        name: String,
        call_id: String,
    },
    ToolCallResult {
        call_id: String,
        output: String,
        status: String,
    },
}

const REASONING_TOOL_NAME: &str = "CodexReasoning";

pub struct ReasoningProcessor {
    buffer: String,
    section_open: bool,
    next_id: u64,
    current_call_id: Option<String>,
}

impl ReasoningProcessor {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            section_open: false,
            next_id: 0,
            current_call_id: None,
        }
    }

    pub fn process_delta(&mut self, delta: &str) -> Vec<SyntheticEvent> {
        let mut events = Vec::new();
        if !self.section_open {
            events.push(self.open_section());
        }
        self.buffer.push_str(delta);
        events
    }

    /// Flushes the open section (if any) before a new one begins.
    pub fn handle_section_break(&mut self) -> Vec<SyntheticEvent> {
        self.flush("completed")
    }

    pub fn complete(&mut self) -> Vec<SyntheticEvent> {
        self.flush("completed")
    }

    pub fn abort(&mut self) -> Vec<SyntheticEvent> {
        self.flush("canceled")
    }

    fn open_section(&mut self) -> SyntheticEvent {
        let call_id = format!("reasoning-{}", self.next_id);
        self.next_id += 1;
        self.section_open = true;
        self.current_call_id = Some(call_id.clone());
        SyntheticEvent::ToolCall {
            name: REASONING_TOOL_NAME.to_string(),
            call_id,
        }
    }

    fn flush(&mut self, status: &str) -> Vec<SyntheticEvent> {
        if !self.section_open {
            return Vec::new();
        }
        self.section_open = false;
        let call_id = self.current_call_id.take().unwrap_or_default();
        let output = std::mem::take(&mut self.buffer);
        vec![SyntheticEvent::ToolCallResult {
            call_id,
            output,
            status: status.to_string(),
        }]
    }
}

impl Default for ReasoningProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates `turn_diff` fragments for the duration of a turn, joining
/// them with a blank line so the hub can render one consolidated diff at
/// turn end instead of N partial ones.
pub struct DiffProcessor {
    fragments: Vec<String>,
}

impl DiffProcessor {
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
        }
    }

    pub fn accumulate(&mut self, unified_diff: &str) {
        if !unified_diff.is_empty() {
            self.fragments.push(unified_diff.to_string());
        }
    }

    /// Returns the joined diff (if any fragments were accumulated) and
    /// resets for the next turn.
    pub fn flush(&mut self) -> Option<String> {
        if self.fragments.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.fragments).join("\n\n"))
    }
}

impl Default for DiffProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delta_opens_a_tool_call() {
        let mut processor = ReasoningProcessor::new();
        let events = processor.process_delta("hello");
        assert_eq!(
            events,
            vec![SyntheticEvent::ToolCall {
                name: REASONING_TOOL_NAME.to_string(),
                call_id: "reasoning-0".to_string(),
            }]
        );
    }

    #[test]
    fn subsequent_deltas_do_not_reopen() {
        let mut processor = ReasoningProcessor::new();
        processor.process_delta("hello ");
        let events = processor.process_delta("world");
        assert!(events.is_empty());
    }

    #[test]
    fn section_break_flushes_accumulated_text_and_next_delta_reopens() {
        let mut processor = ReasoningProcessor::new();
        processor.process_delta("first section");
        let flushed = processor.handle_section_break();
        assert_eq!(
            flushed,
            vec![SyntheticEvent::ToolCallResult {
                call_id: "reasoning-0".to_string(),
                output: "first section".to_string(),
                status: "completed".to_string(),
            }]
        );

        let reopened = processor.process_delta("second section");
        assert_eq!(
            reopened,
            vec![SyntheticEvent::ToolCall {
                name: REASONING_TOOL_NAME.to_string(),
                call_id: "reasoning-1".to_string(),
            }]
        );
    }

    #[test]
    fn complete_with_no_open_section_emits_nothing() {
        let mut processor = ReasoningProcessor::new();
        assert!(processor.complete().is_empty());
    }

    #[test]
    fn abort_flushes_with_canceled_status_but_complete_does_not() {
        let mut aborted = ReasoningProcessor::new();
        aborted.process_delta("mid thought");
        assert_eq!(
            aborted.abort(),
            vec![SyntheticEvent::ToolCallResult {
                call_id: "reasoning-0".to_string(),
                output: "mid thought".to_string(),
                status: "canceled".to_string(),
            }]
        );

        let mut completed = ReasoningProcessor::new();
        completed.process_delta("finished thought");
        assert_eq!(
            completed.complete(),
            vec![SyntheticEvent::ToolCallResult {
                call_id: "reasoning-0".to_string(),
                output: "finished thought".to_string(),
                status: "completed".to_string(),
            }]
        );
    }

    #[test]
    fn diff_processor_joins_fragments_and_resets() {
        let mut processor = DiffProcessor::new();
        processor.accumulate("diff a");
        processor.accumulate("diff b");
        assert_eq!(processor.flush().as_deref(), Some("diff a\n\ndiff b"));
        assert_eq!(processor.flush(), None);
    }
}
