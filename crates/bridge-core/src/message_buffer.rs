//! Bounded ring buffer of everything sent/received on a session, so the hub
//! can replay recent context to a newly attached client (spec.md §4.9, C9).

use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    User,
    Assistant,
    System,
    Tool,
    Result,
    Status,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferEntry {
    pub text: String,
    pub kind: EntryKind,
}

/// Drops the oldest entry once `capacity` is exceeded. Not persisted across
/// process restarts.
pub struct MessageBuffer {
    entries: VecDeque<BufferEntry>,
    capacity: usize,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, text: impl Into<String>, kind: EntryKind) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BufferEntry {
            text: text.into(),
            kind,
        });
    }

    pub fn snapshot(&self) -> Vec<BufferEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entry_drops_past_capacity() {
        let mut buffer = MessageBuffer::with_capacity(2);
        buffer.push("a", EntryKind::User);
        buffer.push("b", EntryKind::Assistant);
        buffer.push("c", EntryKind::Assistant);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].text, "b");
        assert_eq!(snapshot[1].text, "c");
    }
}
