//! Inbound prompt queue sitting between the hub and the turn orchestrator
//! (spec.md §4.8, C8). Consecutive non-isolated pushes sharing the same
//! mode hash are coalesced into a single queued message so that a burst of
//! quick follow-ups does not spawn a turn per message; an `isolate` push or
//! a mode change always starts a fresh entry.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::model::QueuedMessage;

struct Inner {
    items: VecDeque<QueuedMessage>,
    closed: bool,
}

pub struct MessageQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MessageQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        })
    }

    pub async fn push(&self, message: QueuedMessage) {
        let mut guard = self.inner.lock().await;
        let coalesce = !message.isolate
            && guard
                .items
                .back()
                .map(|last| !last.isolate && last.hash == message.hash)
                .unwrap_or(false);

        if coalesce {
            let last = guard.items.back_mut().expect("checked above");
            last.message.push('\n');
            last.message.push_str(&message.message);
        } else {
            guard.items.push_back(message);
        }
        drop(guard);
        self.notify.notify_one();
    }

    /// Waits for the next message, or `None` if `cancellation` fires or the
    /// queue is closed with nothing left to drain.
    pub async fn wait_for_message(
        &self,
        cancellation: &CancellationToken,
    ) -> Option<QueuedMessage> {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(message) = guard.items.pop_front() {
                    return Some(message);
                }
                if guard.closed {
                    return None;
                }
            }
            tokio::select! {
                _ = cancellation.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// Drops all pending messages without closing the queue. Used when a
    /// thread/session is invalidated and stale prompts no longer apply.
    pub async fn reset(&self) {
        self.inner.lock().await.items.clear();
    }

    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EnhancedMode;

    fn mode() -> EnhancedMode {
        EnhancedMode {
            permission_mode: crate::model::PermissionMode::Default,
            model: None,
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn non_isolated_pushes_with_same_mode_coalesce() {
        let queue = MessageQueue::new();
        queue.push(QueuedMessage::new("first", mode(), false)).await;
        queue
            .push(QueuedMessage::new("second", mode(), false))
            .await;

        assert_eq!(queue.size().await, 1);
        let cancellation = CancellationToken::new();
        let message = queue.wait_for_message(&cancellation).await.unwrap();
        assert_eq!(message.message, "first\nsecond");
    }

    #[tokio::test]
    async fn isolated_push_always_starts_a_new_entry() {
        let queue = MessageQueue::new();
        queue.push(QueuedMessage::new("first", mode(), false)).await;
        queue.push(QueuedMessage::new("second", mode(), true)).await;

        assert_eq!(queue.size().await, 2);
    }

    #[tokio::test]
    async fn mode_change_starts_a_new_entry() {
        let queue = MessageQueue::new();
        queue.push(QueuedMessage::new("first", mode(), false)).await;
        let mut changed = mode();
        changed.model = Some("gpt-5-mini".into());
        queue
            .push(QueuedMessage::new("second", changed, false))
            .await;

        assert_eq!(queue.size().await, 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let queue = MessageQueue::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        assert!(queue.wait_for_message(&cancellation).await.is_none());
    }
}
