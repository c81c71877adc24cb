//! Tracks outstanding approval requests and correlates the hub's decisions
//! back to them by opaque id (spec.md §4.5, C5). A `reset` (turn abort or
//! session restart) discards every outstanding request so a decision that
//! arrives late is silently dropped instead of being misapplied to a new
//! turn.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::model::ApprovalRequest;

pub struct PermissionHandler {
    outstanding: Mutex<HashMap<String, ApprovalRequest>>,
}

impl PermissionHandler {
    pub fn new() -> Self {
        Self {
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    pub async fn on_request(&self, request: ApprovalRequest) {
        self.outstanding
            .lock()
            .await
            .insert(request.id.clone(), request);
    }

    /// Removes and returns the request if it is still outstanding; `None`
    /// means it was already resolved or discarded by a `reset`.
    pub async fn on_complete(&self, id: &str) -> Option<ApprovalRequest> {
        self.outstanding.lock().await.remove(id)
    }

    pub async fn reset(&self) {
        self.outstanding.lock().await.clear();
    }

    pub async fn is_outstanding(&self, id: &str) -> bool {
        self.outstanding.lock().await.contains_key(id)
    }
}

impl Default for PermissionHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: id.to_string(),
            tool_name: "shell".into(),
            command: Some("ls".into()),
            cwd: None,
            message: None,
            tool: None,
        }
    }

    #[tokio::test]
    async fn completing_an_unknown_request_returns_none() {
        let handler = PermissionHandler::new();
        assert!(handler.on_complete("missing").await.is_none());
    }

    #[tokio::test]
    async fn reset_discards_outstanding_requests() {
        let handler = PermissionHandler::new();
        handler.on_request(request("a")).await;
        handler.reset().await;
        assert!(handler.on_complete("a").await.is_none());
    }

    #[tokio::test]
    async fn request_round_trips_until_completed() {
        let handler = PermissionHandler::new();
        handler.on_request(request("a")).await;
        assert!(handler.is_outstanding("a").await);
        let completed = handler.on_complete("a").await.unwrap();
        assert_eq!(completed.tool_name, "shell");
        assert!(!handler.is_outstanding("a").await);
    }
}
