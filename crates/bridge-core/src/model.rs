//! Core data model: `Session`, `QueuedMessage`, `Turn`, `ApprovalRequest`,
//! and the `EnhancedMode` → transport-option mapping (spec.md §3, §4.7
//! "Mode → transport options").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    #[default]
    Default,
    ReadOnly,
    SafeYolo,
    Yolo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    AppServer,
    Sdk,
    Mcp,
}

impl TransportKind {
    /// Precedence per spec.md §4.7: `CODEX_USE_SDK` wins, then
    /// `CODEX_USE_MCP_SERVER`, else app-server. Evaluated once at launcher
    /// construction and immutable thereafter.
    pub fn from_env() -> Self {
        if env_flag("CODEX_USE_SDK") {
            TransportKind::Sdk
        } else if env_flag("CODEX_USE_MCP_SERVER") {
            TransportKind::Mcp
        } else {
            TransportKind::AppServer
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v == "1").unwrap_or(false)
}

/// The user-facing permission/model/reasoning configuration attached to a
/// queued message. Its hash drives the mode-change-triggered session
/// restart (spec.md §3, §8 invariant 9).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnhancedMode {
    pub permission_mode: PermissionMode,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
}

impl EnhancedMode {
    pub fn hash(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        serialized.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// `default → on-request` (app-server) / `on-failure` (SDK and MCP,
    /// which have no approval-callback bridge); `read-only → never`;
    /// `safe-yolo`/`yolo → on-failure`.
    pub fn approval_policy(&self, transport: TransportKind) -> &'static str {
        match self.permission_mode {
            PermissionMode::Default if transport == TransportKind::AppServer => "on-request",
            PermissionMode::Default => "on-failure",
            PermissionMode::ReadOnly => "never",
            PermissionMode::SafeYolo | PermissionMode::Yolo => "on-failure",
        }
    }

    pub fn sandbox(&self) -> &'static str {
        match self.permission_mode {
            PermissionMode::Default | PermissionMode::SafeYolo => "workspace-write",
            PermissionMode::ReadOnly => "read-only",
            PermissionMode::Yolo => "danger-full-access",
        }
    }

    /// Forwarded only when it names one of the four recognized tiers.
    pub fn reasoning_effort_for_wire(&self) -> Option<&str> {
        self.reasoning_effort
            .as_deref()
            .filter(|effort| matches!(*effort, "low" | "medium" | "high" | "xhigh"))
    }
}

/// One pending prompt in the hub → orchestrator queue.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedMessage {
    pub message: String,
    pub mode: EnhancedMode,
    pub isolate: bool,
    pub hash: String,
}

impl QueuedMessage {
    pub fn new(message: impl Into<String>, mode: EnhancedMode, isolate: bool) -> Self {
        let hash = mode.hash();
        Self {
            message: message.into(),
            mode,
            isolate,
            hash,
        }
    }
}

/// Singleton per process; mutated only by the orchestrator and inbound hub
/// events.
#[derive(Debug, Default)]
pub struct Session {
    pub session_id: Option<String>,
    pub path: PathBuf,
    pub thinking: bool,
    pub permission_mode: PermissionMode,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
}

/// Transient; at most one in flight.
#[derive(Debug, Clone)]
pub struct Turn {
    pub turn_id: Option<String>,
    pub started_at: Instant,
    pub last_progress_at: Instant,
    pub aborted: bool,
    pub watchdog_notified: bool,
}

impl Turn {
    pub fn new(turn_id: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            turn_id,
            started_at: now,
            last_progress_at: now,
            aborted: false,
            watchdog_notified: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_progress_at = Instant::now();
    }
}

/// Outstanding approval request, keyed by `id`.
#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub command: Option<String>,
    pub cwd: Option<String>,
    pub message: Option<String>,
    pub tool: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_modes_hash_equal() {
        let a = EnhancedMode {
            permission_mode: PermissionMode::Default,
            model: Some("gpt-5".into()),
            reasoning_effort: None,
        };
        let b = a.clone();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn different_modes_hash_differently() {
        let a = EnhancedMode {
            permission_mode: PermissionMode::Default,
            model: None,
            reasoning_effort: None,
        };
        let b = EnhancedMode {
            permission_mode: PermissionMode::Yolo,
            model: None,
            reasoning_effort: None,
        };
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn approval_policy_matches_spec_table() {
        let default_mode = EnhancedMode {
            permission_mode: PermissionMode::Default,
            model: None,
            reasoning_effort: None,
        };
        assert_eq!(
            default_mode.approval_policy(TransportKind::AppServer),
            "on-request"
        );
        assert_eq!(
            default_mode.approval_policy(TransportKind::Sdk),
            "on-failure"
        );

        let read_only = EnhancedMode {
            permission_mode: PermissionMode::ReadOnly,
            model: None,
            reasoning_effort: None,
        };
        assert_eq!(read_only.approval_policy(TransportKind::AppServer), "never");
        assert_eq!(read_only.sandbox(), "read-only");

        let yolo = EnhancedMode {
            permission_mode: PermissionMode::Yolo,
            model: None,
            reasoning_effort: None,
        };
        assert_eq!(yolo.sandbox(), "danger-full-access");
    }

    #[test]
    fn reasoning_effort_rejects_unknown_tiers() {
        let mode = EnhancedMode {
            permission_mode: PermissionMode::Default,
            model: None,
            reasoning_effort: Some("extreme".into()),
        };
        assert_eq!(mode.reasoning_effort_for_wire(), None);

        let mode = EnhancedMode {
            reasoning_effort: Some("xhigh".into()),
            ..mode
        };
        assert_eq!(mode.reasoning_effort_for_wire(), Some("xhigh"));
    }
}
