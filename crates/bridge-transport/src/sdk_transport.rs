//! Native SDK transport: spawns `codex exec --json`, streams its JSONL
//! events as `(kind, payload)` pairs, and exposes a [`CancellationToken`] the
//! orchestrator can trip to abort the in-flight turn.
//!
//! Grounded in the teacher's `codex::exec::ExecStream`/`DynThreadEventStream`
//! (a type-erased async event stream produced by a JSONL-parsing background
//! task) and `codex::process::spawn_with_retry`, generalized per spec.md
//! §4.3/§6.2: the SDK backend is "an asynchronous event generator produced
//! by a backend call that accepts a cancellation token" rather than a
//! JSON-RPC peer.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use futures_core::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;

#[derive(Clone, Debug, Default)]
pub struct SdkStreamRequest {
    pub binary: PathBuf,
    pub prompt: String,
    pub cwd: Option<PathBuf>,
    pub idle_timeout: Option<Duration>,
    pub model: Option<String>,
    pub approval_policy: Option<String>,
    pub sandbox: Option<String>,
    pub reasoning_effort: Option<String>,
}

pub type SdkEventStream =
    Pin<Box<dyn Stream<Item = Result<(String, Value), TransportError>> + Send>>;

pub struct SdkTransport {
    pub events: SdkEventStream,
    pub cancellation: CancellationToken,
    child: Child,
}

/// Builds the `codex exec` CLI flags for a request, grounded in the
/// teacher's `builder/cli_overrides.rs` flag construction
/// (`--ask-for-approval`, `--sandbox`, `--config key=value`).
fn cli_args(request: &SdkStreamRequest) -> Vec<String> {
    let mut args = vec!["exec".to_string(), "--json".to_string()];
    if let Some(model) = &request.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(policy) = &request.approval_policy {
        args.push("--ask-for-approval".to_string());
        args.push(policy.clone());
    }
    if let Some(sandbox) = &request.sandbox {
        args.push("--sandbox".to_string());
        args.push(sandbox.clone());
    }
    if let Some(effort) = &request.reasoning_effort {
        args.push("--config".to_string());
        args.push(format!("model_reasoning_effort={effort}"));
    }
    args.push(request.prompt.clone());
    args
}

impl SdkTransport {
    pub async fn spawn(request: SdkStreamRequest) -> Result<Self, TransportError> {
        let mut command = Command::new(&request.binary);
        command
            .args(cli_args(&request))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let command_debug = format!("{command:?}");
        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            command: command_debug,
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Transport("sdk child stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        let cancellation = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(pump_stdout(
            stdout,
            tx,
            cancellation.clone(),
            request.idle_timeout,
        ));
        if let Some(stderr) = stderr {
            tokio::spawn(pump_stderr(stderr));
        }

        Ok(Self {
            events: Box::pin(UnboundedReceiverStream::new(rx)),
            cancellation,
            child,
        })
    }

    /// Trips the cancellation token and kills the child. Idempotent.
    pub fn cancel(&mut self) {
        self.cancellation.cancel();
        let _ = self.child.start_kill();
    }
}

impl Drop for SdkTransport {
    fn drop(&mut self) {
        self.cancellation.cancel();
        let _ = self.child.start_kill();
    }
}

async fn pump_stdout(
    stdout: tokio::process::ChildStdout,
    tx: mpsc::UnboundedSender<Result<(String, Value), TransportError>>,
    cancellation: CancellationToken,
    idle_timeout: Option<Duration>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let next_line = match idle_timeout {
            Some(timeout) => tokio::select! {
                _ = cancellation.cancelled() => break,
                result = tokio::time::timeout(timeout, lines.next_line()) => match result {
                    Ok(inner) => inner,
                    Err(_) => {
                        let _ = tx.send(Err(TransportError::Timeout(timeout)));
                        break;
                    }
                },
            },
            None => tokio::select! {
                _ = cancellation.cancelled() => break,
                result = lines.next_line() => result,
            },
        };

        match next_line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => {
                        let kind = value
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        if tx.send(Ok((kind, value))).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("failed to parse sdk JSONL event: {err}: `{line}`");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                let _ = tx.send(Err(TransportError::Transport(err.to_string())));
                break;
            }
        }
    }
}

async fn pump_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("sdk stderr: {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_request_has_no_option_flags() {
        let request = SdkStreamRequest {
            prompt: "hi".to_string(),
            ..Default::default()
        };
        assert_eq!(cli_args(&request), vec!["exec", "--json", "hi"]);
    }

    #[test]
    fn full_request_forwards_model_approval_sandbox_and_reasoning_effort() {
        let request = SdkStreamRequest {
            prompt: "hi".to_string(),
            model: Some("gpt-5".to_string()),
            approval_policy: Some("never".to_string()),
            sandbox: Some("read-only".to_string()),
            reasoning_effort: Some("xhigh".to_string()),
            ..Default::default()
        };
        assert_eq!(
            cli_args(&request),
            vec![
                "exec",
                "--json",
                "--model",
                "gpt-5",
                "--ask-for-approval",
                "never",
                "--sandbox",
                "read-only",
                "--config",
                "model_reasoning_effort=xhigh",
                "hi",
            ]
        );
    }
}
