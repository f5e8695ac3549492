//! Local process dispatch for approved scripts.
//!
//! Scripts run with no arguments and no shell. stdin is closed and both
//! output streams are captured. Nothing here returns an error: a launch
//! failure, a timeout or a cancellation each become an [`ExecutionOutput`]
//! with exit code `-1`.

use crate::cancel::CancellationToken;
use bastion_db::WorkflowStatus;
use bastion_protocol::defaults::CANCELLED_EXECUTION_MESSAGE;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code reported when no real one exists.
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The process ran to completion (a signal death reports code -1).
    Exited { code: i32 },
    /// The process could not be started.
    LaunchFailed,
    /// Killed after exceeding the configured bound.
    TimedOut,
    /// Killed through the cancellation token.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub outcome: ExecutionOutcome,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecutionOutput {
    fn synthetic(outcome: ExecutionOutcome, stderr: String, started: Instant) -> Self {
        Self {
            outcome,
            exit_code: SYNTHETIC_EXIT_CODE,
            stdout: String::new(),
            stderr,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Terminal workflow state recorded for this outcome.
    pub fn workflow_status(&self) -> WorkflowStatus {
        match self.outcome {
            ExecutionOutcome::Exited { code: 0 } => WorkflowStatus::Success,
            ExecutionOutcome::TimedOut => WorkflowStatus::TimedOut,
            ExecutionOutcome::Exited { .. }
            | ExecutionOutcome::LaunchFailed
            | ExecutionOutcome::Cancelled => WorkflowStatus::Failed,
        }
    }
}

/// Runs a resolved script file as a child process.
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    timeout: Option<Duration>,
}

impl ScriptRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `path` to completion, timeout or cancellation.
    ///
    /// Dropping the child on timeout or cancellation kills it.
    pub async fn run(&self, path: &Path, cancel: &CancellationToken) -> ExecutionOutput {
        let started = Instant::now();

        if cancel.is_cancelled() {
            return ExecutionOutput::synthetic(
                ExecutionOutcome::Cancelled,
                CANCELLED_EXECUTION_MESSAGE.to_string(),
                started,
            );
        }

        let child = match Command::new(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to launch script");
                return ExecutionOutput::synthetic(
                    ExecutionOutcome::LaunchFailed,
                    format!("Failed to launch {}: {}", path.display(), e),
                    started,
                );
            }
        };

        debug!(path = %path.display(), pid = child.id(), "Script started");

        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, child.wait_with_output()).await.ok(),
                None => Some(child.wait_with_output().await),
            }
        };

        tokio::select! {
            result = bounded => match result {
                Some(Ok(output)) => {
                    let code = output.status.code().unwrap_or(SYNTHETIC_EXIT_CODE);
                    ExecutionOutput {
                        outcome: ExecutionOutcome::Exited { code },
                        exit_code: code,
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                }
                Some(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "Failed to collect script output");
                    ExecutionOutput::synthetic(
                        ExecutionOutcome::LaunchFailed,
                        format!("Failed to wait for {}: {}", path.display(), e),
                        started,
                    )
                }
                None => {
                    let limit = self.timeout.unwrap_or_default();
                    warn!(path = %path.display(), ?limit, "Script timed out");
                    ExecutionOutput::synthetic(
                        ExecutionOutcome::TimedOut,
                        format!("timed out after {}s", limit.as_secs()),
                        started,
                    )
                }
            },
            _ = cancel.cancelled() => {
                warn!(path = %path.display(), "Script cancelled");
                ExecutionOutput::synthetic(
                    ExecutionOutcome::Cancelled,
                    CANCELLED_EXECUTION_MESSAGE.to_string(),
                    started,
                )
            }
        }
    }
}
