//! Invocation of the external assistant command.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use eyre::{Result, WrapErr};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of one assistant invocation.
#[derive(Debug)]
pub struct ExecutionOutput {
    pub success: bool,
    /// Combined stdout/stderr, the analyzer's classification input.
    pub output: String,
    pub duration: Duration,
}

/// Runs the assistant command inside a worker's workspace.
///
/// The task description is piped on standard input; the workspace is the
/// working directory; exit code zero means success. The dangerous-operation
/// bypass flag is passed through because the operator accepted that risk —
/// the analyzer remains the secondary safety net.
#[derive(Debug, Clone)]
pub struct AssistantExecutor {
    command: String,
    workdir: PathBuf,
    timeout: Duration,
}

impl AssistantExecutor {
    pub fn new(command: impl Into<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the assistant on one task description.
    ///
    /// Returns Err only on spawn/plumbing failures; a non-zero exit comes
    /// back as `ExecutionOutput { success: false, .. }` so the caller can
    /// classify the captured output. Timeout and cancellation kill the
    /// process and surface as errors.
    pub async fn run(&self, description: &str, cancel: &CancellationToken) -> Result<ExecutionOutput> {
        debug!(workdir = %self.workdir.display(), "Invoking assistant");
        let started = Instant::now();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .wrap_err("failed to spawn assistant command")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(description.as_bytes())
                .await
                .wrap_err("failed to write task description")?;
            stdin.write_all(b"\n").await.ok();
            drop(stdin);
        }

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                eyre::bail!("assistant execution cancelled");
            }
            _ = tokio::time::sleep(self.timeout) => {
                warn!(timeout = ?self.timeout, "Assistant timed out, killing");
                // kill_on_drop reaps the process
                eyre::bail!("assistant timed out after {:?}", self.timeout);
            }
            result = child.wait_with_output() => result,
        };

        let output = waited.wrap_err("failed to collect assistant output")?;
        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            combined.push_str(&stderr);
        }

        Ok(ExecutionOutput {
            success: output.status.success(),
            output: combined,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn executor(dir: &tempfile::TempDir, command: &str) -> AssistantExecutor {
        AssistantExecutor::new(command, dir.path(), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_success_captures_output() {
        let dir = tempdir().unwrap();
        let exec = executor(&dir, "cat");
        let cancel = CancellationToken::new();

        let out = exec.run("fix the parser", &cancel).await.unwrap();
        assert!(out.success);
        assert!(out.output.contains("fix the parser"));
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_error() {
        let dir = tempdir().unwrap();
        let exec = executor(&dir, "sh -c 'echo boom >&2; exit 1'");
        let cancel = CancellationToken::new();

        let out = exec.run("task", &cancel).await.unwrap();
        assert!(!out.success);
        assert!(out.output.contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_kills() {
        let dir = tempdir().unwrap();
        let exec = AssistantExecutor::new("sleep 30", dir.path(), Duration::from_millis(200));
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let result = exec.run("task", &cancel).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let dir = tempdir().unwrap();
        let exec = AssistantExecutor::new("sleep 30", dir.path(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(exec.run("task", &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let dir = tempdir().unwrap();
        let exec = executor(&dir, "pwd");
        let cancel = CancellationToken::new();

        let out = exec.run("", &cancel).await.unwrap();
        let reported = out.output.trim();
        // Canonicalize both: the tempdir may sit behind a symlink
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::Path::new(reported).canonicalize().unwrap(), expected);
    }
}
