//! External process host for the workers' interactive assistants.
//!
//! The core depends on exactly three operations: capture a worker's recent
//! output, inject a line of input, and probe liveness. `TmuxHost` provides
//! them on top of a detached tmux session with one pane per worker;
//! `HeadlessHost` satisfies the contract when no interactive session is
//! wanted (executor-only operation, tests).

use async_trait::async_trait;
use eyre::{Result, bail};
use tokio::process::Command;
use tracing::{debug, info};

/// Host for the assistant processes, one slot per worker.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Recent terminal output of the given worker's slot.
    async fn capture(&self, worker_index: usize) -> Result<String>;

    /// Inject a line of input (with Enter) into the worker's slot.
    async fn send_line(&self, worker_index: usize, line: &str) -> Result<()>;

    /// Whether the host is still serving.
    async fn is_alive(&self) -> bool;

    /// Tear the host down. Idempotent.
    async fn shutdown(&self) -> Result<()>;
}

/// Host that serves no interactive session: capture is empty, injection is a
/// no-op, liveness always holds.
#[derive(Debug, Default)]
pub struct HeadlessHost;

#[async_trait]
impl SessionHost for HeadlessHost {
    async fn capture(&self, _worker_index: usize) -> Result<String> {
        Ok(String::new())
    }

    async fn send_line(&self, worker_index: usize, line: &str) -> Result<()> {
        debug!(worker_index, %line, "Headless host dropping injected input");
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// tmux-backed host: a detached session with one pane per worker.
pub struct TmuxHost {
    session: String,
    pane_ids: Vec<String>,
}

impl TmuxHost {
    /// Create (or replace) a detached session with `panes` panes.
    pub async fn create(session: &str, panes: usize) -> Result<Self> {
        // A stale session with the same name is replaced
        if run_tmux(&["has-session", "-t", session]).await.is_ok() {
            let _ = run_tmux(&["kill-session", "-t", session]).await;
        }

        run_tmux(&["new-session", "-d", "-s", session]).await?;

        for _ in 1..panes {
            run_tmux(&["split-window", "-v", "-t", session]).await?;
            // Re-tile so every pane keeps a usable height
            let _ = run_tmux(&["select-layout", "-t", session, "tiled"]).await;
        }

        let list = run_tmux(&["list-panes", "-t", session, "-F", "#{pane_id}"]).await?;
        let pane_ids: Vec<String> = list.lines().map(|l| l.trim().to_string()).collect();
        if pane_ids.len() < panes {
            bail!("expected {} panes, session has {}", panes, pane_ids.len());
        }

        info!(%session, panes, "Created tmux session");
        Ok(Self {
            session: session.to_string(),
            pane_ids,
        })
    }

    fn pane(&self, worker_index: usize) -> Result<&str> {
        self.pane_ids
            .get(worker_index)
            .map(|s| s.as_str())
            .ok_or_else(|| eyre::eyre!("no pane for worker index {}", worker_index))
    }

    pub fn session_name(&self) -> &str {
        &self.session
    }
}

#[async_trait]
impl SessionHost for TmuxHost {
    async fn capture(&self, worker_index: usize) -> Result<String> {
        let pane = self.pane(worker_index)?;
        run_tmux(&["capture-pane", "-p", "-t", pane, "-S", "-100"]).await
    }

    async fn send_line(&self, worker_index: usize, line: &str) -> Result<()> {
        let pane = self.pane(worker_index)?;
        // Text and Enter in a single tmux call so the pair cannot interleave
        // with another sender
        run_tmux(&["send-keys", "-t", pane, line, "Enter"]).await.map(|_| ())
    }

    async fn is_alive(&self) -> bool {
        run_tmux(&["has-session", "-t", &self.session]).await.is_ok()
    }

    async fn shutdown(&self) -> Result<()> {
        let _ = run_tmux(&["kill-session", "-t", &self.session]).await;
        Ok(())
    }
}

async fn run_tmux(args: &[&str]) -> Result<String> {
    let output = Command::new("tmux").args(args).output().await?;
    if !output.status.success() {
        bail!(
            "tmux {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_host_contract() {
        let host = HeadlessHost;
        assert!(host.is_alive().await);
        assert_eq!(host.capture(0).await.unwrap(), "");
        assert!(host.send_line(3, "yes").await.is_ok());
        assert!(host.shutdown().await.is_ok());
    }
}
