//! Coordinator configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryConfig;

/// Everything the coordinator needs to bring up a swarm.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Trunk repository the workers merge into.
    pub repo_path: PathBuf,

    /// Persisted queue document path.
    pub queue_path: PathBuf,

    /// Worker-state snapshot document; None disables persistence.
    pub state_path: Option<PathBuf>,

    /// Number of concurrent workers.
    pub num_workers: usize,

    /// Branch the worker branches fork from and merge back into.
    pub base_branch: String,

    /// tmux session to host assistant panes in; None runs headless.
    pub session: Option<String>,

    /// Shell command the workers pipe task descriptions into.
    pub assistant_command: String,

    /// Per-task execution timeout.
    pub execute_timeout: Duration,

    /// Scheduler loop tick.
    pub scheduler_interval: Duration,

    /// Per-worker monitor loop tick.
    pub monitor_interval: Duration,

    /// Rescue loop tick.
    pub rescue_interval: Duration,

    /// Bound on waiting for loops to drain at shutdown.
    pub shutdown_grace: Duration,

    /// Minimum free bytes at the trunk before a merge is attempted.
    pub min_free_bytes: u64,

    pub retry: RetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            queue_path: PathBuf::from(".codeswarm/tasks.json"),
            state_path: Some(PathBuf::from(".codeswarm/workers.json")),
            num_workers: 3,
            base_branch: "main".to_string(),
            session: None,
            assistant_command: "claude --dangerously-skip-permissions".to_string(),
            execute_timeout: Duration::from_secs(10 * 60),
            scheduler_interval: Duration::from_secs(3),
            monitor_interval: Duration::from_secs(5),
            rescue_interval: Duration::from_secs(3),
            shutdown_grace: Duration::from_secs(30),
            min_free_bytes: 100 * 1024 * 1024,
            retry: RetryConfig::default(),
        }
    }
}
