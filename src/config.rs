//! Configuration types and loading.
//!
//! Lookup order: explicit `--config` path, then `.codeswarm.yml` in the
//! working directory, then `~/.config/codeswarm/codeswarm.yml`, then
//! defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::retry::RetryConfig;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repo: RepoConfig,
    pub queue: QueueConfig,
    pub workers: WorkersConfig,
    pub assistant: AssistantConfig,
    pub retry: RetrySettings,
}

impl Config {
    /// Load configuration with the fallback chain.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local = PathBuf::from(".codeswarm.yml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("Failed to load config from {}: {}", local.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("codeswarm").join("codeswarm.yml");
            if user.exists() {
                match Self::load_from_file(&user) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("Failed to load config from {}: {}", user.display(), e),
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Flatten into the coordinator's runtime configuration.
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            repo_path: self.repo.path.clone(),
            queue_path: self.queue.path.clone(),
            num_workers: self.workers.count as usize,
            base_branch: self.repo.base_branch.clone(),
            session: self.workers.session.clone(),
            state_path: Some(self.workers.state_path.clone()),
            assistant_command: self.assistant.command.clone(),
            execute_timeout: Duration::from_millis(self.assistant.timeout_ms),
            scheduler_interval: Duration::from_millis(self.workers.scheduler_interval_ms),
            monitor_interval: Duration::from_millis(self.workers.monitor_interval_ms),
            rescue_interval: Duration::from_millis(self.workers.rescue_interval_ms),
            shutdown_grace: Duration::from_millis(self.workers.shutdown_grace_ms),
            min_free_bytes: self.repo.min_free_mb * 1024 * 1024,
            retry: RetryConfig {
                max_retries: self.retry.max_retries,
                initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                backoff_factor: self.retry.backoff_factor,
            },
        }
    }
}

/// Trunk repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Path to the trunk repository.
    pub path: PathBuf,

    /// Branch the workers fork from and merge into.
    #[serde(rename = "base-branch")]
    pub base_branch: String,

    /// Free-space floor at the trunk before merges, in MB.
    #[serde(rename = "min-free-mb")]
    pub min_free_mb: u64,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            base_branch: "main".to_string(),
            min_free_mb: 100,
        }
    }
}

/// Queue file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Path of the persisted queue document.
    pub path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".codeswarm/tasks.json"),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of concurrent workers.
    pub count: u32,

    /// tmux session name to host assistant panes; unset runs headless.
    pub session: Option<String>,

    /// Worker-state snapshot document.
    #[serde(rename = "state-path")]
    pub state_path: PathBuf,

    #[serde(rename = "scheduler-interval-ms")]
    pub scheduler_interval_ms: u64,

    #[serde(rename = "monitor-interval-ms")]
    pub monitor_interval_ms: u64,

    #[serde(rename = "rescue-interval-ms")]
    pub rescue_interval_ms: u64,

    #[serde(rename = "shutdown-grace-ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 3,
            session: None,
            state_path: PathBuf::from(".codeswarm/workers.json"),
            scheduler_interval_ms: 3_000,
            monitor_interval_ms: 5_000,
            rescue_interval_ms: 3_000,
            shutdown_grace_ms: 30_000,
        }
    }
}

/// External assistant invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Shell command the task description is piped into.
    pub command: String,

    /// Per-task timeout in milliseconds.
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: "claude --dangerously-skip-permissions".to_string(),
            timeout_ms: 600_000,
        }
    }
}

/// Retry and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "initial-delay-ms")]
    pub initial_delay_ms: u64,

    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    #[serde(rename = "backoff-factor")]
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5_000,
            max_delay_ms: 300_000,
            backoff_factor: 2.0,
        }
    }
}
