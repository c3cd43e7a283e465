//! Worker state record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Task;

/// Observable state of a worker, derived from analyzer output plus
/// time-since-last-output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Working,
    WaitingConfirm,
    Error,
    Stuck,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::WaitingConfirm => "waiting_confirm",
            Self::Error => "error",
            Self::Stuck => "stuck",
        };
        write!(f, "{}", s)
    }
}

/// Mutable status record for a single worker.
///
/// `version` increments on every state transition; the coordinator uses it
/// to validate deferred updates after a merge briefly released the worker's
/// lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<Task>,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default)]
    pub version: u64,
}

impl WorkerStatus {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: WorkerState::Idle,
            current_task: None,
            last_update: Utc::now(),
            output: String::new(),
            version: 0,
        }
    }

    /// Transition to a new state, bumping the version counter.
    pub fn transition(&mut self, state: WorkerState) {
        if self.state != state {
            self.version += 1;
        }
        self.state = state;
        self.last_update = Utc::now();
    }
}
