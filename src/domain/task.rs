//! Task record and status as persisted in the queue file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A unit of work dispatched to a worker.
///
/// Wire format matches the persisted queue document: ids are stable strings,
/// timestamps are RFC3339, and the assignee field is serialized as
/// `assignee_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable id, unique within a queue. Auto-assigned from a nanosecond
    /// clock when empty at add time.
    #[serde(default)]
    pub id: String,

    /// Free-form work specification passed to the external assistant.
    pub description: String,

    #[serde(default)]
    pub status: TaskStatus,

    /// Owning worker while in_progress, empty otherwise.
    #[serde(rename = "assignee_id", default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    /// Ids of tasks that must be completed before this one becomes ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Priority 1-10, higher first.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub retry_count: u32,

    /// Defaults to 3 when left at zero.
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task with the given description and priority.
    pub fn new(description: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            description: description.into(),
            status: TaskStatus::Pending,
            assignee: String::new(),
            dependencies: Vec::new(),
            priority,
            retry_count: 0,
            max_retries: 0,
            last_error: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style dependency list.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Builder-style explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}
