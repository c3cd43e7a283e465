//! Planning adapter: turns an upstream analysis result into queued tasks.
//!
//! The planner itself is an external collaborator; this module only accepts
//! its output. Dependency lists are validated before anything is persisted,
//! so a bad batch leaves the queue untouched.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{Task, TaskStatus, WorkerState, WorkerStatus};
use crate::queue::{QueueError, TaskQueue};

/// Messages retained for planner context.
const CONVERSATION_CAPACITY: usize = 50;

/// One exchange with the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded log of recent planner exchanges. Older messages fall off so the
/// context handed to the planner stays small.
#[derive(Debug, Default)]
pub struct ConversationLog {
    messages: VecDeque<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        if self.messages.len() == CONVERSATION_CAPACITY {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }
}

/// One planned module of the decomposed requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedModule {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

/// One task produced by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

/// Planner output for one requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub modules: Vec<PlannedModule>,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub complexity: String,
}

/// Point-in-time progress over a queue and its workers, for the operator's
/// status surface and for planner context.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub timestamp: DateTime<Utc>,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub in_progress_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// 0-100, completed over total.
    pub overall_progress: f64,
    /// Stuck workers and permanently failed tasks worth surfacing.
    pub blockers: Vec<String>,
}

impl ProgressReport {
    pub fn compute(tasks: &[Task], workers: &[WorkerStatus]) -> Self {
        let count = |s: TaskStatus| tasks.iter().filter(|t| t.status == s).count();
        let completed = count(TaskStatus::Completed);

        let mut blockers = Vec::new();
        for worker in workers {
            if worker.state == WorkerState::Stuck {
                blockers.push(format!("{} is stuck", worker.worker_id));
            }
        }
        for task in tasks {
            if task.status == TaskStatus::Failed {
                let detail = if task.last_error.is_empty() {
                    String::new()
                } else {
                    format!(": {}", task.last_error)
                };
                blockers.push(format!("task {} failed{}", task.id, detail));
            }
        }

        Self {
            timestamp: Utc::now(),
            total_tasks: tasks.len(),
            pending_tasks: count(TaskStatus::Pending),
            in_progress_tasks: count(TaskStatus::InProgress),
            completed_tasks: completed,
            failed_tasks: count(TaskStatus::Failed),
            overall_progress: if tasks.is_empty() {
                0.0
            } else {
                completed as f64 / tasks.len() as f64 * 100.0
            },
            blockers,
        }
    }
}

/// Batch-validation failures; nothing was persisted.
#[derive(Debug, thiserror::Error)]
pub enum PlanImportError {
    #[error("planner produced no tasks")]
    Empty,

    #[error("duplicate task id in batch: {0}")]
    DuplicateInBatch(String),

    #[error("task {task} depends on {dependency}, which is neither in the batch nor in the queue")]
    UnknownDependency { task: String, dependency: String },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Validate and persist a planner batch. Returns the queued tasks.
///
/// Validation happens before persistence: in-batch ids must be unique,
/// every dependency must resolve inside the batch or to a task already in
/// the queue, and the queue's own add performs the acyclicity check per
/// task. Tasks are added in dependency-respecting order so a partial batch
/// is never observable as a broken graph.
pub fn import_analysis(queue: &TaskQueue, analysis: &AnalysisResult) -> Result<Vec<Task>, PlanImportError> {
    if analysis.tasks.is_empty() {
        return Err(PlanImportError::Empty);
    }

    let mut batch_ids = HashSet::new();
    for spec in &analysis.tasks {
        if !batch_ids.insert(spec.id.as_str()) {
            return Err(PlanImportError::DuplicateInBatch(spec.id.clone()));
        }
    }

    let existing: HashSet<String> = queue.list()?.into_iter().map(|t| t.id).collect();
    for spec in &analysis.tasks {
        if existing.contains(&spec.id) {
            return Err(PlanImportError::Queue(QueueError::DuplicateId(spec.id.clone())));
        }
        for dep in &spec.dependencies {
            if !batch_ids.contains(dep.as_str()) && !existing.contains(dep) {
                return Err(PlanImportError::UnknownDependency {
                    task: spec.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Add dependency-free specs first so in-batch edges resolve as they land
    let mut pending: Vec<&TaskSpec> = analysis.tasks.iter().collect();
    let mut added_ids: HashSet<String> = existing;
    let mut queued = Vec::new();

    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|spec| {
            let satisfied = spec.dependencies.iter().all(|d| added_ids.contains(d));
            if !satisfied {
                return true;
            }

            let task = Task::new(spec.description.clone(), normalize_priority(spec.priority))
                .with_id(spec.id.clone())
                .with_dependencies(spec.dependencies.clone());

            match queue.add(task) {
                Ok(added) => {
                    added_ids.insert(added.id.clone());
                    queued.push(added);
                    false
                }
                // Leave it pending so the cycle surfaces below
                Err(_) => true,
            }
        });

        if pending.len() == before {
            // Whatever remains forms a cycle among in-batch dependencies
            let id = pending[0].id.clone();
            return Err(PlanImportError::Queue(QueueError::CycleDetected(id)));
        }
    }

    info!(count = queued.len(), summary = %analysis.summary, "Imported planner batch");
    Ok(queued)
}

fn normalize_priority(priority: i32) -> i32 {
    priority.clamp(1, 10)
}
