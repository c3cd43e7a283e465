//! File-backed task queue with cross-process locking and atomic claims.
//!
//! One JSON document holds the full task list; a sibling `<path>.lock` file
//! carries advisory locks (shared for load, exclusive for save). Every write
//! goes to `<path>.tmp` and is renamed over the canonical path, so a crash
//! at any point leaves either the old or the new document, never a partial
//! one.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Task, TaskStatus};
use crate::scheduler::DagScheduler;
use crate::util::fs::{atomic_write, expand_home, sibling};

use super::QueueError;

/// Filter for [`TaskQueue::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearFilter {
    Completed,
    Failed,
    All,
}

#[derive(Serialize, Deserialize, Default)]
struct QueueDocument {
    tasks: Vec<Task>,
}

struct QueueInner {
    tasks: HashMap<String, Task>,
    dag: DagScheduler,
}

/// Durable task queue shared by every worker in this process and by
/// cooperating processes pointed at the same file.
pub struct TaskQueue {
    path: PathBuf,
    lock_file: File,
    inner: Mutex<QueueInner>,
}

/// RAII advisory-lock guard; unlocks on every exit path.
struct FlockGuard<'a>(&'a File);

impl<'a> FlockGuard<'a> {
    fn shared(file: &'a File) -> Result<Self, QueueError> {
        file.lock_shared()?;
        Ok(Self(file))
    }

    fn exclusive(file: &'a File) -> Result<Self, QueueError> {
        file.lock_exclusive()?;
        Ok(Self(file))
    }
}

impl Drop for FlockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(self.0) {
            warn!(error = %e, "Failed to release queue lock");
        }
    }
}

impl TaskQueue {
    /// Open (or create) the queue at `path`. `~` is expanded; parent
    /// directories are created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = expand_home(path.as_ref());

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let lock_path = sibling(&path, "lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        let queue = Self {
            path,
            lock_file,
            inner: Mutex::new(QueueInner {
                tasks: HashMap::new(),
                dag: DagScheduler::new(),
            }),
        };

        {
            let mut inner = queue.inner.lock().unwrap();
            if queue.path.exists() {
                queue.load_into(&mut inner)?;
            } else {
                let _lock = FlockGuard::exclusive(&queue.lock_file)?;
                queue.save_from(&inner)?;
            }
        }

        Ok(queue)
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a task: assigns id/timestamps/defaults, validates acyclicity,
    /// persists.
    pub fn add(&self, mut task: Task) -> Result<Task, QueueError> {
        if task.description.trim().is_empty() {
            return Err(QueueError::EmptyDescription);
        }

        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::exclusive(&self.lock_file)?;
        self.reload_locked(&mut inner)?;

        if task.id.is_empty() {
            task.id = generate_task_id();
        }
        if inner.tasks.contains_key(&task.id) {
            return Err(QueueError::DuplicateId(task.id));
        }

        let now = Utc::now();
        if task.created_at.timestamp() == 0 {
            task.created_at = now;
        }
        task.updated_at = now;
        if task.max_retries == 0 {
            task.max_retries = 3;
        }

        if !inner.dag.add(task.clone()) {
            return Err(QueueError::CycleDetected(task.id));
        }

        inner.tasks.insert(task.id.clone(), task.clone());
        self.save_from(&inner)?;

        debug!(id = %task.id, priority = task.priority, "Task added");
        Ok(task)
    }

    /// Atomically claim the highest-priority ready task for a worker.
    ///
    /// Re-reads the on-disk document under the exclusive lock so that claims
    /// from sibling workers and cooperating processes never hand out the
    /// same task. A worker that already holds an in_progress task gets that
    /// task back instead of a second one.
    pub fn claim(&self, worker_id: &str) -> Result<Option<Task>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::exclusive(&self.lock_file)?;
        self.reload_locked(&mut inner)?;

        if let Some(existing) = inner
            .tasks
            .values()
            .find(|t| t.status == TaskStatus::InProgress && t.assignee == worker_id)
        {
            debug!(id = %existing.id, %worker_id, "Re-issuing unreleased claim");
            return Ok(Some(existing.clone()));
        }

        let ready = inner.dag.ready();
        let Some(selected) = ready.into_iter().next() else {
            return Ok(None);
        };

        let task = inner
            .tasks
            .get_mut(&selected.id)
            .ok_or_else(|| QueueError::UnknownTask(selected.id.clone()))?;
        task.status = TaskStatus::InProgress;
        task.assignee = worker_id.to_string();
        task.updated_at = Utc::now();
        let claimed = task.clone();
        inner.dag.update(claimed.clone());

        self.save_from(&inner)?;

        debug!(id = %claimed.id, %worker_id, "Task claimed");
        Ok(Some(claimed))
    }

    /// Transition a task's status. Moving back to pending clears the
    /// assignee (the retry and orphan paths); completed/failed keep it as a
    /// record of who ran the task.
    pub fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::exclusive(&self.lock_file)?;
        self.reload_locked(&mut inner)?;

        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;
        task.status = status;
        if status == TaskStatus::Pending {
            task.assignee.clear();
        }
        task.updated_at = Utc::now();
        let updated = task.clone();
        inner.dag.update(updated);

        self.save_from(&inner)
    }

    /// Replace a stored task wholesale (retries, dependency edits, error
    /// annotation). Dependency edits that would close a cycle are rejected
    /// with no mutation.
    pub fn update(&self, mut task: Task) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::exclusive(&self.lock_file)?;
        self.reload_locked(&mut inner)?;

        if !inner.tasks.contains_key(&task.id) {
            return Err(QueueError::UnknownTask(task.id));
        }

        task.updated_at = Utc::now();
        if !inner.dag.update(task.clone()) {
            return Err(QueueError::CycleDetected(task.id));
        }
        inner.tasks.insert(task.id.clone(), task);

        self.save_from(&inner)
    }

    pub fn get(&self, id: &str) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::shared(&self.lock_file)?;
        self.reload_locked(&mut inner)?;

        inner
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::UnknownTask(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<Task>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::shared(&self.lock_file)?;
        self.reload_locked(&mut inner)?;

        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    /// Ready set: pending, unassigned, every dependency completed; sorted by
    /// (priority desc, created_at asc).
    pub fn ready(&self) -> Result<Vec<Task>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::shared(&self.lock_file)?;
        self.reload_locked(&mut inner)?;
        Ok(inner.dag.ready())
    }

    /// Pending tasks blocked by incomplete or missing dependencies.
    pub fn blocked(&self) -> Result<Vec<Task>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::shared(&self.lock_file)?;
        self.reload_locked(&mut inner)?;
        Ok(inner.dag.blocked())
    }

    pub fn dependents_of(&self, id: &str) -> Result<Vec<Task>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::shared(&self.lock_file)?;
        self.reload_locked(&mut inner)?;
        Ok(inner.dag.dependents_of(id))
    }

    /// Reset every in_progress task back to pending with the assignee
    /// cleared. Invoked at coordinator startup and shutdown to recover
    /// orphans. Returns the ids that were reset.
    pub fn reset_orphans(&self) -> Result<Vec<String>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::exclusive(&self.lock_file)?;
        self.reload_locked(&mut inner)?;

        let mut reset = Vec::new();
        for task in inner.tasks.values_mut() {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Pending;
                task.assignee.clear();
                task.updated_at = Utc::now();
                reset.push(task.id.clone());
            }
        }

        if !reset.is_empty() {
            let updated: Vec<Task> = reset.iter().filter_map(|id| inner.tasks.get(id).cloned()).collect();
            for t in updated {
                inner.dag.update(t);
            }
            self.save_from(&inner)?;
            debug!(count = reset.len(), "Reset orphaned tasks to pending");
        }

        Ok(reset)
    }

    /// Remove tasks matching the filter; returns how many were removed.
    pub fn clear(&self, filter: ClearFilter) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let _lock = FlockGuard::exclusive(&self.lock_file)?;
        self.reload_locked(&mut inner)?;

        let victims: Vec<String> = inner
            .tasks
            .values()
            .filter(|t| match filter {
                ClearFilter::Completed => t.status == TaskStatus::Completed,
                ClearFilter::Failed => t.status == TaskStatus::Failed,
                ClearFilter::All => true,
            })
            .map(|t| t.id.clone())
            .collect();

        for id in &victims {
            inner.tasks.remove(id);
            inner.dag.remove(id);
        }

        self.save_from(&inner)?;
        Ok(victims.len())
    }

    /// Re-read the on-disk document, discarding the in-memory view. Caller
    /// must hold the advisory lock.
    fn reload_locked(&self, inner: &mut QueueInner) -> Result<(), QueueError> {
        if !self.path.exists() {
            return Ok(());
        }

        let data = fs::read(&self.path)?;
        let doc: QueueDocument =
            serde_json::from_slice(&data).map_err(|e| QueueError::Corrupt(e.to_string()))?;

        inner.tasks.clear();
        inner.dag = DagScheduler::new();
        for task in doc.tasks {
            // On-disk state wins; a cycle in a hand-edited file only drops
            // the offending task from the graph, not from the map.
            if !inner.dag.add(task.clone()) {
                warn!(id = %task.id, "Persisted task closes a dependency cycle, excluded from scheduling");
            }
            inner.tasks.insert(task.id.clone(), task);
        }
        Ok(())
    }

    /// Write the document to `<path>.tmp` and rename it over the canonical
    /// path. On rename failure the temp file is removed and the previous
    /// document stands. Caller must hold the exclusive advisory lock.
    fn save_from(&self, inner: &QueueInner) -> Result<(), QueueError> {
        let mut tasks: Vec<&Task> = inner.tasks.values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let doc = serde_json::json!({ "tasks": tasks });
        let data = serde_json::to_vec_pretty(&doc).map_err(|e| QueueError::Corrupt(e.to_string()))?;

        atomic_write(&self.path, &data)?;
        Ok(())
    }

    /// Load with a shared lock, for callers that only need a fresh read.
    fn load_into(&self, inner: &mut QueueInner) -> Result<(), QueueError> {
        let _lock = FlockGuard::shared(&self.lock_file)?;
        self.reload_locked(inner)
    }
}

/// Unique-enough id from a monotonic nanosecond clock.
fn generate_task_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("task-{}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_queue(dir: &tempfile::TempDir) -> TaskQueue {
        TaskQueue::open(dir.path().join("tasks.json")).unwrap()
    }

    #[test]
    fn test_open_creates_empty_document() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        assert!(queue.path().exists());
        assert!(queue.list().unwrap().is_empty());
    }

    #[test]
    fn test_add_assigns_defaults() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        let task = queue.add(Task::new("implement feature", 5)).unwrap();
        assert!(task.id.starts_with("task-"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_retries, 3);
    }

    #[test]
    fn test_add_rejects_empty_description() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        assert!(matches!(
            queue.add(Task::new("   ", 5)),
            Err(QueueError::EmptyDescription)
        ));
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("first", 5).with_id("t1")).unwrap();
        assert!(matches!(
            queue.add(Task::new("second", 5).with_id("t1")),
            Err(QueueError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_add_rejects_cycle_before_persistence() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("a", 5).with_id("a")).unwrap();
        queue
            .add(Task::new("b", 5).with_id("b").with_dependencies(vec!["a".into()]))
            .unwrap();

        let mut a = queue.get("a").unwrap();
        a.dependencies = vec!["b".to_string()];
        assert!(matches!(queue.update(a), Err(QueueError::CycleDetected(_))));

        // Queue unchanged on disk and in memory
        assert!(queue.get("a").unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_claim_selects_highest_priority() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("low", 3).with_id("low")).unwrap();
        queue.add(Task::new("high", 9).with_id("high")).unwrap();

        let claimed = queue.claim("worker-0").unwrap().unwrap();
        assert_eq!(claimed.id, "high");
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.assignee, "worker-0");
    }

    #[test]
    fn test_claim_is_idempotent_per_worker() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("one", 5).with_id("one")).unwrap();
        queue.add(Task::new("two", 5).with_id("two")).unwrap();

        let first = queue.claim("worker-0").unwrap().unwrap();
        let second = queue.claim("worker-0").unwrap().unwrap();
        // Same task again, never two
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_claim_exhausts_ready_set() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("only", 5).with_id("only")).unwrap();
        assert!(queue.claim("worker-0").unwrap().is_some());
        assert!(queue.claim("worker-1").unwrap().is_none());
    }

    #[test]
    fn test_claim_skips_blocked_tasks() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue
            .add(Task::new("dependent", 9).with_id("b").with_dependencies(vec!["a".into()]))
            .unwrap();
        queue.add(Task::new("base", 1).with_id("a")).unwrap();

        // Despite lower priority, only the unblocked task is claimable
        let claimed = queue.claim("worker-0").unwrap().unwrap();
        assert_eq!(claimed.id, "a");
    }

    #[test]
    fn test_linear_chain_scenario() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("a", 5).with_id("a")).unwrap();
        queue
            .add(Task::new("b", 5).with_id("b").with_dependencies(vec!["a".into()]))
            .unwrap();
        queue
            .add(Task::new("c", 9).with_id("c").with_dependencies(vec!["b".into()]))
            .unwrap();

        let ready: Vec<String> = queue.ready().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["a"]);

        let a = queue.claim("w").unwrap().unwrap();
        assert_eq!(a.id, "a");
        queue.update_status("a", TaskStatus::Completed).unwrap();

        let ready: Vec<String> = queue.ready().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["b"]);

        queue.claim("w").unwrap().unwrap();
        queue.update_status("b", TaskStatus::Completed).unwrap();

        let ready: Vec<String> = queue.ready().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["c"]);
    }

    #[test]
    fn test_update_status_pending_clears_assignee() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("t", 5).with_id("t")).unwrap();
        queue.claim("worker-0").unwrap().unwrap();

        queue.update_status("t", TaskStatus::Pending).unwrap();
        let task = queue.get("t").unwrap();
        assert!(task.assignee.is_empty());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_update_status_unknown_task() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        assert!(matches!(
            queue.update_status("ghost", TaskStatus::Completed),
            Err(QueueError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_reset_orphans() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("one", 5).with_id("one")).unwrap();
        queue.add(Task::new("two", 5).with_id("two")).unwrap();
        queue.claim("worker-0").unwrap().unwrap();
        queue.claim("worker-1").unwrap().unwrap();

        let reset = queue.reset_orphans().unwrap();
        assert_eq!(reset.len(), 2);

        for task in queue.list().unwrap() {
            assert_eq!(task.status, TaskStatus::Pending);
            assert!(task.assignee.is_empty());
        }

        // Idempotent
        assert!(queue.reset_orphans().unwrap().is_empty());
    }

    #[test]
    fn test_orphans_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        {
            let queue = TaskQueue::open(&path).unwrap();
            queue.add(Task::new("t", 5).with_id("t")).unwrap();
            queue.claim("worker-0").unwrap().unwrap();
            // Simulated crash: drop without resetting
        }

        let queue = TaskQueue::open(&path).unwrap();
        assert_eq!(queue.get("t").unwrap().status, TaskStatus::InProgress);

        let reset = queue.reset_orphans().unwrap();
        assert_eq!(reset, vec!["t".to_string()]);
        assert!(queue.claim("worker-1").unwrap().is_some());
    }

    #[test]
    fn test_cross_handle_claims_exclusive() {
        // Two queue handles on the same file model two cooperating processes
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let q1 = TaskQueue::open(&path).unwrap();
        let q2 = TaskQueue::open(&path).unwrap();

        q1.add(Task::new("only", 5).with_id("only")).unwrap();

        let first = q1.claim("worker-a").unwrap();
        let second = q2.claim("worker-b").unwrap();

        assert!(first.is_some());
        assert!(second.is_none(), "second handle must observe the claim");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let queue = TaskQueue::open(&path).unwrap();
        queue
            .add(Task::new("keep me", 8).with_id("t1").with_dependencies(vec!["t0".into()]))
            .unwrap();
        queue.add(Task::new("base", 2).with_id("t0")).unwrap();
        drop(queue);

        let reopened = TaskQueue::open(&path).unwrap();
        let t1 = reopened.get("t1").unwrap();
        assert_eq!(t1.description, "keep me");
        assert_eq!(t1.priority, 8);
        assert_eq!(t1.dependencies, vec!["t0"]);
        assert_eq!(t1.max_retries, 3);
    }

    #[test]
    fn test_clear_filters() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("a", 5).with_id("a")).unwrap();
        queue.add(Task::new("b", 5).with_id("b")).unwrap();
        queue.add(Task::new("c", 5).with_id("c")).unwrap();
        queue.update_status("a", TaskStatus::Completed).unwrap();
        queue.update_status("b", TaskStatus::Failed).unwrap();

        assert_eq!(queue.clear(ClearFilter::Completed).unwrap(), 1);
        assert_eq!(queue.clear(ClearFilter::Failed).unwrap(), 1);
        assert_eq!(queue.list().unwrap().len(), 1);
        assert_eq!(queue.clear(ClearFilter::All).unwrap(), 1);
        assert!(queue.list().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_reports() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, b"{not json").unwrap();

        match TaskQueue::open(&path) {
            Err(QueueError::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dependents_query() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue.add(Task::new("a", 5).with_id("a")).unwrap();
        queue
            .add(Task::new("b", 5).with_id("b").with_dependencies(vec!["a".into()]))
            .unwrap();

        let deps = queue.dependents_of("a").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, "b");
    }

    #[test]
    fn test_blocked_query_includes_missing_dependency() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);

        queue
            .add(Task::new("b", 5).with_id("b").with_dependencies(vec!["ghost".into()]))
            .unwrap();

        let blocked = queue.blocked().unwrap();
        assert_eq!(blocked.len(), 1);
        assert!(queue.ready().unwrap().is_empty());
    }
}
