//! End-to-end tests across the queue, scheduler, and coordinator.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use codeswarm::coordinator::{Coordinator, CoordinatorConfig};
use codeswarm::domain::{Task, TaskStatus};
use codeswarm::git::Repository;
use codeswarm::queue::TaskQueue;

fn fast_config(repo: &TempDir, queue: &TempDir, assistant: &str) -> CoordinatorConfig {
    CoordinatorConfig {
        repo_path: repo.path().to_path_buf(),
        queue_path: queue.path().join("tasks.json"),
        state_path: Some(queue.path().join("workers.json")),
        num_workers: 1,
        base_branch: "main".to_string(),
        session: None,
        assistant_command: assistant.to_string(),
        execute_timeout: Duration::from_secs(30),
        scheduler_interval: Duration::from_millis(100),
        monitor_interval: Duration::from_millis(100),
        rescue_interval: Duration::from_millis(100),
        shutdown_grace: Duration::from_secs(5),
        ..CoordinatorConfig::default()
    }
}

async fn wait_for_status(queue: &TaskQueue, id: &str, wanted: TaskStatus, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Ok(task) = queue.get(id) {
            if task.status == wanted {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// =============================================================================
// Queue scenarios
// =============================================================================

#[test]
fn test_linear_chain() {
    let dir = TempDir::new().unwrap();
    let queue = TaskQueue::open(dir.path().join("q.json")).unwrap();

    queue.add(Task::new("a", 5).with_id("a")).unwrap();
    queue
        .add(Task::new("b", 5).with_id("b").with_dependencies(vec!["a".into()]))
        .unwrap();
    queue
        .add(Task::new("c", 9).with_id("c").with_dependencies(vec!["b".into()]))
        .unwrap();

    let ready: Vec<String> = queue.ready().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ready, vec!["a"]);

    assert_eq!(queue.claim("w").unwrap().unwrap().id, "a");
    queue.update_status("a", TaskStatus::Completed).unwrap();
    let ready: Vec<String> = queue.ready().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ready, vec!["b"]);

    assert_eq!(queue.claim("w").unwrap().unwrap().id, "b");
    queue.update_status("b", TaskStatus::Completed).unwrap();
    let ready: Vec<String> = queue.ready().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ready, vec!["c"]);
}

#[test]
fn test_priority_tie_break() {
    let dir = TempDir::new().unwrap();
    let queue = TaskQueue::open(dir.path().join("q.json")).unwrap();

    queue.add(Task::new("x", 5).with_id("x")).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    queue.add(Task::new("y", 5).with_id("y")).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    queue.add(Task::new("z", 7).with_id("z")).unwrap();

    let order: Vec<String> = queue.ready().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(order, vec!["z", "x", "y"]);
}

#[test]
fn test_cycle_rejection_leaves_queue_unchanged() {
    let dir = TempDir::new().unwrap();
    let queue = TaskQueue::open(dir.path().join("q.json")).unwrap();

    queue.add(Task::new("a", 5).with_id("a")).unwrap();
    queue
        .add(Task::new("b", 5).with_id("b").with_dependencies(vec!["a".into()]))
        .unwrap();

    let mut a = queue.get("a").unwrap();
    a.dependencies = vec!["b".to_string()];
    assert!(queue.update(a).is_err());

    assert!(queue.get("a").unwrap().dependencies.is_empty());

    // Reopen to prove the rejected edit never touched disk
    drop(queue);
    let reopened = TaskQueue::open(dir.path().join("q.json")).unwrap();
    assert!(reopened.get("a").unwrap().dependencies.is_empty());
}

#[test]
fn test_concurrent_claims_are_exclusive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("q.json");

    let setup = TaskQueue::open(&path).unwrap();
    for i in 0..4 {
        setup.add(Task::new(format!("task {}", i), 5).with_id(format!("t{}", i))).unwrap();
    }
    drop(setup);

    let claim_all = |worker: String| {
        let path = path.clone();
        std::thread::spawn(move || {
            let queue = TaskQueue::open(&path).unwrap();
            let mut claimed = Vec::new();
            loop {
                match queue.claim(&worker).unwrap() {
                    Some(task) => {
                        claimed.push(task.id.clone());
                        // Release so the idempotent re-claim hands out the next one
                        queue.update_status(&task.id, TaskStatus::Completed).unwrap();
                    }
                    None => break,
                }
            }
            claimed
        })
    };

    let a = claim_all("worker-a".to_string());
    let b = claim_all("worker-b".to_string());
    let mut all: Vec<String> = a.join().unwrap();
    all.extend(b.join().unwrap());

    // Every task claimed exactly once across both claimers
    all.sort();
    assert_eq!(all, vec!["t0", "t1", "t2", "t3"]);
}

// =============================================================================
// Coordinator tests
// =============================================================================

#[tokio::test]
async fn test_coordinator_bring_up_and_shutdown() {
    let repo_dir = TempDir::new().unwrap();
    let queue_dir = TempDir::new().unwrap();
    Repository::init(repo_dir.path(), "main").await.unwrap();

    let coordinator = Coordinator::new(fast_config(&repo_dir, &queue_dir, "true")).await.unwrap();
    assert!(repo_dir.path().join(".worktrees/worker-0").exists());

    coordinator.start().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    coordinator.shutdown().await.unwrap();

    // Worktrees are torn down
    assert!(!repo_dir.path().join(".worktrees/worker-0").exists());

    // A final worker-state snapshot was written
    let state = codeswarm::state::WorkerStateStore::open(queue_dir.path().join("workers.json")).unwrap();
    let workers = state.load().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].worker_id, "worker-0");
}

#[tokio::test]
async fn test_coordinator_bring_up_failure_cleans_worktrees() {
    let repo_dir = TempDir::new().unwrap();
    let queue_dir = TempDir::new().unwrap();
    Repository::init(repo_dir.path(), "main").await.unwrap();

    let mut config = fast_config(&repo_dir, &queue_dir, "true");
    config.num_workers = 2;
    config.base_branch = "no-such-branch".to_string();

    assert!(Coordinator::new(config).await.is_err());
    assert!(!repo_dir.path().join(".worktrees/worker-0").exists());
    assert!(!repo_dir.path().join(".worktrees/worker-1").exists());
}

#[tokio::test]
async fn test_coordinator_resets_orphans_at_bring_up() {
    let repo_dir = TempDir::new().unwrap();
    let queue_dir = TempDir::new().unwrap();
    Repository::init(repo_dir.path(), "main").await.unwrap();

    let queue_path = queue_dir.path().join("tasks.json");
    {
        // A previous run died mid-task
        let queue = TaskQueue::open(&queue_path).unwrap();
        queue.add(Task::new("one", 5).with_id("one")).unwrap();
        queue.add(Task::new("two", 5).with_id("two")).unwrap();
        queue.claim("worker-0").unwrap().unwrap();
        queue.claim("worker-1").unwrap().unwrap();
    }

    let coordinator = Coordinator::new(fast_config(&repo_dir, &queue_dir, "true")).await.unwrap();

    for task in coordinator.queue().list().unwrap() {
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assignee.is_empty());
    }

    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_end_to_end_task_execution_and_merge() {
    let repo_dir = TempDir::new().unwrap();
    let queue_dir = TempDir::new().unwrap();
    Repository::init(repo_dir.path(), "main").await.unwrap();

    // The "assistant" writes a file into its workspace; the merge must carry
    // it to trunk
    let config = fast_config(&repo_dir, &queue_dir, "echo done > result.txt");
    let coordinator = Arc::new(Coordinator::new(config).await.unwrap());

    let task = coordinator
        .queue()
        .add(Task::new("produce result.txt", 5).with_id("produce"))
        .unwrap();

    coordinator.start().unwrap();

    let completed = wait_for_status(coordinator.queue(), &task.id, TaskStatus::Completed, Duration::from_secs(20)).await;
    assert!(completed, "task should complete and merge");

    assert!(repo_dir.path().join("result.txt").exists(), "merged work reaches trunk");

    // The worker is reusable afterwards
    let statuses = coordinator.worker_statuses();
    assert!(statuses[0].current_task.is_none());

    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_task_records_error() {
    let repo_dir = TempDir::new().unwrap();
    let queue_dir = TempDir::new().unwrap();
    Repository::init(repo_dir.path(), "main").await.unwrap();

    // Non-retryable failure signature, exits non-zero
    let config = fast_config(&repo_dir, &queue_dir, "echo 'syntax error: bad token' >&2; exit 2");
    let coordinator = Arc::new(Coordinator::new(config).await.unwrap());

    let task = coordinator
        .queue()
        .add(Task::new("doomed work", 5).with_id("doomed"))
        .unwrap();

    coordinator.start().unwrap();

    let failed = wait_for_status(coordinator.queue(), &task.id, TaskStatus::Failed, Duration::from_secs(20)).await;
    assert!(failed, "task should fail permanently");

    let stored = coordinator.queue().get("doomed").unwrap();
    assert!(!stored.last_error.is_empty());

    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retryable_failure_retries_and_succeeds() {
    let repo_dir = TempDir::new().unwrap();
    let queue_dir = TempDir::new().unwrap();
    Repository::init(repo_dir.path(), "main").await.unwrap();

    // First run fails with a retryable signature; the second finds the
    // marker and succeeds
    let mut config = fast_config(
        &repo_dir,
        &queue_dir,
        "[ -f marker ] || { touch marker; echo connection refused >&2; exit 1; }",
    );
    config.retry = codeswarm::retry::RetryConfig {
        initial_delay: Duration::from_millis(200),
        ..codeswarm::retry::RetryConfig::default()
    };

    let coordinator = Arc::new(Coordinator::new(config).await.unwrap());
    coordinator
        .queue()
        .add(Task::new("flaky work", 5).with_id("flaky"))
        .unwrap();

    coordinator.start().unwrap();

    let completed = wait_for_status(coordinator.queue(), "flaky", TaskStatus::Completed, Duration::from_secs(30)).await;
    assert!(completed, "task should succeed on retry");

    let stored = coordinator.queue().get("flaky").unwrap();
    assert_eq!(stored.retry_count, 1);
    assert!(stored.last_error.contains("network or temporary failure"));

    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blocked_task_waits_for_dependency() {
    let repo_dir = TempDir::new().unwrap();
    let queue_dir = TempDir::new().unwrap();
    Repository::init(repo_dir.path(), "main").await.unwrap();

    let config = fast_config(&repo_dir, &queue_dir, "true");
    let coordinator = Arc::new(Coordinator::new(config).await.unwrap());

    coordinator.queue().add(Task::new("first", 5).with_id("first")).unwrap();
    coordinator
        .queue()
        .add(Task::new("second", 9).with_id("second").with_dependencies(vec!["first".into()]))
        .unwrap();

    coordinator.start().unwrap();

    // Despite higher priority, "second" cannot run before "first" completes
    let both_done = wait_for_status(coordinator.queue(), "second", TaskStatus::Completed, Duration::from_secs(30)).await;
    assert!(both_done);

    let first = coordinator.queue().get("first").unwrap();
    let second = coordinator.queue().get("second").unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    assert!(first.updated_at <= second.updated_at);

    coordinator.shutdown().await.unwrap();
}
