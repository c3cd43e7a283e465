//! Coordinator: bring-up, the scheduler/monitor/rescue loops, trunk merges,
//! and shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use eyre::{Result, WrapErr, eyre};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyzer::ErrorKind;
use crate::domain::{Task, TaskStatus, WorkerState, WorkerStatus};
use crate::git::{MergeError, MergeManager, Repository, Worktree, WorktreeConfig, WorktreeManager};
use crate::queue::TaskQueue;
use crate::retry::RetryPolicy;
use crate::session::{HeadlessHost, SessionHost, TmuxHost};
use crate::state::WorkerStateStore;
use crate::util::disk;
use crate::worker::{AssistantExecutor, ExecutionError, Worker};

use super::CoordinatorConfig;

/// Consecutive liveness failures before the coordinator gives up on the
/// session host.
const MAX_SESSION_DEAD_CHECKS: u32 = 3;

/// Tick of the worker-state persister loop.
const PERSIST_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// Optional collaborator that resolves merge conflicts in the trunk
/// checkout. The built-in behavior without one is abort-and-propagate.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// Resolve the listed conflicts in the trunk working tree. On success
    /// the coordinator stages and commits the resolution.
    async fn resolve(&self, repo: &Repository, branch: &str, conflicts: &[String]) -> Result<()>;
}

/// Shared state every loop needs; cheap to clone.
#[derive(Clone)]
struct Ctx {
    config: CoordinatorConfig,
    queue: Arc<TaskQueue>,
    repo: Repository,
    worktrees: Arc<WorktreeManager>,
    workers: Arc<Vec<Arc<Worker>>>,
    host: Arc<dyn SessionHost>,
    retry: RetryPolicy,
    merge_mutex: Arc<Mutex<()>>,
    resolver: Option<Arc<dyn ConflictResolver>>,
    /// Tasks sitting out a retry backoff. They stay in_progress in the queue
    /// until the timer flips them to pending, and the scheduler must not
    /// re-dispatch them through the idempotent re-claim in the meantime.
    deferred: Arc<StdMutex<HashSet<String>>>,
    state: Option<Arc<WorkerStateStore>>,
    cancel: CancellationToken,
}

/// Orchestrates N workers against one queue and one trunk.
pub struct Coordinator {
    ctx: Ctx,
    task_slots: Vec<mpsc::Sender<Task>>,
    slot_receivers: StdMutex<Vec<Option<mpsc::Receiver<Task>>>>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Bring up the swarm: open the queue, create one worktree and worker
    /// per slot, reset orphans from a previous run.
    ///
    /// On any per-worker failure every already-created worktree is removed
    /// before the error returns.
    pub async fn new(config: CoordinatorConfig) -> Result<Self> {
        Self::with_resolver(config, None).await
    }

    /// Like [`new`], with an optional merge-conflict resolver.
    pub async fn with_resolver(
        config: CoordinatorConfig,
        resolver: Option<Arc<dyn ConflictResolver>>,
    ) -> Result<Self> {
        if config.num_workers == 0 {
            return Err(eyre!("at least one worker is required"));
        }

        let repo = Repository::open(&config.repo_path)
            .await
            .wrap_err("failed to open trunk repository")?;

        let queue = Arc::new(TaskQueue::open(&config.queue_path).wrap_err("failed to open task queue")?);

        let worktrees = Arc::new(WorktreeManager::new(
            repo.clone(),
            WorktreeConfig {
                base_branch: config.base_branch.clone(),
                ..WorktreeConfig::default()
            },
        ));

        let state = match &config.state_path {
            Some(path) => Some(Arc::new(
                WorkerStateStore::open(path).wrap_err("failed to open worker-state store")?,
            )),
            None => None,
        };

        let host: Arc<dyn SessionHost> = match &config.session {
            Some(name) => Arc::new(
                TmuxHost::create(name, config.num_workers)
                    .await
                    .wrap_err("failed to create session host")?,
            ),
            None => Arc::new(HeadlessHost),
        };

        let cancel = CancellationToken::new();
        let mut workers = Vec::with_capacity(config.num_workers);
        let mut task_slots = Vec::with_capacity(config.num_workers);
        let mut slot_receivers = Vec::with_capacity(config.num_workers);

        for index in 0..config.num_workers {
            let worker_id = format!("worker-{}", index);
            let worktree = match worktrees.create(&worker_id).await {
                Ok(wt) => wt,
                Err(e) => {
                    // Roll back the partial bring-up
                    for created in 0..index {
                        let _ = worktrees.remove(&format!("worker-{}", created)).await;
                    }
                    let _ = host.shutdown().await;
                    return Err(eyre!(e)).wrap_err(format!("failed to create worktree for {}", worker_id));
                }
            };

            let executor = AssistantExecutor::new(&config.assistant_command, &worktree.path, config.execute_timeout);
            let worker = Arc::new(Worker::new(index, worktree, executor, cancel.child_token()));

            let (tx, rx) = mpsc::channel::<Task>(1);
            task_slots.push(tx);
            slot_receivers.push(Some(rx));
            workers.push(worker);
        }

        // Orphans from a previous run go back to the pool before any claim
        let reset = queue.reset_orphans().wrap_err("failed to reset orphaned tasks")?;
        if !reset.is_empty() {
            info!(count = reset.len(), "Recovered orphaned tasks from previous run");
        }

        info!(
            workers = config.num_workers,
            repo = %config.repo_path.display(),
            queue = %config.queue_path.display(),
            "Coordinator ready"
        );

        Ok(Self {
            ctx: Ctx {
                retry: RetryPolicy::new(config.retry.clone()),
                config,
                queue,
                repo,
                worktrees,
                workers: Arc::new(workers),
                host,
                merge_mutex: Arc::new(Mutex::new(())),
                resolver,
                deferred: Arc::new(StdMutex::new(HashSet::new())),
                state,
                cancel,
            },
            task_slots,
            slot_receivers: StdMutex::new(slot_receivers),
            handles: StdMutex::new(Vec::new()),
        })
    }

    /// Start every loop. Idempotent only in the sense that a second call is
    /// rejected.
    pub fn start(&self) -> Result<()> {
        let mut receivers = self.slot_receivers.lock().unwrap();
        if receivers.iter().all(|r| r.is_none()) {
            return Err(eyre!("coordinator already started"));
        }

        let mut handles = self.handles.lock().unwrap();

        // Scheduler loop
        {
            let ctx = self.ctx.clone();
            let slots = self.task_slots.clone();
            handles.push(self.supervise("scheduler", None, async move {
                ctx.scheduler_loop(slots).await;
            }));
        }

        // Rescue loop
        {
            let ctx = self.ctx.clone();
            handles.push(self.supervise("rescue", None, async move {
                ctx.rescue_loop().await;
            }));
        }

        // Worker-state persister
        if self.ctx.state.is_some() {
            let ctx = self.ctx.clone();
            handles.push(self.supervise("persister", None, async move {
                ctx.persister_loop().await;
            }));
        }

        // Per-worker monitor and executor loops
        for (index, worker) in self.ctx.workers.iter().enumerate() {
            let rx = receivers[index].take().expect("slot receiver present before start");

            let ctx = self.ctx.clone();
            let w = worker.clone();
            handles.push(self.supervise("executor", Some(worker.clone()), async move {
                ctx.executor_loop(w, rx).await;
            }));

            let ctx = self.ctx.clone();
            let w = worker.clone();
            handles.push(self.supervise("monitor", Some(worker.clone()), async move {
                ctx.monitor_loop(w).await;
            }));
        }

        info!("All coordinator loops started");
        Ok(())
    }

    /// Run until cancelled (externally or by session death), then shut down.
    pub async fn run_to_completion(&self) -> Result<()> {
        self.start()?;
        self.ctx.cancel.cancelled().await;
        self.shutdown().await
    }

    /// Cancel all loops, wait bounded for them to drain, reset orphans,
    /// tear down worktrees, release the session.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Coordinator shutting down");
        self.ctx.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.ctx.config.shutdown_grace, drain).await.is_err() {
            warn!(grace = ?self.ctx.config.shutdown_grace, "Timed out draining loops, forcing shutdown");
        }

        // Final worker-state snapshot
        if let Some(state) = &self.ctx.state {
            let statuses = self.worker_statuses();
            if let Err(e) = state.update(&statuses) {
                warn!(error = %e, "Failed to save final worker state");
            }
        }

        match self.ctx.queue.reset_orphans() {
            Ok(reset) if !reset.is_empty() => info!(count = reset.len(), "Reset orphaned tasks"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to reset orphaned tasks"),
        }

        for worker in self.ctx.workers.iter() {
            if let Err(e) = self.ctx.worktrees.remove(worker.id()).await {
                warn!(worker = %worker.id(), error = %e, "Failed to remove worktree");
            }
        }

        if let Err(e) = self.ctx.host.shutdown().await {
            warn!(error = %e, "Failed to shut down session host");
        }

        info!("Coordinator stopped");
        Ok(())
    }

    /// Token observers can use to notice coordinator death.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.ctx.queue
    }

    /// Status snapshot of every worker.
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.ctx.workers.iter().map(|w| w.status()).collect()
    }

    /// Spawn a loop under a watchdog: a panic is logged, the worker's task
    /// (if any) goes back to pending, and the rest of the swarm keeps going.
    fn supervise(
        &self,
        name: &'static str,
        worker: Option<Arc<Worker>>,
        fut: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> JoinHandle<()> {
        let queue = self.ctx.queue.clone();
        tokio::spawn(async move {
            let inner = tokio::spawn(fut);
            if let Err(join_err) = inner.await {
                if join_err.is_panic() {
                    error!(loop_name = name, "Coordinator loop panicked");
                    if let Some(worker) = worker {
                        let taken = worker.with_status(|s| s.current_task.take());
                        if let Some(task) = taken {
                            worker.with_status(|s| s.transition(WorkerState::Idle));
                            if let Err(e) = queue.update_status(&task.id, TaskStatus::Pending) {
                                warn!(task = %task.id, error = %e, "Failed to reset task after panic");
                            }
                        }
                    }
                }
            }
        })
    }
}

impl Ctx {
    /// Claim tasks for idle workers and offer them to the single-slot
    /// channels. A full slot reverts the claim immediately.
    async fn scheduler_loop(&self, slots: Vec<mpsc::Sender<Task>>) {
        let mut tick = tokio::time::interval(self.config.scheduler_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Scheduler loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Scheduler loop stopped");
                    return;
                }
                _ = tick.tick() => {}
            }

            for (worker, slot) in self.workers.iter().zip(&slots) {
                if !worker.is_idle() {
                    continue;
                }

                let task = match self.queue.claim(worker.id()) {
                    Ok(Some(task)) => task,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(worker = %worker.id(), error = %e, "Claim failed");
                        continue;
                    }
                };

                // An unreleased claim re-issued while its retry backoff runs
                // is not dispatchable yet
                if self.deferred.lock().unwrap().contains(&task.id) {
                    continue;
                }

                // Bind before offering so a second tick cannot double-claim
                worker.with_status(|s| s.current_task = Some(task.clone()));

                match slot.try_send(task.clone()) {
                    Ok(()) => {
                        info!(task = %task.id, worker = %worker.id(), "Assigned task");
                    }
                    Err(_) => {
                        // Slot full or executor gone; put the task back
                        worker.with_status(|s| s.current_task = None);
                        if let Err(e) = self.queue.update_status(&task.id, TaskStatus::Pending) {
                            warn!(task = %task.id, error = %e, "Failed to revert unsent task");
                        }
                    }
                }
            }
        }
    }

    /// Serve the worker's single-slot channel.
    async fn executor_loop(&self, worker: Arc<Worker>, mut rx: mpsc::Receiver<Task>) {
        debug!(worker = %worker.id(), "Executor loop started");
        loop {
            let task = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(worker = %worker.id(), "Executor loop stopped");
                    return;
                }
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => return,
                },
            };

            match worker.execute(&task).await {
                // Success leaves the worker Working with the task bound; the
                // monitor loop owns the completion edge and the merge.
                Ok(_) => {}
                Err(ExecutionError::Blocked(reason)) => {
                    warn!(task = %task.id, worker = %worker.id(), %reason, "Task refused by risk gate");
                    self.fail_task(&worker, &task.id, &reason);
                }
                Err(err) => {
                    let (kind, message) = match err.details() {
                        Some(d) => (d.kind, d.message.clone()),
                        None => (ErrorKind::Unknown, err.to_string()),
                    };
                    self.disposition_failure(&worker, kind, &message);
                }
            }
        }
    }

    /// Watch one worker: session liveness, scrollback analysis, state
    /// bookkeeping, and the task-completion edge.
    async fn monitor_loop(&self, worker: Arc<Worker>) {
        let mut tick = tokio::time::interval(self.config.monitor_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut session_dead = 0u32;
        debug!(worker = %worker.id(), "Monitor loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(worker = %worker.id(), "Monitor loop stopped");
                    return;
                }
                _ = tick.tick() => {}
            }

            if !self.host.is_alive().await {
                session_dead += 1;
                warn!(
                    worker = %worker.id(),
                    checks = session_dead,
                    max = MAX_SESSION_DEAD_CHECKS,
                    "Session host unreachable"
                );
                if session_dead >= MAX_SESSION_DEAD_CHECKS {
                    error!("Session host dead, cancelling coordinator");
                    self.cancel.cancel();
                    return;
                }
                continue;
            }
            session_dead = 0;

            let capture = match self.host.capture(worker.index()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(worker = %worker.id(), error = %e, "Capture failed");
                    continue;
                }
            };

            let detected = worker.analyze_capture(&capture);
            let (prev_state, current_task, version) =
                worker.with_status(|s| (s.state, s.current_task.clone(), s.version));

            // Completion edge: the assistant process has exited and the
            // scrollback settled into idle (or a trailing prompt). A worker
            // that went through WaitingConfirm and then saw its assistant
            // exit also completes once the window quiets down.
            let completed = current_task.is_some()
                && !worker.is_executing()
                && match (prev_state, detected) {
                    (WorkerState::Working, WorkerState::Idle | WorkerState::WaitingConfirm) => true,
                    (WorkerState::WaitingConfirm, WorkerState::Idle) => true,
                    _ => false,
                };

            if completed {
                let task = current_task.expect("checked above");
                info!(worker = %worker.id(), task = %task.id, "Task completion detected, merging");

                // The merge serializes on the trunk mutex; the status lock is
                // not held across it, so the version snapshot is revalidated
                // afterwards.
                let merge_result = self.merge_worker(&worker).await;

                let recent = worker.recent_output(10);
                let still_valid = worker.with_status(|s| {
                    let valid = s.version == version
                        && s.current_task.as_ref().map(|t| t.id == task.id).unwrap_or(false);
                    if valid {
                        s.current_task = None;
                        s.output = recent.clone();
                        s.transition(WorkerState::Idle);
                    }
                    valid
                });

                if !still_valid {
                    // A competing writer moved the worker on; the queue-side
                    // outcome below is still authoritative.
                    warn!(worker = %worker.id(), task = %task.id, "Worker state changed during merge");
                }

                match merge_result {
                    Ok(()) => {
                        info!(task = %task.id, "Merge complete, task done");
                        if let Err(e) = self.queue.update_status(&task.id, TaskStatus::Completed) {
                            warn!(task = %task.id, error = %e, "Failed to mark task completed");
                        }
                    }
                    Err(e) => {
                        warn!(task = %task.id, error = %e, "Merge failed");
                        self.record_failure(&task.id, &format!("merge failed: {}", e));
                    }
                }
                continue;
            }

            worker.with_status(|s| {
                // Ambient silence while the assistant is in flight is not
                // idleness
                let downgrade = worker.is_executing()
                    && s.state == WorkerState::Working
                    && matches!(detected, WorkerState::Idle | WorkerState::Stuck);
                if !downgrade && s.state != detected {
                    debug!(worker = %s.worker_id, from = %s.state, to = %detected, "State change");
                    s.transition(detected);
                }
                s.output = worker.recent_output(10);
            });
        }
    }

    /// Apply auto-confirmation and retry policy outside the claim/dispatch
    /// path.
    async fn rescue_loop(&self) {
        let mut tick = tokio::time::interval(self.config.rescue_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Rescue loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Rescue loop stopped");
                    return;
                }
                _ = tick.tick() => {}
            }

            for worker in self.workers.iter() {
                let state = worker.with_status(|s| s.state);

                match state {
                    WorkerState::WaitingConfirm => {
                        let decision = worker.should_confirm();
                        if decision.confirm {
                            match self.host.send_line(worker.index(), &decision.input).await {
                                Ok(()) => info!(
                                    worker = %worker.id(),
                                    input = %decision.input,
                                    risk = %decision.risk,
                                    "Auto-confirmed prompt"
                                ),
                                Err(e) => warn!(worker = %worker.id(), error = %e, "Failed to inject confirmation"),
                            }
                        } else {
                            warn!(
                                worker = %worker.id(),
                                risk = %decision.risk,
                                reason = %decision.reason,
                                timed_out = worker.confirm_timed_out(),
                                "Confirmation blocked, operator input required"
                            );
                        }
                    }
                    WorkerState::Error => {
                        if worker.is_executing() {
                            // The executor owns failures of in-flight runs
                            continue;
                        }
                        let has_task = worker.with_status(|s| s.current_task.is_some());
                        if has_task {
                            let details = worker.classify_recent_error();
                            self.disposition_failure(worker, details.kind, &details.message);
                        } else {
                            debug!(worker = %worker.id(), "Error state with no task");
                        }
                    }
                    WorkerState::Stuck => {
                        warn!(worker = %worker.id(), "Worker appears stuck");
                    }
                    _ => {}
                }
            }
        }
    }

    /// Periodically snapshot every worker's status to the state store.
    async fn persister_loop(&self) {
        let Some(state) = self.state.clone() else { return };
        let mut tick = tokio::time::interval(PERSIST_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tick.tick() => {}
            }

            let statuses: Vec<WorkerStatus> = self.workers.iter().map(|w| w.status()).collect();
            if let Err(e) = state.update(&statuses) {
                warn!(error = %e, "Failed to persist worker state");
            }
        }
    }

    /// Retry decision for a failed task. Exactly one caller wins the task
    /// via the atomic take; the loser sees no bound task and does nothing.
    fn disposition_failure(&self, worker: &Arc<Worker>, kind: ErrorKind, message: &str) {
        let Some(task) = worker.with_status(|s| {
            let taken = s.current_task.take();
            if taken.is_some() {
                s.transition(WorkerState::Idle);
            }
            taken
        }) else {
            return;
        };

        let mut stored = match self.queue.get(&task.id) {
            Ok(t) => t,
            Err(e) => {
                warn!(task = %task.id, error = %e, "Failed task vanished from queue");
                return;
            }
        };

        if self.retry.should_retry(&stored, kind) {
            stored.retry_count += 1;
            stored.last_error = message.to_string();
            let delay = self.retry.delay_for(stored.retry_count - 1);

            if let Err(e) = self.queue.update(stored.clone()) {
                warn!(task = %task.id, error = %e, "Failed to record retry");
            }

            info!(
                task = %task.id,
                retry = stored.retry_count,
                max = stored.max_retries,
                ?delay,
                "Scheduling retry"
            );

            // Deferred transition back to pending; an interrupted timer is
            // covered by orphan reset at shutdown
            self.deferred.lock().unwrap().insert(task.id.clone());
            let queue = self.queue.clone();
            let cancel = self.cancel.clone();
            let deferred = self.deferred.clone();
            let task_id = task.id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        if let Err(e) = queue.update_status(&task_id, TaskStatus::Pending) {
                            warn!(task = %task_id, error = %e, "Failed to requeue for retry");
                        } else {
                            debug!(task = %task_id, "Requeued for retry");
                        }
                    }
                }
                deferred.lock().unwrap().remove(&task_id);
            });
        } else {
            info!(task = %task.id, kind = ?kind, "Task failed permanently");
            self.fail_task(worker, &task.id, message);
        }
    }

    /// Mark failed with the error recorded. The worker side is already (or
    /// gets) unbound.
    fn fail_task(&self, worker: &Arc<Worker>, task_id: &str, message: &str) {
        worker.with_status(|s| {
            if s.current_task.as_ref().map(|t| t.id == task_id).unwrap_or(false) {
                s.current_task = None;
                s.transition(WorkerState::Idle);
            }
        });
        self.record_failure(task_id, message);
    }

    fn record_failure(&self, task_id: &str, message: &str) {
        match self.queue.get(task_id) {
            Ok(mut task) => {
                task.last_error = message.to_string();
                task.status = TaskStatus::Failed;
                if let Err(e) = self.queue.update(task) {
                    warn!(task = %task_id, error = %e, "Failed to record failure");
                }
            }
            Err(e) => warn!(task = %task_id, error = %e, "Failed task vanished from queue"),
        }
    }

    /// Merge a worker's branch into trunk. All trunk mutations serialize on
    /// the merge mutex; the pre-merge commit is the rollback anchor.
    async fn merge_worker(&self, worker: &Arc<Worker>) -> Result<()> {
        let _guard = self.merge_mutex.lock().await;

        let worktree: &Worktree = worker.worktree();
        let branch = worktree.branch.clone();

        disk::ensure_space(self.repo.path(), self.config.min_free_bytes)
            .wrap_err("disk check before merge")?;

        // Anything the assistant left uncommitted rides along
        let wt_repo = Repository::at(&worktree.path);
        let committed = wt_repo
            .commit_all(&format!("{}: task work", worker.id()))
            .await
            .wrap_err("failed to commit worktree changes")?;
        if committed {
            debug!(worker = %worker.id(), "Auto-committed worktree changes");
        }

        self.repo
            .checkout(&self.config.base_branch)
            .await
            .wrap_err("failed to checkout base branch")?;

        let has_origin = self.repo.has_origin().await;
        if has_origin {
            match self.repo.try_run(&["pull", "origin", &self.config.base_branch]).await {
                Ok((true, _)) => debug!("Pulled latest base branch"),
                Ok((false, out)) => warn!(output = %out, "Pull failed, merging local state"),
                Err(e) => warn!(error = %e, "Pull failed, merging local state"),
            }
        }

        // Rollback anchor
        let anchor = self.repo.current_commit().await.wrap_err("failed to read trunk HEAD")?;

        let merger = MergeManager::new(self.repo.clone());
        match merger.merge_branch(&branch).await {
            Ok(outcome) => {
                info!(
                    %branch,
                    commit = %outcome.commit,
                    fast_forward = outcome.fast_forward,
                    "Merged worker branch"
                );
            }
            Err(MergeError::Conflict { conflicts }) => {
                warn!(%branch, ?conflicts, "Merge conflict");

                let Some(resolver) = &self.resolver else {
                    let _ = merger.abort().await;
                    return Err(eyre!("merge conflict in {}: {}", branch, conflicts.join(", ")));
                };

                if let Err(e) = resolver.resolve(&self.repo, &branch, &conflicts).await {
                    let _ = merger.abort().await;
                    return Err(e).wrap_err("conflict resolver failed");
                }

                // Commit the resolution; a failure here hard-resets trunk to
                // the anchor
                self.repo.run(&["add", "-A"]).await.wrap_err("failed to stage resolution")?;
                if let Err(e) = self.repo.run(&["commit", "--no-edit"]).await {
                    warn!(error = %e, %anchor, "Resolution commit failed, rolling back trunk");
                    if let Err(reset_err) = self.repo.reset_hard(&anchor).await {
                        error!(error = %reset_err, "Rollback to anchor failed");
                    }
                    return Err(e).wrap_err("failed to commit conflict resolution");
                }
                info!(%branch, "Conflict resolved and committed");
            }
            Err(e @ MergeError::Failed(_)) => {
                return Err(eyre!(e)).wrap_err("merge failed");
            }
        }

        if has_origin {
            match self.repo.try_run(&["push", "origin", &self.config.base_branch]).await {
                Ok((true, _)) => debug!("Pushed base branch"),
                Ok((false, out)) => warn!(output = %out, "Push failed"),
                Err(e) => warn!(error = %e, "Push failed"),
            }
        }

        self.worktrees
            .reset_to_base(worker.id())
            .await
            .wrap_err("failed to reset worker worktree onto trunk")?;

        Ok(())
    }
}
