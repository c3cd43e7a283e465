//! A single concurrent execution unit: one workspace, one task at a time.

mod executor;

pub use executor::{AssistantExecutor, ExecutionOutput};

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::{Detector, ErrorDetails, ErrorKind, RiskLevel, assess_risk};
use crate::domain::{Task, WorkerState, WorkerStatus};
use crate::git::Worktree;

/// Failure modes of one task execution, driving the retry decision.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The pre-execution risk gate refused the task outright.
    #[error("task blocked by risk gate: {0}")]
    Blocked(String),

    /// Transient failure; the caller may retry with backoff.
    #[error("retryable execution failure: {}", .details.message)]
    Retryable { details: ErrorDetails },

    /// Permanent failure; retrying cannot help.
    #[error("permanent execution failure: {}", .details.message)]
    Permanent { details: ErrorDetails },
}

impl ExecutionError {
    pub fn details(&self) -> Option<&ErrorDetails> {
        match self {
            Self::Blocked(_) => None,
            Self::Retryable { details } | Self::Permanent { details } => Some(details),
        }
    }
}

/// One worker: an isolated worktree, a detector over its output, and a
/// mutex-protected status record with an optimistic version counter.
pub struct Worker {
    id: String,
    index: usize,
    worktree: Worktree,
    executor: AssistantExecutor,
    status: Mutex<WorkerStatus>,
    detector: Mutex<Detector>,
    /// True while the assistant process is in flight; the monitor must not
    /// treat ambient silence as a completion edge before it clears.
    executing: AtomicBool,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(index: usize, worktree: Worktree, executor: AssistantExecutor, cancel: CancellationToken) -> Self {
        let id = format!("worker-{}", index);
        Self {
            status: Mutex::new(WorkerStatus::new(&id)),
            id,
            index,
            worktree,
            executor,
            detector: Mutex::new(Detector::new()),
            executing: AtomicBool::new(false),
            cancel,
        }
    }

    /// Whether an assistant process is currently in flight.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn worktree(&self) -> &Worktree {
        &self.worktree
    }

    /// Snapshot of the status record.
    pub fn status(&self) -> WorkerStatus {
        self.status.lock().unwrap().clone()
    }

    /// True iff the worker is idle with no task bound.
    pub fn is_idle(&self) -> bool {
        let status = self.status.lock().unwrap();
        status.state == WorkerState::Idle && status.current_task.is_none()
    }

    /// Run `f` against the locked status record.
    pub fn with_status<R>(&self, f: impl FnOnce(&mut WorkerStatus) -> R) -> R {
        let mut status = self.status.lock().unwrap();
        f(&mut status)
    }

    /// Feed newly captured scrollback to the detector.
    pub fn analyze_capture(&self, output: &str) -> WorkerState {
        self.detector.lock().unwrap().analyze(output)
    }

    /// Last `n` lines the detector has retained.
    pub fn recent_output(&self, n: usize) -> String {
        self.detector.lock().unwrap().recent_output(n)
    }

    /// Auto-confirmation decision over the current window.
    pub fn should_confirm(&self) -> crate::analyzer::ConfirmDecision {
        self.detector.lock().unwrap().should_confirm()
    }

    /// Classify the most recent output region into the error taxonomy.
    pub fn classify_recent_error(&self) -> ErrorDetails {
        let detector = self.detector.lock().unwrap();
        let recent = detector.recent_output(50);
        detector.classify_error(&recent)
    }

    pub fn confirm_stats(&self) -> crate::analyzer::ConfirmStats {
        self.detector.lock().unwrap().confirm_stats()
    }

    /// Whether a pending confirmation prompt has exceeded its timeout.
    pub fn confirm_timed_out(&self) -> bool {
        self.detector.lock().unwrap().confirm_timed_out()
    }

    /// Execute one claimed task to completion of the assistant process.
    ///
    /// The risk gate runs first: a Critical description never reaches the
    /// assistant. On success the worker stays Working with the task bound —
    /// the monitor loop owns the completion edge and the merge. On failure
    /// the worker transitions to Error for the rescue loop to disposition.
    pub async fn execute(&self, task: &Task) -> Result<ExecutionOutput, ExecutionError> {
        if assess_risk(&task.description) == RiskLevel::Critical {
            warn!(worker = %self.id, task = %task.id, "Risk gate refused task");
            return Err(ExecutionError::Blocked(
                "critical risk operation in task description".to_string(),
            ));
        }

        self.with_status(|s| {
            s.current_task = Some(task.clone());
            s.transition(WorkerState::Working);
        });

        info!(worker = %self.id, task = %task.id, "Executing task");

        self.executing.store(true, Ordering::Release);
        let result = self.executor.run(&task.description, &self.cancel).await;

        // The flag drops only after the outcome is reflected in the status
        // record, so the monitor cannot read a failed run as a completion
        // edge in the gap.
        match result {
            Ok(out) => {
                self.detector.lock().unwrap().analyze(&out.output);

                if out.success {
                    debug!(worker = %self.id, task = %task.id, duration = ?out.duration, "Assistant exited cleanly");
                    self.executing.store(false, Ordering::Release);
                    Ok(out)
                } else {
                    let details = {
                        let d = self.detector.lock().unwrap();
                        d.classify_error(&out.output)
                    };
                    self.with_status(|s| s.transition(WorkerState::Error));
                    self.executing.store(false, Ordering::Release);

                    warn!(worker = %self.id, task = %task.id, kind = ?details.kind, "Assistant exited non-zero");
                    if details.kind == ErrorKind::Retryable {
                        Err(ExecutionError::Retryable { details })
                    } else {
                        Err(ExecutionError::Permanent { details })
                    }
                }
            }
            Err(e) => {
                self.with_status(|s| s.transition(WorkerState::Error));
                self.executing.store(false, Ordering::Release);
                let message = e.to_string();

                if message.contains("cancelled") {
                    Err(ExecutionError::Permanent {
                        details: ErrorDetails {
                            kind: ErrorKind::NonRetryable,
                            message,
                            context: String::new(),
                        },
                    })
                } else {
                    // Timeout and transport failures are worth another attempt
                    Err(ExecutionError::Retryable {
                        details: ErrorDetails {
                            kind: ErrorKind::Retryable,
                            message,
                            context: self.recent_output(50),
                        },
                    })
                }
            }
        }
    }

    /// Cancel any in-flight execution. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
