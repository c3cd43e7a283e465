//! codeswarm - multi-worker coding-agent orchestrator
//!
//! An operator submits discrete development tasks; codeswarm dispatches each
//! one to a pool of N concurrent workers running an external coding
//! assistant, isolates every worker's filesystem mutations in a dedicated
//! git worktree on a per-worker branch, and merges completed work back to a
//! shared trunk with retries, conflict handling, and auto-confirmation of
//! the assistant's interactive prompts.
//!
//! # Modules
//!
//! - [`queue`] - durable, cross-process task queue with atomic claims
//! - [`scheduler`] - in-memory dependency DAG with cycle detection
//! - [`analyzer`] - output classification and the auto-confirm policy
//! - [`worker`] - one execution unit per concurrency slot
//! - [`coordinator`] - scheduler/monitor/rescue loops and trunk merges
//! - [`git`] - repository, worktree, and merge plumbing
//! - [`session`] - external process host (tmux or headless)
//! - [`state`] - persisted worker-state snapshots
//! - [`planning`] - adapter for an upstream planning model
//! - [`retry`] - backoff policy over the error taxonomy

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod git;
pub mod planning;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod util;
pub mod worker;

pub use analyzer::{ConfirmDecision, ConfirmStats, Detector, ErrorKind, RiskLevel};
pub use config::Config;
pub use coordinator::{ConflictResolver, Coordinator, CoordinatorConfig};
pub use domain::{Task, TaskStatus, WorkerState, WorkerStatus};
pub use planning::{AnalysisResult, ConversationLog, Message, ProgressReport, TaskSpec, import_analysis};
pub use queue::{ClearFilter, QueueError, TaskQueue};
pub use retry::{RetryConfig, RetryPolicy};
pub use scheduler::DagScheduler;
pub use session::{HeadlessHost, SessionHost, TmuxHost};
pub use state::{StateError, WorkerStateStore};
pub use worker::{AssistantExecutor, ExecutionError, Worker};
