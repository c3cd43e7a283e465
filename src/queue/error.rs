//! Queue error taxonomy.

/// Errors surfaced by queue operations. Validation failures report
/// synchronously with no mutation; persistence failures leave the last
/// committed document in place.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("cyclic dependency detected for task {0}")]
    CycleDetected(String),

    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    #[error("task not found: {0}")]
    UnknownTask(String),

    #[error("task description cannot be empty")]
    EmptyDescription,

    #[error("queue persistence failed: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("queue file corrupt: {0}")]
    Corrupt(String),
}
