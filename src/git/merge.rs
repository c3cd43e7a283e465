//! Branch merge mechanics with conflict surfacing.

use eyre::Result;
use tracing::{debug, warn};

use super::Repository;

/// Merge failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// The merge stopped on conflicts; trunk has been restored by the
    /// caller's rollback anchor before this is surfaced.
    #[error("merge conflict in {} file(s)", .conflicts.len())]
    Conflict { conflicts: Vec<String> },

    #[error("merge failed: {0}")]
    Failed(String),
}

/// Result of a completed merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub commit: String,
    pub fast_forward: bool,
}

/// Performs merges into the currently checked-out branch. Callers serialize;
/// the coordinator holds a process-wide mutex around every trunk mutation.
pub struct MergeManager {
    repo: Repository,
}

impl MergeManager {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Merge `branch` into the current branch: fast-forward when possible,
    /// otherwise a three-way merge with a canned message. On conflict the
    /// conflicted file list is captured and returned; the merge is left in
    /// place for a resolver (or an abort) to deal with.
    pub async fn merge_branch(&self, branch: &str) -> Result<MergeOutcome, MergeError> {
        let (ff_ok, _) = self
            .repo
            .try_run(&["merge", "--ff-only", branch])
            .await
            .map_err(|e| MergeError::Failed(e.to_string()))?;

        if ff_ok {
            debug!(%branch, "Fast-forward merge");
            let commit = self
                .repo
                .current_commit()
                .await
                .map_err(|e| MergeError::Failed(e.to_string()))?;
            return Ok(MergeOutcome {
                commit,
                fast_forward: true,
            });
        }

        let message = format!("Merge branch '{}'", branch);
        let (ok, output) = self
            .repo
            .try_run(&["merge", "--no-ff", "-m", &message, branch])
            .await
            .map_err(|e| MergeError::Failed(e.to_string()))?;

        if !ok {
            if output.contains("CONFLICT") || output.contains("Automatic merge failed") {
                let conflicts = self.repo.conflicted_files().await.unwrap_or_default();
                warn!(%branch, ?conflicts, "Merge conflict");
                return Err(MergeError::Conflict { conflicts });
            }
            return Err(MergeError::Failed(output));
        }

        let commit = self
            .repo
            .current_commit()
            .await
            .map_err(|e| MergeError::Failed(e.to_string()))?;
        debug!(%branch, %commit, "Three-way merge");
        Ok(MergeOutcome {
            commit,
            fast_forward: false,
        })
    }

    /// Abort an in-progress merge.
    pub async fn abort(&self) -> Result<()> {
        self.repo.run(&["merge", "--abort"]).await.map(|_| ())
    }
}
