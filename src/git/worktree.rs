//! Per-worker git worktrees.
//!
//! Each worker owns `<repo>/.worktrees/worker-<i>` checked out on
//! `worker-<i>-branch`, created from the configured base branch at bring-up
//! and destroyed at teardown.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::{info, warn};

use super::Repository;

/// Error taxonomy for worktree operations.
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("worktree already exists: {0}")]
    AlreadyExists(String),

    #[error("worktree not found: {0}")]
    NotFound(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for worktree placement and branching.
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// Directory under the repository root that holds the worktrees.
    pub root_dir: String,
    /// Branch the per-worker branches fork from.
    pub base_branch: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            root_dir: ".worktrees".to_string(),
            base_branch: "main".to_string(),
        }
    }
}

/// A created worktree.
#[derive(Debug, Clone)]
pub struct Worktree {
    pub worker_id: String,
    pub path: PathBuf,
    pub branch: String,
}

/// Creates and destroys worker worktrees in one repository.
pub struct WorktreeManager {
    repo: Repository,
    config: WorktreeConfig,
}

impl WorktreeManager {
    pub fn new(repo: Repository, config: WorktreeConfig) -> Self {
        Self { repo, config }
    }

    pub fn base_branch(&self) -> &str {
        &self.config.base_branch
    }

    fn branch_name(&self, worker_id: &str) -> String {
        format!("{}-branch", worker_id)
    }

    fn worktree_path(&self, worker_id: &str) -> PathBuf {
        self.repo.path().join(&self.config.root_dir).join(worker_id)
    }

    /// Create `worker_id`'s worktree on its feature branch, based at the
    /// base branch.
    pub async fn create(&self, worker_id: &str) -> Result<Worktree, WorktreeError> {
        let path = self.worktree_path(worker_id);
        let branch = self.branch_name(worker_id);

        if path.exists() {
            return Err(WorktreeError::AlreadyExists(worker_id.to_string()));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = Command::new("git")
            .arg("-C")
            .arg(self.repo.path())
            .args(["worktree", "add", "-b", &branch])
            .arg(&path)
            .arg(&self.config.base_branch)
            .output()
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::CreateFailed(stderr.trim().to_string()));
        }

        info!(%worker_id, path = %path.display(), %branch, "Created worktree");

        Ok(Worktree {
            worker_id: worker_id.to_string(),
            path,
            branch,
        })
    }

    /// Remove the worktree and delete its branch. Absent worktrees are not
    /// an error (teardown after a partial bring-up).
    pub async fn remove(&self, worker_id: &str) -> Result<(), WorktreeError> {
        let path = self.worktree_path(worker_id);

        if !path.exists() {
            warn!(%worker_id, "Worktree already gone, skipping removal");
        } else {
            let output = Command::new("git")
                .arg("-C")
                .arg(self.repo.path())
                .args(["worktree", "remove", "--force"])
                .arg(&path)
                .output()
                .await
                .map_err(|e| WorktreeError::Git(e.to_string()))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.contains("is not a working tree") {
                    return Err(WorktreeError::RemoveFailed(stderr.trim().to_string()));
                }
            }
        }

        // Branch deletion is best-effort; it may never have been created
        let branch = self.branch_name(worker_id);
        let _ = Command::new("git")
            .arg("-C")
            .arg(self.repo.path())
            .args(["branch", "-D", &branch])
            .output()
            .await;

        info!(%worker_id, "Removed worktree");
        Ok(())
    }

    /// All worktrees under the configured root, parsed from
    /// `git worktree list --porcelain`.
    pub async fn list(&self) -> Result<Vec<Worktree>, WorktreeError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(self.repo.path())
            .args(["worktree", "list", "--porcelain"])
            .output()
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;

        if !output.status.success() {
            return Err(WorktreeError::Git(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let root = self.repo.path().join(&self.config.root_dir);

        let mut result = Vec::new();
        let mut current_path: Option<PathBuf> = None;
        let mut current_branch = String::new();

        for line in text.lines().chain(std::iter::once("")) {
            let line = line.trim();
            if line.is_empty() {
                if let Some(path) = current_path.take() {
                    if path.starts_with(&root) && !current_branch.is_empty() {
                        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                            result.push(Worktree {
                                worker_id: name.to_string(),
                                path,
                                branch: current_branch.clone(),
                            });
                        }
                    }
                }
                current_branch.clear();
            } else if let Some(p) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(p));
            } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
                current_branch = b.to_string();
            }
        }

        Ok(result)
    }

    /// Reset a worker's worktree hard onto the base branch tip.
    pub async fn reset_to_base(&self, worker_id: &str) -> Result<(), WorktreeError> {
        let path = self.worktree_path(worker_id);
        if !path.exists() {
            return Err(WorktreeError::NotFound(worker_id.to_string()));
        }

        let output = Command::new("git")
            .arg("-C")
            .arg(&path)
            .args(["reset", "--hard", &self.config.base_branch])
            .output()
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;

        if !output.status.success() {
            return Err(WorktreeError::Git(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    pub fn exists(&self, worker_id: &str) -> bool {
        self.worktree_path(worker_id).exists()
    }

    pub fn path_for(&self, worker_id: &str) -> PathBuf {
        self.worktree_path(worker_id)
    }
}
