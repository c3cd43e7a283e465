//! Thin wrapper over the `git` binary for repository-level queries.

use std::path::{Path, PathBuf};

use eyre::{Result, bail, eyre};
use tokio::process::Command;

/// Handle to an existing git repository.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
}

impl Repository {
    /// Open `path`, verifying it is a git work tree.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let output = Command::new("git")
            .args(["-C"])
            .arg(&path)
            .args(["rev-parse", "--is-inside-work-tree"])
            .output()
            .await?;

        if !output.status.success() {
            bail!("not a git repository: {}", path.display());
        }

        Ok(Self { path })
    }

    /// Handle without the work-tree check, for paths this process created
    /// itself (worktrees).
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a git subcommand in this repository, returning stdout on success.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Like [`run`] but tolerates failure, returning the combined result for
    /// the caller to inspect.
    pub async fn try_run(&self, args: &[&str]) -> Result<(bool, String)> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .output()
            .await?;

        let text = if output.status.success() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            // Diagnostics are split across both streams (e.g. merge
            // conflicts); hand callers everything
            let mut combined = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(stderr.trim());
            }
            combined
        };

        Ok((output.status.success(), text))
    }

    pub async fn current_branch(&self) -> Result<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    pub async fn current_commit(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"]).await
    }

    /// True when a remote named `origin` is configured.
    pub async fn has_origin(&self) -> bool {
        matches!(self.try_run(&["remote", "get-url", "origin"]).await, Ok((true, url)) if !url.is_empty())
    }

    pub async fn checkout(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", branch]).await.map(|_| ())
    }

    /// Hard reset to the given revision. Used for the merge rollback anchor.
    pub async fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run(&["reset", "--hard", rev]).await.map(|_| ())
    }

    /// Files currently in the unmerged state.
    pub async fn conflicted_files(&self) -> Result<Vec<String>> {
        let out = self.run(&["diff", "--name-only", "--diff-filter=U"]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(|l| l.to_string()).collect())
    }

    /// Stage everything and commit if anything is staged. Returns whether a
    /// commit was created.
    pub async fn commit_all(&self, message: &str) -> Result<bool> {
        self.run(&["add", "-A"]).await?;

        // diff-index exits non-zero when there is something to commit
        let (clean, _) = self.try_run(&["diff-index", "--quiet", "HEAD"]).await?;
        if clean {
            return Ok(false);
        }

        self.run(&["commit", "-m", message]).await?;
        Ok(true)
    }

    /// Resolve an arbitrary revision, None when it does not exist.
    pub async fn resolve(&self, rev: &str) -> Option<String> {
        self.try_run(&["rev-parse", rev])
            .await
            .ok()
            .and_then(|(ok, sha)| if ok && !sha.is_empty() { Some(sha) } else { None })
    }

    /// Initialize a repository with an initial commit, for tests and
    /// bootstrap tooling.
    pub async fn init(path: impl Into<PathBuf>, initial_branch: &str) -> Result<Self> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;

        let status = Command::new("git")
            .arg("-C")
            .arg(&path)
            .args(["init", "-b", initial_branch])
            .output()
            .await?;
        if !status.status.success() {
            return Err(eyre!(
                "git init failed: {}",
                String::from_utf8_lossy(&status.stderr).trim()
            ));
        }

        let repo = Self { path };
        repo.run(&["config", "user.email", "swarm@localhost"]).await?;
        repo.run(&["config", "user.name", "codeswarm"]).await?;
        repo.run(&["commit", "--allow-empty", "-m", "initial"]).await?;
        Ok(repo)
    }
}
