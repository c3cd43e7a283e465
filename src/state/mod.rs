//! Persisted worker-state snapshots.
//!
//! The coordinator periodically writes every worker's status record to a
//! JSON document so that external tooling (and the operator) can inspect the
//! swarm without attaching to the process. Same discipline as the queue
//! file: advisory lock on a sibling `.lock`, atomic temp+rename writes.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::WorkerStatus;
use crate::util::fs::{atomic_write, expand_home, sibling};

/// Errors from the worker-state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state persistence failed: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("state file corrupt: {0}")]
    Corrupt(String),
}

#[derive(Serialize, Deserialize)]
struct StateDocument {
    workers: Vec<WorkerStatus>,
    updated_at: DateTime<Utc>,
}

/// File-backed store of the latest status snapshot per worker.
pub struct WorkerStateStore {
    path: PathBuf,
    lock_file: File,
    workers: Mutex<HashMap<String, WorkerStatus>>,
}

impl WorkerStateStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = expand_home(path.as_ref());

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(sibling(&path, "lock"))?;

        let store = Self {
            path,
            lock_file,
            workers: Mutex::new(HashMap::new()),
        };

        if store.path.exists() {
            store.reload()?;
        } else {
            store.save_locked()?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored snapshots with the given statuses and persist.
    pub fn update(&self, statuses: &[WorkerStatus]) -> Result<(), StateError> {
        {
            let mut workers = self.workers.lock().unwrap();
            workers.clear();
            for status in statuses {
                workers.insert(status.worker_id.clone(), status.clone());
            }
        }
        self.save_locked()
    }

    /// Latest snapshots, re-read from disk.
    pub fn load(&self) -> Result<Vec<WorkerStatus>, StateError> {
        self.reload()?;
        let workers = self.workers.lock().unwrap();
        let mut list: Vec<WorkerStatus> = workers.values().cloned().collect();
        list.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(list)
    }

    fn reload(&self) -> Result<(), StateError> {
        self.lock_file.lock_shared()?;
        let result = fs::read(&self.path);
        if let Err(e) = fs2::FileExt::unlock(&self.lock_file) {
            warn!(error = %e, "Failed to release state lock");
        }

        let data = result?;
        let doc: StateDocument =
            serde_json::from_slice(&data).map_err(|e| StateError::Corrupt(e.to_string()))?;

        let mut workers = self.workers.lock().unwrap();
        workers.clear();
        for status in doc.workers {
            workers.insert(status.worker_id.clone(), status);
        }
        Ok(())
    }

    fn save_locked(&self) -> Result<(), StateError> {
        let doc = {
            let workers = self.workers.lock().unwrap();
            let mut list: Vec<WorkerStatus> = workers.values().cloned().collect();
            list.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
            StateDocument {
                workers: list,
                updated_at: Utc::now(),
            }
        };

        let data = serde_json::to_vec_pretty(&doc).map_err(|e| StateError::Corrupt(e.to_string()))?;

        self.lock_file.lock_exclusive()?;
        let result = atomic_write(&self.path, &data);
        if let Err(e) = fs2::FileExt::unlock(&self.lock_file) {
            warn!(error = %e, "Failed to release state lock");
        }
        result.map_err(Into::into)
    }
}
