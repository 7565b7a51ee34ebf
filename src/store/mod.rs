//! File-backed stores shared between the orchestrator and the workers.
//!
//! Layout under the fleet root:
//!
//! ```text
//! {root}/{worker}/tasks/{task_id}.json
//! {root}/{worker}/results/{task_id}.json
//! {root}/{worker}/heartbeat.json
//! {root}/{worker}/triggers/pending
//! {root}/{worker}/notifications/*.json
//! {root}/archive/{worker}/{success|failed|orphaned}/{task_id}.json
//! ```
//!
//! The directories are the only shared mutable state. All writers use
//! write-to-temp-then-rename so readers never observe a partial file; a
//! record that fails to parse is treated as not-yet-written and retried on
//! the next tick.

mod heartbeats;
mod results;
mod tasks;
mod triggers;

pub use heartbeats::HeartbeatStore;
pub use results::ResultStore;
pub use tasks::TaskStore;
pub use triggers::TriggerStore;

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::QueueError;

/// Reserved top-level directory name; never treated as a worker.
pub const ARCHIVE_DIR: &str = "archive";

/// Resolves the directory layout for one fleet root.
#[derive(Debug, Clone)]
pub struct FleetPaths {
    root: PathBuf,
}

impl FleetPaths {
    /// Create a path resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The fleet root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-worker base directory.
    pub fn worker_dir(&self, worker: &str) -> PathBuf {
        self.root.join(worker)
    }

    /// Pending-task directory for a worker.
    pub fn tasks_dir(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("tasks")
    }

    /// Result directory for a worker.
    pub fn results_dir(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("results")
    }

    /// Trigger directory for a worker.
    pub fn triggers_dir(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("triggers")
    }

    /// Manual-action notification directory for a worker.
    pub fn notifications_dir(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("notifications")
    }

    /// Heartbeat file for a worker.
    pub fn heartbeat_file(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("heartbeat.json")
    }

    /// Optional control pipe for a worker (tier-b activation channel).
    pub fn control_pipe(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("control.pipe")
    }

    /// Archive bucket for a worker and classification.
    pub fn archive_dir(&self, worker: &str, bucket: &str) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(worker).join(bucket)
    }

    /// Create the directory skeleton for a worker.
    pub async fn ensure_worker_dirs(&self, worker: &str) -> Result<(), QueueError> {
        fs::create_dir_all(self.tasks_dir(worker)).await?;
        fs::create_dir_all(self.results_dir(worker)).await?;
        fs::create_dir_all(self.triggers_dir(worker)).await?;
        fs::create_dir_all(self.notifications_dir(worker)).await?;
        Ok(())
    }

    /// Enumerate worker directories under the root (skips the archive).
    pub async fn workers(&self) -> Result<Vec<String>, QueueError> {
        let mut workers = Vec::new();
        if !self.root.exists() {
            return Ok(workers);
        }
        let mut read_dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.metadata().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ARCHIVE_DIR || name.starts_with('.') {
                continue;
            }
            workers.push(name);
        }
        workers.sort();
        Ok(workers)
    }
}

/// Atomically write `bytes` to `path` via a temp file + rename.
///
/// Rename atomicity is the only synchronization between concurrent writers
/// and the polling readers.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
