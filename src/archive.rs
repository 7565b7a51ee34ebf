//! Archive — the terminal, append-only store of task/result pairs.
//!
//! Archiving is the single terminal operation in a record's lifecycle and
//! is idempotent: archiving an already-archived pair is a no-op. Nothing
//! is ever deleted without first landing in an archive bucket.

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};

use crate::error::ArchiveError;
use crate::model::{ArchiveClass, ArchiveEntry, Task, TaskResult};
use crate::store::{FleetPaths, ResultStore, TaskStore, write_atomic};

/// Moves terminal task/result pairs into per-worker archive buckets.
#[derive(Debug, Clone)]
pub struct Archiver {
    paths: FleetPaths,
    tasks: TaskStore,
    results: ResultStore,
}

impl Archiver {
    pub fn new(paths: FleetPaths) -> Self {
        Self {
            tasks: TaskStore::new(paths.clone()),
            results: ResultStore::new(paths.clone()),
            paths,
        }
    }

    /// Archive a completed task together with its result.
    ///
    /// Classification follows the result status (`success` for complete,
    /// `failed` otherwise). Source records are removed only after the
    /// archive entry is durably written, so a crash in between leaves the
    /// pair to be re-archived (a no-op) on the next sweep.
    pub async fn archive_pair(
        &self,
        worker: &str,
        task: &Task,
        result: &TaskResult,
    ) -> Result<ArchiveClass, ArchiveError> {
        let class = ArchiveClass::from_result_status(result.status);
        if self.is_archived(worker, &task.id).await {
            debug!(worker, task_id = %task.id, "Pair already archived, skipping");
        } else {
            let entry = ArchiveEntry {
                task: Some(task.clone()),
                result: Some(result.clone()),
                classification: class,
                archived_at: Utc::now(),
            };
            self.write_entry(worker, &task.id, &entry).await?;
            info!(worker, task_id = %task.id, classification = %class.dir_name(), "Archived task/result pair");
        }

        // Idempotent removes: a re-run after a partial archive is harmless.
        self.tasks.remove(worker, &task.id).await.map_err(io_of)?;
        self.results.remove(worker, &task.id).await.map_err(io_of)?;
        Ok(class)
    }

    /// Archive a task that never produced a result.
    pub async fn archive_orphan_task(
        &self,
        worker: &str,
        task: &Task,
    ) -> Result<(), ArchiveError> {
        if !self.is_archived(worker, &task.id).await {
            let entry = ArchiveEntry {
                task: Some(task.clone()),
                result: None,
                classification: ArchiveClass::Orphaned,
                archived_at: Utc::now(),
            };
            self.write_entry(worker, &task.id, &entry).await?;
            info!(worker, task_id = %task.id, "Archived orphaned task (no result ever appeared)");
        }
        self.tasks.remove(worker, &task.id).await.map_err(io_of)?;
        Ok(())
    }

    /// Archive a result whose task no longer exists (already archived or
    /// never known). Kept for audit purposes, never discarded.
    ///
    /// The entry keeps the task id as its filename. If the task was already
    /// archived as orphaned (it aged out before the worker answered), the
    /// late result is folded into that entry; if the task was archived with
    /// a result, the duplicate is dropped.
    pub async fn archive_orphan_result(
        &self,
        worker: &str,
        result: &TaskResult,
    ) -> Result<(), ArchiveError> {
        let orphan_path = self
            .paths
            .archive_dir(worker, ArchiveClass::Orphaned.dir_name())
            .join(format!("{}.json", result.task_id));

        if orphan_path.exists() {
            let content = fs::read_to_string(&orphan_path).await?;
            match serde_json::from_str::<ArchiveEntry>(&content) {
                Ok(mut entry) if entry.result.is_none() => {
                    entry.result = Some(result.clone());
                    self.write_entry(worker, &result.task_id, &entry).await?;
                    info!(worker, task_id = %result.task_id, "Folded late result into orphaned entry");
                }
                _ => {
                    debug!(worker, task_id = %result.task_id, "Orphaned entry already holds a result, skipping");
                }
            }
        } else if self.is_archived(worker, &result.task_id).await {
            debug!(worker, task_id = %result.task_id, "Task already archived with its result, dropping duplicate");
        } else {
            let entry = ArchiveEntry {
                task: None,
                result: Some(result.clone()),
                classification: ArchiveClass::Orphaned,
                archived_at: Utc::now(),
            };
            self.write_entry(worker, &result.task_id, &entry).await?;
            info!(worker, task_id = %result.task_id, "Archived orphaned result (no matching task)");
        }

        self.results
            .remove(worker, &result.task_id)
            .await
            .map_err(io_of)?;
        Ok(())
    }

    /// List archived entries for a worker across all buckets, oldest first.
    pub async fn list(&self, worker: &str) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let mut entries = Vec::new();
        for class in [
            ArchiveClass::Success,
            ArchiveClass::Failed,
            ArchiveClass::Orphaned,
        ] {
            let dir = self.paths.archive_dir(worker, class.dir_name());
            if !dir.exists() {
                continue;
            }
            let mut files = Vec::new();
            let mut read_dir = fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    files.push(entry.path());
                }
            }
            files.sort();
            for path in files {
                let content = fs::read_to_string(&path).await?;
                if let Ok(entry) = serde_json::from_str(&content) {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by(|a: &ArchiveEntry, b: &ArchiveEntry| a.archived_at.cmp(&b.archived_at));
        Ok(entries)
    }

    /// Whether an entry for this id exists in any bucket.
    async fn is_archived(&self, worker: &str, entry_id: &str) -> bool {
        for bucket in ["success", "failed", "orphaned"] {
            if self
                .paths
                .archive_dir(worker, bucket)
                .join(format!("{entry_id}.json"))
                .exists()
            {
                return true;
            }
        }
        false
    }

    async fn write_entry(
        &self,
        worker: &str,
        entry_id: &str,
        entry: &ArchiveEntry,
    ) -> Result<(), ArchiveError> {
        let path = self
            .paths
            .archive_dir(worker, entry.classification.dir_name())
            .join(format!("{entry_id}.json"));
        let bytes = serde_json::to_vec_pretty(entry)?;
        write_atomic(&path, &bytes).await?;
        Ok(())
    }
}

fn io_of(e: crate::error::QueueError) -> ArchiveError {
    match e {
        crate::error::QueueError::Io(io) => ArchiveError::Io(io),
        other => ArchiveError::Io(std::io::Error::other(other.to_string())),
    }
}
