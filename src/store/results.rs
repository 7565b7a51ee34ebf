//! Result store — records workers write after finishing a task.

use std::path::PathBuf;

use tokio::fs;
use tracing::warn;

use crate::error::QueueError;
use crate::model::TaskResult;
use crate::store::tasks::list_json_files;
use crate::store::{FleetPaths, write_atomic};

/// File-backed result store, one record per completed task.
#[derive(Debug, Clone)]
pub struct ResultStore {
    paths: FleetPaths,
}

impl ResultStore {
    pub fn new(paths: FleetPaths) -> Self {
        Self { paths }
    }

    /// Write a result record. Used by the in-worker reporter hook; the
    /// orchestrator itself only reads and archives results.
    pub async fn write(&self, worker: &str, result: &TaskResult) -> Result<(), QueueError> {
        self.paths.ensure_worker_dirs(worker).await?;
        let path = self.result_file(worker, &result.task_id);
        let bytes = serde_json::to_vec_pretty(result)?;
        write_atomic(&path, &bytes).await?;
        Ok(())
    }

    /// List all parseable results for a worker, oldest first.
    pub async fn list(&self, worker: &str) -> Result<Vec<TaskResult>, QueueError> {
        let dir = self.paths.results_dir(worker);
        let mut files = list_json_files(&dir).await?;
        files.sort();

        let mut results = Vec::with_capacity(files.len());
        for path in files {
            match read_result(&path).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(worker, path = %path.display(), error = %e, "Skipping unreadable result record");
                }
            }
        }
        Ok(results)
    }

    /// Read the result for a specific task, if one has been written.
    pub async fn read_result(
        &self,
        worker: &str,
        task_id: &str,
    ) -> Result<Option<TaskResult>, QueueError> {
        let path = self.result_file(worker, task_id);
        if !path.exists() {
            return Ok(None);
        }
        read_result(&path).await.map(Some)
    }

    /// Age of a result file on disk, from filesystem mtime.
    ///
    /// Used for the orphan grace period; a result whose task is gone is
    /// only archived as orphaned once it has sat here long enough.
    pub async fn file_age(
        &self,
        worker: &str,
        task_id: &str,
    ) -> Result<Option<std::time::Duration>, QueueError> {
        let path = self.result_file(worker, task_id);
        if !path.exists() {
            return Ok(None);
        }
        let modified = fs::metadata(&path).await?.modified()?;
        Ok(modified.elapsed().ok())
    }

    /// Remove a result record. Idempotent.
    pub async fn remove(&self, worker: &str, task_id: &str) -> Result<(), QueueError> {
        let path = self.result_file(worker, task_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn result_file(&self, worker: &str, task_id: &str) -> PathBuf {
        self.paths
            .results_dir(worker)
            .join(format!("{task_id}.json"))
    }
}

async fn read_result(path: &PathBuf) -> Result<TaskResult, QueueError> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| QueueError::MalformedRecord {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultStatus;
    use tempfile::TempDir;

    fn store() -> (ResultStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (ResultStore::new(FleetPaths::new(dir.path())), dir)
    }

    #[tokio::test]
    async fn write_then_read_result() {
        let (store, _dir) = store();
        let result = TaskResult::complete("t-1", "w1").with_summary("done");
        store.write("w1", &result).await.unwrap();

        let read = store.read_result("w1", "t-1").await.unwrap().unwrap();
        assert_eq!(read.task_id, "t-1");
        assert_eq!(read.status, ResultStatus::Complete);
        assert_eq!(read.findings.summary, "done");
    }

    #[tokio::test]
    async fn missing_result_is_none() {
        let (store, _dir) = store();
        assert!(store.read_result("w1", "t-x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_skips_malformed() {
        let (store, dir) = store();
        store
            .write("w1", &TaskResult::complete("t-1", "w1"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("w1/results/broken.json"), b"[1,")
            .await
            .unwrap();

        let results = store.list("w1").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn file_age_reports_for_existing() {
        let (store, _dir) = store();
        store
            .write("w1", &TaskResult::complete("t-1", "w1"))
            .await
            .unwrap();
        let age = store.file_age("w1", "t-1").await.unwrap();
        assert!(age.is_some());
        assert!(store.file_age("w1", "t-2").await.unwrap().is_none());
    }
}
