//! Task store — directory-per-worker queue of pending task records.

use std::path::PathBuf;

use tokio::fs;
use tracing::warn;

use crate::error::QueueError;
use crate::model::Task;
use crate::store::{FleetPaths, write_atomic};

/// File-backed task queue, FIFO by creation order.
///
/// Ordering comes from the timestamp embedded in the task id (and thus the
/// filename); ties break by lexical filename order.
#[derive(Debug, Clone)]
pub struct TaskStore {
    paths: FleetPaths,
}

impl TaskStore {
    pub fn new(paths: FleetPaths) -> Self {
        Self { paths }
    }

    /// Queue a task for a worker. Returns the task id.
    pub async fn enqueue(&self, worker: &str, task: &Task) -> Result<String, QueueError> {
        self.paths.ensure_worker_dirs(worker).await?;
        let path = self.task_file(worker, &task.id);
        let bytes = serde_json::to_vec_pretty(task)?;
        write_atomic(&path, &bytes).await?;
        Ok(task.id.clone())
    }

    /// List pending tasks for a worker in creation (FIFO) order.
    ///
    /// Records that fail to parse are skipped with a warning — they are
    /// either mid-write (retried next tick) or malformed (left in place as
    /// evidence), never silently dropped.
    pub async fn list_pending(&self, worker: &str) -> Result<Vec<Task>, QueueError> {
        let dir = self.paths.tasks_dir(worker);
        let mut files = list_json_files(&dir).await?;
        files.sort();

        let mut tasks = Vec::with_capacity(files.len());
        for path in files {
            match read_task(&path).await {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    warn!(worker, path = %path.display(), error = %e, "Skipping unreadable task record");
                }
            }
        }
        Ok(tasks)
    }

    /// Read a single task by id.
    pub async fn read(&self, worker: &str, task_id: &str) -> Result<Task, QueueError> {
        let path = self.task_file(worker, task_id);
        if !path.exists() {
            return Err(QueueError::TaskNotFound {
                worker: worker.to_string(),
                task_id: task_id.to_string(),
            });
        }
        read_task(&path).await
    }

    /// Whether a pending task file exists for the id.
    pub async fn exists(&self, worker: &str, task_id: &str) -> bool {
        self.task_file(worker, task_id).exists()
    }

    /// Remove a task record. Removing an already-removed task is a no-op.
    pub async fn remove(&self, worker: &str, task_id: &str) -> Result<(), QueueError> {
        let path = self.task_file(worker, task_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn task_file(&self, worker: &str, task_id: &str) -> PathBuf {
        self.paths.tasks_dir(worker).join(format!("{task_id}.json"))
    }
}

/// Parse one task record from disk.
async fn read_task(path: &PathBuf) -> Result<Task, QueueError> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| QueueError::MalformedRecord {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// List `.json` files in a directory, ignoring temp files and subdirectories.
pub(crate) async fn list_json_files(dir: &PathBuf) -> Result<Vec<PathBuf>, QueueError> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut read_dir = fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json")
            && entry.metadata().await?.is_file()
        {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskPriority;
    use tempfile::TempDir;

    fn store() -> (TaskStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (TaskStore::new(FleetPaths::new(dir.path())), dir)
    }

    #[tokio::test]
    async fn enqueue_then_list() {
        let (store, _dir) = store();
        let task = Task::new("review the queue module").with_priority(TaskPriority::High);
        let id = store.enqueue("w1", &task).await.unwrap();

        let pending = store.list_pending("w1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn list_is_fifo_by_creation_order() {
        let (store, _dir) = store();
        let mut ids = Vec::new();
        for i in 0..4 {
            let task = Task::new(format!("task {i}"));
            ids.push(store.enqueue("w1", &task).await.unwrap());
            // Force distinct millisecond timestamps in the ids.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let pending = store.list_pending("w1").await.unwrap();
        let listed: Vec<String> = pending.into_iter().map(|t| t.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn malformed_task_is_skipped_not_fatal() {
        let (store, dir) = store();
        store.enqueue("w1", &Task::new("good")).await.unwrap();

        let bad = dir.path().join("w1/tasks/zzz-bad.json");
        tokio::fs::write(&bad, b"{not json").await.unwrap();

        let pending = store.list_pending("w1").await.unwrap();
        assert_eq!(pending.len(), 1);
        // The malformed file stays in place as evidence.
        assert!(bad.exists());
    }

    #[tokio::test]
    async fn temp_files_are_invisible_to_readers() {
        let (store, dir) = store();
        store.enqueue("w1", &Task::new("real")).await.unwrap();
        tokio::fs::write(dir.path().join("w1/tasks/partial.json.tmp"), b"...")
            .await
            .unwrap();

        let pending = store.list_pending("w1").await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (store, _dir) = store();
        let task = Task::new("once");
        let id = store.enqueue("w1", &task).await.unwrap();

        store.remove("w1", &id).await.unwrap();
        store.remove("w1", &id).await.unwrap();
        assert!(store.list_pending("w1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_missing_task_errors() {
        let (store, _dir) = store();
        let err = store.read("w1", "nope").await.unwrap_err();
        assert!(matches!(err, QueueError::TaskNotFound { .. }));
    }
}
