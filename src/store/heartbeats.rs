//! Heartbeat store — one status record per worker, overwritten in place.

use tokio::fs;

use crate::error::QueueError;
use crate::model::Heartbeat;
use crate::store::{FleetPaths, write_atomic};

/// Reads and writes per-worker heartbeat files.
///
/// Workers overwrite their own record on a fixed cadence (via the
/// `fleetd heartbeat` hook); the orchestrator only reads. An unreadable or
/// missing heartbeat is reported as `None` — it weakens classification
/// confidence but is never treated as proof the worker is dead.
#[derive(Debug, Clone)]
pub struct HeartbeatStore {
    paths: FleetPaths,
}

impl HeartbeatStore {
    pub fn new(paths: FleetPaths) -> Self {
        Self { paths }
    }

    /// Overwrite the worker's heartbeat record.
    pub async fn write(&self, heartbeat: &Heartbeat) -> Result<(), QueueError> {
        self.paths.ensure_worker_dirs(&heartbeat.worker).await?;
        let path = self.paths.heartbeat_file(&heartbeat.worker);
        let bytes = serde_json::to_vec_pretty(heartbeat)?;
        write_atomic(&path, &bytes).await?;
        Ok(())
    }

    /// Read the worker's heartbeat, if present and parseable.
    pub async fn read(&self, worker: &str) -> Option<Heartbeat> {
        let path = self.paths.heartbeat_file(worker);
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(hb) => Some(hb),
            Err(e) => {
                tracing::warn!(worker, error = %e, "Unreadable heartbeat record");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let store = HeartbeatStore::new(FleetPaths::new(dir.path()));

        let mut hb = Heartbeat::new("w1", "idle");
        store.write(&hb).await.unwrap();

        hb.status = "busy".to_string();
        hb.tasks_completed = 3;
        store.write(&hb).await.unwrap();

        let read = store.read("w1").await.unwrap();
        assert_eq!(read.status, "busy");
        assert_eq!(read.tasks_completed, 3);
    }

    #[tokio::test]
    async fn missing_heartbeat_is_none() {
        let dir = TempDir::new().unwrap();
        let store = HeartbeatStore::new(FleetPaths::new(dir.path()));
        assert!(store.read("ghost").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_heartbeat_is_none() {
        let dir = TempDir::new().unwrap();
        let paths = FleetPaths::new(dir.path());
        paths.ensure_worker_dirs("w1").await.unwrap();
        tokio::fs::write(paths.heartbeat_file("w1"), b"???")
            .await
            .unwrap();

        let store = HeartbeatStore::new(paths);
        assert!(store.read("w1").await.is_none());
    }
}
