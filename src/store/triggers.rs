//! Trigger store — ephemeral "worker has pending work" markers.

use tokio::fs;

use crate::error::QueueError;
use crate::store::FleetPaths;

/// Marker file name inside a worker's trigger directory.
const PENDING_MARKER: &str = "pending";

/// Ephemeral notification markers owned by the monitor loop.
///
/// A trigger only means "this worker has pending work the monitor has
/// seen"; it is set when a new task appears and cleared once activation
/// succeeds or is abandoned. Content is irrelevant, only presence counts.
#[derive(Debug, Clone)]
pub struct TriggerStore {
    paths: FleetPaths,
}

impl TriggerStore {
    pub fn new(paths: FleetPaths) -> Self {
        Self { paths }
    }

    /// Set (or refresh) the pending trigger for a worker.
    pub async fn set(&self, worker: &str) -> Result<(), QueueError> {
        let dir = self.paths.triggers_dir(worker);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(PENDING_MARKER), b"").await?;
        Ok(())
    }

    /// Whether a pending trigger exists for a worker.
    pub async fn is_pending(&self, worker: &str) -> bool {
        self.paths.triggers_dir(worker).join(PENDING_MARKER).exists()
    }

    /// Clear the pending trigger. Clearing an absent trigger is a no-op.
    pub async fn clear(&self, worker: &str) -> Result<(), QueueError> {
        let marker = self.paths.triggers_dir(worker).join(PENDING_MARKER);
        match fs::remove_file(&marker).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
