//! End-to-end monitor flow against a scripted session backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fleetd::archive::Archiver;
use fleetd::config::FleetConfig;
use fleetd::error::SessionError;
use fleetd::liveness::WorkerState;
use fleetd::model::{ResultStatus, Task, TaskPriority, TaskResult};
use fleetd::monitor::Monitor;
use fleetd::session::SessionBackend;
use fleetd::store::{FleetPaths, ResultStore, TaskStore};

/// Session whose state can be flipped mid-test: idle, then busy after an
/// activation lands, then idle again.
struct StagedSession {
    busy: Mutex<bool>,
    capture_serial: Mutex<u64>,
    injected: Mutex<Vec<String>>,
}

impl StagedSession {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            busy: Mutex::new(false),
            capture_serial: Mutex::new(0),
            injected: Mutex::new(Vec::new()),
        })
    }

    fn set_busy(&self, busy: bool) {
        *self.busy.lock().unwrap() = busy;
    }

    fn injected(&self) -> Vec<String> {
        self.injected.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionBackend for StagedSession {
    async fn is_running(&self, _worker: &str) -> bool {
        true
    }

    async fn capture_tail(&self, _worker: &str, _lines: usize) -> Result<String, SessionError> {
        if *self.busy.lock().unwrap() {
            let mut serial = self.capture_serial.lock().unwrap();
            *serial += 1;
            let base = *serial * 100;
            Ok((0..20)
                .map(|i| format!("executing step {}", base + i))
                .collect::<Vec<_>>()
                .join("\n"))
        } else {
            Ok("done.\n❯ ".to_string())
        }
    }

    async fn attach(&self, _worker: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn clear_input(&self, _worker: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn send_text(&self, _worker: &str, text: &str) -> Result<(), SessionError> {
        self.injected.lock().unwrap().push(text.to_string());
        // Receiving a message puts the worker to work.
        self.set_busy(true);
        Ok(())
    }

    async fn submit(&self, _worker: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn detach(&self, _worker: &str) -> Result<(), SessionError> {
        Ok(())
    }
}

fn fast_config(dir: &TempDir) -> FleetConfig {
    FleetConfig {
        root: dir.path().to_path_buf(),
        sample_window: Duration::ZERO,
        settle_wait: Duration::from_millis(5),
        archive_settle: Duration::ZERO,
        orphan_grace: Duration::ZERO,
        archive_sweep_ticks: 1,
        ..FleetConfig::default()
    }
}

#[tokio::test]
async fn task_lifecycle_end_to_end() {
    let dir = TempDir::new().unwrap();
    let session = StagedSession::new();
    let paths = FleetPaths::new(dir.path());
    let tasks = TaskStore::new(paths.clone());
    let results = ResultStore::new(paths.clone());

    // Enqueue a high-priority task for worker W.
    let task = Task::new("demo").with_priority(TaskPriority::High);
    let id = tasks.enqueue("W", &task).await.unwrap();

    let mut monitor = Monitor::new(fast_config(&dir), session.clone());

    // First tick: idle worker gets activated within one tick.
    monitor.tick().await;
    assert_eq!(session.injected().len(), 1);

    // Worker is now busy within the settle window.
    let verdict = monitor.classify("W").await;
    assert_eq!(verdict.state, WorkerState::Busy);

    // Worker finishes: consumes the task, writes its result, goes idle.
    let mut result = TaskResult::complete(&id, "W");
    result.findings.summary = "demo executed".to_string();
    results.write("W", &result).await.unwrap();
    session.set_busy(false);

    // Next tick: the sweep archives the pair as success.
    monitor.tick().await;
    assert!(
        dir.path()
            .join(format!("archive/W/success/{id}.json"))
            .exists()
    );
    assert!(tasks.list_pending("W").await.unwrap().is_empty());
    assert!(results.read_result("W", &id).await.unwrap().is_none());
}

#[tokio::test]
async fn queue_drains_in_fifo_order() {
    let dir = TempDir::new().unwrap();
    let paths = FleetPaths::new(dir.path());
    let tasks = TaskStore::new(paths);

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = tasks
            .enqueue("W", &Task::new(format!("step {i}")))
            .await
            .unwrap();
        ids.push(id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // A worker draining sequentially sees tasks in creation order.
    let mut drained = Vec::new();
    loop {
        let pending = tasks.list_pending("W").await.unwrap();
        let Some(front) = pending.first() else { break };
        drained.push(front.id.clone());
        tasks.remove("W", &front.id).await.unwrap();
    }
    assert_eq!(drained, ids);
}

#[tokio::test]
async fn result_with_no_task_archives_under_its_task_id() {
    let dir = TempDir::new().unwrap();
    let session = StagedSession::new();
    session.set_busy(true); // keep the monitor from activating anything

    let paths = FleetPaths::new(dir.path());
    let results = ResultStore::new(paths.clone());

    // A result for a task the orchestrator never knew about.
    results
        .write("W", &TaskResult::complete("t-200", "W"))
        .await
        .unwrap();

    let mut monitor = Monitor::new(fast_config(&dir), session.clone());
    monitor.tick().await;

    assert!(
        dir.path()
            .join("archive/W/orphaned/t-200.json")
            .exists()
    );
    assert!(results.read_result("W", "t-200").await.unwrap().is_none());
}

#[tokio::test]
async fn late_duplicate_result_leaves_single_archive_entry() {
    let dir = TempDir::new().unwrap();
    let session = StagedSession::new();
    session.set_busy(true);

    let paths = FleetPaths::new(dir.path());
    let tasks = TaskStore::new(paths.clone());
    let results = ResultStore::new(paths.clone());

    // Archive a pair, then have a late duplicate result show up.
    let task = Task::new("already handled");
    tasks.enqueue("W", &task).await.unwrap();
    results
        .write("W", &TaskResult::complete(&task.id, "W"))
        .await
        .unwrap();

    let mut monitor = Monitor::new(fast_config(&dir), session.clone());
    monitor.tick().await;
    assert!(
        dir.path()
            .join(format!("archive/W/success/{}.json", task.id))
            .exists()
    );

    // The duplicate is swept away without creating a second entry.
    let late = TaskResult::complete(&task.id, "W").with_status(ResultStatus::Partial);
    results.write("W", &late).await.unwrap();
    monitor.tick().await;

    assert!(
        results
            .read_result("W", &task.id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        !dir.path()
            .join(format!("archive/W/orphaned/{}.json", task.id))
            .exists()
    );
    assert_eq!(Archiver::new(paths).list("W").await.unwrap().len(), 1);
}

#[tokio::test]
async fn silent_setup_screen_never_reads_idle() {
    struct SetupScreen;

    #[async_trait]
    impl SessionBackend for SetupScreen {
        async fn is_running(&self, _worker: &str) -> bool {
            true
        }
        async fn capture_tail(&self, _w: &str, _l: usize) -> Result<String, SessionError> {
            // Identical on every capture: zero new output for 60+ seconds.
            Ok("Welcome to worker setup\nChoose the text style:\n❯ ".to_string())
        }
        async fn attach(&self, _w: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn clear_input(&self, _w: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn send_text(&self, _w: &str, _t: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn submit(&self, _w: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn detach(&self, _w: &str) -> Result<(), SessionError> {
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    let monitor = Monitor::new(fast_config(&dir), Arc::new(SetupScreen));

    for _ in 0..10 {
        let verdict = monitor.classify("W").await;
        assert_eq!(verdict.state, WorkerState::Initializing);
    }
}
