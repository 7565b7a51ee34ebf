//! Monitor loop — the polling daemon that drives the fleet.
//!
//! A single fixed-interval loop performs all reconciliation: it scans every
//! worker's task queue, raises triggers for unseen work, activates idle
//! workers, and periodically sweeps results into the archive. There is no
//! push mechanism by design — every tick is idempotent, so a crash at any
//! point is repaired by the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::archive::Archiver;
use crate::config::FleetConfig;
use crate::dispatch::Dispatcher;
use crate::liveness::{self, ClassifierConfig, Verdict, WorkerState};
use crate::model::Task;
use crate::session::SessionBackend;
use crate::store::{FleetPaths, HeartbeatStore, ResultStore, TaskStore, TriggerStore};

/// The polling daemon.
pub struct Monitor {
    config: FleetConfig,
    classifier: ClassifierConfig,
    paths: FleetPaths,
    tasks: TaskStore,
    results: ResultStore,
    triggers: TriggerStore,
    heartbeats: HeartbeatStore,
    archiver: Archiver,
    dispatcher: Arc<Dispatcher>,
    backend: Arc<dyn SessionBackend>,
    /// Task ids already triggered, per worker. Pruned as tasks drain.
    seen: HashMap<String, HashSet<String>>,
    tick_count: u64,
}

impl Monitor {
    pub fn new(config: FleetConfig, backend: Arc<dyn SessionBackend>) -> Self {
        let paths = FleetPaths::new(config.root.clone());
        let dispatcher = Arc::new(Dispatcher::new(backend.clone(), paths.clone(), &config));
        Self {
            classifier: ClassifierConfig::from(&config),
            tasks: TaskStore::new(paths.clone()),
            results: ResultStore::new(paths.clone()),
            triggers: TriggerStore::new(paths.clone()),
            heartbeats: HeartbeatStore::new(paths.clone()),
            archiver: Archiver::new(paths.clone()),
            dispatcher,
            backend,
            paths,
            config,
            seen: HashMap::new(),
            tick_count: 0,
        }
    }

    /// Spawn the monitor loop as a background task.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.poll_interval.as_secs(),
                root = %self.paths.root().display(),
                "Monitor loop started"
            );
            let mut tick = tokio::time::interval(self.config.poll_interval);
            loop {
                tick.tick().await;
                self.tick().await;
            }
        })
    }

    /// One reconciliation tick. Idempotent: safe to re-run after a crash.
    pub async fn tick(&mut self) {
        self.tick_count += 1;

        let workers = match self.paths.workers().await {
            Ok(workers) => workers,
            Err(e) => {
                warn!(error = %e, "Worker scan failed, skipping tick");
                return;
            }
        };

        // Phase 1: raise triggers for unseen tasks (serialized per worker).
        for worker in &workers {
            self.scan_worker_tasks(worker).await;
        }

        // Phase 2: activate idle workers with pending triggers. Distinct
        // workers run in parallel; each worker gets at most one attempt per
        // tick, so the same worker is never double-activated.
        let mut pending = Vec::new();
        for worker in &workers {
            if self.triggers.is_pending(worker).await {
                pending.push(worker.clone());
            }
        }
        let attempts = pending.into_iter().map(|worker| {
            let monitor = &*self;
            async move {
                monitor.try_activate(&worker).await;
            }
        });
        join_all(attempts).await;

        // Phase 3: archive sweep every Nth tick.
        if self.tick_count % self.config.archive_sweep_ticks == 0 {
            for worker in &workers {
                self.sweep_worker(worker).await;
            }
        }
    }

    /// Scan one worker's queue and raise a trigger for unseen tasks.
    async fn scan_worker_tasks(&mut self, worker: &str) {
        let pending = match self.tasks.list_pending(worker).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(worker, error = %e, "Task scan failed");
                return;
            }
        };

        let pending_ids: HashSet<String> = pending.iter().map(|t| t.id.clone()).collect();
        let seen = self.seen.entry(worker.to_string()).or_default();
        // Drop bookkeeping for tasks that have drained.
        seen.retain(|id| pending_ids.contains(id));

        let mut new_tasks = 0;
        for task in &pending {
            if seen.insert(task.id.clone()) {
                new_tasks += 1;
                debug!(worker, task_id = %task.id, priority = %task.priority, "New task queued");
            }
        }

        if new_tasks > 0 {
            info!(worker, new_tasks, "Raising trigger for pending work");
            if let Err(e) = self.triggers.set(worker).await {
                warn!(worker, error = %e, "Failed to raise trigger");
            }
        }
    }

    /// Classify a worker and activate it if (and only if) it is idle.
    async fn try_activate(&self, worker: &str) {
        let verdict = self.classify(worker).await;
        debug!(worker, state = %verdict.state, reason = %verdict.reason, "Liveness verdict");

        if verdict.state == WorkerState::Unknown {
            // Conservative: never auto-activate, but make it visible.
            warn!(worker, reason = %verdict.reason, "Worker state unknown, needs operator inspection");
            return;
        }
        if !verdict.state.is_activatable() {
            return;
        }

        let pending = self.tasks.list_pending(worker).await.unwrap_or_default();
        if pending.is_empty() {
            // Queue drained since the trigger was raised.
            if let Err(e) = self.triggers.clear(worker).await {
                warn!(worker, error = %e, "Failed to clear stale trigger");
            }
            return;
        }

        let message = activation_message(worker, &pending);
        match self.dispatcher.activate(worker, &message).await {
            Ok(report) => {
                info!(worker, tier = %report.tier, tasks = pending.len(), "Worker activated");
                if let Err(e) = self.triggers.clear(worker).await {
                    warn!(worker, error = %e, "Failed to clear trigger after activation");
                }
            }
            Err(e) => {
                // Trigger stays set; retried next tick.
                warn!(worker, error = %e, "Activation failed, will retry");
            }
        }
    }

    /// Full classification for one worker, including the sampling wait.
    pub async fn classify(&self, worker: &str) -> Verdict {
        let heartbeat = self.heartbeats.read(worker).await;
        match liveness::observe(&self.backend, worker, self.config.sample_window, heartbeat).await {
            Ok(obs) => liveness::classify(&obs, &self.classifier),
            Err(e) => Verdict {
                state: WorkerState::Unknown,
                confidence: crate::liveness::Confidence::Low,
                reason: format!("observation failed: {e}"),
            },
        }
    }

    /// Reconcile one worker's results with its task queue.
    ///
    /// Result + matching task: archive the pair (after the settling delay).
    /// Result with no task, older than the grace period: archive orphaned.
    /// Task past its declared timeout with no result: archive orphaned —
    /// advisory classification, the closest thing to cancellation here.
    async fn sweep_worker(&self, worker: &str) {
        let results = match self.results.list(worker).await {
            Ok(results) => results,
            Err(e) => {
                warn!(worker, error = %e, "Result scan failed");
                return;
            }
        };

        for result in results {
            let settled = match self.results.file_age(worker, &result.task_id).await {
                Ok(Some(age)) => age >= self.config.archive_settle,
                _ => true,
            };
            if !settled {
                debug!(worker, task_id = %result.task_id, "Result still settling");
                continue;
            }

            match self.tasks.read(worker, &result.task_id).await {
                Ok(task) => {
                    if let Err(e) = self.archiver.archive_pair(worker, &task, &result).await {
                        warn!(worker, task_id = %task.id, error = %e, "Archiving pair failed");
                    }
                }
                Err(_) => {
                    let aged_out = match self.results.file_age(worker, &result.task_id).await {
                        Ok(Some(age)) => age >= self.config.orphan_grace,
                        _ => false,
                    };
                    if aged_out {
                        if let Err(e) = self.archiver.archive_orphan_result(worker, &result).await {
                            warn!(worker, task_id = %result.task_id, error = %e, "Archiving orphan result failed");
                        }
                    }
                }
            }
        }

        // Tasks whose declared timeout has long expired with no result.
        let pending = self.tasks.list_pending(worker).await.unwrap_or_default();
        for task in pending {
            if task_timed_out(&task, self.config.orphan_grace) {
                let has_result = self
                    .results
                    .read_result(worker, &task.id)
                    .await
                    .ok()
                    .flatten()
                    .is_some();
                if !has_result {
                    info!(worker, task_id = %task.id, "Task exceeded its declared timeout, archiving as orphaned");
                    if let Err(e) = self.archiver.archive_orphan_task(worker, &task).await {
                        warn!(worker, task_id = %task.id, error = %e, "Archiving orphan task failed");
                    }
                }
            }
        }
    }
}

/// The text injected into a worker's session on activation.
fn activation_message(worker: &str, pending: &[Task]) -> String {
    format!(
        "You have {} pending task(s) in your queue ({}). Read the oldest task file, execute it, and write a result record when done.",
        pending.len(),
        worker,
    )
}

/// Whether a task with a declared timeout has exceeded it plus the grace
/// period. Tasks without a timeout never orphan on age alone.
fn task_timed_out(task: &Task, grace: std::time::Duration) -> bool {
    let Some(timeout) = task.timeout_seconds else {
        return false;
    };
    let age = Utc::now().signed_duration_since(task.created_at);
    match age.to_std() {
        Ok(age) => age > std::time::Duration::from_secs(timeout) + grace,
        Err(_) => false,
    }
}
