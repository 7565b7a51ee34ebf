//! Activation dispatcher — delivers a message into a worker's live session.
//!
//! The preferred path is keystroke injection into the pseudo-terminal, but
//! delivery degrades through tiers so an activation attempt always leaves a
//! trace: pty injection, then the worker's control pipe if it provides one,
//! then a one-shot non-interactive invocation, and finally a manual-action
//! notification for a human operator. The tier that succeeded is recorded
//! in the dispatch report for observability.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::FleetConfig;
use crate::error::ActivationError;
use crate::liveness::count_new_lines;
use crate::session::SessionBackend;
use crate::store::FleetPaths;

/// Lines of output compared before/after settle to confirm a submit.
const CONFIRM_LINES: usize = 20;

/// Timeout for a control-pipe write (a FIFO with no reader blocks).
const PIPE_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Delivery tier that carried an activation, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryTier {
    /// Keystroke injection into the live pseudo-terminal.
    PtyInject,
    /// Side-channel write to the worker's control pipe.
    ControlPipe,
    /// Non-interactive single-shot invocation (no session context).
    OneShot,
    /// Manual-action notification for a human operator.
    Manual,
}

impl std::fmt::Display for DeliveryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PtyInject => "pty_inject",
            Self::ControlPipe => "control_pipe",
            Self::OneShot => "one_shot",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// What a successful activation looked like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub worker: String,
    pub tier: DeliveryTier,
    /// Submit attempts made on the pty tier (0 if that tier was skipped).
    pub submit_attempts: u32,
    pub elapsed: Duration,
    /// Whether output changed within the settle window (pty tier only).
    pub confirmed: bool,
}

/// Delivers activation messages to workers through the tiered protocol.
pub struct Dispatcher {
    backend: Arc<dyn SessionBackend>,
    paths: FleetPaths,
    settle_wait: Duration,
    activation_timeout: Duration,
    one_shot_command: Option<String>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn SessionBackend>, paths: FleetPaths, config: &FleetConfig) -> Self {
        Self {
            backend,
            paths,
            settle_wait: config.settle_wait,
            activation_timeout: config.activation_timeout,
            one_shot_command: config.one_shot_command.clone(),
        }
    }

    /// Deliver `message` to `worker`, falling through the tiers in order.
    ///
    /// The whole sequence runs under a hard timeout so a wedged terminal
    /// can never block future attaches.
    pub async fn activate(
        &self,
        worker: &str,
        message: &str,
    ) -> Result<DispatchReport, ActivationError> {
        let start = Instant::now();
        let attempt = self.activate_inner(worker, message, start);

        match tokio::time::timeout(self.activation_timeout, attempt).await {
            Ok(report) => report,
            Err(_) => {
                // Best-effort release; the backend's own command timeout
                // bounds this too.
                let _ = self.backend.detach(worker).await;
                Err(ActivationError::SequenceTimeout {
                    worker: worker.to_string(),
                    timeout: self.activation_timeout,
                })
            }
        }
    }

    async fn activate_inner(
        &self,
        worker: &str,
        message: &str,
        start: Instant,
    ) -> Result<DispatchReport, ActivationError> {
        // Tier a: pty attach + inject.
        match self.inject_pty(worker, message).await {
            Ok((submit_attempts, confirmed)) => {
                let report = DispatchReport {
                    worker: worker.to_string(),
                    tier: DeliveryTier::PtyInject,
                    submit_attempts,
                    elapsed: start.elapsed(),
                    confirmed,
                };
                info!(worker, tier = %report.tier, confirmed, "Activation delivered");
                return Ok(report);
            }
            Err(e @ ActivationError::DetachFailed { .. }) => {
                // The message was already sent and submitted; falling back
                // would deliver it a second time. Surface the detach error
                // and let the next tick reassess.
                warn!(worker, error = %e, "pty delivery landed but detach failed");
                return Err(e);
            }
            Err(e) => {
                // Delivery itself failed (attach/clear/send/submit), so the
                // message never reached the worker; fall through to the
                // degraded tiers.
                warn!(worker, error = %e, "pty injection failed, trying fallback tiers");
            }
        }

        // Tier b: control pipe, if the worker provides one.
        if let Some(report) = self.write_control_pipe(worker, message, start).await {
            info!(worker, tier = %report.tier, "Activation delivered");
            return Ok(report);
        }

        // Tier c: one-shot invocation, no session context preserved.
        if let Some(report) = self.run_one_shot(worker, message, start).await {
            info!(worker, tier = %report.tier, "Activation delivered");
            return Ok(report);
        }

        // Tier d: leave a manual-action notification. Always succeeds; if
        // even this fails the error surfaces as tiers-exhausted.
        match self.write_manual_notification(worker, message).await {
            Ok(()) => {
                let report = DispatchReport {
                    worker: worker.to_string(),
                    tier: DeliveryTier::Manual,
                    submit_attempts: 0,
                    elapsed: start.elapsed(),
                    confirmed: false,
                };
                warn!(worker, "Activation degraded to manual notification");
                Ok(report)
            }
            Err(e) => {
                warn!(worker, error = %e, "Manual notification write failed");
                Err(ActivationError::TiersExhausted {
                    worker: worker.to_string(),
                })
            }
        }
    }

    /// Tier a: the ordered pty protocol — attach, clear, send, submit,
    /// settle, detach. Returns (submit attempts, confirmed).
    async fn inject_pty(
        &self,
        worker: &str,
        message: &str,
    ) -> Result<(u32, bool), ActivationError> {
        self.backend
            .attach(worker)
            .await
            .map_err(|e| ActivationError::AttachFailed {
                worker: worker.to_string(),
                reason: e.to_string(),
            })?;

        self.backend.clear_input(worker).await?;
        self.backend.send_text(worker, message).await?;

        let before = self
            .backend
            .capture_tail(worker, CONFIRM_LINES)
            .await
            .unwrap_or_default();

        let mut attempts = 0u32;
        let mut confirmed = false;
        // One submit plus one retry if the settle window shows no effect.
        while attempts < 2 {
            self.backend.submit(worker).await?;
            attempts += 1;

            tokio::time::sleep(self.settle_wait).await;

            let after = self
                .backend
                .capture_tail(worker, CONFIRM_LINES)
                .await
                .unwrap_or_default();
            if count_new_lines(&before, &after) > 0 {
                confirmed = true;
                break;
            }
            debug!(worker, attempt = attempts, "No output change within settle window");
        }

        if !confirmed {
            warn!(worker, attempts, "Submit unconfirmed after settle window");
        }

        // Detach must release the terminal without signalling the worker.
        // Once the submit is confirmed the delivery is done: a stuck client
        // is logged, not turned into a second delivery.
        if let Err(e) = self.backend.detach(worker).await {
            if confirmed {
                warn!(worker, error = %e, "Detach failed after confirmed submit");
            } else {
                return Err(ActivationError::DetachFailed {
                    worker: worker.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Ok((attempts, confirmed))
    }

    /// Tier b: write the message to the worker's control pipe, if present.
    ///
    /// The pipe is opened with `O_NONBLOCK` so a FIFO with no reader fails
    /// immediately (ENXIO) instead of parking a blocking-pool thread.
    async fn write_control_pipe(
        &self,
        worker: &str,
        message: &str,
        start: Instant,
    ) -> Option<DispatchReport> {
        let pipe = self.paths.control_pipe(worker);
        if !pipe.exists() {
            return None;
        }

        let payload = format!("{message}\n");
        let write = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&pipe)?;
            file.write_all(payload.as_bytes())
        });
        match tokio::time::timeout(PIPE_WRITE_TIMEOUT, write).await {
            Ok(Ok(Ok(()))) => Some(DispatchReport {
                worker: worker.to_string(),
                tier: DeliveryTier::ControlPipe,
                submit_attempts: 0,
                elapsed: start.elapsed(),
                confirmed: true,
            }),
            Ok(Ok(Err(e))) => {
                warn!(worker, error = %e, "Control pipe write failed");
                None
            }
            Ok(Err(e)) => {
                warn!(worker, error = %e, "Control pipe write task failed");
                None
            }
            Err(_) => {
                warn!(worker, "Control pipe write timed out");
                None
            }
        }
    }

    /// Tier c: one-shot invocation of the worker program.
    async fn run_one_shot(
        &self,
        worker: &str,
        message: &str,
        start: Instant,
    ) -> Option<DispatchReport> {
        let template = self.one_shot_command.as_deref()?;
        let command = template
            .replace("{worker}", worker)
            .replace("{message}", message);

        let run = tokio::process::Command::new("sh")
            .args(["-c", &command])
            .stdin(std::process::Stdio::null())
            .output();
        match tokio::time::timeout(self.activation_timeout, run).await {
            Ok(Ok(output)) if output.status.success() => Some(DispatchReport {
                worker: worker.to_string(),
                tier: DeliveryTier::OneShot,
                submit_attempts: 0,
                elapsed: start.elapsed(),
                confirmed: true,
            }),
            Ok(Ok(output)) => {
                warn!(worker, status = %output.status, "One-shot invocation failed");
                None
            }
            Ok(Err(e)) => {
                warn!(worker, error = %e, "One-shot invocation could not start");
                None
            }
            Err(_) => {
                warn!(worker, "One-shot invocation timed out");
                None
            }
        }
    }

    /// Tier d: leave a manual-action notification file for the operator.
    async fn write_manual_notification(
        &self,
        worker: &str,
        message: &str,
    ) -> Result<(), std::io::Error> {
        let dir = self.paths.notifications_dir(worker);
        fs::create_dir_all(&dir).await?;
        let now = Utc::now();
        let payload = serde_json::json!({
            "worker": worker,
            "message": message,
            "created_at": now,
            "action": "manual_activation_required",
        });
        let path = dir.join(format!("manual-{}.json", now.format("%Y%m%dT%H%M%S%3f")));
        fs::write(&path, serde_json::to_vec_pretty(&payload)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted session backend that records every call.
    struct ScriptedBackend {
        running: bool,
        /// Output tails returned by successive capture calls.
        captures: Mutex<Vec<String>>,
        calls: Mutex<Vec<String>>,
        fail_detach: bool,
    }

    impl ScriptedBackend {
        fn new(running: bool, captures: Vec<&str>) -> Self {
            Self {
                running,
                captures: Mutex::new(captures.into_iter().map(String::from).collect()),
                calls: Mutex::new(Vec::new()),
                fail_detach: false,
            }
        }

        fn failing_detach(mut self) -> Self {
            self.fail_detach = true;
            self
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionBackend for ScriptedBackend {
        async fn is_running(&self, _worker: &str) -> bool {
            self.running
        }

        async fn capture_tail(&self, _worker: &str, _lines: usize) -> Result<String, SessionError> {
            self.record("capture");
            let mut captures = self.captures.lock().unwrap();
            if captures.len() > 1 {
                Ok(captures.remove(0))
            } else {
                Ok(captures.first().cloned().unwrap_or_default())
            }
        }

        async fn attach(&self, worker: &str) -> Result<(), SessionError> {
            self.record("attach");
            if self.running {
                Ok(())
            } else {
                Err(SessionError::NotRunning {
                    session: worker.to_string(),
                })
            }
        }

        async fn clear_input(&self, _worker: &str) -> Result<(), SessionError> {
            self.record("clear");
            Ok(())
        }

        async fn send_text(&self, _worker: &str, text: &str) -> Result<(), SessionError> {
            self.record(&format!("send:{text}"));
            Ok(())
        }

        async fn submit(&self, _worker: &str) -> Result<(), SessionError> {
            self.record("submit");
            Ok(())
        }

        async fn detach(&self, _worker: &str) -> Result<(), SessionError> {
            self.record("detach");
            if self.fail_detach {
                return Err(SessionError::Timeout {
                    timeout: Duration::from_secs(5),
                });
            }
            Ok(())
        }
    }

    fn config(dir: &TempDir) -> FleetConfig {
        FleetConfig {
            root: dir.path().to_path_buf(),
            settle_wait: Duration::from_millis(10),
            activation_timeout: Duration::from_secs(5),
            ..FleetConfig::default()
        }
    }

    #[tokio::test]
    async fn pty_protocol_runs_in_order() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new(
            true,
            vec!["❯ ", "processing your request...\nworking"],
        ));
        let dispatcher = Dispatcher::new(
            backend.clone(),
            FleetPaths::new(dir.path()),
            &config(&dir),
        );

        let report = dispatcher.activate("w1", "check your queue").await.unwrap();
        assert_eq!(report.tier, DeliveryTier::PtyInject);
        assert!(report.confirmed);
        assert_eq!(report.submit_attempts, 1);

        let calls = backend.calls();
        let positions: Vec<usize> = ["attach", "clear", "send:check your queue", "submit", "detach"]
            .iter()
            .map(|step| calls.iter().position(|c| c == step).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted, "protocol steps out of order: {calls:?}");
    }

    #[tokio::test]
    async fn unconfirmed_submit_retries_once() {
        let dir = TempDir::new().unwrap();
        // Pane never changes: submit is never confirmed.
        let backend = Arc::new(ScriptedBackend::new(true, vec!["❯ "]));
        let dispatcher = Dispatcher::new(
            backend.clone(),
            FleetPaths::new(dir.path()),
            &config(&dir),
        );

        let report = dispatcher.activate("w1", "hello").await.unwrap();
        assert_eq!(report.tier, DeliveryTier::PtyInject);
        assert!(!report.confirmed);
        assert_eq!(report.submit_attempts, 2);
    }

    #[tokio::test]
    async fn offline_worker_degrades_to_manual() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new(false, vec![]));
        let dispatcher = Dispatcher::new(
            backend.clone(),
            FleetPaths::new(dir.path()),
            &config(&dir),
        );

        let report = dispatcher.activate("w1", "wake up").await.unwrap();
        assert_eq!(report.tier, DeliveryTier::Manual);

        // The notification file preserves the message for the operator.
        let mut entries = tokio::fs::read_dir(dir.path().join("w1/notifications"))
            .await
            .unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        let content = tokio::fs::read_to_string(entry.path()).await.unwrap();
        assert!(content.contains("wake up"));
    }

    #[tokio::test]
    async fn one_shot_tier_runs_before_manual() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("one-shot-ran");
        let mut cfg = config(&dir);
        cfg.one_shot_command = Some(format!("touch {}", marker.display()));

        let backend = Arc::new(ScriptedBackend::new(false, vec![]));
        let dispatcher = Dispatcher::new(backend, FleetPaths::new(dir.path()), &cfg);

        let report = dispatcher.activate("w1", "go").await.unwrap();
        assert_eq!(report.tier, DeliveryTier::OneShot);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn detach_failure_after_confirmed_delivery_keeps_pty_report() {
        let dir = TempDir::new().unwrap();
        // Pane changes after submit, so delivery is confirmed; the detach
        // then times out. The confirmed pty delivery must stand.
        let backend = Arc::new(
            ScriptedBackend::new(true, vec!["❯ ", "on it, reading the queue"]).failing_detach(),
        );
        let dispatcher = Dispatcher::new(
            backend.clone(),
            FleetPaths::new(dir.path()),
            &config(&dir),
        );

        let report = dispatcher.activate("w1", "check your queue").await.unwrap();
        assert_eq!(report.tier, DeliveryTier::PtyInject);
        assert!(report.confirmed);

        // No fallback delivery: no manual notification was written.
        assert!(!dir.path().join("w1/notifications").exists());
    }

    #[tokio::test]
    async fn detach_failure_without_confirmation_does_not_redeliver() {
        let dir = TempDir::new().unwrap();
        // Pane never changes and the detach fails. The message was still
        // sent and submitted, so fallback tiers must not run.
        let backend = Arc::new(ScriptedBackend::new(true, vec!["❯ "]).failing_detach());
        let dispatcher = Dispatcher::new(
            backend.clone(),
            FleetPaths::new(dir.path()),
            &config(&dir),
        );

        let err = dispatcher.activate("w1", "hello").await.unwrap_err();
        assert!(matches!(err, ActivationError::DetachFailed { .. }));
        assert!(!dir.path().join("w1/notifications").exists());
    }

    #[tokio::test]
    async fn reader_less_control_pipe_fails_fast() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("w1")).await.unwrap();
        let pipe = dir.path().join("w1/control.pipe");
        let status = std::process::Command::new("mkfifo")
            .arg(&pipe)
            .status()
            .unwrap();
        assert!(status.success());

        // Session is gone, so tier b is attempted; with nobody reading the
        // FIFO the write errors immediately and delivery degrades to manual.
        let backend = Arc::new(ScriptedBackend::new(false, vec![]));
        let dispatcher = Dispatcher::new(backend, FleetPaths::new(dir.path()), &config(&dir));

        let started = Instant::now();
        let report = dispatcher.activate("w1", "ping").await.unwrap();
        assert_eq!(report.tier, DeliveryTier::Manual);
        assert!(started.elapsed() < PIPE_WRITE_TIMEOUT);
    }

    #[tokio::test]
    async fn sequence_timeout_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        // Settle wait longer than the hard timeout forces the bound to trip.
        cfg.settle_wait = Duration::from_secs(60);
        cfg.activation_timeout = Duration::from_millis(50);

        let backend = Arc::new(ScriptedBackend::new(true, vec!["❯ "]));
        let dispatcher = Dispatcher::new(backend, FleetPaths::new(dir.path()), &cfg);

        let err = dispatcher.activate("w1", "msg").await.unwrap_err();
        assert!(matches!(err, ActivationError::SequenceTimeout { .. }));
    }
}
