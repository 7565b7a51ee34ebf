//! tmux implementation of the session backend.
//!
//! Each worker lives in a tmux session named `{prefix}{worker}`. All
//! operations go through the tmux CLI: `has-session` for liveness,
//! `capture-pane` for output inspection, `send-keys` for keystroke
//! injection, `detach-client` to release attachments. `send-keys` targets
//! the session by name, so injection never requires holding the terminal —
//! detach can never wedge a future attach.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::SessionError;
use crate::session::SessionBackend;

/// Timeout for any single tmux invocation.
const TMUX_CMD_TIMEOUT: Duration = Duration::from_secs(5);

/// tmux-backed sessions, one per worker.
#[derive(Debug, Clone)]
pub struct TmuxBackend {
    session_prefix: String,
}

impl TmuxBackend {
    pub fn new(session_prefix: impl Into<String>) -> Self {
        Self {
            session_prefix: session_prefix.into(),
        }
    }

    /// tmux session name for a worker.
    pub fn session_name(&self, worker: &str) -> String {
        format!("{}{}", self.session_prefix, worker)
    }

    /// Run a tmux subcommand, capturing stdout.
    async fn tmux(&self, session: &str, args: &[&str]) -> Result<String, SessionError> {
        let run = async {
            let output = Command::new("tmux")
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| SessionError::BackendUnavailable {
                    reason: format!("failed to spawn tmux: {e}"),
                })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                return Err(SessionError::CommandFailed {
                    session: session.to_string(),
                    reason: if stderr.is_empty() {
                        format!("tmux exited with {}", output.status)
                    } else {
                        stderr
                    },
                });
            }
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        };

        tokio::time::timeout(TMUX_CMD_TIMEOUT, run)
            .await
            .map_err(|_| SessionError::Timeout {
                timeout: TMUX_CMD_TIMEOUT,
            })?
    }
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    async fn is_running(&self, worker: &str) -> bool {
        let session = self.session_name(worker);
        self.tmux(&session, &["has-session", "-t", &session])
            .await
            .is_ok()
    }

    async fn capture_tail(&self, worker: &str, lines: usize) -> Result<String, SessionError> {
        let session = self.session_name(worker);
        let start = format!("-{lines}");
        self.tmux(
            &session,
            &["capture-pane", "-p", "-t", &session, "-S", &start],
        )
        .await
    }

    async fn attach(&self, worker: &str) -> Result<(), SessionError> {
        let session = self.session_name(worker);
        // has-session is the attach check: reachable without restarting.
        self.tmux(&session, &["has-session", "-t", &session])
            .await
            .map_err(|_| SessionError::NotRunning {
                session: session.clone(),
            })?;
        debug!(session, "Session reachable");
        Ok(())
    }

    async fn clear_input(&self, worker: &str) -> Result<(), SessionError> {
        let session = self.session_name(worker);
        // C-u clears the input line without interrupting a running program.
        self.tmux(&session, &["send-keys", "-t", &session, "C-u"])
            .await?;
        Ok(())
    }

    async fn send_text(&self, worker: &str, text: &str) -> Result<(), SessionError> {
        let session = self.session_name(worker);
        // -l sends the text literally instead of interpreting key names.
        self.tmux(&session, &["send-keys", "-t", &session, "-l", text])
            .await?;
        Ok(())
    }

    async fn submit(&self, worker: &str) -> Result<(), SessionError> {
        let session = self.session_name(worker);
        self.tmux(&session, &["send-keys", "-t", &session, "Enter"])
            .await?;
        Ok(())
    }

    async fn detach(&self, worker: &str) -> Result<(), SessionError> {
        let session = self.session_name(worker);
        // Releases any attached client; the session itself keeps running.
        // No client attached is fine — treat that as already detached.
        match self
            .tmux(&session, &["detach-client", "-s", &session])
            .await
        {
            Ok(_) => Ok(()),
            Err(SessionError::CommandFailed { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
