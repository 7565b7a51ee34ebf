//! Session backends — how the orchestrator talks to a worker's terminal.
//!
//! Workers have no programmatic API; the only way in is their controlling
//! pseudo-terminal. The `SessionBackend` trait isolates that hack behind a
//! seam so the classifier and dispatcher never shell out directly, and so a
//! worker that grows a real status/control channel can swap the backend
//! without touching either.

mod tmux;

pub use tmux::TmuxBackend;

use async_trait::async_trait;

use crate::error::SessionError;

/// Access to a fleet of interactive terminal sessions, keyed by worker id.
///
/// The operations mirror the activation protocol: attach, clear pending
/// input, send text, submit, detach. None of them may terminate the
/// underlying process.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Whether the worker's session process is currently running.
    async fn is_running(&self, worker: &str) -> bool;

    /// Capture the last `lines` lines of visible session output.
    async fn capture_tail(&self, worker: &str, lines: usize) -> Result<String, SessionError>;

    /// Verify the session is reachable without restarting it.
    async fn attach(&self, worker: &str) -> Result<(), SessionError>;

    /// Clear any partially typed input so the message does not concatenate
    /// with stale text on the input line.
    async fn clear_input(&self, worker: &str) -> Result<(), SessionError>;

    /// Send literal message text as keystrokes.
    async fn send_text(&self, worker: &str, text: &str) -> Result<(), SessionError>;

    /// Press Enter.
    async fn submit(&self, worker: &str) -> Result<(), SessionError>;

    /// Release the terminal attachment without signalling the process.
    /// Must leave the session able to accept future attaches.
    async fn detach(&self, worker: &str) -> Result<(), SessionError>;
}
