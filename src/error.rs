//! Error types for fleetd.

use std::time::Duration;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task/result store errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    #[error("Task {task_id} not found for worker {worker}")]
    TaskNotFound { worker: String, task_id: String },

    #[error("Result for task {task_id} not found for worker {worker}")]
    ResultNotFound { worker: String, task_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors talking to a worker's terminal session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {session} is not running")]
    NotRunning { session: String },

    #[error("Session backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Session command failed for {session}: {reason}")]
    CommandFailed { session: String, reason: String },

    #[error("Session operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Activation dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("Attach failed for worker {worker}: {reason}")]
    AttachFailed { worker: String, reason: String },

    #[error("Submit unconfirmed for worker {worker} after {attempts} attempts")]
    SubmitUnconfirmed { worker: String, attempts: u32 },

    #[error("Detach failed for worker {worker}: {reason}")]
    DetachFailed { worker: String, reason: String },

    #[error("Activation sequence for worker {worker} timed out after {timeout:?}")]
    SequenceTimeout { worker: String, timeout: Duration },

    #[error("All delivery tiers exhausted for worker {worker}")]
    TiersExhausted { worker: String },

    #[error("Worker {worker} is in state {state}, activation not allowed")]
    NotActivatable { worker: String, state: String },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Archive errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
