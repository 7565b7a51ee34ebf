//! Shared data records: tasks, results, heartbeats, archive entries.
//!
//! Everything here crosses the filesystem boundary between the orchestrator
//! and the workers, so every type derives serde and keeps a stable
//! snake_case wire format.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Task priority, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// What the worker is expected to produce for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectedOutput {
    /// Output format hint (e.g. "markdown", "json").
    #[serde(default)]
    pub format: String,
    /// Artifact paths the worker should produce.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// A unit of requested work, queued for a specific worker.
///
/// Immutable once created. The id embeds the creation timestamp so that
/// lexical filename order is creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: TaskPriority,
    pub description: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub expected_output: ExpectedOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Task {
    /// Create a new task with a freshly generated id.
    pub fn new(description: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: generate_task_id(created_at),
            created_at,
            priority: TaskPriority::Normal,
            description: description.into(),
            context: HashMap::new(),
            requirements: Vec::new(),
            expected_output: ExpectedOutput::default(),
            timeout_seconds: None,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the declared (advisory, not enforced) timeout.
    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }
}

/// Generate a globally unique task id: UTC timestamp + random suffix.
///
/// The timestamp component sorts lexically in creation order, which the
/// task store relies on for FIFO ordering.
pub fn generate_task_id(created_at: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().r#gen();
    format!("{}-{:04x}", created_at.format("%Y%m%dT%H%M%S%3f"), suffix)
}

/// Terminal status of a result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Complete,
    Error,
    Partial,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Partial => "partial",
        };
        write!(f, "{s}")
    }
}

/// Summary of what the worker found or produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Findings {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// An artifact the worker produced while executing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub r#type: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub format: String,
}

/// An error the worker hit while executing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// The record a worker writes after executing a task.
///
/// Created exactly once per task; never edited afterwards, only moved into
/// the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub worker: String,
    pub status: ResultStatus,
    pub timestamp_start: DateTime<Utc>,
    pub timestamp_complete: DateTime<Utc>,
    pub execution_time_seconds: f64,
    #[serde(default)]
    pub findings: Findings,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TaskResult {
    /// Create a completed result for a task.
    pub fn complete(task_id: impl Into<String>, worker: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            worker: worker.into(),
            status: ResultStatus::Complete,
            timestamp_start: now,
            timestamp_complete: now,
            execution_time_seconds: 0.0,
            findings: Findings::default(),
            artifacts: Vec::new(),
            errors: Vec::new(),
            metadata: None,
        }
    }

    /// Set the status.
    pub fn with_status(mut self, status: ResultStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the findings summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.findings.summary = summary.into();
        self
    }
}

/// Periodically refreshed liveness record, written by the worker itself.
///
/// A weak signal: absence or staleness downgrades classification confidence
/// but does not by itself prove the worker is dead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker: String,
    pub status: String,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default)]
    pub tasks_completed: u64,
}

impl Heartbeat {
    /// Create a heartbeat stamped now.
    pub fn new(worker: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            status: status.into(),
            last_updated: Utc::now(),
            current_task: None,
            tasks_completed: 0,
        }
    }

    /// Age of the heartbeat relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_updated)
    }

    /// Whether the heartbeat is older than the expiry window.
    pub fn is_stale(&self, now: DateTime<Utc>, expiry: std::time::Duration) -> bool {
        self.age(now)
            .to_std()
            .map(|age| age > expiry)
            .unwrap_or(false)
    }
}

/// Archive classification for a terminal task/result pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveClass {
    /// Result reported complete.
    Success,
    /// Result reported error or partial.
    Failed,
    /// Task with no result ever, or result with no matching task.
    Orphaned,
}

impl ArchiveClass {
    /// Directory name under the per-worker archive root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Orphaned => "orphaned",
        }
    }

    /// Classification for a result status.
    pub fn from_result_status(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Complete => Self::Success,
            ResultStatus::Error | ResultStatus::Partial => Self::Failed,
        }
    }
}

/// The terminal record: an archived task with its result, if one appeared.
///
/// Invariant: `result` is `Some` unless `classification` is `Orphaned`
/// (task present, no result) — or the entry holds only a result
/// (`task` is `None`) for an orphaned result whose task was already gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    pub classification: ArchiveClass,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveEntry {
    /// The task id this entry is keyed by.
    pub fn task_id(&self) -> Option<&str> {
        self.task
            .as_ref()
            .map(|t| t.id.as_str())
            .or_else(|| self.result.as_ref().map(|r| r.task_id.as_str()))
    }
}
