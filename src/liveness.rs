//! Liveness classification — a worker's state from observable signals.
//!
//! The session exposes no structured status, so state is inferred from the
//! process check, the recent output stream, and the heartbeat record. The
//! checks run in strict priority order because the signals coexist: a
//! worker parked on a first-run setup screen produces no output and would
//! read as idle under a naive "no new output" rule, which is exactly the
//! false positive the ordering exists to prevent.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::FleetConfig;
use crate::error::SessionError;
use crate::model::Heartbeat;
use crate::session::SessionBackend;

/// Number of tail lines captured for classification.
const CAPTURE_LINES: usize = 40;

/// Setup/first-run screens a worker can silently park on. A session showing
/// one of these must never be activated: injected input is ignored at best
/// and answers the wrong prompt at worst.
static INITIALIZING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)welcome to .+ (setup|onboarding)",
        r"(?i)first[- ]run (setup|configuration)",
        r"(?i)choose (an option|a theme|the text style)",
        r"(?i)select your .+:",
        r"(?i)do you trust the files in this (folder|directory)",
        r"(?i)press enter to continue",
        r"(?i)(sign in|log ?in) to continue",
        r"(?i)paste (your|the) (code|token) here",
        r"(?i)license agreement",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Markers that the session is sitting at an input prompt, ready for text.
static READY_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Shell-style prompt at the end of the last line.
        r"[❯>$%]\s*$",
        // Boxed input field some interactive UIs draw.
        r"│\s*[>❯]",
        r"(?i)ready for input",
        r"(?i)type your (message|request)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Worker liveness state, highest classification priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Process not running. Terminal until an external restart.
    Offline,
    /// Parked on a setup screen; activation is forbidden.
    Initializing,
    /// Actively producing output.
    Busy,
    /// Quiet and showing a ready prompt; the only activatable state.
    Idle,
    /// No conclusive match; conservatively not activatable.
    Unknown,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Initializing => "initializing",
            Self::Busy => "busy",
            Self::Idle => "idle",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl WorkerState {
    /// Whether activation is safe in this state.
    pub fn is_activatable(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Process exit code for the `status` operator command.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::Busy => 1,
            Self::Initializing => 2,
            Self::Offline => 3,
            Self::Unknown => 4,
        }
    }
}

/// How firmly the classifier stands behind a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Definite,
    Probable,
    Low,
}

/// A classification result with its supporting reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub state: WorkerState,
    pub confidence: Confidence,
    pub reason: String,
}

/// One observation of a worker: everything classification needs, gathered
/// up front so `classify` stays a pure function.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Process-liveness check; authoritative for Offline.
    pub running: bool,
    /// Recent visible output tail.
    pub tail: String,
    /// New output lines during the sampling window.
    pub new_lines: usize,
    /// The worker's heartbeat, if one was readable.
    pub heartbeat: Option<Heartbeat>,
}

/// Classifier thresholds, derived from the fleet config.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub busy_line_threshold: usize,
    pub possibly_busy_threshold: usize,
    pub heartbeat_expiry: Duration,
}

impl From<&FleetConfig> for ClassifierConfig {
    fn from(config: &FleetConfig) -> Self {
        Self {
            busy_line_threshold: config.busy_line_threshold,
            possibly_busy_threshold: config.possibly_busy_threshold,
            heartbeat_expiry: config.heartbeat_expiry,
        }
    }
}

/// Classify one observation. Checks run top to bottom; first match wins.
pub fn classify(obs: &Observation, config: &ClassifierConfig) -> Verdict {
    // 1. Offline — the process check is authoritative; heartbeat staleness
    //    never contributes here.
    if !obs.running {
        return Verdict {
            state: WorkerState::Offline,
            confidence: Confidence::Definite,
            reason: "session process is not running".to_string(),
        };
    }

    // 2. Initializing — must precede idle/busy: a setup screen is silent.
    if let Some(pattern) = match_initializing(&obs.tail) {
        return Verdict {
            state: WorkerState::Initializing,
            confidence: Confidence::Definite,
            reason: format!("output matches setup pattern `{pattern}`"),
        };
    }

    let stale_heartbeat = obs
        .heartbeat
        .as_ref()
        .map(|hb| hb.is_stale(Utc::now(), config.heartbeat_expiry))
        .unwrap_or(true);

    // 3. Busy — output volume over the sampling window.
    if obs.new_lines > config.busy_line_threshold {
        return Verdict {
            state: WorkerState::Busy,
            confidence: downgrade_if(Confidence::Definite, stale_heartbeat),
            reason: format!("{} new output lines in window", obs.new_lines),
        };
    }
    if obs.new_lines >= config.possibly_busy_threshold {
        return Verdict {
            state: WorkerState::Busy,
            confidence: downgrade_if(Confidence::Probable, stale_heartbeat),
            reason: format!("{} new output lines in window (possibly busy)", obs.new_lines),
        };
    }

    // 4. Idle — quiet AND a recognized ready prompt. Quiet alone is not
    //    enough; that was the original misclassification.
    if obs.new_lines == 0 && has_ready_marker(&obs.tail) {
        return Verdict {
            state: WorkerState::Idle,
            confidence: downgrade_if(Confidence::Definite, stale_heartbeat),
            reason: "no new output and ready prompt visible".to_string(),
        };
    }

    // 5. Unknown — nothing conclusive; surfaced for operator inspection.
    Verdict {
        state: WorkerState::Unknown,
        confidence: Confidence::Low,
        reason: format!(
            "inconclusive: {} new lines, no ready prompt recognized",
            obs.new_lines
        ),
    }
}

fn downgrade_if(confidence: Confidence, stale: bool) -> Confidence {
    if !stale {
        return confidence;
    }
    match confidence {
        Confidence::Definite => Confidence::Probable,
        Confidence::Probable | Confidence::Low => Confidence::Low,
    }
}

/// First initializing pattern matching the output tail, if any.
fn match_initializing(tail: &str) -> Option<&'static str> {
    INITIALIZING_PATTERNS
        .iter()
        .find(|re| re.is_match(tail))
        .map(|re| re.as_str())
}

/// Whether the last non-empty line (or the tail as a whole) shows a ready
/// prompt marker.
fn has_ready_marker(tail: &str) -> bool {
    let last_line = tail.lines().rev().find(|l| !l.trim().is_empty());
    match last_line {
        Some(line) => READY_MARKERS.iter().any(|re| re.is_match(line)),
        None => false,
    }
}

/// Count lines in `after` that were not yet present in `before`.
///
/// Finds the latest line of `before` inside `after` and counts what follows
/// it; if no overlap exists, the whole capture counts as new. Good enough
/// for a volume heuristic over a scrolling pane.
pub fn count_new_lines(before: &str, after: &str) -> usize {
    let after_lines: Vec<&str> = after.lines().collect();
    let anchor = before.lines().rev().find(|l| !l.trim().is_empty());
    let Some(anchor) = anchor else {
        return after_lines.iter().filter(|l| !l.trim().is_empty()).count();
    };

    match after_lines.iter().rposition(|l| *l == anchor) {
        Some(pos) => after_lines[pos + 1..]
            .iter()
            .filter(|l| !l.trim().is_empty())
            .count(),
        None => after_lines.iter().filter(|l| !l.trim().is_empty()).count(),
    }
}

/// Gather an observation for a worker by sampling the session twice across
/// the configured window. This is the only place classification waits.
pub async fn observe(
    backend: &Arc<dyn SessionBackend>,
    worker: &str,
    window: Duration,
    heartbeat: Option<Heartbeat>,
) -> Result<Observation, SessionError> {
    if !backend.is_running(worker).await {
        return Ok(Observation {
            running: false,
            heartbeat,
            ..Observation::default()
        });
    }

    let before = backend.capture_tail(worker, CAPTURE_LINES).await?;
    if !window.is_zero() {
        tokio::time::sleep(window).await;
    }
    let after = backend.capture_tail(worker, CAPTURE_LINES).await?;

    Ok(Observation {
        running: true,
        new_lines: count_new_lines(&before, &after),
        tail: after,
        heartbeat,
    })
}
