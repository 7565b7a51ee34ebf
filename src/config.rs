//! Configuration types.
//!
//! All tunables are read from `FLEETD_*` environment variables with
//! defaults suitable for a small local fleet.

use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Root directory for all per-worker queues and the archive.
    pub root: PathBuf,
    /// Monitor loop poll interval.
    pub poll_interval: Duration,
    /// Archive sweep runs every Nth monitor tick.
    pub archive_sweep_ticks: u64,
    /// Settling delay before a completed task/result pair is archived.
    pub archive_settle: Duration,
    /// Grace period before a result with no matching task is archived as orphaned.
    pub orphan_grace: Duration,
    /// Wait after submitting an activation message before detaching.
    pub settle_wait: Duration,
    /// Hard timeout for the whole activation sequence.
    pub activation_timeout: Duration,
    /// Output sampling window for busy detection.
    pub sample_window: Duration,
    /// New lines in the window above which a worker is definitely busy.
    pub busy_line_threshold: usize,
    /// New lines at or above which a worker is possibly busy.
    pub possibly_busy_threshold: usize,
    /// Heartbeats older than this downgrade classification confidence.
    pub heartbeat_expiry: Duration,
    /// Prefix for tmux session names: session = "{prefix}{worker}".
    pub session_prefix: String,
    /// One-shot fallback command template; `{worker}` and `{message}` are
    /// substituted. Empty disables the one-shot tier.
    pub one_shot_command: Option<String>,
}

impl FleetConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            root: std::env::var("FLEETD_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root),
            poll_interval: env_secs("FLEETD_POLL_INTERVAL_SECS", defaults.poll_interval),
            archive_sweep_ticks: env_parse("FLEETD_ARCHIVE_SWEEP_TICKS", defaults.archive_sweep_ticks),
            archive_settle: env_secs("FLEETD_ARCHIVE_SETTLE_SECS", defaults.archive_settle),
            orphan_grace: env_secs("FLEETD_ORPHAN_GRACE_SECS", defaults.orphan_grace),
            settle_wait: env_secs("FLEETD_SETTLE_WAIT_SECS", defaults.settle_wait),
            activation_timeout: env_secs("FLEETD_ACTIVATION_TIMEOUT_SECS", defaults.activation_timeout),
            sample_window: env_secs("FLEETD_SAMPLE_WINDOW_SECS", defaults.sample_window),
            busy_line_threshold: env_parse("FLEETD_BUSY_LINES", defaults.busy_line_threshold),
            possibly_busy_threshold: env_parse("FLEETD_POSSIBLY_BUSY_LINES", defaults.possibly_busy_threshold),
            heartbeat_expiry: env_secs("FLEETD_HEARTBEAT_EXPIRY_SECS", defaults.heartbeat_expiry),
            session_prefix: std::env::var("FLEETD_SESSION_PREFIX").unwrap_or(defaults.session_prefix),
            one_shot_command: std::env::var("FLEETD_ONE_SHOT_CMD")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            root: PathBuf::from(home).join(".fleetd"),
            poll_interval: Duration::from_secs(3),
            archive_sweep_ticks: 5,
            archive_settle: Duration::from_secs(5),
            orphan_grace: Duration::from_secs(300),
            settle_wait: Duration::from_secs(10),
            activation_timeout: Duration::from_secs(30),
            sample_window: Duration::from_secs(3),
            busy_line_threshold: 10,
            possibly_busy_threshold: 3,
            heartbeat_expiry: Duration::from_secs(120),
            session_prefix: "fleet-".to_string(),
            one_shot_command: None,
        }
    }
}

/// Parse an env var as whole seconds, falling back to `default`.
fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Parse an env var with `FromStr`, falling back to `default`.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_values() {
        let config = FleetConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.archive_sweep_ticks, 5);
        assert_eq!(config.settle_wait, Duration::from_secs(10));
        assert_eq!(config.busy_line_threshold, 10);
        assert_eq!(config.possibly_busy_threshold, 3);
    }

    #[test]
    fn activation_timeout_bounds_settle_wait() {
        let config = FleetConfig::default();
        assert!(config.activation_timeout > config.settle_wait);
    }
}
