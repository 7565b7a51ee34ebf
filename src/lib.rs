//! fleetd — orchestrator for interactive terminal workers.
//!
//! Coordinates a fleet of long-running tmux sessions that have no
//! programmatic API: tasks are queued as JSON files, workers are woken by
//! injecting keystrokes into their live session, and a polling monitor
//! reconciles queued work with completed results.

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod liveness;
pub mod model;
pub mod monitor;
pub mod session;
pub mod store;
