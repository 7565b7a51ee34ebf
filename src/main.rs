use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use fleetd::archive::Archiver;
use fleetd::config::FleetConfig;
use fleetd::dispatch::Dispatcher;
use fleetd::model::{Heartbeat, Task, TaskPriority};
use fleetd::monitor::Monitor;
use fleetd::session::{SessionBackend, TmuxBackend};
use fleetd::store::{FleetPaths, HeartbeatStore, TaskStore};

/// Orchestrator for interactive terminal workers.
#[derive(Parser)]
#[command(name = "fleetd", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the monitor daemon.
    Run,
    /// Queue a task for a worker and print its id.
    Enqueue {
        #[arg(long)]
        worker: String,
        /// Task priority: low, normal, high, urgent.
        #[arg(long, default_value = "normal")]
        priority: TaskPriority,
        /// Advisory timeout in seconds (declared on the record, not enforced).
        #[arg(long)]
        timeout: Option<u64>,
        description: String,
    },
    /// Force-activate a worker regardless of triggers.
    Activate {
        #[arg(long)]
        worker: String,
        /// Message to inject; defaults to a queue-check prompt.
        #[arg(long)]
        message: Option<String>,
    },
    /// List pending (or archived) tasks for a worker.
    List {
        #[arg(long)]
        worker: String,
        /// Show archived entries instead of the pending queue.
        #[arg(long)]
        archived: bool,
    },
    /// Report a worker's liveness verdict. The exit code encodes the state:
    /// idle=0, busy=1, initializing=2, offline=3, unknown=4.
    Status {
        #[arg(long)]
        worker: String,
    },
    /// Write a heartbeat record (the in-worker liveness hook).
    Heartbeat {
        #[arg(long)]
        worker: String,
        #[arg(long)]
        status: String,
        /// Task the worker is currently executing, if any.
        #[arg(long)]
        task: Option<String>,
        #[arg(long, default_value_t = 0)]
        completed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = FleetConfig::from_env();
    let paths = FleetPaths::new(config.root.clone());
    let backend: Arc<dyn SessionBackend> = Arc::new(TmuxBackend::new(&config.session_prefix));

    match cli.command {
        Command::Run => {
            eprintln!("fleetd v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("  Root: {}", config.root.display());
            eprintln!(
                "  Poll: {}s, archive sweep every {} ticks, settle wait {}s",
                config.poll_interval.as_secs(),
                config.archive_sweep_ticks,
                config.settle_wait.as_secs(),
            );
            let monitor = Monitor::new(config, backend);
            monitor
                .spawn()
                .await
                .context("monitor loop terminated unexpectedly")?;
        }

        Command::Enqueue {
            worker,
            priority,
            timeout,
            description,
        } => {
            let mut task = Task::new(description).with_priority(priority);
            if let Some(secs) = timeout {
                task = task.with_timeout_seconds(secs);
            }
            let id = TaskStore::new(paths)
                .enqueue(&worker, &task)
                .await
                .with_context(|| format!("failed to enqueue task for {worker}"))?;
            println!("{id}");
        }

        Command::Activate { worker, message } => {
            let dispatcher = Dispatcher::new(backend, paths, &config);
            let message = message.unwrap_or_else(|| {
                "You have pending work. Check your task queue and execute the oldest task."
                    .to_string()
            });
            let report = dispatcher
                .activate(&worker, &message)
                .await
                .with_context(|| format!("activation failed for {worker}"))?;
            println!(
                "delivered via {} in {:.1}s (confirmed: {})",
                report.tier,
                report.elapsed.as_secs_f64(),
                report.confirmed,
            );
        }

        Command::List { worker, archived } => {
            if archived {
                let entries = Archiver::new(paths).list(&worker).await?;
                for entry in entries {
                    println!(
                        "{}  {}  {}",
                        entry.archived_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.classification.dir_name(),
                        entry.task_id().unwrap_or("<unknown>"),
                    );
                }
            } else {
                let pending = TaskStore::new(paths).list_pending(&worker).await?;
                for task in pending {
                    println!("{}  {}  {}", task.id, task.priority, task.description);
                }
            }
        }

        Command::Status { worker } => {
            let monitor = Monitor::new(config, backend);
            let verdict = monitor.classify(&worker).await;
            println!(
                "{}: {} ({:?}): {}",
                worker, verdict.state, verdict.confidence, verdict.reason
            );
            std::process::exit(verdict.state.exit_code());
        }

        Command::Heartbeat {
            worker,
            status,
            task,
            completed,
        } => {
            let mut heartbeat = Heartbeat::new(&worker, status);
            heartbeat.current_task = task;
            heartbeat.tasks_completed = completed;
            HeartbeatStore::new(paths)
                .write(&heartbeat)
                .await
                .with_context(|| format!("failed to write heartbeat for {worker}"))?;
        }
    }

    Ok(())
}
