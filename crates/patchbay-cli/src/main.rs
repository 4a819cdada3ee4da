//! patchbay: headless OSC/PSN router
//!
//! Loads a routing table file, runs the engine, and prints the drained log
//! and status changes until Ctrl-C.

mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use patchbay_core::log::{LogEntry, Severity};
use patchbay_core::status::StatusTable;
use patchbay_engine::Engine;

/// Poll cadence for log/status flushing.
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(version, about = "OSC/PSN packet router", long_about = None)]
struct Cli {
    /// Routing table file
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Reconnect delay for failed workers, in milliseconds (0 disables)
    #[arg(short, long, default_value_t = 5000)]
    reconnect_delay: u32,

    /// Print per-packet send/receive lines
    #[arg(long)]
    traffic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let loaded = config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if loaded.routes.is_empty() && loaded.endpoints.is_empty() {
        anyhow::bail!("{} contains no routes or tcp endpoints", cli.config.display());
    }
    println!(
        "{} {} routes, {} tcp endpoints",
        "loaded".green(),
        loaded.routes.len(),
        loaded.endpoints.len()
    );

    let labels = loaded.labels;
    let mut observer = loaded.status.clone();
    let mut engine = Engine::new();
    engine.start(
        loaded.routes,
        loaded.endpoints,
        loaded.status,
        cli.reconnect_delay,
    )?;

    let mut log: Vec<LogEntry> = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted, shutting down");
                break;
            }
            _ = tokio::time::sleep(FLUSH_INTERVAL) => {
                engine.flush(&mut log, &mut observer);
                print_log(&mut log, cli.traffic);
                print_status_changes(&labels, &mut observer);
            }
        }
    }

    engine.stop().await;
    engine.flush(&mut log, &mut observer);
    print_log(&mut log, cli.traffic);
    Ok(())
}

fn print_log(log: &mut Vec<LogEntry>, traffic: bool) {
    for entry in log.drain(..) {
        if matches!(entry.severity, Severity::Send | Severity::Recv) && !traffic {
            continue;
        }
        let tag = match entry.severity {
            Severity::Debug => "debug".dimmed(),
            Severity::Info => " info".normal(),
            Severity::Warning => " warn".yellow(),
            Severity::Error => "error".red(),
            Severity::Send => " send".cyan(),
            Severity::Recv => " recv".green(),
        };
        println!("{tag} {}", entry.message);
    }
}

fn print_status_changes(labels: &[String], observer: &mut StatusTable) {
    for (id, row) in observer.rows().iter().enumerate() {
        if !row.dirty {
            continue;
        }
        let label = labels.get(id).map(String::as_str).unwrap_or("?");
        let state = row.state.name();
        let activity = if row.activity { " *" } else { "" };
        println!("{} {label}: {state}{activity}", "state".blue());
    }
    observer.reset();
}
