//! Host binary for the cognitive runtime.

use clap::Parser;
use dawn::{RuntimeConfig, TickScheduler};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Autonomous cognitive runtime.
#[derive(Debug, Parser)]
#[command(name = "dawn", version, about)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory for persisted state
    #[arg(long, env = "DAWN_STATE_ROOT")]
    state_root: Option<PathBuf>,

    /// Stop after this many ticks (runs until interrupted when absent)
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Initial tick interval in seconds
    #[arg(long)]
    interval: Option<f64>,

    /// Session identifier for the memory log
    #[arg(long)]
    session_id: Option<String>,

    /// Export a state snapshot on exit
    #[arg(long)]
    snapshot_on_exit: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let mut config = RuntimeConfig::load(cli.config.as_deref())?;
    if let Some(root) = cli.state_root {
        config = config.with_state_root(root);
    }
    if let Some(session) = cli.session_id {
        config = config.with_session_id(session);
    }

    let mut scheduler = TickScheduler::new(config)?;
    let stop = scheduler.stop_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current cycle");
            stop.stop();
        }
    });

    let interval = cli.interval.map(Duration::from_secs_f64);
    if let Err(e) = scheduler.start(cli.max_ticks, interval).await {
        error!(error = %e, "runtime stopped on fatal error");
        return Err(e.into());
    }

    let status = scheduler.status();
    info!(
        ticks = status.tick_count,
        chunks = status.chunks_stored,
        sigils = status.sigils_executed,
        interventions = status.interventions_issued,
        "runtime exited"
    );

    if cli.snapshot_on_exit {
        let path = scheduler.export_snapshot()?;
        info!(path = %path.display(), "snapshot written");
    }

    Ok(())
}
