//! rootcause daemon: serves the investigation HTTP API.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use rc_daemon::daemon::{load_config, Daemon};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "rootcause-daemon", version, about = "Root cause analysis API server")]
struct Args {
    /// Path to config.toml (defaults to $ROOTCAUSE_CONFIG or ~/.rootcause/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Credentials may come from a local .env file.
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    rc_telemetry::logging::init_from_config(&config.general);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "rootcause daemon starting"
    );

    let daemon = Daemon::new(config)?;
    let shutdown = daemon.shutdown_handle();

    // Wire ctrl-c to trigger graceful shutdown.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    daemon.run().await
}
