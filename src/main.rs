//! MeshClip - clipboard and file sharing over a private mesh network
//!
//! This is the main entry point for the meshclip binary.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshclip::cli::{Cli, CliHandler};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Daemonize before the runtime exists; forking a process that has
    // already spawned worker threads is not safe.
    #[cfg(unix)]
    if cli.command.wants_daemon() {
        if meshclip::daemon::is_daemon_running()? {
            anyhow::bail!("meshclip is already running");
        }
        meshclip::daemon::daemonize(cli.command.daemon_log_file())?;
    }

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("meshclip={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    info!("MeshClip v{}", env!("CARGO_PKG_VERSION"));

    let handler = CliHandler::new(cli.config)?;
    handler.handle_command(cli.command).await
}
