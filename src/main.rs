use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use mintstream::app::{Config, Daemon};

#[derive(Parser)]
#[command(name = "mintstream", about = "Token-launch stream ingest and holder analysis daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default).
    Run,
    /// Validate the configuration and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if matches!(cli.command, Some(Command::CheckConfig)) {
        println!("Configuration OK: {}", cli.config.display());
        return;
    }

    config.init_logging();
    info!("mintstream starting");

    if let Err(e) = run(config).await {
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }

    info!("mintstream stopped");
}

async fn run(config: Config) -> anyhow::Result<()> {
    let daemon = Daemon::build(config).await.context("building daemon")?;
    daemon.start().await.context("starting daemon")?;

    signal::ctrl_c().await.context("listening for shutdown signal")?;
    info!("Shutdown signal received");

    daemon.shutdown().await;
    Ok(())
}
