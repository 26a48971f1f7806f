use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hbc-cli")]
#[command(about = "Hotelbeds content sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull records updated since the last run into the destination database.
    Sync,
    /// Serve the table query endpoint.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .compact()
        .init();
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Sync => {
            let summary = hbc_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} advanced={} unchanged={} failed={} rows={}",
                summary.run_id,
                summary.advanced(),
                summary.unchanged(),
                summary.failed(),
                summary.total_rows()
            );
        }
        Commands::Serve => hbc_web::serve_from_env().await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli.command.unwrap_or(Commands::Sync)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("an unexpected error occurred: {err:#}");
            ExitCode::FAILURE
        }
    }
}
