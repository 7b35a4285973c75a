mod api;
mod cli;
mod commands;
mod config;
mod error;
mod git;
mod lookup;
mod mdns;
mod registry;
mod snapshot;

use anyhow::Result;
use clap::Parser;
use crate::cli::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gitjour=info"))
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;

    commands::run(cli.command, config).await
}
