//! Ledgerview CLI - simulated projection sessions.
//!
//! The main entry point for the `ledgerview` binary.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledgerview_cli::{Cli, Commands};

fn main() -> Result<()> {
    // Logs go to stderr so JSON output stays clean.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Canvas(args) => ledgerview_cli::commands::canvas::execute(args, &config).await,
            Commands::Chat(args) => ledgerview_cli::commands::chat::execute(args, &config).await,
            Commands::Stake(args) => ledgerview_cli::commands::stake::execute(args, &config).await,
        }
    })
}
