//! # ledgerview-cli
//!
//! Command-line simulator for the ledgerview projection engine.
//!
//! Each command opens an in-memory ledger that produces blocks on a timer,
//! attaches a projection engine for one domain, submits the writes given on
//! the command line, drives a number of reconciliation cycles and prints the
//! merged view.
//!
//! ## Commands
//!
//! - `ledgerview canvas` - Paint pixels on a shared canvas
//! - `ledgerview chat` - Post messages to a mailbox
//! - `ledgerview stake` - Change an account's stake
//!
//! ## Configuration
//!
//! Flags fall back to environment variables:
//!
//! - `LEDGERVIEW_ACCOUNT` - Account submitting writes (default: `0xa11ce`)
//! - `LEDGERVIEW_NEIGHBOR` - Account behind foreign writes (default: `0xb0b`)
//! - `LEDGERVIEW_BLOCK_INTERVAL_MS` - Simulated block time (default: 500)
//! - `LEDGERVIEW_CYCLES` - Reconciliation cycles to run (default: 4)
//!
//! Engine tunables are read with [`EngineConfig::from_env`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;
pub mod session;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledgerview_core::Address;
use ledgerview_engine::EngineConfig;

/// Ledgerview CLI - simulated event-log projections.
#[derive(Debug, Parser)]
#[command(name = "ledgerview")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Account submitting this session's writes.
    #[arg(long, env = "LEDGERVIEW_ACCOUNT", default_value = "0xa11ce", value_parser = parse_address)]
    pub account: Address,

    /// Account behind foreign writes.
    #[arg(long, env = "LEDGERVIEW_NEIGHBOR", default_value = "0xb0b", value_parser = parse_address)]
    pub neighbor: Address,

    /// Simulated block time in milliseconds.
    #[arg(long, env = "LEDGERVIEW_BLOCK_INTERVAL_MS", default_value_t = 500)]
    pub block_interval_ms: u64,

    /// Reconciliation cycles to run before printing.
    #[arg(long, env = "LEDGERVIEW_CYCLES", default_value_t = 4)]
    pub cycles: u32,

    /// Confirmations to wait for after each send.
    #[arg(long)]
    pub confirmation_depth: Option<u32>,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an engine environment variable is invalid or the
    /// flags describe an invalid session.
    pub fn config(&self) -> Result<Config> {
        if self.block_interval_ms == 0 {
            anyhow::bail!("Block interval must be greater than 0");
        }

        let mut engine = EngineConfig::from_env().context("Invalid engine configuration")?;
        if let Some(depth) = self.confirmation_depth {
            engine = engine.with_confirmation_depth(depth);
        }
        engine.validate().context("Invalid engine configuration")?;

        Ok(Config {
            account: self.account.clone(),
            neighbor: self.neighbor.clone(),
            block_interval: Duration::from_millis(self.block_interval_ms),
            cycles: self.cycles,
            engine,
            format: self.format.clone(),
        })
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Paint pixels on a shared canvas.
    Canvas(commands::canvas::CanvasArgs),
    /// Post messages to a mailbox.
    Chat(commands::chat::ChatArgs),
    /// Change an account's stake.
    Stake(commands::stake::StakeArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Account submitting writes.
    pub account: Address,
    /// Account behind foreign writes.
    pub neighbor: Address,
    /// Simulated block time.
    pub block_interval: Duration,
    /// Reconciliation cycles to run.
    pub cycles: u32,
    /// Engine tunables.
    pub engine: EngineConfig,
    /// Output format.
    pub format: OutputFormat,
}

/// Parses an address flag.
///
/// # Errors
///
/// Returns a description of the problem if `value` is not an address.
pub fn parse_address(value: &str) -> std::result::Result<Address, String> {
    Address::new(value).map_err(|e| e.to_string())
}
