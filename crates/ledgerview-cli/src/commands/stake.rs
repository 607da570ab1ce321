//! Stake command - change an account's stake.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use ledgerview_core::Address;
use ledgerview_engine::domains::stake::{accrued_reward, StakeDomain, StakePosition};
use ledgerview_engine::Provenance;

use crate::session::{
    print_submissions, provenance_json, provenance_label, CycleTally, Session, SubmissionRow,
};
use crate::{parse_address, Config, OutputFormat};

const YEAR: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Arguments for the stake command.
#[derive(Debug, Args)]
pub struct StakeArgs {
    /// Staking contract address.
    #[arg(long, default_value = "0x57a4e", value_parser = parse_address)]
    pub contract: Address,

    /// Stake changes to submit, in order (repeatable, may be negative).
    #[arg(long = "delta", short = 'd', allow_negative_numbers = true)]
    pub deltas: Vec<i64>,

    /// Stake changes made by the neighbor.
    #[arg(long = "foreign-delta", allow_negative_numbers = true)]
    pub foreign_deltas: Vec<i64>,

    /// Annual reward rate in basis points, for the reward estimate.
    #[arg(long, default_value_t = 500)]
    pub apr_bps: u32,
}

/// One account in the merged view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRow {
    /// Staking account.
    pub account: Address,
    /// Visible position.
    pub position: StakePosition,
    /// Estimated reward over a year at the configured rate.
    pub yearly_reward: i128,
    /// Where the position came from.
    pub provenance: Provenance,
}

/// Outcome of a stake session.
#[derive(Debug, Clone)]
pub struct StakeReport {
    /// Positions by account.
    pub positions: Vec<PositionRow>,
    /// Sum of visible balances.
    pub total: i128,
    /// The session's own changes.
    pub submissions: Vec<SubmissionRow>,
    /// Cycle totals.
    pub tally: CycleTally,
    /// Ledger head when the session ended.
    pub head: u64,
}

/// Runs a stake session and returns the positions.
///
/// # Errors
///
/// Returns an error if a change is rejected.
pub async fn run(args: &StakeArgs, config: &Config) -> Result<StakeReport> {
    let domain = StakeDomain::new(args.contract.clone());
    let shape = domain.shape();
    let session = Session::open(domain, args.contract.clone(), shape, config)?;

    let mut neighbor = None;
    for delta in &args.foreign_deltas {
        let position = StakePosition::propose(neighbor.as_ref(), *delta);
        session.inject_foreign(&config.neighbor, &position, &config.neighbor)?;
        neighbor = Some(position);
    }

    session.sync().await;
    let engine = session.engine();
    let mut submitted = Vec::with_capacity(args.deltas.len());
    for delta in &args.deltas {
        let current = engine.merged_value(&config.account).map(|cell| cell.value);
        let proposed = StakePosition::propose(current.as_ref(), *delta);
        let local_id = engine
            .submit(config.account.clone(), proposed)
            .with_context(|| format!("Failed to change stake by {delta}"))?;
        submitted.push((local_id, format!("stake {delta:+}")));
    }

    let tally = session.run_cycles().await;

    let view = engine.merged_view();
    let positions = view
        .iter()
        .map(|(account, cell)| PositionRow {
            account: account.clone(),
            position: cell.value,
            yearly_reward: accrued_reward(cell.value.balance, args.apr_bps, YEAR),
            provenance: cell.provenance,
        })
        .collect();
    let report = StakeReport {
        positions,
        total: StakeDomain::total_staked(&view),
        submissions: session.submission_rows(submitted),
        tally,
        head: session.head(),
    };

    session.close().await?;
    Ok(report)
}

/// Execute the stake command.
///
/// # Errors
///
/// Returns an error if the session fails or the output cannot be serialized.
pub async fn execute(args: StakeArgs, config: &Config) -> Result<()> {
    let report = run(&args, config).await?;

    match config.format {
        OutputFormat::Json => {
            // Balances are i128; emit them as strings.
            let positions: Vec<_> = report
                .positions
                .iter()
                .map(|row| {
                    serde_json::json!({
                        "account": row.account.as_str(),
                        "balance": row.position.balance.to_string(),
                        "lastDelta": row.position.last_delta,
                        "yearlyReward": row.yearly_reward.to_string(),
                        "provenance": provenance_json(&row.provenance),
                    })
                })
                .collect();
            let submissions: Vec<_> = report.submissions.iter().map(SubmissionRow::to_json).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "head": report.head,
                    "positions": positions,
                    "total": report.total.to_string(),
                    "submissions": submissions,
                    "cyclesApplied": report.tally.applied,
                    "cyclesFailed": report.tally.failed,
                }))
                .context("Failed to serialize positions")?
            );
        }
        OutputFormat::Text => {
            println!(
                "Stake at block {} ({} cycles applied)",
                report.head, report.tally.applied
            );
            println!();
            for row in &report.positions {
                println!(
                    "  {:<12} {:>12}  (last {:+}, ~{}/yr)  {}",
                    row.account.as_str(),
                    row.position.balance,
                    row.position.last_delta,
                    row.yearly_reward,
                    provenance_label(&row.provenance)
                );
            }
            println!("  {:<12} {:>12}", "total", report.total);
            print_submissions(&report.submissions);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;
    use ledgerview_engine::EngineConfig;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: StakeArgs,
    }

    fn config() -> Config {
        Config {
            account: Address::new("0xa11ce").unwrap(),
            neighbor: Address::new("0xb0b").unwrap(),
            block_interval: Duration::from_millis(100),
            cycles: 3,
            engine: EngineConfig::default(),
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn test_stake_args_accept_negative_deltas() {
        let cli = TestCli::parse_from(["test", "--delta", "100", "-d", "-40", "--foreign-delta", "-5"]);
        assert_eq!(cli.args.deltas, vec![100, -40]);
        assert_eq!(cli.args.foreign_deltas, vec![-5]);
        assert_eq!(cli.args.apr_bps, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deltas_accumulate() {
        let cli = TestCli::parse_from([
            "test",
            "--delta",
            "100",
            "--delta",
            "-40",
            "--foreign-delta",
            "50",
        ]);

        let report = run(&cli.args, &config()).await.unwrap();

        assert_eq!(report.total, 110);
        let mine = report
            .positions
            .iter()
            .find(|row| row.account.as_str() == "0xa11ce")
            .unwrap();
        assert_eq!(mine.position.balance, 60);
        assert_eq!(mine.position.last_delta, -40);
        assert_eq!(mine.yearly_reward, 3);
        assert!(!mine.provenance.is_optimistic());
        assert!(report.submissions.iter().all(|row| row.status == "confirmed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delta_is_rejected() {
        let cli = TestCli::parse_from(["test", "--delta", "0"]);
        assert!(run(&cli.args, &config()).await.is_err());
    }
}
