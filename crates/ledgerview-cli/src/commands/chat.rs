//! Chat command - post messages to a mailbox.

use anyhow::{Context, Result};
use clap::Args;
use ledgerview_core::Address;
use ledgerview_engine::domains::chat::{ChatDomain, FeedItem, Message, MessageKey};

use crate::session::{
    print_submissions, provenance_json, provenance_label, CycleTally, Session, SubmissionRow,
};
use crate::{parse_address, Config, OutputFormat};

/// Arguments for the chat command.
#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Mailbox address.
    #[arg(long, default_value = "0xc4a7", value_parser = parse_address)]
    pub mailbox: Address,

    /// Messages to post (repeatable).
    #[arg(long = "post", short = 'm')]
    pub posts: Vec<String>,

    /// Messages the neighbor posts before the session's own.
    #[arg(long = "foreign-post")]
    pub foreign_posts: Vec<String>,
}

/// Outcome of a chat session.
#[derive(Debug, Clone)]
pub struct ChatReport {
    /// Feed in display order.
    pub feed: Vec<FeedItem>,
    /// The session's own posts.
    pub submissions: Vec<SubmissionRow>,
    /// Cycle totals.
    pub tally: CycleTally,
    /// Ledger head when the session ended.
    pub head: u64,
}

/// Runs a chat session and returns the feed.
///
/// # Errors
///
/// Returns an error if a message is rejected.
pub async fn run(args: &ChatArgs, config: &Config) -> Result<ChatReport> {
    let domain = ChatDomain::new(args.mailbox.clone());
    let shape = domain.shape();
    let session = Session::open(domain, args.mailbox.clone(), shape, config)?;

    for (nonce, text) in (0u64..).zip(&args.foreign_posts) {
        let key = MessageKey::new(config.neighbor.clone(), nonce);
        session.inject_foreign(&key, &Message::new(text.as_str()), &config.neighbor)?;
    }

    session.sync().await;
    let engine = session.engine();
    let mut submitted = Vec::with_capacity(args.posts.len());
    for text in &args.posts {
        let nonce = engine.read(|projection, overlay| {
            ChatDomain::next_nonce(projection, overlay, &config.account)
        });
        let local_id = engine
            .submit(
                MessageKey::new(config.account.clone(), nonce),
                Message::new(text.as_str()),
            )
            .with_context(|| format!("Failed to post '{text}'"))?;
        submitted.push((local_id, format!("post #{nonce} \"{text}\"")));
    }

    let tally = session.run_cycles().await;
    let report = ChatReport {
        feed: ChatDomain::feed(&engine.merged_view()),
        submissions: session.submission_rows(submitted),
        tally,
        head: session.head(),
    };

    session.close().await?;
    Ok(report)
}

/// Execute the chat command.
///
/// # Errors
///
/// Returns an error if the session fails or the output cannot be serialized.
pub async fn execute(args: ChatArgs, config: &Config) -> Result<()> {
    let report = run(&args, config).await?;

    match config.format {
        OutputFormat::Json => {
            let feed: Vec<_> = report
                .feed
                .iter()
                .map(|item| {
                    serde_json::json!({
                        "author": item.key.author.as_str(),
                        "nonce": item.key.nonce,
                        "text": item.text,
                        "provenance": provenance_json(&item.provenance),
                    })
                })
                .collect();
            let submissions: Vec<_> = report.submissions.iter().map(SubmissionRow::to_json).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "head": report.head,
                    "feed": feed,
                    "submissions": submissions,
                    "cyclesApplied": report.tally.applied,
                    "cyclesFailed": report.tally.failed,
                }))
                .context("Failed to serialize feed")?
            );
        }
        OutputFormat::Text => {
            println!(
                "Feed at block {} ({} cycles applied)",
                report.head, report.tally.applied
            );
            println!();
            if report.feed.is_empty() {
                println!("  (no messages)");
            }
            for item in &report.feed {
                let marker = if item.provenance.is_optimistic() { "~" } else { " " };
                println!(
                    " {marker}{}: {}  [{}]",
                    item.key.author,
                    item.text,
                    provenance_label(&item.provenance)
                );
            }
            print_submissions(&report.submissions);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use clap::Parser;
    use ledgerview_engine::EngineConfig;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ChatArgs,
    }

    fn config(cycles: u32) -> Config {
        Config {
            account: Address::new("0xa11ce").unwrap(),
            neighbor: Address::new("0xb0b").unwrap(),
            block_interval: Duration::from_millis(100),
            cycles,
            engine: EngineConfig::default(),
            format: OutputFormat::Json,
        }
    }

    #[test]
    fn test_chat_args_parsing() {
        let cli = TestCli::parse_from(["test", "-m", "gm", "--post", "wagmi", "--foreign-post", "hi"]);
        assert_eq!(cli.args.posts, vec!["gm", "wagmi"]);
        assert_eq!(cli.args.foreign_posts, vec!["hi"]);
        assert_eq!(cli.args.mailbox.as_str(), "0xc4a7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_posts_show_before_confirmation() {
        let cli = TestCli::parse_from(["test", "--post", "first", "--post", "second"]);

        let report = run(&cli.args, &config(0)).await.unwrap();

        assert_eq!(report.tally.applied, 0);
        let texts: Vec<_> = report.feed.iter().map(|item| item.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert!(report.feed.iter().all(|item| item.provenance.is_optimistic()));
        assert_eq!(report.feed[1].key.nonce, 1);
        assert!(report.submissions.iter().all(|row| row.status == "pending"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_converges_on_the_log() {
        let cli = TestCli::parse_from(["test", "--post", "gm", "--foreign-post", "hello"]);

        let report = run(&cli.args, &config(3)).await.unwrap();

        let feed: Vec<_> = report
            .feed
            .iter()
            .map(|item| (item.key.author.as_str(), item.text.as_str()))
            .collect();
        assert_eq!(feed, vec![("0xb0b", "hello"), ("0xa11ce", "gm")]);
        assert!(report.feed.iter().all(|item| !item.provenance.is_optimistic()));
        assert_eq!(report.submissions[0].status, "confirmed");
        assert_eq!(report.tally.confirmed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_posts_are_rejected() {
        let cli = TestCli::parse_from(["test", "--post", "   "]);
        let err = run(&cli.args, &config(1)).await.unwrap_err();
        assert!(err.to_string().contains("Failed to post"));
    }
}
