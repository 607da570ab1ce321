//! Simulated session shared by the domain commands.
//!
//! A session owns an in-memory ledger, its block producer and one engine.
//! Cycles are driven explicitly, one per block interval, so the printed view
//! reflects exactly `--cycles` reconciliations.

use std::sync::Arc;

use anyhow::{Context, Result};
use ledgerview_core::{Address, EventShape, LocalId, LogSource, Submitter};
use ledgerview_engine::{
    CancelToken, CycleOutcome, Domain, EntryStatus, MemoryLedger, ProjectionEngine, Provenance,
};
use tokio::task::JoinHandle;

use crate::Config;

/// Totals over the cycles a session ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleTally {
    /// Cycles that applied a batch.
    pub applied: u32,
    /// Cycles whose fetch failed.
    pub failed: u32,
    /// Submissions confirmed by the log.
    pub confirmed: usize,
    /// Submissions that timed out.
    pub expired: usize,
}

/// Final state of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRow {
    /// Local id of the submission.
    pub local_id: LocalId,
    /// What was submitted.
    pub summary: String,
    /// `pending`, `confirmed` or `failed`.
    pub status: &'static str,
    /// Failure reason, if any.
    pub reason: Option<String>,
}

impl SubmissionRow {
    /// JSON form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "localId": self.local_id.to_string(),
            "summary": self.summary,
            "status": self.status,
            "reason": self.reason,
        })
    }
}

/// An engine attached to a simulated ledger.
pub struct Session<D: Domain> {
    ledger: Arc<MemoryLedger>,
    engine: ProjectionEngine<D>,
    shape: EventShape,
    producer_cancel: CancelToken,
    producer: JoinHandle<()>,
    config: Config,
}

impl<D: Domain> Session<D> {
    /// Registers `target` on a fresh ledger, starts producing blocks and
    /// attaches an engine submitting as the configured account.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the configuration.
    pub fn open(domain: D, target: Address, shape: EventShape, config: &Config) -> Result<Self> {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.register_target(target, shape.clone());

        let engine = ProjectionEngine::new(
            domain,
            Arc::clone(&ledger) as Arc<dyn LogSource>,
            Arc::clone(&ledger) as Arc<dyn Submitter>,
            config.account.clone(),
            config.engine.clone(),
        )
        .context("Failed to create engine")?;

        let producer_cancel = CancelToken::new();
        let producer = ledger.spawn_block_producer(config.block_interval, producer_cancel.clone());

        tracing::debug!(
            domain = engine.domain().name(),
            account = %config.account,
            block_interval_ms = u64::try_from(config.block_interval.as_millis()).unwrap_or(u64::MAX),
            "session opened"
        );

        Ok(Self {
            ledger,
            engine,
            shape,
            producer_cancel,
            producer,
            config: config.clone(),
        })
    }

    /// The session's engine.
    #[must_use]
    pub fn engine(&self) -> &ProjectionEngine<D> {
        &self.engine
    }

    /// Current ledger head.
    #[must_use]
    pub fn head(&self) -> u64 {
        self.ledger.head()
    }

    /// Queues a write by `author` that bypasses the engine, as another
    /// client would.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain cannot encode the write.
    pub fn inject_foreign(&self, key: &D::Key, value: &D::Value, author: &Address) -> Result<()> {
        let intent = self
            .engine
            .domain()
            .encode_intent(key, value, author)
            .with_context(|| format!("Failed to encode foreign write for {key:?}"))?;
        self.ledger
            .inject(intent.target, self.shape.clone(), intent.payload);
        Ok(())
    }

    /// Runs one reconciliation so later submissions carry a known watermark.
    ///
    /// Not counted in the session's tally.
    pub async fn sync(&self) {
        match self.engine.reconcile_now().await {
            CycleOutcome::Applied(report) => {
                tracing::debug!(through = report.through, "session synced");
            }
            CycleOutcome::FetchFailed(err) => {
                tracing::warn!(error = %err, "initial sync failed");
            }
            CycleOutcome::Cancelled | CycleOutcome::Coalesced => {}
        }
    }

    /// Waits one block interval, then reconciles; `cycles` times.
    pub async fn run_cycles(&self) -> CycleTally {
        let mut tally = CycleTally::default();
        for _ in 0..self.config.cycles {
            tokio::time::sleep(self.config.block_interval).await;
            match self.engine.reconcile_now().await {
                CycleOutcome::Applied(report) => {
                    tally.applied += 1;
                    tally.confirmed += report.confirmed.len();
                    tally.expired += report.expired.len();
                }
                CycleOutcome::FetchFailed(err) => {
                    tally.failed += 1;
                    tracing::warn!(error = %err, "cycle failed");
                }
                CycleOutcome::Cancelled | CycleOutcome::Coalesced => {}
            }
        }
        tally
    }

    /// Final state of each submission.
    #[must_use]
    pub fn submission_rows(&self, submitted: Vec<(LocalId, String)>) -> Vec<SubmissionRow> {
        submitted
            .into_iter()
            .map(|(local_id, summary)| {
                let status = self.engine.entry_status(local_id);
                let reason = match &status {
                    Some(EntryStatus::Failed { reason }) => Some(reason.to_string()),
                    _ => None,
                };
                SubmissionRow {
                    local_id,
                    summary,
                    status: status.as_ref().map_or("unknown", EntryStatus::as_str),
                    reason,
                }
            })
            .collect()
    }

    /// Shuts the engine down and stops the block producer.
    ///
    /// # Errors
    ///
    /// Returns an error if the block producer panicked.
    pub async fn close(self) -> Result<()> {
        self.engine.shutdown().await;
        self.producer_cancel.cancel();
        self.producer.await.context("Block producer failed")?;
        Ok(())
    }
}

/// Short provenance label for text output.
#[must_use]
pub fn provenance_label(provenance: &Provenance) -> String {
    match provenance {
        Provenance::Authoritative { written_at } => format!("confirmed @ {written_at}"),
        Provenance::Optimistic { local_id } => format!("pending {local_id}"),
    }
}

/// Provenance as JSON fields.
#[must_use]
pub fn provenance_json(provenance: &Provenance) -> serde_json::Value {
    match provenance {
        Provenance::Authoritative { written_at } => serde_json::json!({
            "source": "log",
            "writtenAt": written_at.to_string(),
        }),
        Provenance::Optimistic { local_id } => serde_json::json!({
            "source": "overlay",
            "localId": local_id.to_string(),
        }),
    }
}

/// Prints submission rows in text form.
pub fn print_submissions(rows: &[SubmissionRow]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("Submissions:");
    for row in rows {
        match &row.reason {
            Some(reason) => println!("  {:<10} {}  ({reason})", row.status, row.summary),
            None => println!("  {:<10} {}", row.status, row.summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_core::OrderKey;

    #[test]
    fn test_provenance_labels() {
        let confirmed = Provenance::Authoritative {
            written_at: OrderKey::new(3, 1),
        };
        assert!(provenance_label(&confirmed).starts_with("confirmed @ "));
        assert_eq!(provenance_json(&confirmed)["source"], "log");

        let local_id = LocalId::generate();
        let pending = Provenance::Optimistic { local_id };
        assert_eq!(provenance_label(&pending), format!("pending {local_id}"));
        assert_eq!(provenance_json(&pending)["localId"], local_id.to_string());
    }

    #[test]
    fn test_submission_row_json() {
        let row = SubmissionRow {
            local_id: LocalId::generate(),
            summary: "post \"gm\"".to_string(),
            status: "failed",
            reason: Some("rejected".to_string()),
        };
        let json = row.to_json();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "rejected");
    }
}
