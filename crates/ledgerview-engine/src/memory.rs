//! In-memory authoritative ledger.
//!
//! A process-local, append-only block log implementing both [`LogSource`]
//! and [`Submitter`]. Sends enter a mempool; [`MemoryLedger::produce_block`]
//! includes everything queued, in submission order, under the next block
//! number. A record's order key is `(block, position in block)`.
//!
//! Used by tests and the CLI simulation. Nothing is persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ledgerview_core::{
    Address, EventShape, FetchError, LogBatch, LogFilter, LogSource, OrderKey, RawRecord,
    SendRequest, SeqRange, SubmissionError, Submitter, TransportId,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Pending,
    Included { block: u64 },
    Dropped,
}

#[derive(Debug)]
enum Queued {
    Tx {
        transport_id: TransportId,
        address: Address,
        shape: EventShape,
        payload: Bytes,
    },
    Foreign {
        address: Address,
        shape: EventShape,
        payload: Bytes,
    },
}

#[derive(Debug, Default)]
struct LedgerInner {
    head: u64,
    records: Vec<RawRecord>,
    mempool: Vec<Queued>,
    txs: HashMap<TransportId, TxState>,
    targets: BTreeMap<Address, EventShape>,
}

/// Process-local append-only ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
    next_tx: AtomicU64,
    blocks: Notify,
}

impl MemoryLedger {
    /// Creates an empty ledger at block 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a contract or mailbox. Sends to `address` emit a record with
    /// `shape` carrying the send's payload.
    pub fn register_target(&self, address: Address, shape: EventShape) {
        self.lock().targets.insert(address, shape);
    }

    /// Queues a record that did not come through [`Submitter::send`] (another
    /// client's write, or noise) for the next block.
    pub fn inject(&self, address: Address, shape: EventShape, payload: impl Into<Bytes>) {
        self.lock().mempool.push(Queued::Foreign {
            address,
            shape,
            payload: payload.into(),
        });
    }

    /// Includes the mempool in a new block and returns its number.
    ///
    /// Empty blocks are produced too; they advance the head.
    pub fn produce_block(&self) -> u64 {
        let (block, included) = {
            let mut inner = self.lock();
            inner.head += 1;
            let block = inner.head;
            let queued = std::mem::take(&mut inner.mempool);
            let included = queued.len();

            for (position, item) in queued.into_iter().enumerate() {
                let sub_index = u32::try_from(position).unwrap_or(u32::MAX);
                let (address, shape, payload) = match item {
                    Queued::Tx {
                        transport_id,
                        address,
                        shape,
                        payload,
                    } => {
                        inner.txs.insert(transport_id, TxState::Included { block });
                        (address, shape, payload)
                    }
                    Queued::Foreign {
                        address,
                        shape,
                        payload,
                    } => (address, shape, payload),
                };
                inner.records.push(RawRecord {
                    order: OrderKey::new(block, sub_index),
                    address,
                    shape,
                    payload,
                });
            }
            (block, included)
        };

        tracing::trace!(block, records = included, "block produced");
        self.blocks.notify_waiters();
        block
    }

    /// Removes a pending transaction from the mempool, as if the network
    /// dropped it. Returns false if it was not pending.
    pub fn drop_pending(&self, transport_id: &TransportId) -> bool {
        let dropped = {
            let mut inner = self.lock();
            if inner.txs.get(transport_id) != Some(&TxState::Pending) {
                return false;
            }
            inner.mempool.retain(|item| {
                !matches!(item, Queued::Tx { transport_id: queued, .. } if queued == transport_id)
            });
            inner.txs.insert(transport_id.clone(), TxState::Dropped);
            true
        };
        self.blocks.notify_waiters();
        dropped
    }

    /// Current head block.
    #[must_use]
    pub fn head(&self) -> u64 {
        self.lock().head
    }

    /// Number of queued, not yet included, items.
    #[must_use]
    pub fn mempool_len(&self) -> usize {
        self.lock().mempool.len()
    }

    /// Transport ids of queued transactions, in inclusion order.
    #[must_use]
    pub fn pending_transactions(&self) -> Vec<TransportId> {
        self.lock()
            .mempool
            .iter()
            .filter_map(|item| match item {
                Queued::Tx { transport_id, .. } => Some(transport_id.clone()),
                Queued::Foreign { .. } => None,
            })
            .collect()
    }

    /// Every included record, in order.
    #[must_use]
    pub fn records(&self) -> Vec<RawRecord> {
        self.lock().records.clone()
    }

    /// Produces a block every `interval` until `cancel` fires.
    pub fn spawn_block_producer(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so block 1 lands
            // one interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        ledger.produce_block();
                    }
                }
            }
        })
    }
}

#[async_trait]
impl LogSource for MemoryLedger {
    async fn fetch(&self, filter: &LogFilter, range: SeqRange) -> Result<LogBatch, FetchError> {
        let inner = self.lock();
        let head = inner.head;
        if range.from > head.saturating_add(1) {
            return Err(FetchError::InvalidRange {
                message: format!("window {range} starts beyond head {head}"),
            });
        }

        let through = range.resolve(head);
        let records = inner
            .records
            .iter()
            .filter(|record| range.contains(record.order.seq, head) && filter.matches(record))
            .cloned()
            .collect();

        Ok(LogBatch { records, through })
    }
}

#[async_trait]
impl Submitter for MemoryLedger {
    async fn send(&self, request: SendRequest) -> Result<TransportId, SubmissionError> {
        if request.payload.is_empty() {
            return Err(SubmissionError::Rejected {
                message: "empty payload".into(),
            });
        }

        let number = self.next_tx.fetch_add(1, Ordering::Relaxed) + 1;
        let transport_id = TransportId::new(format!("0x{number:064x}")).map_err(|e| {
            SubmissionError::Transport {
                message: e.to_string(),
            }
        })?;

        let mut inner = self.lock();
        let Some(shape) = inner.targets.get(&request.target).cloned() else {
            return Err(SubmissionError::Rejected {
                message: format!("no contract at {}", request.target),
            });
        };
        inner.mempool.push(Queued::Tx {
            transport_id: transport_id.clone(),
            address: request.target,
            shape,
            payload: request.payload,
        });
        inner.txs.insert(transport_id.clone(), TxState::Pending);

        tracing::trace!(%transport_id, from = %request.from, value = request.value, "transaction queued");
        Ok(transport_id)
    }

    async fn wait_for_depth(
        &self,
        transport_id: &TransportId,
        depth: u32,
    ) -> Result<(), SubmissionError> {
        loop {
            let notified = self.blocks.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.lock();
                match inner.txs.get(transport_id) {
                    None => {
                        return Err(SubmissionError::Rejected {
                            message: format!("unknown transaction {transport_id}"),
                        });
                    }
                    Some(TxState::Dropped) => {
                        return Err(SubmissionError::Dropped {
                            transport_id: transport_id.to_string(),
                        });
                    }
                    Some(TxState::Included { block }) => {
                        if inner.head - block + 1 >= u64::from(depth) {
                            return Ok(());
                        }
                    }
                    Some(TxState::Pending) => {}
                }
            }

            notified.await;
        }
    }
}
