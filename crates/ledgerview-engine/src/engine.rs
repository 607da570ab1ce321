//! Engine façade.
//!
//! A [`ProjectionEngine`] owns one domain's projection and overlay. It wires
//! a [`LogSource`] and a [`Submitter`] to the reconciliation loop and the
//! submission pipeline, and exposes read access to the merged view.
//!
//! State lives behind a `std::sync::Mutex` whose critical sections never
//! span an `.await`. Readers get snapshots or run a closure under the lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ledgerview_core::{Address, LocalId, LogSource, Submitter};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::domain::Domain;
use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::overlay::{EntryStatus, OptimisticOverlay, OverlayEntry};
use crate::projection::{ProjectionState, ProjectionStore};
use crate::reconcile::{CycleGate, CycleOutcome, LoopPhase, ReconciliationLoop};
use crate::submission::{SendHandle, SubmissionPipeline};
use crate::view::{merged_value, MergedView, ViewCell};

/// Mutable state shared by the loop and the pipeline.
pub(crate) struct EngineState<K, V> {
    pub(crate) store: ProjectionStore<K, V>,
    pub(crate) overlay: OptimisticOverlay<K, V>,
    /// Highest sequence covered by a successful fetch.
    pub(crate) last_seen_seq: Option<u64>,
}

pub(crate) struct EngineCore<D: Domain> {
    pub(crate) domain: D,
    pub(crate) source: Arc<dyn LogSource>,
    pub(crate) submitter: Arc<dyn Submitter>,
    pub(crate) origin: Address,
    pub(crate) config: EngineConfig,
    pub(crate) metrics: EngineMetrics,
    pub(crate) gate: CycleGate,
    pub(crate) trigger: Notify,
    pub(crate) cancel: CancelToken,
    state: Mutex<EngineState<D::Key, D::Value>>,
    revision: watch::Sender<u64>,
    cycles: AtomicU64,
}

impl<D: Domain> EngineCore<D> {
    /// Locks the shared state. A poisoned lock is recovered: every critical
    /// section leaves the state consistent before it can panic.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState<D::Key, D::Value>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn last_seen_seq(&self) -> Option<u64> {
        self.lock_state().last_seen_seq
    }

    pub(crate) fn next_cycle(&self) -> u64 {
        self.cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Bumps the view revision.
    pub(crate) fn publish(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

/// Projection engine for one domain.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use ledgerview_core::Address;
/// use ledgerview_engine::domains::chat::{ChatDomain, Message, MessageKey};
/// use ledgerview_engine::{EngineConfig, MemoryLedger, ProjectionEngine};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mailbox = Address::new("0xc4a7")?;
/// let ledger = Arc::new(MemoryLedger::new());
/// let domain = ChatDomain::new(mailbox);
/// ledger.register_target(domain.mailbox().clone(), domain.shape());
///
/// let alice = Address::new("0xa11ce")?;
/// let engine = ProjectionEngine::new(
///     domain,
///     ledger.clone(),
///     ledger.clone(),
///     alice.clone(),
///     EngineConfig::default(),
/// )?;
/// engine.start()?;
///
/// let key = MessageKey::new(alice, 0);
/// engine.submit(key.clone(), Message::new("gm"))?;
/// assert!(engine.merged_value(&key).is_some());
/// # Ok(())
/// # }
/// ```
pub struct ProjectionEngine<D: Domain> {
    core: Arc<EngineCore<D>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Domain> std::fmt::Debug for ProjectionEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionEngine")
            .field("domain", &self.core.domain.name())
            .field("origin", &self.core.origin)
            .field("phase", &self.core.gate.phase())
            .finish_non_exhaustive()
    }
}

impl<D: Domain> ProjectionEngine<D> {
    /// Creates an engine. Nothing runs until [`ProjectionEngine::start`] or
    /// [`ProjectionEngine::reconcile_now`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` fails validation.
    pub fn new(
        domain: D,
        source: Arc<dyn LogSource>,
        submitter: Arc<dyn Submitter>,
        origin: Address,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = EngineMetrics::new(domain.name());
        let (revision, _) = watch::channel(0);

        let state = EngineState {
            store: ProjectionStore::new(),
            overlay: OptimisticOverlay::with_history(config.retired_history),
            last_seen_seq: None,
        };

        tracing::debug!(
            domain = domain.name(),
            %origin,
            strategy = domain.strategy().as_str(),
            "engine created"
        );

        Ok(Self {
            core: Arc::new(EngineCore {
                domain,
                source,
                submitter,
                origin,
                config,
                metrics,
                gate: CycleGate::new(),
                trigger: Notify::new(),
                cancel: CancelToken::new(),
                state: Mutex::new(state),
                revision,
                cycles: AtomicU64::new(0),
            }),
            loop_task: Mutex::new(None),
        })
    }

    /// Spawns the reconciliation loop on the current runtime. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShutDown`] after shutdown and
    /// [`EngineError::NoRuntime`] outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.ensure_running()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| EngineError::NoRuntime {
            message: e.to_string(),
        })?;

        let mut task = self
            .loop_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_none() {
            let reconciliation = ReconciliationLoop::new(Arc::clone(&self.core));
            *task = Some(runtime.spawn(reconciliation.run()));
        }
        Ok(())
    }

    /// Runs one reconciliation cycle immediately (plus any coalesced
    /// follow-up).
    pub async fn reconcile_now(&self) -> CycleOutcome {
        ReconciliationLoop::new(Arc::clone(&self.core))
            .run_cycle()
            .await
    }

    /// Wakes the running loop for an immediate cycle.
    pub fn trigger(&self) {
        self.core.trigger.notify_one();
    }

    /// Applies `proposed_value` to `key` optimistically and sends it with the
    /// domain's default value attached.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Intent`] if the domain cannot encode the write,
    /// [`EngineError::ShutDown`] after shutdown and
    /// [`EngineError::NoRuntime`] outside a tokio runtime.
    pub fn submit(&self, key: D::Key, proposed_value: D::Value) -> Result<LocalId> {
        self.submit_tracked(key, proposed_value, None)
            .map(SendHandle::detach)
    }

    /// Like [`ProjectionEngine::submit`], attaching `cost` instead of the
    /// domain's default value.
    ///
    /// # Errors
    ///
    /// See [`ProjectionEngine::submit`].
    pub fn submit_with_cost(
        &self,
        key: D::Key,
        proposed_value: D::Value,
        cost: u128,
    ) -> Result<LocalId> {
        self.submit_tracked(key, proposed_value, Some(cost))
            .map(SendHandle::detach)
    }

    /// Like [`ProjectionEngine::submit`], returning a handle to the send task.
    ///
    /// # Errors
    ///
    /// See [`ProjectionEngine::submit`].
    pub fn submit_tracked(
        &self,
        key: D::Key,
        proposed_value: D::Value,
        cost: Option<u128>,
    ) -> Result<SendHandle> {
        SubmissionPipeline::new(Arc::clone(&self.core)).submit(key, proposed_value, cost)
    }

    /// Snapshot of the merged view.
    #[must_use]
    pub fn merged_view(&self) -> MergedView<D::Key, D::Value> {
        let revision = self.core.revision();
        let state = self.core.lock_state();
        MergedView::compose(state.store.state(), &state.overlay, revision)
    }

    /// Merged value for one key.
    #[must_use]
    pub fn merged_value(&self, key: &D::Key) -> Option<ViewCell<D::Value>> {
        let state = self.core.lock_state();
        merged_value(state.store.state(), &state.overlay, key)
    }

    /// Snapshot of the authoritative projection.
    #[must_use]
    pub fn projection(&self) -> ProjectionState<D::Key, D::Value> {
        self.core.lock_state().store.state().clone()
    }

    /// Status of a live or recently retired submission.
    #[must_use]
    pub fn entry_status(&self, local_id: LocalId) -> Option<EntryStatus> {
        self.core.lock_state().overlay.status(local_id)
    }

    /// Live overlay entry for a submission.
    #[must_use]
    pub fn entry(&self, local_id: LocalId) -> Option<OverlayEntry<D::Key, D::Value>> {
        self.core.lock_state().overlay.entry(local_id).cloned()
    }

    /// Pending overlay entries, oldest first.
    #[must_use]
    pub fn pending_entries(&self) -> Vec<OverlayEntry<D::Key, D::Value>> {
        self.core
            .lock_state()
            .overlay
            .pending()
            .cloned()
            .collect()
    }

    /// Highest sequence covered by a successful fetch.
    #[must_use]
    pub fn last_seen_seq(&self) -> Option<u64> {
        self.core.last_seen_seq()
    }

    /// Current phase of the reconciliation state machine.
    #[must_use]
    pub fn phase(&self) -> LoopPhase {
        self.core.gate.phase()
    }

    /// Receiver of the view revision, bumped whenever the merged view may
    /// have changed.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.core.revision.subscribe()
    }

    /// Runs `f` against the projection and overlay under the state lock.
    ///
    /// `f` must not block.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&ProjectionState<D::Key, D::Value>, &OptimisticOverlay<D::Key, D::Value>) -> R,
    ) -> R {
        let state = self.core.lock_state();
        f(state.store.state(), &state.overlay)
    }

    /// The engine's domain.
    #[must_use]
    pub fn domain(&self) -> &D {
        &self.core.domain
    }

    /// Account submitting this engine's writes.
    #[must_use]
    pub fn origin(&self) -> &Address {
        &self.core.origin
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// Returns true once the engine has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.core.cancel.is_cancelled()
    }

    /// Cancels the loop and every in-flight send, then waits for the loop to
    /// stop. Results arriving afterwards are discarded.
    pub async fn shutdown(&self) {
        self.core.cancel.cancel();
        let task = self
            .loop_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(domain = self.core.domain.name(), error = %err, "reconciliation loop ended abnormally");
            }
        }
        tracing::info!(domain = self.core.domain.name(), "engine shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.core.cancel.is_cancelled() {
            return Err(EngineError::ShutDown {
                domain: self.core.domain.name(),
            });
        }
        Ok(())
    }
}

impl<D: Domain> Drop for ProjectionEngine<D> {
    fn drop(&mut self) {
        self.core.cancel.cancel();
    }
}
