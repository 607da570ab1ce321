//! Reconciliation loop.
//!
//! One cycle is `fetch -> decode -> apply -> overlay reconciliation ->
//! publish`. The [`CycleGate`] keeps at most one cycle in flight per engine:
//!
//! ```text
//! Idle ──try_begin──► Fetching ──batch──► Applying ──finish──► Idle
//!   ▲                    │                                      │
//!   │                    └──fetch error / cancelled─────────────┤
//!   └──────────── follow-up requested while busy? run again ◄───┘
//! ```
//!
//! Triggers that arrive while a cycle is running set a follow-up flag, so any
//! number of them collapse into a single extra cycle.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use ledgerview_core::observability::cycle_span;
use ledgerview_core::{FetchError, LocalId, SeqRange};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::decoder::decode_batch;
use crate::domain::{Domain, FetchStrategy};
use crate::engine::EngineCore;
use crate::metrics::TimingGuard;

/// Phase of the reconciliation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// No cycle running.
    Idle,
    /// Waiting for the log source.
    Fetching,
    /// Folding a fetched batch.
    Applying,
}

impl LoopPhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Fetching,
            2 => Self::Applying,
            _ => Self::Idle,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Fetching => 1,
            Self::Applying => 2,
        }
    }
}

/// Admits one cycle at a time and remembers triggers that arrive meanwhile.
#[derive(Debug)]
pub struct CycleGate {
    phase: AtomicU8,
    follow_up: AtomicBool,
}

impl Default for CycleGate {
    fn default() -> Self {
        Self {
            phase: AtomicU8::new(LoopPhase::Idle.as_u8()),
            follow_up: AtomicBool::new(false),
        }
    }
}

impl CycleGate {
    /// Creates an idle gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `Idle -> Fetching`.
    ///
    /// Returns false if a cycle is already running, in which case a
    /// follow-up cycle is requested instead.
    pub fn try_begin(&self) -> bool {
        let began = self
            .phase
            .compare_exchange(
                LoopPhase::Idle.as_u8(),
                LoopPhase::Fetching.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !began {
            self.follow_up.store(true, Ordering::Release);
        }
        began
    }

    /// Marks the running cycle as applying its batch.
    pub fn applying(&self) {
        self.phase
            .store(LoopPhase::Applying.as_u8(), Ordering::Release);
    }

    /// Returns to `Idle`. Returns true if a follow-up cycle was requested.
    pub fn finish(&self) -> bool {
        self.phase.store(LoopPhase::Idle.as_u8(), Ordering::Release);
        self.follow_up.swap(false, Ordering::AcqRel)
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> LoopPhase {
        LoopPhase::from_u8(self.phase.load(Ordering::Acquire))
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Window that was requested.
    pub range: SeqRange,
    /// Resolved upper bound of the window.
    pub through: u64,
    /// Raw records returned by the source.
    pub fetched: usize,
    /// Records dropped by the decoder.
    pub skipped: usize,
    /// Events folded into the projection.
    pub folded: usize,
    /// Overlay entries confirmed by this cycle's events.
    pub confirmed: Vec<LocalId>,
    /// Overlay entries failed by the confirmation timeout.
    pub expired: Vec<LocalId>,
    /// Confirmed entries removed because the projection caught up.
    pub pruned: Vec<LocalId>,
    /// Entries still pending after the cycle.
    pub pending: usize,
}

/// Result of asking for a cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The cycle fetched and applied a batch.
    Applied(CycleReport),
    /// The source failed; projection and overlay are unchanged.
    FetchFailed(FetchError),
    /// The engine was cancelled; nothing was applied.
    Cancelled,
    /// Another cycle was running; a follow-up was requested.
    Coalesced,
}

impl CycleOutcome {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::FetchFailed(_) => "fetch_failed",
            Self::Cancelled => "cancelled",
            Self::Coalesced => "coalesced",
        }
    }

    /// Returns the report of an applied cycle.
    #[must_use]
    pub const fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Applied(report) => Some(report),
            _ => None,
        }
    }
}

/// Drives reconciliation cycles for one engine.
pub(crate) struct ReconciliationLoop<D: Domain> {
    core: Arc<EngineCore<D>>,
}

impl<D: Domain> ReconciliationLoop<D> {
    pub(crate) fn new(core: Arc<EngineCore<D>>) -> Self {
        Self { core }
    }

    /// Runs a cycle now, plus any follow-up requested while it ran.
    ///
    /// Returns the outcome of the last cycle that ran, or
    /// [`CycleOutcome::Coalesced`] if another caller holds the gate.
    pub(crate) async fn run_cycle(&self) -> CycleOutcome {
        let core = &self.core;
        if core.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }
        if !core.gate.try_begin() {
            tracing::debug!(domain = core.domain.name(), "cycle in flight; coalescing trigger");
            core.metrics.record_cycle(CycleOutcome::Coalesced.as_str());
            return CycleOutcome::Coalesced;
        }

        loop {
            let outcome = self.cycle_once().await;
            let follow_up = core.gate.finish();
            if !follow_up || matches!(outcome, CycleOutcome::Cancelled) {
                return outcome;
            }
            if !core.gate.try_begin() {
                return outcome;
            }
            tracing::debug!(domain = core.domain.name(), "running coalesced follow-up cycle");
        }
    }

    async fn cycle_once(&self) -> CycleOutcome {
        let core = &self.core;
        let cycle = core.next_cycle();
        let span = cycle_span(core.domain.name(), cycle);
        self.cycle_inner(cycle).instrument(span).await
    }

    async fn cycle_inner(&self, cycle: u64) -> CycleOutcome {
        let core = &self.core;
        let metrics = core.metrics;
        let _timer = TimingGuard::new(move |elapsed| metrics.record_cycle_duration(elapsed));

        let strategy = core.domain.strategy();
        let range = match strategy {
            FetchStrategy::FullReplay => SeqRange::full(),
            FetchStrategy::Incremental => SeqRange::after(core.last_seen_seq()),
        };
        let filter = core.domain.filter();

        tracing::debug!(%range, strategy = strategy.as_str(), "fetching");
        let fetched = tokio::select! {
            biased;
            () = core.cancel.cancelled() => None,
            result = core.source.fetch(&filter, range) => Some(result),
        };

        let batch = match fetched {
            None => {
                tracing::debug!("cycle abandoned by cancellation");
                metrics.record_cycle(CycleOutcome::Cancelled.as_str());
                return CycleOutcome::Cancelled;
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, %range, "fetch failed; keeping previous projection");
                metrics.record_cycle("fetch_failed");
                return CycleOutcome::FetchFailed(err);
            }
            Some(Ok(batch)) => batch,
        };

        core.gate.applying();
        let decoded = decode_batch(&core.domain, &batch.records, &metrics);

        let (report, changed) = {
            let mut guard_state = core.lock_state();
            // A response that raced teardown must not touch shared state.
            if core.cancel.is_cancelled() {
                drop(guard_state);
                tracing::debug!(through = batch.through, "discarding late response");
                metrics.record_cycle(CycleOutcome::Cancelled.as_str());
                return CycleOutcome::Cancelled;
            }
            let state = &mut *guard_state;

            let previous = state.store.state().last_applied();
            let folded = match strategy {
                FetchStrategy::FullReplay => state.store.rebuild(&core.domain, decoded.events),
                FetchStrategy::Incremental => state.store.apply(&core.domain, decoded.events),
            };
            let seen = state
                .last_seen_seq
                .map_or(batch.through, |seen| seen.max(batch.through));
            state.last_seen_seq = Some(seen);

            // Entries submitted before any fetch must not be confirmed by
            // history that was already in this batch.
            let resolved = state.overlay.resolve_watermarks(seen);
            if resolved > 0 {
                tracing::debug!(resolved, watermark = seen, "pinned submission watermarks");
            }

            let confirmed = state.overlay.confirm_from(&core.domain, &folded.events);
            let expired = state
                .overlay
                .expire(core.config.confirmation_timeout_cycles);
            let pruned = state.overlay.prune_confirmed(state.store.state());
            let changed = previous != state.store.state().last_applied()
                || !expired.is_empty()
                || !pruned.is_empty();

            let report = CycleReport {
                cycle,
                range,
                through: batch.through,
                fetched: batch.records.len(),
                skipped: decoded.skipped,
                folded: folded.events.len(),
                confirmed,
                expired,
                pruned,
                pending: state.overlay.pending_len(),
            };
            (report, changed)
        };

        if changed {
            core.publish();
        }

        for local_id in &report.expired {
            tracing::warn!(
                %local_id,
                cycles = core.config.confirmation_timeout_cycles,
                "submission not confirmed in time; reverting"
            );
        }
        metrics.record_transitions("confirmed", report.confirmed.len());
        metrics.record_transitions("timed_out", report.expired.len());
        metrics.record_transitions("pruned", report.pruned.len());
        metrics.set_pending(report.pending);
        metrics.record_cycle("applied");

        tracing::info!(
            through = report.through,
            records = report.fetched,
            folded = report.folded,
            skipped = report.skipped,
            confirmed = report.confirmed.len(),
            expired = report.expired.len(),
            pending = report.pending,
            "cycle applied"
        );

        CycleOutcome::Applied(report)
    }

    /// Runs cycles on the poll interval and on triggers until cancelled.
    pub(crate) async fn run(self) {
        let core = Arc::clone(&self.core);
        let mut ticker = tokio::time::interval(core.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            domain = core.domain.name(),
            poll_interval_ms = u64::try_from(core.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "reconciliation loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = core.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                () = core.trigger.notified() => {}
            }
            if let CycleOutcome::Cancelled = self.run_cycle().await {
                break;
            }
        }

        tracing::info!(domain = core.domain.name(), "reconciliation loop stopped");
    }
}
