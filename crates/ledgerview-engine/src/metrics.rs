//! Engine metrics.
//!
//! Exposed through the `metrics` facade; install any recorder (Prometheus,
//! statsd) to export them. Without a recorder every call is a no-op.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `ledgerview_cycles_total` | Counter | `domain`, `outcome` |
//! | `ledgerview_cycle_duration_seconds` | Histogram | `domain` |
//! | `ledgerview_records_decoded_total` | Counter | `domain` |
//! | `ledgerview_records_skipped_total` | Counter | `domain`, `reason` |
//! | `ledgerview_overlay_transitions_total` | Counter | `domain`, `status` |
//! | `ledgerview_overlay_pending` | Gauge | `domain` |
//! | `ledgerview_submissions_total` | Counter | `domain`, `result` |

use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: reconciliation cycles by outcome.
    pub const CYCLES_TOTAL: &str = "ledgerview_cycles_total";
    /// Histogram: reconciliation cycle duration in seconds.
    pub const CYCLE_DURATION_SECONDS: &str = "ledgerview_cycle_duration_seconds";
    /// Counter: records decoded into domain events.
    pub const RECORDS_DECODED_TOTAL: &str = "ledgerview_records_decoded_total";
    /// Counter: records skipped by the decoder.
    pub const RECORDS_SKIPPED_TOTAL: &str = "ledgerview_records_skipped_total";
    /// Counter: overlay status transitions.
    pub const OVERLAY_TRANSITIONS_TOTAL: &str = "ledgerview_overlay_transitions_total";
    /// Gauge: pending overlay entries.
    pub const OVERLAY_PENDING: &str = "ledgerview_overlay_pending";
    /// Counter: submission send results.
    pub const SUBMISSIONS_TOTAL: &str = "ledgerview_submissions_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Domain name (canvas, chat, stake).
    pub const DOMAIN: &str = "domain";
    /// Cycle outcome (applied, fetch_failed, cancelled, coalesced).
    pub const OUTCOME: &str = "outcome";
    /// Skip reason (decode error kind).
    pub const REASON: &str = "reason";
    /// Overlay status (confirmed, failed, timed_out, pruned).
    pub const STATUS: &str = "status";
    /// Submission result (accepted, or the error kind).
    pub const RESULT: &str = "result";
}

/// Registers metric descriptions.
///
/// Call once at startup after installing a recorder.
pub fn register_metrics() {
    describe_counter!(names::CYCLES_TOTAL, "Reconciliation cycles by outcome");
    describe_histogram!(
        names::CYCLE_DURATION_SECONDS,
        "Duration of reconciliation cycles in seconds"
    );
    describe_counter!(names::RECORDS_DECODED_TOTAL, "Records decoded into events");
    describe_counter!(names::RECORDS_SKIPPED_TOTAL, "Records skipped as undecodable");
    describe_counter!(
        names::OVERLAY_TRANSITIONS_TOTAL,
        "Overlay entry status transitions"
    );
    describe_gauge!(names::OVERLAY_PENDING, "Pending overlay entries");
    describe_counter!(names::SUBMISSIONS_TOTAL, "Submission send results");
}

/// Records metrics for one engine's domain.
#[derive(Debug, Clone, Copy)]
pub struct EngineMetrics {
    domain: &'static str,
}

impl EngineMetrics {
    /// Creates a recorder labelled with `domain`.
    #[must_use]
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Records a finished cycle's outcome.
    pub fn record_cycle(&self, outcome: &'static str) {
        counter!(
            names::CYCLES_TOTAL,
            labels::DOMAIN => self.domain,
            labels::OUTCOME => outcome,
        )
        .increment(1);
    }

    /// Records how long a cycle took.
    pub fn record_cycle_duration(&self, duration: Duration) {
        histogram!(names::CYCLE_DURATION_SECONDS, labels::DOMAIN => self.domain)
            .record(duration.as_secs_f64());
    }

    /// Records decoded records.
    pub fn record_decoded(&self, count: usize) {
        counter!(names::RECORDS_DECODED_TOTAL, labels::DOMAIN => self.domain)
            .increment(count as u64);
    }

    /// Records one skipped record.
    pub fn record_skipped(&self, reason: &'static str) {
        counter!(
            names::RECORDS_SKIPPED_TOTAL,
            labels::DOMAIN => self.domain,
            labels::REASON => reason,
        )
        .increment(1);
    }

    /// Records overlay transitions.
    pub fn record_transitions(&self, status: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        counter!(
            names::OVERLAY_TRANSITIONS_TOTAL,
            labels::DOMAIN => self.domain,
            labels::STATUS => status,
        )
        .increment(count as u64);
    }

    /// Sets the pending gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_pending(&self, pending: usize) {
        gauge!(names::OVERLAY_PENDING, labels::DOMAIN => self.domain).set(pending as f64);
    }

    /// Records a submission send result.
    pub fn record_submission(&self, result: &'static str) {
        counter!(
            names::SUBMISSIONS_TOTAL,
            labels::DOMAIN => self.domain,
            labels::RESULT => result,
        )
        .increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Calls `on_drop` with the elapsed duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn timing_guard_fires_on_drop() {
        let fired = Arc::new(AtomicBool::new(false));
        {
            let fired = Arc::clone(&fired);
            let _guard = TimingGuard::new(move |_| fired.store(true, Ordering::SeqCst));
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        register_metrics();
        let metrics = EngineMetrics::new("canvas");
        metrics.record_cycle("applied");
        metrics.record_cycle_duration(Duration::from_millis(3));
        metrics.record_decoded(4);
        metrics.record_skipped("malformed");
        metrics.record_transitions("confirmed", 0);
        metrics.set_pending(2);
        metrics.record_submission("accepted");
    }
}
