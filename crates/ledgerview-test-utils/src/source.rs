//! Fault-injecting wrappers around a log source and a submitter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ledgerview_core::{
    FetchError, LogBatch, LogFilter, LogSource, SendRequest, SeqRange, SubmissionError,
    Submitter, TransportId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{watch, Notify};

/// Log source that fails on demand.
///
/// Failures are either scheduled (`fail_next`) or drawn from a seeded RNG
/// (`with_failure_rate`), so runs are reproducible.
pub struct FlakyLogSource {
    inner: Arc<dyn LogSource>,
    fail_next: AtomicUsize,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    fetches: AtomicUsize,
    failures: AtomicUsize,
}

impl FlakyLogSource {
    /// Wraps `inner` without faults.
    pub fn new(inner: Arc<dyn LogSource>) -> Self {
        Self {
            inner,
            fail_next: AtomicUsize::new(0),
            failure_rate: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            fetches: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fails each fetch with probability `rate`, drawn from an RNG seeded
    /// with `seed`.
    #[must_use]
    pub fn with_failure_rate(mut self, rate: f64, seed: u64) -> Self {
        self.failure_rate = rate;
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Fails the next `count` fetches.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fetches attempted so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Fetches failed so far.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let scheduled = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        scheduled || (self.failure_rate > 0.0 && self.rng.lock().unwrap().gen_bool(self.failure_rate))
    }
}

#[async_trait]
impl LogSource for FlakyLogSource {
    async fn fetch(&self, filter: &LogFilter, range: SeqRange) -> Result<LogBatch, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            self.failures.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(%range, "injected fetch failure");
            return Err(FetchError::transport("injected failure: connection reset"));
        }
        self.inner.fetch(filter, range).await
    }
}

/// Log source whose fetches can be held open.
///
/// While held, a fetch blocks after it starts and reads from the inner
/// source only once released, like a slow RPC whose answer arrives late.
pub struct HeldLogSource {
    inner: Arc<dyn LogSource>,
    held: watch::Sender<bool>,
    started: AtomicUsize,
    started_notify: Notify,
}

impl HeldLogSource {
    /// Wraps `inner`, initially not held.
    pub fn new(inner: Arc<dyn LogSource>) -> Self {
        let (held, _) = watch::channel(false);
        Self {
            inner,
            held,
            started: AtomicUsize::new(0),
            started_notify: Notify::new(),
        }
    }

    /// Holds subsequent fetches until [`HeldLogSource::release`].
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    /// Lets held fetches proceed.
    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Fetches started so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` fetches have started.
    pub async fn wait_started(&self, count: usize) {
        loop {
            let notified = self.started_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.started() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl LogSource for HeldLogSource {
    async fn fetch(&self, filter: &LogFilter, range: SeqRange) -> Result<LogBatch, FetchError> {
        let mut held = self.held.subscribe();
        self.started.fetch_add(1, Ordering::SeqCst);
        self.started_notify.notify_waiters();

        let _ = held.wait_for(|held| !*held).await;
        self.inner.fetch(filter, range).await
    }
}

/// Fault injected by [`FailingSubmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFault {
    /// `send` fails with the error.
    RejectSend(SubmissionError),
    /// `send` succeeds; `wait_for_depth` fails with the error.
    FailWait(SubmissionError),
    /// `send` succeeds; `wait_for_depth` never returns.
    StallWait,
}

/// Submitter that forwards to an inner one unless a fault is set.
pub struct FailingSubmitter {
    inner: Arc<dyn Submitter>,
    fault: Mutex<Option<SubmitFault>>,
    sends: AtomicUsize,
}

impl FailingSubmitter {
    /// Wraps `inner` without faults.
    pub fn new(inner: Arc<dyn Submitter>) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
            sends: AtomicUsize::new(0),
        }
    }

    /// Sets the fault applied to every later call.
    pub fn set_fault(&self, fault: SubmitFault) {
        *self.fault.lock().unwrap() = Some(fault);
    }

    /// Clears the fault.
    pub fn clear_fault(&self) {
        *self.fault.lock().unwrap() = None;
    }

    /// Sends attempted so far.
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    fn fault(&self) -> Option<SubmitFault> {
        self.fault.lock().unwrap().clone()
    }
}

#[async_trait]
impl Submitter for FailingSubmitter {
    async fn send(&self, request: SendRequest) -> Result<TransportId, SubmissionError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(SubmitFault::RejectSend(err)) = self.fault() {
            return Err(err);
        }
        self.inner.send(request).await
    }

    async fn wait_for_depth(
        &self,
        transport_id: &TransportId,
        depth: u32,
    ) -> Result<(), SubmissionError> {
        match self.fault() {
            Some(SubmitFault::FailWait(err)) => Err(err),
            Some(SubmitFault::StallWait) => std::future::pending().await,
            _ => self.inner.wait_for_depth(transport_id, depth).await,
        }
    }
}
