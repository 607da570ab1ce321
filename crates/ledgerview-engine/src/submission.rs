//! Submission pipeline.
//!
//! `submit` is synchronous: it encodes the intent, inserts the proposed value
//! into the overlay and returns. A spawned task then sends the intent and
//! waits for the configured confirmation depth. A transport failure fails the
//! overlay entry. Success only triggers a reconciliation cycle; confirmation
//! is left to the log.

use std::sync::Arc;

use ledgerview_core::observability::submission_span;
use ledgerview_core::{LocalId, SendRequest, SubmissionError, TransportId};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::domain::Domain;
use crate::engine::EngineCore;
use crate::error::{EngineError, Result};
use crate::overlay::FailureReason;

/// How a submission's send task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The source accepted the intent and it reached the confirmation depth.
    Accepted {
        /// Transport handle.
        transport_id: TransportId,
    },
    /// The send failed; the overlay entry was failed if still pending.
    Failed(SubmissionError),
    /// The engine shut down before the send finished.
    Cancelled,
}

/// Handle to a submission's background send.
#[derive(Debug)]
pub struct SendHandle {
    local_id: LocalId,
    task: JoinHandle<SendOutcome>,
}

impl SendHandle {
    /// Local id of the submission.
    #[must_use]
    pub const fn local_id(&self) -> LocalId {
        self.local_id
    }

    /// Waits for the send task to finish.
    pub async fn outcome(self) -> SendOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::debug!(local_id = %self.local_id, error = %err, "send task did not complete");
                SendOutcome::Cancelled
            }
        }
    }

    /// Lets the send run in the background.
    #[must_use]
    pub fn detach(self) -> LocalId {
        self.local_id
    }
}

pub(crate) struct SubmissionPipeline<D: Domain> {
    core: Arc<EngineCore<D>>,
}

impl<D: Domain> SubmissionPipeline<D> {
    pub(crate) fn new(core: Arc<EngineCore<D>>) -> Self {
        Self { core }
    }

    /// Applies a write optimistically and starts sending it.
    pub(crate) fn submit(
        &self,
        key: D::Key,
        proposed_value: D::Value,
        cost: Option<u128>,
    ) -> Result<SendHandle> {
        let core = &self.core;
        if core.cancel.is_cancelled() {
            return Err(EngineError::ShutDown {
                domain: core.domain.name(),
            });
        }
        let runtime = Handle::try_current().map_err(|e| EngineError::NoRuntime {
            message: e.to_string(),
        })?;

        let mut intent = core
            .domain
            .encode_intent(&key, &proposed_value, &core.origin)?;
        if let Some(cost) = cost {
            intent.value = cost;
        }

        let local_id = LocalId::generate();
        let (watermark, pending) = {
            let mut state = core.lock_state();
            let watermark = state.last_seen_seq;
            state
                .overlay
                .insert(local_id, key, proposed_value, core.origin.clone(), watermark);
            (watermark, state.overlay.pending_len())
        };
        core.publish();
        core.metrics.set_pending(pending);

        let local_id_str = local_id.to_string();
        let span = submission_span(core.domain.name(), &local_id_str);
        span.in_scope(|| {
            tracing::info!(watermark = ?watermark, value = intent.value, "write applied optimistically");
        });

        let request = SendRequest {
            from: core.origin.clone(),
            target: intent.target,
            payload: intent.payload,
            value: intent.value,
        };
        let task = runtime.spawn(Self::send(Arc::clone(core), local_id, request).instrument(span));

        Ok(SendHandle { local_id, task })
    }

    async fn send(core: Arc<EngineCore<D>>, local_id: LocalId, request: SendRequest) -> SendOutcome {
        let delivered = tokio::select! {
            biased;
            () = core.cancel.cancelled() => None,
            result = Self::deliver(&core, local_id, request) => Some(result),
        };

        match delivered {
            None => {
                tracing::debug!("send abandoned by cancellation");
                SendOutcome::Cancelled
            }
            Some(Ok(transport_id)) => {
                core.metrics.record_submission("accepted");
                tracing::info!(%transport_id, "send reached confirmation depth");
                core.trigger.notify_one();
                SendOutcome::Accepted { transport_id }
            }
            Some(Err(err)) => {
                core.metrics.record_submission(err.kind());
                let failed = {
                    let mut state = core.lock_state();
                    if core.cancel.is_cancelled() {
                        return SendOutcome::Cancelled;
                    }
                    state
                        .overlay
                        .mark_failed(local_id, FailureReason::Submission(err.clone()))
                };
                if failed {
                    core.metrics.record_transitions("failed", 1);
                    core.publish();
                    tracing::warn!(error = %err, "send failed; reverting optimistic write");
                } else {
                    tracing::debug!(error = %err, "send failed after entry left pending");
                }
                SendOutcome::Failed(err)
            }
        }
    }

    async fn deliver(
        core: &EngineCore<D>,
        local_id: LocalId,
        request: SendRequest,
    ) -> std::result::Result<TransportId, SubmissionError> {
        let deadline = core.config.submission_timeout;
        let timed_out = || SubmissionError::Timeout {
            millis: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        };

        let transport_id = tokio::time::timeout(deadline, core.submitter.send(request))
            .await
            .map_err(|_| timed_out())??;

        {
            let mut state = core.lock_state();
            if !core.cancel.is_cancelled() {
                state.overlay.mark_accepted(local_id, transport_id.clone());
            }
        }
        tracing::debug!(
            %transport_id,
            depth = core.config.confirmation_depth,
            "send accepted; waiting for confirmation depth"
        );

        tokio::time::timeout(
            deadline,
            core.submitter
                .wait_for_depth(&transport_id, core.config.confirmation_depth),
        )
        .await
        .map_err(|_| timed_out())??;

        Ok(transport_id)
    }
}
