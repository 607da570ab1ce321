//! Interfaces to the authoritative source.
//!
//! The engine consumes two seams:
//!
//! - [`LogSource`]: read a window of raw records.
//! - [`Submitter`]: send an intent and wait until it is buried under a given
//!   number of confirmations.
//!
//! Both are `Send + Sync` so an engine can share one implementation between
//! its reconciliation loop and its submission tasks.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, SubmissionError};
use crate::id::TransportId;
use crate::record::{Address, LogBatch, LogFilter, SeqRange};

/// Read access to the authoritative, append-only log.
///
/// Implementations must return every record inside the window that passes
/// the filter. Ordering of the returned vector is not guaranteed; callers
/// sort by order key. A record with a given order key must always carry the
/// same payload.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetches the records in `range` that pass `filter`.
    ///
    /// # Errors
    ///
    /// Returns a retriable [`FetchError`] if the source cannot be reached.
    async fn fetch(&self, filter: &LogFilter, range: SeqRange) -> Result<LogBatch, FetchError>;
}

#[async_trait]
impl<T: LogSource + ?Sized> LogSource for Arc<T> {
    async fn fetch(&self, filter: &LogFilter, range: SeqRange) -> Result<LogBatch, FetchError> {
        (**self).fetch(filter, range).await
    }
}

/// An intent ready to be sent to the authoritative source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Account sending the intent.
    pub from: Address,
    /// Contract or mailbox receiving it.
    pub target: Address,
    /// Encoded call data.
    pub payload: Bytes,
    /// Value attached to the send (fee, stake amount, paint cost).
    pub value: u128,
}

/// Write access to the authoritative source.
///
/// A successful [`Submitter::send`] only means the source accepted the
/// intent for inclusion. Whether it was included is learned from the log.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Sends an intent and returns the source's handle for it.
    ///
    /// # Errors
    ///
    /// Returns a [`SubmissionError`] if the source rejects the intent or the
    /// transport fails.
    async fn send(&self, request: SendRequest) -> Result<TransportId, SubmissionError>;

    /// Waits until the submission has at least `depth` confirmations.
    ///
    /// # Errors
    ///
    /// Returns a [`SubmissionError`] if the submission is dropped or the
    /// transport fails while waiting.
    async fn wait_for_depth(
        &self,
        transport_id: &TransportId,
        depth: u32,
    ) -> Result<(), SubmissionError>;
}

#[async_trait]
impl<T: Submitter + ?Sized> Submitter for Arc<T> {
    async fn send(&self, request: SendRequest) -> Result<TransportId, SubmissionError> {
        (**self).send(request).await
    }

    async fn wait_for_depth(
        &self,
        transport_id: &TransportId,
        depth: u32,
    ) -> Result<(), SubmissionError> {
        (**self).wait_for_depth(transport_id, depth).await
    }
}
