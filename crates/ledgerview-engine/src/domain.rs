//! Use-site contract: everything the engine needs to know about a domain.

use bytes::Bytes;
use ledgerview_core::{Address, LogFilter, SubmissionError};

use crate::projection::Reducer;

/// How the reconciliation loop fetches history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Fetch `[0, latest]` every cycle and rebuild from empty.
    ///
    /// O(history) per poll; only for small, bounded histories.
    FullReplay,
    /// Fetch `(last_seen, latest]` and fold onto the existing projection.
    Incremental,
}

impl FetchStrategy {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FullReplay => "full_replay",
            Self::Incremental => "incremental",
        }
    }
}

/// An encoded intent, ready for the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    /// Contract or mailbox receiving the intent.
    pub target: Address,
    /// Encoded call data.
    pub payload: Bytes,
    /// Value attached by default (paint fee, stake amount).
    pub value: u128,
}

/// A projection domain: decoder, reducer and key codec for one use site.
pub trait Domain: Reducer + 'static {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Filter selecting this domain's records.
    fn filter(&self) -> LogFilter;

    /// Fetch strategy for this domain's history.
    fn strategy(&self) -> FetchStrategy;

    /// Key an event writes to.
    fn key_of(&self, event: &Self::Event) -> Self::Key;

    /// Logical author of an event (painter, sender, staker).
    fn author_of<'e>(&self, event: &'e Self::Event) -> &'e Address;

    /// Encodes a local write as an intent for the authoritative source.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Encode`] if the key or value cannot be
    /// represented on the wire.
    fn encode_intent(
        &self,
        key: &Self::Key,
        value: &Self::Value,
        origin: &Address,
    ) -> Result<Intent, SubmissionError>;
}

/// Serializes a payload body as JSON for [`Intent::payload`].
///
/// # Errors
///
/// Returns [`SubmissionError::Encode`] if serialization fails.
pub fn json_payload<T: serde::Serialize>(body: &T) -> Result<Bytes, SubmissionError> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|e| SubmissionError::Encode {
            message: format!("failed to serialize payload: {e}"),
        })
}
