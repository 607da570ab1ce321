//! The narrow boundary between raw records and typed domain events.

use std::fmt;

use ledgerview_core::{DecodeError, OrderKey, RawRecord};

use crate::metrics::EngineMetrics;

/// Turns one raw record into a typed event, or rejects it.
///
/// Implementations must be pure: decoding the same record twice yields the
/// same result, so history can be replayed at any time.
pub trait EventDecoder: Send + Sync {
    /// Closed set of events this decoder produces.
    type Event: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for records that do not match a known event
    /// shape. Callers treat this as noise and skip the record.
    fn decode(&self, raw: &RawRecord) -> Result<Self::Event, DecodeError>;
}

/// A decoded event stamped with the order key of its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<E> {
    /// Order key of the originating record.
    pub order: OrderKey,
    /// The domain event.
    pub event: E,
}

impl<E> Decoded<E> {
    /// Wraps an event.
    #[must_use]
    pub const fn new(order: OrderKey, event: E) -> Self {
        Self { order, event }
    }
}

/// Outcome of decoding a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch<E> {
    /// Events that decoded, in input order.
    pub events: Vec<Decoded<E>>,
    /// Records that were skipped.
    pub skipped: usize,
}

/// Decodes every record, dropping the ones that fail.
pub fn decode_batch<D>(
    decoder: &D,
    records: &[RawRecord],
    metrics: &EngineMetrics,
) -> DecodedBatch<D::Event>
where
    D: EventDecoder + ?Sized,
{
    let mut events = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for record in records {
        match decoder.decode(record) {
            Ok(event) => events.push(Decoded::new(record.order, event)),
            Err(err) => {
                tracing::debug!(order = %record.order, shape = %record.shape, error = %err, "skipping undecodable record");
                metrics.record_skipped(err.kind());
                skipped += 1;
            }
        }
    }

    metrics.record_decoded(events.len());
    DecodedBatch { events, skipped }
}
