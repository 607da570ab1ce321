//! Raw records from the authoritative source and the vocabulary to query them.
//!
//! A [`RawRecord`] is an opaque payload stamped with an [`OrderKey`]. Order
//! keys totally order every record the source will ever return, so folding
//! records in order-key order is deterministic no matter how fetch windows
//! overlap.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Total order over records: `(sequence, sub_index)`.
///
/// On a chain, `sequence` is the block number and `sub_index` the log index
/// within the block. Comparison is lexicographic, sequence first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct OrderKey {
    /// Sequence number (block height).
    pub seq: u64,
    /// Position within the sequence.
    pub sub_index: u32,
}

impl OrderKey {
    /// Creates an order key.
    #[must_use]
    pub const fn new(seq: u64, sub_index: u32) -> Self {
        Self { seq, sub_index }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.seq, self.sub_index)
    }
}

/// An account, contract or mailbox address.
///
/// Addresses compare case-insensitively, so they are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parses and normalizes an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is empty or contains whitespace.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return Err(Error::InvalidInput("address cannot be empty".to_string()));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput(format!(
                "address cannot contain whitespace: '{value}'"
            )));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Returns the normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier selecting which event variant a record may decode to.
///
/// Equivalent to an event-signature (topic) filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventShape(String);

impl EventShape {
    /// Creates a shape descriptor.
    #[must_use]
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    /// Returns the signature string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry from the authoritative source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Position in the source's total order.
    pub order: OrderKey,
    /// Emitting contract or receiving mailbox.
    pub address: Address,
    /// Event signature carried by the record.
    pub shape: EventShape,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

/// Narrows a fetch to one target address and a set of event shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// Target address.
    pub address: Address,
    /// Accepted shapes. Empty accepts every shape.
    pub shapes: Vec<EventShape>,
}

impl LogFilter {
    /// Creates a filter for one address and shape.
    #[must_use]
    pub fn new(address: Address, shape: EventShape) -> Self {
        Self {
            address,
            shapes: vec![shape],
        }
    }

    /// Returns true if the record passes the filter.
    #[must_use]
    pub fn matches(&self, record: &RawRecord) -> bool {
        record.address == self.address
            && (self.shapes.is_empty() || self.shapes.contains(&record.shape))
    }
}

/// Upper bound of a fetch window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqBound {
    /// Whatever the source considers its head at query time.
    Latest,
    /// A fixed inclusive sequence.
    At(u64),
}

/// Inclusive sequence window for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    /// First sequence to include.
    pub from: u64,
    /// Last sequence to include.
    pub to: SeqBound,
}

impl SeqRange {
    /// The whole history: `[0, latest]`.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            from: 0,
            to: SeqBound::Latest,
        }
    }

    /// Everything after `last_seen`: `(last_seen, latest]`.
    ///
    /// With nothing seen yet this is the whole history.
    #[must_use]
    pub const fn after(last_seen: Option<u64>) -> Self {
        match last_seen {
            Some(seq) => Self {
                from: seq.saturating_add(1),
                to: SeqBound::Latest,
            },
            None => Self::full(),
        }
    }

    /// Resolves the upper bound against the source's current head.
    #[must_use]
    pub fn resolve(&self, head: u64) -> u64 {
        match self.to {
            SeqBound::Latest => head,
            SeqBound::At(seq) => seq.min(head),
        }
    }

    /// Returns true if `seq` lies inside the window once resolved.
    #[must_use]
    pub fn contains(&self, seq: u64, head: u64) -> bool {
        seq >= self.from && seq <= self.resolve(head)
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            SeqBound::Latest => write!(f, "[{}, latest]", self.from),
            SeqBound::At(to) => write!(f, "[{}, {to}]", self.from),
        }
    }
}

/// Result of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBatch {
    /// Records inside the window, in the order the source returned them.
    pub records: Vec<RawRecord>,
    /// The resolved inclusive upper bound of the window.
    ///
    /// Lets a cursor advance past windows that contained no matching records.
    pub through: u64,
}

impl LogBatch {
    /// An empty batch covering up to `through`.
    #[must_use]
    pub const fn empty(through: u64) -> Self {
        Self {
            records: Vec::new(),
            through,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64, sub: u32, address: &str, shape: &str) -> RawRecord {
        RawRecord {
            order: OrderKey::new(seq, sub),
            address: Address::new(address).unwrap(),
            shape: EventShape::new(shape),
            payload: Bytes::new(),
        }
    }

    #[test]
    fn order_keys_sort_by_sequence_then_sub_index() {
        let mut keys = vec![
            OrderKey::new(2, 0),
            OrderKey::new(1, 5),
            OrderKey::new(1, 2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![OrderKey::new(1, 2), OrderKey::new(1, 5), OrderKey::new(2, 0)]
        );
    }

    #[test]
    fn addresses_are_case_insensitive() {
        let a = Address::new("0xABCdef").unwrap();
        let b = Address::new("0xabcdef").unwrap();
        assert_eq!(a, b);
        assert!(Address::new("").is_err());
        assert!(Address::new("0x ab").is_err());
    }

    #[test]
    fn address_deserialization_normalizes() {
        let parsed: Address = serde_json::from_str("\"0xFEED\"").unwrap();
        assert_eq!(parsed.as_str(), "0xfeed");
        assert!(serde_json::from_str::<Address>("\"\"").is_err());
    }

    #[test]
    fn filter_matches_address_and_shape() {
        let filter = LogFilter::new(Address::new("0xcanvas").unwrap(), EventShape::new("Paint"));
        assert!(filter.matches(&record(1, 0, "0xCANVAS", "Paint")));
        assert!(!filter.matches(&record(1, 0, "0xother", "Paint")));
        assert!(!filter.matches(&record(1, 0, "0xcanvas", "Transfer")));
    }

    #[test]
    fn range_after_last_seen_is_exclusive() {
        let range = SeqRange::after(Some(10));
        assert!(!range.contains(10, 20));
        assert!(range.contains(11, 20));
        assert!(!range.contains(21, 20));
        assert_eq!(SeqRange::after(None), SeqRange::full());
    }

    #[test]
    fn fixed_bound_is_clamped_to_head() {
        let range = SeqRange {
            from: 0,
            to: SeqBound::At(50),
        };
        assert_eq!(range.resolve(20), 20);
        assert_eq!(range.resolve(80), 50);
        assert_eq!(range.to_string(), "[0, 50]");
    }
}
