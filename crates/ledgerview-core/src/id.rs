//! Strongly-typed identifiers.
//!
//! - [`LocalId`] names a locally-initiated submission. It is a ULID, so ids
//!   sort by creation time and need no coordination to generate.
//! - [`TransportId`] is whatever handle the authoritative source returns for
//!   an accepted submission (a transaction hash on a chain).
//!
//! # Example
//!
//! ```rust
//! use ledgerview_core::id::LocalId;
//!
//! let first = LocalId::generate();
//! let parsed: LocalId = first.to_string().parse().unwrap();
//! assert_eq!(first, parsed);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock, PoisonError};
use ulid::{Generator, Ulid};

use crate::error::{Error, Result};

/// Identifier for a locally-initiated submission.
///
/// Generated at submit time, before the authoritative source has seen
/// anything. Overlay entries are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Ulid);

impl LocalId {
    /// Generates a new unique local id.
    ///
    /// Ids generated by one process are strictly increasing, including
    /// within the same millisecond.
    #[must_use]
    pub fn generate() -> Self {
        static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();
        let mut generator = GENERATOR
            .get_or_init(|| Mutex::new(Generator::new()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Overflow needs 2^80 ids in one millisecond.
        Self(generator.generate().unwrap_or_else(|_| Ulid::new()))
    }

    /// Creates a local id from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the id.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
        chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid local ID '{s}': {e}"),
            })
    }
}

/// Handle returned by the authoritative source for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(String);

impl TransportId {
    /// Wraps a source-specific handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is empty.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::InvalidId {
                message: "transport ID cannot be empty".to_string(),
            });
        }
        Ok(Self(value))
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
