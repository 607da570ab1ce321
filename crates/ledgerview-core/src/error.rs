//! Error types and result aliases for ledgerview.
//!
//! The engine distinguishes four failure classes, each recovered differently:
//!
//! - [`DecodeError`]: expected noise. A record that does not match a known
//!   event shape is skipped by every caller.
//! - [`FetchError`]: transient. The projection is left untouched and the fetch
//!   is retried on the next poll.
//! - [`SubmissionError`]: surfaced to the overlay as a failed entry.
//! - Confirmation timeouts are not errors at this layer; the engine records
//!   them as an overlay failure reason.
//!
//! [`Error`] covers everything else that crosses crate boundaries.

use std::fmt;

/// The result type used throughout ledgerview.
pub type Result<T> = std::result::Result<T, Error>;

/// Shared errors for ledgerview operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a new serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl fmt::Display) -> Self {
        Self::Serialization {
            message: message.to_string(),
        }
    }
}

/// A raw record could not be decoded into a domain event.
///
/// Never fatal: callers skip the record and move on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The record's event shape is not one the decoder understands.
    #[error("unknown event shape: {shape}")]
    UnknownShape {
        /// Shape carried by the record.
        shape: String,
    },

    /// The record was emitted by (or sent to) an address the decoder ignores.
    #[error("unexpected address: {address}")]
    UnexpectedAddress {
        /// Address carried by the record.
        address: String,
    },

    /// The payload did not parse as the expected event body.
    #[error("malformed payload: {message}")]
    Malformed {
        /// Description of the parse failure.
        message: String,
    },

    /// The payload parsed but a field is outside the domain's valid range.
    #[error("invalid field {field}: {message}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Description of the violation.
        message: String,
    },
}

impl DecodeError {
    /// Creates a malformed-payload error from any displayable cause.
    #[must_use]
    pub fn malformed(cause: impl fmt::Display) -> Self {
        Self::Malformed {
            message: cause.to_string(),
        }
    }

    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownShape { .. } => "unknown_shape",
            Self::UnexpectedAddress { .. } => "unexpected_address",
            Self::Malformed { .. } => "malformed",
            Self::InvalidField { .. } => "invalid_field",
        }
    }
}

/// Fetching records from the authoritative source failed.
///
/// Always retriable; the caller keeps its current projection.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The transport (RPC, network) failed.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The source rejected the requested range.
    #[error("invalid range: {message}")]
    InvalidRange {
        /// Description of the rejection.
        message: String,
    },

    /// The source did not answer in time.
    #[error("fetch timed out after {millis}ms")]
    Timeout {
        /// Elapsed time in milliseconds.
        millis: u64,
    },
}

impl FetchError {
    /// Creates a transport error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error with a source cause.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Sending an intent to the authoritative source failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// The intent could not be encoded into a payload.
    #[error("failed to encode intent: {message}")]
    Encode {
        /// Description of the encoding failure.
        message: String,
    },

    /// The source refused the intent (insufficient funds, bad nonce, ...).
    #[error("submission rejected: {message}")]
    Rejected {
        /// Reason given by the source.
        message: String,
    },

    /// The transport failed before the source acknowledged the intent.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The send or confirmation wait exceeded its deadline.
    #[error("submission timed out after {millis}ms")]
    Timeout {
        /// Elapsed time in milliseconds.
        millis: u64,
    },

    /// The source reported the intent as dropped after acceptance.
    #[error("transaction {transport_id} dropped")]
    Dropped {
        /// Transport id that was dropped.
        transport_id: String,
    },
}

impl SubmissionError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Encode { .. } => "encode",
            Self::Rejected { .. } => "rejected",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Dropped { .. } => "dropped",
        }
    }
}
