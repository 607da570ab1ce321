//! # ledgerview-core
//!
//! Core abstractions for the ledgerview event-log projection engine.
//!
//! This crate provides the primitives shared by every ledgerview component:
//!
//! - **Records**: [`RawRecord`], [`OrderKey`] and the query vocabulary
//!   ([`LogFilter`], [`SeqRange`], [`LogBatch`])
//! - **Source Traits**: [`LogSource`] and [`Submitter`], the two seams to the
//!   authoritative source
//! - **Identifiers**: [`LocalId`] for local submissions, [`TransportId`] for
//!   accepted ones
//! - **Error Types**: the decode/fetch/submission taxonomy
//! - **Observability**: logging initialization and span helpers
//!
//! ## Example
//!
//! ```rust
//! use ledgerview_core::prelude::*;
//!
//! let canvas = Address::new("0xC4N7A5").unwrap();
//! let filter = LogFilter::new(canvas, EventShape::new("PixelPainted"));
//! let window = SeqRange::after(Some(41));
//! assert_eq!(window.from, 42);
//! # let _ = filter;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod record;
pub mod source;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{DecodeError, Error, FetchError, Result, SubmissionError};
    pub use crate::id::{LocalId, TransportId};
    pub use crate::record::{
        Address, EventShape, LogBatch, LogFilter, OrderKey, RawRecord, SeqBound, SeqRange,
    };
    pub use crate::source::{LogSource, SendRequest, Submitter};
}

pub use error::{DecodeError, Error, FetchError, Result, SubmissionError};
pub use id::{LocalId, TransportId};
pub use observability::{LogFormat, init_logging};
pub use record::{Address, EventShape, LogBatch, LogFilter, OrderKey, RawRecord, SeqBound, SeqRange};
pub use source::{LogSource, SendRequest, Submitter};
