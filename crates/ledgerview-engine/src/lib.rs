//! # ledgerview-engine
//!
//! Event-log projection engine with an optimistic write overlay.
//!
//! An engine derives an application view from an authoritative, append-only
//! log and shows local writes before the log catches up:
//!
//! ```text
//! submit ──► OptimisticOverlay ───────────────────────────┐
//!    │                                                    ▼
//!    └──► Submitter ··· log ··► LogSource ──► decode ──► ProjectionStore ──► MergedView
//!                                  ▲
//!                         ReconciliationLoop (interval + trigger)
//! ```
//!
//! ## Guarantees
//!
//! - **Deterministic**: the projection is a pure function of the ordered
//!   event sequence
//! - **Idempotent**: re-fetching an overlapping window never double-applies
//! - **Single authority**: only events observed in the log confirm a write;
//!   a successful send does not
//! - **Convergent**: every pending write is eventually confirmed or failed
//!
//! ## Domains
//!
//! [`domains::canvas`], [`domains::chat`] and [`domains::stake`] implement
//! [`Domain`] for the pixel canvas, the chat feed and stake balances.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod decoder;
pub mod domain;
pub mod domains;
pub mod engine;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod overlay;
pub mod projection;
pub mod reconcile;
pub mod submission;
pub mod view;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use decoder::{decode_batch, Decoded, DecodedBatch, EventDecoder};
pub use domain::{Domain, FetchStrategy, Intent};
pub use engine::ProjectionEngine;
pub use error::{EngineError, Result};
pub use memory::MemoryLedger;
pub use overlay::{EntryStatus, FailureReason, OptimisticOverlay, OverlayEntry, SubmittedAt};
pub use projection::{Folded, ProjectionState, ProjectionStore, Reducer, Slot};
pub use reconcile::{CycleGate, CycleOutcome, CycleReport, LoopPhase};
pub use submission::{SendHandle, SendOutcome};
pub use view::{MergedView, Provenance, ViewCell};
