//! Shared test utilities for ledgerview integration tests.
//!
//! This crate provides:
//! - [`FlakyLogSource`], [`HeldLogSource`], [`FailingSubmitter`]: wrappers
//!   that inject faults and delays around a real source or submitter
//! - Fixtures: addresses, domains, record and payload builders, engines
//!   wired to a [`ledgerview_engine::MemoryLedger`]
//! - Assertions over overlay status and merged-view provenance
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgerview_test_utils::{alice, chat_setup, assert_optimistic};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let (ledger, engine) = chat_setup(alice());
//!     // ... submit, produce blocks, reconcile ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod source;

pub use assertions::*;
pub use fixtures::*;
pub use source::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ledgerview=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
