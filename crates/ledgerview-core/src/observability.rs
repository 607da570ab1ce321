//! Observability infrastructure for ledgerview.
//!
//! Structured logging with consistent spans. Engine cycles and submissions
//! run inside the spans built here so log lines carry the domain and the
//! submission they belong to.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs.
    Json,
    /// Pretty-printed logs.
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `ledgerview_engine=debug`)
///
/// # Example
///
/// ```rust
/// use ledgerview_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // A subscriber installed elsewhere (tests, embedding app) wins.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Creates a span for one reconciliation cycle.
#[must_use]
pub fn cycle_span(domain: &str, cycle: u64) -> Span {
    tracing::info_span!("reconcile", domain = domain, cycle = cycle)
}

/// Creates a span for one submission.
#[must_use]
pub fn submission_span(domain: &str, local_id: &str) -> Span {
    tracing::info_span!("submit", domain = domain, local_id = local_id)
}
