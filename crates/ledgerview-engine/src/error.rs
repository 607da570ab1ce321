//! Error types for engine operations.

use ledgerview_core::SubmissionError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned synchronously by the engine.
///
/// Asynchronous failures (fetch errors, send errors, confirmation timeouts)
/// never surface here; they degrade the view instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The intent could not be turned into a submission.
    #[error("invalid intent: {0}")]
    Intent(#[from] SubmissionError),

    /// The engine has been shut down; no new work is accepted.
    #[error("engine for domain {domain} is shut down")]
    ShutDown {
        /// Domain of the engine.
        domain: &'static str,
    },

    /// The operation needs a tokio runtime and none is running.
    #[error("no tokio runtime available: {message}")]
    NoRuntime {
        /// Description of the problem.
        message: String,
    },

    /// Configuration was rejected.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl EngineError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
