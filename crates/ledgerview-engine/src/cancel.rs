//! Cancellation token tied to an engine's lifetime.
//!
//! Every asynchronous operation started by a reconciliation cycle or a
//! submission holds a clone. Once cancelled, results that arrive later are
//! discarded instead of being merged into shared state.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable, one-shot cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancels the token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes when the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of the token, so the wait
        // only ends by observing `true`.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}
