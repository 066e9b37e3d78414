//! Cancellation utilities
//!
//! A [`CancelHandle`] is a cloneable handle shared between the caller and
//! the pipeline. Cancelling it aborts the transport task, unwinds any
//! pending delay (stub response delays, retry backoff), and resolves the
//! request with a cancellation error. Cancellation is idempotent and safe
//! from any thread.

use tokio_util::sync::CancellationToken;

/// A handle that can be used to request cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. Pending transport work and scheduled delays
    /// observing this handle stop as soon as possible.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A future that resolves when cancellation is requested.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
