use std::sync::Arc;

use crate::{CompletionSignal, SignalWait};

/// A cloneable, per-caller signal indicating that the caller no longer wants to wait.
///
/// All clones observe the same cancellation. Cancelling is idempotent and permanent.
///
/// A [`Group`][crate::Group] uses the token in two ways:
///
/// * A follower races its own token against the completion of the in-flight call and returns
///   [`Error::Cancelled`][crate::Error::Cancelled] if the token wins. This never affects the
///   leader or other followers.
/// * The leader hands a clone of its own token to the coalesced function. Honoring it is
///   entirely up to that function.
///
/// # Example
///
/// ```rust
/// use singleflight::CancellationToken;
///
/// let token = CancellationToken::new();
/// let observer = token.clone();
///
/// assert!(!observer.is_cancelled());
/// token.cancel();
/// assert!(observer.is_cancelled());
///
/// // Already cancelled, so this returns immediately.
/// observer.wait_blocking();
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    signal: Arc<CompletionSignal>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and every clone of it.
    pub fn cancel(&self) {
        self.signal.fire();
    }

    /// Whether the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_fired()
    }

    /// Returns a future that completes once the token has been cancelled.
    pub fn cancelled(&self) -> SignalWait<'_> {
        self.signal.wait()
    }

    /// Blocks the current thread until the token has been cancelled.
    pub fn wait_blocking(&self) {
        self.signal.wait_blocking();
    }
}
