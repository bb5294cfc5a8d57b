use thiserror::Error;

/// Reasons why a coalesced call did not produce a value for a particular caller.
///
/// Panics raised by the coalesced function are not represented here. They are re-raised as
/// panics carrying a [`Panicked`][crate::Panicked] payload instead.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error<E> {
    /// The coalesced function returned an error.
    ///
    /// Every caller that observed the completion of the call receives a clone of the same error.
    #[error("{0}")]
    Failed(E),

    /// The caller's own cancellation token fired while it was waiting on another caller's
    /// in-flight call.
    ///
    /// This only affects the cancelled caller. The in-flight call keeps running.
    #[error("cancelled while waiting for an in-flight call to complete")]
    Cancelled,

    /// The leading caller was dropped before its call produced an outcome.
    ///
    /// This can only happen with [`Group::execute()`][crate::Group::execute], when the future of
    /// the leading caller is dropped while the coalesced function is still running.
    #[error("the leading call was abandoned before it completed")]
    Abandoned,
}

impl<E> Error<E> {
    /// The error returned by the coalesced function, if that is what this error is.
    #[must_use]
    pub fn as_failed(&self) -> Option<&E> {
        match self {
            Self::Failed(inner) => Some(inner),
            Self::Cancelled | Self::Abandoned => None,
        }
    }

    /// Whether the caller stopped waiting because its own token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error<String>: Send, Sync, Debug, std::error::Error);

    #[test]
    fn failed_displays_inner_error() {
        let error = Error::Failed("database unavailable".to_string());

        assert_eq!(error.to_string(), "database unavailable");
        assert_eq!(error.as_failed().map(String::as_str), Some("database unavailable"));
        assert!(!error.is_cancelled());
    }

    #[test]
    fn cancelled_has_no_inner_error() {
        let error = Error::<String>::Cancelled;

        assert!(error.is_cancelled());
        assert_eq!(error.as_failed(), None);
    }

    #[test]
    fn abandoned_is_neither_failed_nor_cancelled() {
        let error = Error::<String>::Abandoned;

        assert!(!error.is_cancelled());
        assert_eq!(error.as_failed(), None);
    }
}
