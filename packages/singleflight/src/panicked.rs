use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;
use std::panic;
use std::sync::{Arc, Mutex};

use crate::ERR_POISONED_LOCK;

/// A panic captured while running a coalesced function.
///
/// The leader captures the panic once and every observer of the call (the leader's own caller
/// and each follower that was waiting when the call completed) re-raises it by unwinding with a
/// clone of the same `Panicked` as the panic payload. Clones share a single allocation, which
/// can be checked via [`Panicked::ptr_eq()`].
///
/// The original panic payload is kept, so a function that panics with a typed value (via
/// [`std::panic::panic_any()`]) can have that value recovered by every observer through
/// [`Panicked::downcast_payload()`] or [`Panicked::with_payload()`].
///
/// To inspect the panic, catch the unwind and downcast the payload:
///
/// ```rust
/// use std::panic::{self, AssertUnwindSafe};
///
/// use singleflight::{CancellationToken, Group, Panicked};
///
/// let group = Group::<&str, u32, String>::new();
/// let token = CancellationToken::new();
///
/// let payload = panic::catch_unwind(AssertUnwindSafe(|| {
///     group.execute_blocking("key", &token, |_| panic!("boom"))
/// }))
/// .unwrap_err();
///
/// let panicked = payload.downcast::<Panicked>().unwrap();
/// assert_eq!(panicked.message(), "boom");
/// ```
#[derive(Clone)]
pub struct Panicked {
    inner: Arc<PanickedInner>,
}

struct PanickedInner {
    message: String,

    // `None` once taken via `take_payload()`. The payload is only `Send`, the mutex makes the
    // whole value `Sync` so that it can be shared between observers.
    payload: Mutex<Option<Box<dyn Any + Send>>>,

    backtrace: Backtrace,
}

impl Panicked {
    /// Converts a payload obtained from [`std::panic::catch_unwind()`].
    ///
    /// A payload that already is a `Panicked` (e.g. raised by a nested group) is kept as-is so
    /// that the original capture site is preserved.
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<Self>() {
            Ok(existing) => *existing,
            Err(payload) => {
                let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
                    (*message).to_owned()
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    message.clone()
                } else {
                    "Box<dyn Any>".to_owned()
                };

                Self {
                    inner: Arc::new(PanickedInner {
                        message,
                        payload: Mutex::new(Some(payload)),
                        backtrace: Backtrace::capture(),
                    }),
                }
            }
        }
    }

    /// The panic message if the panic payload was a string, otherwise `"Box<dyn Any>"`.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Runs `f` with the original panic payload.
    ///
    /// Returns [`None`] if the payload has been taken via [`take_payload()`][Self::take_payload].
    ///
    /// # Panics
    ///
    /// Panics if `f` itself panicked during an earlier call on any clone of this value.
    pub fn with_payload<R>(&self, f: impl FnOnce(&(dyn Any + Send)) -> R) -> Option<R> {
        let payload = self.inner.payload.lock().expect(ERR_POISONED_LOCK);
        payload.as_deref().map(f)
    }

    /// Returns a clone of the original panic payload if it is of type `T`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::panic::{self, AssertUnwindSafe};
    ///
    /// use singleflight::{CancellationToken, Group, Panicked};
    ///
    /// #[derive(Clone, Debug, PartialEq)]
    /// struct Fault {
    ///     code: u32,
    /// }
    ///
    /// let group = Group::<&str, u32, String>::new();
    ///
    /// let payload = panic::catch_unwind(AssertUnwindSafe(|| {
    ///     group.execute_blocking("key", &CancellationToken::new(), |_| {
    ///         panic::panic_any(Fault { code: 7 })
    ///     })
    /// }))
    /// .unwrap_err();
    ///
    /// let panicked = payload.downcast::<Panicked>().unwrap();
    /// assert_eq!(panicked.downcast_payload::<Fault>(), Some(Fault { code: 7 }));
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if a closure passed to [`with_payload()`][Self::with_payload] panicked earlier.
    #[must_use]
    pub fn downcast_payload<T>(&self) -> Option<T>
    where
        T: Any + Clone,
    {
        self.with_payload(|payload| payload.downcast_ref::<T>().cloned())
            .flatten()
    }

    /// Takes the original panic payload out, leaving every clone of this value without one.
    ///
    /// Useful for payloads that cannot be cloned. Only the first caller receives the payload.
    ///
    /// # Panics
    ///
    /// Panics if a closure passed to [`with_payload()`][Self::with_payload] panicked earlier.
    #[must_use]
    pub fn take_payload(&self) -> Option<Box<dyn Any + Send>> {
        self.inner.payload.lock().expect(ERR_POISONED_LOCK).take()
    }

    /// Backtrace captured where the coalesced call caught the panic.
    ///
    /// The capture happens after unwinding, so the backtrace leads to the [`Group`] call that
    /// ran the function but does not include the frames that raised the panic. Those are
    /// reported by the panic hook (the default hook prints them when `RUST_BACKTRACE` is set).
    ///
    /// Follows the usual `RUST_BACKTRACE` / `RUST_LIB_BACKTRACE` rules, so this is
    /// typically disabled unless one of those environment variables is set.
    ///
    /// [`Group`]: crate::Group
    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.inner.backtrace
    }

    /// Whether both values originate from the same captured panic.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Continues unwinding with this value as the panic payload.
    pub(crate) fn resume(self) -> ! {
        panic::resume_unwind(Box::new(self))
    }
}

impl fmt::Display for Panicked {
    #[cfg_attr(test, mutants::skip)] // No API contract for error message.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coalesced call panicked: {}", self.inner.message)
    }
}

impl fmt::Debug for Panicked {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Panicked")
            .field("message", &self.inner.message)
            .field("backtrace", &self.inner.backtrace.status())
            .finish_non_exhaustive()
    }
}

impl Error for Panicked {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::panic::AssertUnwindSafe;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Panicked: Send, Sync, Clone, Error);

    #[test]
    fn static_str_payload_becomes_message() {
        let panicked = Panicked::from_payload(Box::new("boom"));
        assert_eq!(panicked.message(), "boom");
    }

    #[test]
    fn string_payload_becomes_message() {
        let panicked = Panicked::from_payload(Box::new(format!("boom {}", 42)));
        assert_eq!(panicked.message(), "boom 42");
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    struct Fault {
        code: u32,
    }

    #[test]
    fn opaque_payload_gets_placeholder_message() {
        let panicked = Panicked::from_payload(Box::new(1234_u64));
        assert_eq!(panicked.message(), "Box<dyn Any>");
    }

    #[test]
    fn typed_payload_is_preserved_for_every_clone() {
        let panicked = Panicked::from_payload(Box::new(Fault { code: 7 }));
        let observer = panicked.clone();

        assert_eq!(panicked.downcast_payload::<Fault>(), Some(Fault { code: 7 }));
        assert_eq!(observer.downcast_payload::<Fault>(), Some(Fault { code: 7 }));
        assert_eq!(observer.downcast_payload::<String>(), None);
    }

    #[test]
    fn string_payload_is_preserved_too() {
        let panicked = Panicked::from_payload(Box::new("boom"));

        assert_eq!(panicked.downcast_payload::<&str>(), Some("boom"));
        assert_eq!(
            panicked.with_payload(|payload| payload.is::<&str>()),
            Some(true)
        );
    }

    #[test]
    fn taken_payload_is_gone_for_all_clones() {
        let panicked = Panicked::from_payload(Box::new(Fault { code: 3 }));
        let observer = panicked.clone();

        let payload = panicked.take_payload().unwrap();
        assert_eq!(payload.downcast_ref::<Fault>(), Some(&Fault { code: 3 }));

        assert!(observer.take_payload().is_none());
        assert_eq!(observer.downcast_payload::<Fault>(), None);
        assert_eq!(observer.with_payload(|_| ()), None);

        // The message survives the payload.
        assert_eq!(observer.message(), "Box<dyn Any>");
    }

    #[test]
    fn backtrace_follows_environment_settings() {
        let panicked = Panicked::from_payload(Box::new("boom"));

        assert_eq!(panicked.backtrace().status(), Backtrace::capture().status());
    }

    #[test]
    fn existing_panicked_payload_is_reused() {
        let original = Panicked::from_payload(Box::new("inner"));
        let rewrapped = Panicked::from_payload(Box::new(original.clone()));

        assert!(rewrapped.ptr_eq(&original));
        assert_eq!(rewrapped.message(), "inner");
    }

    #[test]
    fn separate_captures_are_distinct() {
        let first = Panicked::from_payload(Box::new("same"));
        let second = Panicked::from_payload(Box::new("same"));

        assert!(!first.ptr_eq(&second));
        assert!(first.ptr_eq(&first.clone()));
    }

    #[test]
    fn resume_unwinds_with_same_payload() {
        let panicked = Panicked::from_payload(Box::new("again"));
        let expected = panicked.clone();

        let payload = panic::catch_unwind(AssertUnwindSafe(move || {
            panicked.resume();
        }))
        .unwrap_err();
        let observed = payload.downcast::<Panicked>().unwrap();

        assert!(observed.ptr_eq(&expected));
    }
}
