//! State of one in-flight (or just finished) call under one key.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crate::{CompletionSignal, Error, Panicked, Response};

/// How a coalesced call ended.
#[derive(Clone, Debug)]
pub(crate) enum Outcome<V, E> {
    Value(V),
    Failed(E),
    Panicked(Panicked),

    /// The leader went away without producing anything.
    Abandoned,
}

impl<V, E> Outcome<V, E> {
    pub(crate) fn from_unwind(result: thread::Result<Result<V, E>>) -> Self {
        match result {
            Ok(Ok(value)) => Self::Value(value),
            Ok(Err(error)) => Self::Failed(error),
            Err(payload) => Self::Panicked(Panicked::from_payload(payload)),
        }
    }

    /// Whether the call returned normally, with either a value or an error.
    pub(crate) fn is_clean(&self) -> bool {
        matches!(self, Self::Value(_) | Self::Failed(_))
    }

    /// Converts the outcome into what one caller observes.
    ///
    /// A captured panic does not become a response - it is re-raised on the calling thread.
    pub(crate) fn into_response(self, shared: bool) -> Response<V, E> {
        let result = match self {
            Self::Value(value) => Ok(value),
            Self::Failed(error) => Err(Error::Failed(error)),
            Self::Abandoned => Err(Error::Abandoned),
            Self::Panicked(panicked) => panicked.resume(),
        };

        Response::new(result, shared)
    }
}

/// Shared state of one call, referenced by the group's map, the leader and every follower.
///
/// The outcome is written once by the leader before the signal fires and is read-only from then
/// on. The coordination fields (`signal`, `followers`, `forgotten`) are only ever mutated while
/// the owning group's lock is held; the atomics merely let us express that through `&self`.
pub(crate) struct CallRecord<V, E> {
    outcome: OnceLock<Outcome<V, E>>,

    // Only created once a follower joins. A leader without followers never allocates it.
    signal: OnceLock<CompletionSignal>,

    followers: AtomicUsize,
    forgotten: AtomicBool,
}

impl<V, E> CallRecord<V, E> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            signal: OnceLock::new(),
            followers: AtomicUsize::new(0),
            forgotten: AtomicBool::new(false),
        }
    }

    /// Registers one more follower and returns the signal it is to wait on.
    ///
    /// The caller must hold the group lock.
    pub(crate) fn join(&self) -> &CompletionSignal {
        self.followers.fetch_add(1, Ordering::Relaxed);
        self.signal.get_or_init(CompletionSignal::new)
    }

    /// The signal followers wait on, if any follower has joined.
    pub(crate) fn signal(&self) -> Option<&CompletionSignal> {
        self.signal.get()
    }

    pub(crate) fn followers(&self) -> usize {
        self.followers.load(Ordering::Relaxed)
    }

    /// The caller must hold the group lock.
    pub(crate) fn mark_forgotten(&self) {
        self.forgotten.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_forgotten(&self) -> bool {
        self.forgotten.load(Ordering::Relaxed)
    }

    /// Stores the outcome of the call. Only the leader calls this, exactly once.
    pub(crate) fn complete(&self, outcome: Outcome<V, E>) {
        assert!(
            self.outcome.set(outcome).is_ok(),
            "outcome of a call record was written twice"
        );
    }

    pub(crate) fn outcome(&self) -> Option<&Outcome<V, E>> {
        self.outcome.get()
    }

    /// Whether the record may be handed out again for an unrelated call.
    ///
    /// Anything a follower may still be looking at (the signal, the outcome of a panicked call)
    /// disqualifies the record, as reuse would leak that state into the next call.
    ///
    /// The caller must hold the group lock.
    pub(crate) fn is_recyclable(&self) -> bool {
        self.followers() == 0
            && self.signal.get().is_none()
            && self.outcome.get().is_some_and(Outcome::is_clean)
    }

    /// Moves the outcome out of an exclusively owned record.
    pub(crate) fn take_outcome(&mut self) -> Option<Outcome<V, E>> {
        self.outcome.take()
    }

    /// Returns the record to its pristine state, releasing anything it references.
    pub(crate) fn reset(&mut self) {
        self.outcome = OnceLock::new();
        self.signal = OnceLock::new();
        *self.followers.get_mut() = 0;
        *self.forgotten.get_mut() = false;
    }

    #[cfg(test)]
    pub(crate) fn is_pristine(&self) -> bool {
        self.outcome.get().is_none()
            && self.signal.get().is_none()
            && self.followers() == 0
            && !self.is_forgotten()
    }
}

impl<V, E> fmt::Debug for CallRecord<V, E> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRecord")
            .field("completed", &self.outcome.get().is_some())
            .field("signal", &self.signal.get())
            .field("followers", &self.followers())
            .field("forgotten", &self.is_forgotten())
            .finish()
    }
}
