//! One-shot broadcast signal used to release followers once a leader has finished.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

use crate::ERR_POISONED_LOCK;
use crate::park::park_on;

/// A level-triggered flag that can be fired exactly once and observed by any number of waiters.
///
/// Waiting is possible both asynchronously via [`wait()`][Self::wait] and by blocking the
/// current thread via [`wait_blocking()`][Self::wait_blocking]. Once fired, the signal stays
/// fired: every current waiter is released and every later observer completes immediately.
///
/// The signal is the building block for both the per-call completion broadcast inside a
/// [`Group`][crate::Group] and for [`CancellationToken`][crate::CancellationToken].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
///
/// use singleflight::CompletionSignal;
///
/// let signal = Arc::new(CompletionSignal::new());
///
/// let waiter = thread::spawn({
///     let signal = Arc::clone(&signal);
///     move || signal.wait_blocking()
/// });
///
/// assert!(signal.fire());
/// waiter.join().unwrap();
///
/// // Firing again is a no-op.
/// assert!(!signal.fire());
/// assert!(signal.is_fired());
/// ```
pub struct CompletionSignal {
    // Only ever goes from false to true, and only while `waiters` is locked. This allows the
    // fast path in `is_fired()` to skip the lock entirely.
    fired: AtomicBool,

    waiters: Mutex<Waiters>,
}

#[derive(Debug, Default)]
struct Waiters {
    next_id: u64,
    registered: Vec<(u64, Waker)>,
}

impl CompletionSignal {
    /// Creates a signal that has not yet fired.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            waiters: Mutex::new(Waiters::default()),
        }
    }

    /// Fires the signal, releasing all current waiters.
    ///
    /// Returns `true` if this call fired the signal and `false` if it had already been fired.
    #[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
    pub fn fire(&self) -> bool {
        let wakers = {
            let mut waiters = self.waiters.lock().expect(ERR_POISONED_LOCK);

            if self.fired.load(Ordering::Relaxed) {
                return false;
            }

            self.fired.store(true, Ordering::Release);
            mem::take(&mut waiters.registered)
        };

        // Woken waiters never need our lock again, but there is no reason to make them
        // race for it either.
        for (_, waker) in wakers {
            waker.wake();
        }

        true
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Returns a future that completes once the signal has fired.
    ///
    /// Dropping the future before it completes withdraws its registration, so a waiter that
    /// gives up (e.g. because it was cancelled) leaves nothing behind.
    pub fn wait(&self) -> SignalWait<'_> {
        SignalWait {
            signal: self,
            id: None,
        }
    }

    /// Blocks the current thread until the signal has fired.
    pub fn wait_blocking(&self) {
        if self.is_fired() {
            return;
        }

        park_on(self.wait());
    }

    /// Registers (or refreshes) the waker of one waiter.
    ///
    /// Returns `true` if the signal has already fired, in which case nothing is registered.
    #[cfg_attr(test, mutants::skip)] // Critical for code execution to occur in async contexts.
    fn register(&self, id: &mut Option<u64>, waker: &Waker) -> bool {
        let mut waiters = self.waiters.lock().expect(ERR_POISONED_LOCK);

        if self.fired.load(Ordering::Relaxed) {
            return true;
        }

        match *id {
            Some(existing_id) => {
                // Only the waker from the most recent poll needs to be woken.
                if let Some((_, existing)) = waiters
                    .registered
                    .iter_mut()
                    .find(|(candidate, _)| *candidate == existing_id)
                {
                    existing.clone_from(waker);
                }
            }
            None => {
                let new_id = waiters.next_id;
                waiters.next_id = new_id.wrapping_add(1);
                waiters.registered.push((new_id, waker.clone()));
                *id = Some(new_id);
            }
        }

        false
    }

    fn deregister(&self, id: u64) {
        if self.is_fired() {
            // The registration list was already drained by `fire()`.
            return;
        }

        let mut waiters = self.waiters.lock().expect(ERR_POISONED_LOCK);
        waiters.registered.retain(|(candidate, _)| *candidate != id);
    }

    #[cfg(test)]
    fn registered_waiters(&self) -> usize {
        self.waiters
            .lock()
            .expect(ERR_POISONED_LOCK)
            .registered
            .len()
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionSignal {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("fired", &self.is_fired())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`CompletionSignal::wait()`], completing once the signal has fired.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct SignalWait<'a> {
    signal: &'a CompletionSignal,

    // Assigned on first registration; identifies our waker in the signal's list.
    id: Option<u64>,
}

impl Future for SignalWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.signal.is_fired() || this.signal.register(&mut this.id, cx.waker()) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Drop for SignalWait<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.signal.deregister(id);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;
    use std::task::Waker;
    use std::thread;

    use futures::FutureExt;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;

    assert_impl_all!(CompletionSignal: Send, Sync);
    assert_impl_all!(SignalWait<'static>: Send, Sync, Unpin);

    #[test]
    fn new_signal_is_not_fired() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_fired());
        assert!(!CompletionSignal::default().is_fired());
    }

    #[test]
    fn fire_happens_only_once() {
        let signal = CompletionSignal::new();

        assert!(signal.fire());
        assert!(signal.is_fired());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[test]
    fn wait_after_fire_completes_immediately() {
        let signal = CompletionSignal::new();
        signal.fire();

        assert_eq!(signal.wait().now_or_never(), Some(()));
        signal.wait_blocking();
    }

    #[test]
    fn pending_wait_registers_and_deregisters_on_drop() {
        let signal = CompletionSignal::new();

        {
            let mut wait = signal.wait();
            let mut cx = Context::from_waker(Waker::noop());

            assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
            assert_eq!(signal.registered_waiters(), 1);

            // Polling again refreshes the existing registration instead of adding one.
            assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
            assert_eq!(signal.registered_waiters(), 1);
        }

        assert_eq!(signal.registered_waiters(), 0);
    }

    #[test]
    fn fire_releases_pending_future() {
        let signal = CompletionSignal::new();
        let mut wait = signal.wait();
        let mut cx = Context::from_waker(Waker::noop());

        assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());

        signal.fire();

        assert!(Pin::new(&mut wait).poll(&mut cx).is_ready());
        assert_eq!(signal.registered_waiters(), 0);
    }

    #[test]
    fn fire_releases_all_blocked_threads() {
        with_watchdog(|| {
            let signal = Arc::new(CompletionSignal::new());

            let waiters = (0..8)
                .map(|_| {
                    let signal = Arc::clone(&signal);
                    thread::spawn(move || {
                        signal.wait_blocking();
                        signal.is_fired()
                    })
                })
                .collect::<Vec<_>>();

            testing::wait_until(|| signal.registered_waiters() == 8);
            assert!(signal.fire());

            for waiter in waiters {
                assert!(waiter.join().unwrap());
            }
        });
    }
}
