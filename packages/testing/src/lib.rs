#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and benchmarking the singleflight package.
//!
//! Coalescing only happens when calls overlap in time, so most tests need to hold a leader
//! inside its function until the followers have joined. [`Gate`] and [`wait_until()`] make those
//! interleavings deterministic instead of relying on sleeps, and [`with_watchdog()`] turns a
//! lost wakeup into a test failure instead of a hung test run.

use std::sync::{Condvar, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

/// How long a test may run (or a condition may take to become true) before we give up.
///
/// Miri is dramatically slower at thread synchronization, so it gets a longer allowance.
fn patience() -> Duration {
    if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    }
}

/// Runs a test body on a separate thread and fails the test if it does not finish in time.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the body runs directly on the
/// current thread so that mutation testing can detect hanging mutations itself.
///
/// # Panics
///
/// Panics if the body exceeds the time limit. A panic inside the body is propagated as-is.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(body: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return body();
    }

    let (tx, rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        // The receiver is gone if we already timed out; nobody cares about the result then.
        drop(tx.send(body()));
    });

    match rx.recv_timeout(patience()) {
        Ok(result) => {
            worker.join().expect("worker already delivered its result");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test did not finish within {:?}", patience());
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match worker.join() {
            Ok(()) => panic!("test worker exited without delivering a result"),
            Err(payload) => std::panic::resume_unwind(payload),
        },
    }
}

/// A latch that blocks every waiter until it is opened. Once open, it stays open.
///
/// Typically used to keep a leader inside its coalesced function until the test has arranged
/// the followers it wants.
///
/// # Example
///
/// ```rust
/// use std::thread;
///
/// use testing::Gate;
///
/// let gate = Gate::new();
///
/// thread::scope(|s| {
///     let waiter = s.spawn(|| {
///         gate.wait();
///         "passed"
///     });
///
///     gate.open();
///     assert_eq!(waiter.join().unwrap(), "passed");
/// });
/// ```
#[derive(Debug, Default)]
pub struct Gate {
    is_open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate, releasing all current and future waiters.
    ///
    /// # Panics
    ///
    /// Panics if a waiter panicked while holding the internal lock.
    pub fn open(&self) {
        *self.is_open.lock().expect("gate lock poisoned") = true;
        self.opened.notify_all();
    }

    /// Blocks until the gate is opened.
    ///
    /// # Panics
    ///
    /// Panics if another thread panicked while holding the internal lock.
    pub fn wait(&self) {
        let is_open = self.is_open.lock().expect("gate lock poisoned");

        drop(
            self.opened
                .wait_while(is_open, |is_open| !*is_open)
                .expect("gate lock poisoned"),
        );
    }

    /// Whether the gate has been opened.
    ///
    /// # Panics
    ///
    /// Panics if another thread panicked while holding the internal lock.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.lock().expect("gate lock poisoned")
    }
}

/// Polls `condition` until it returns `true`.
///
/// Used to wait for state that another thread is expected to reach shortly, such as a follower
/// having joined an in-flight call.
///
/// # Panics
///
/// Panics if the condition does not become true within the test time limit.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now()
        .checked_add(patience())
        .expect("test deadline is representable");

    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition did not become true within {:?}",
            patience()
        );

        thread::sleep(Duration::from_millis(1));
    }
}
