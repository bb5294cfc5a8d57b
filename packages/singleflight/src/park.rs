//! Blocking waits that park the current thread instead of entering an executor.
//!
//! A blocking caller may itself be running inside some executor (for example a
//! `futures::executor::block_on` further up the stack). Such executors refuse to be nested, so
//! the blocking paths of this crate drive their futures with a plain park/unpark loop instead.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// Polls `future` to completion on the current thread, parking between polls.
///
/// Spurious unparks only cause an extra poll.
pub(crate) fn park_on<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);

    let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
    let mut cx = Context::from_waker(&waker);

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => thread::park(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use futures::executor::block_on;
    use testing::with_watchdog;

    use super::*;
    use crate::CompletionSignal;

    #[test]
    fn ready_future_returns_immediately() {
        assert_eq!(park_on(async { 5 }), 5);
    }

    #[test]
    fn wakes_when_signal_fires_on_other_thread() {
        with_watchdog(|| {
            let signal = CompletionSignal::new();
            let released = AtomicBool::new(false);

            thread::scope(|s| {
                s.spawn(|| {
                    park_on(signal.wait());
                    released.store(true, Ordering::SeqCst);
                });

                thread::sleep(Duration::from_millis(5));
                assert!(!released.load(Ordering::SeqCst));

                signal.fire();
            });

            assert!(released.load(Ordering::SeqCst));
        });
    }

    #[test]
    fn works_inside_another_executor() {
        with_watchdog(|| {
            let signal = CompletionSignal::new();

            thread::scope(|s| {
                let waiter = s.spawn(|| {
                    block_on(async {
                        park_on(signal.wait());
                        "released"
                    })
                });

                thread::sleep(Duration::from_millis(5));
                signal.fire();

                assert_eq!(waiter.join().unwrap(), "released");
            });
        });
    }
}
