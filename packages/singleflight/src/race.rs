use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::SignalWait;

/// Which of the two raced signals released a follower.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Woken {
    Completed,
    Cancelled,
}

/// Waits until either the call completes or the follower's token is cancelled.
///
/// Completion is checked first, so a follower whose token fires at the same moment the call
/// completes still receives the outcome. Whichever wait loses is dropped together with this
/// future and withdraws its registration.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub(crate) struct CompletionOrCancellation<'a> {
    completed: SignalWait<'a>,
    cancelled: SignalWait<'a>,
}

impl<'a> CompletionOrCancellation<'a> {
    pub(crate) fn new(completed: SignalWait<'a>, cancelled: SignalWait<'a>) -> Self {
        Self {
            completed,
            cancelled,
        }
    }
}

impl Future for CompletionOrCancellation<'_> {
    type Output = Woken;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if Pin::new(&mut this.completed).poll(cx).is_ready() {
            return Poll::Ready(Woken::Completed);
        }

        if Pin::new(&mut this.cancelled).poll(cx).is_ready() {
            return Poll::Ready(Woken::Cancelled);
        }

        Poll::Pending
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::{CancellationToken, CompletionSignal};

    #[test]
    fn pending_until_either_fires() {
        let signal = CompletionSignal::new();
        let token = CancellationToken::new();

        let race = CompletionOrCancellation::new(signal.wait(), token.cancelled());
        assert_eq!(race.now_or_never(), None);
    }

    #[test]
    fn completion_wins() {
        let signal = CompletionSignal::new();
        let token = CancellationToken::new();
        signal.fire();

        let race = CompletionOrCancellation::new(signal.wait(), token.cancelled());
        assert_eq!(race.now_or_never(), Some(Woken::Completed));
    }

    #[test]
    fn cancellation_wins() {
        let signal = CompletionSignal::new();
        let token = CancellationToken::new();
        token.cancel();

        let race = CompletionOrCancellation::new(signal.wait(), token.cancelled());
        assert_eq!(race.now_or_never(), Some(Woken::Cancelled));
    }

    #[test]
    fn completion_preferred_when_both_fired() {
        let signal = CompletionSignal::new();
        let token = CancellationToken::new();
        token.cancel();
        signal.fire();

        let race = CompletionOrCancellation::new(signal.wait(), token.cancelled());
        assert_eq!(race.now_or_never(), Some(Woken::Completed));
    }
}
