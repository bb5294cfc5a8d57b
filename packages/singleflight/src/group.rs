use std::any;
use std::borrow::Borrow;
use std::fmt::{self, Debug};
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use foldhash::{HashMap, HashMapExt};
use futures::FutureExt;
use tracing::{debug, trace, warn};

use crate::park::park_on;
use crate::pool::RecordPool;
use crate::race::{CompletionOrCancellation, Woken};
use crate::record::{CallRecord, Outcome};
use crate::{CancellationToken, ERR_POISONED_LOCK, Error, GroupBuilder, Response};

/// A namespace in which calls identified by a key are executed with duplicate suppression.
///
/// While a call for some key is in flight, every other call for the same key waits for the
/// in-flight call to complete and receives a clone of its outcome instead of executing its own
/// function. The caller that executes the function is the *leader*; the callers that wait for it
/// are *followers*.
///
/// * `K` identifies the work. Equal keys are coalesced.
/// * `V` is the value returned by the coalesced function.
/// * `E` is the error returned by the coalesced function.
///
/// Only calls that overlap in time are coalesced. Once a call completes, the next call for the
/// same key executes its function again - nothing is cached.
///
/// If the coalesced function panics, the panic is re-raised in the leader and in every follower
/// that was waiting for the outcome, carrying a [`Panicked`][crate::Panicked] payload.
///
/// The group is typically shared between threads by reference or via an [`Arc`].
///
/// # Example
///
/// ```rust
/// use std::thread;
///
/// use singleflight::{CancellationToken, Group};
///
/// let group = Group::<&str, String, String>::new();
///
/// thread::scope(|s| {
///     for _ in 0..4 {
///         s.spawn(|| {
///             let token = CancellationToken::new();
///             let response = group.execute_blocking("user:42", &token, |_| {
///                 // Imagine an expensive database query here.
///                 Ok("Alice".to_string())
///             });
///
///             assert_eq!(response.into_result().unwrap(), "Alice");
///         });
///     }
/// });
/// ```
pub struct Group<K, V, E> {
    // Also guards the coordination fields of every record reachable from the map.
    calls: Mutex<HashMap<K, Arc<CallRecord<V, E>>>>,

    // Lock order: `calls` before the pool's own lock.
    pool: RecordPool<V, E>,
}

/// The part a caller plays in a call, decided on entry.
enum Role<V, E> {
    Leader(Arc<CallRecord<V, E>>),
    Follower(Arc<CallRecord<V, E>>),
}

impl<K, V, E> Group<K, V, E> {
    /// Creates a group with default configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use singleflight::Group;
    ///
    /// let group = Group::<u64, Vec<u8>, std::io::ErrorKind>::new();
    /// assert_eq!(group.in_flight(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a group.
    pub fn builder() -> GroupBuilder<K, V, E> {
        GroupBuilder::new()
    }

    pub(crate) fn with_pool_capacity(pool_capacity: usize) -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            pool: RecordPool::new(pool_capacity),
        }
    }

    /// Number of keys that currently have a call in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.calls.lock().expect(ERR_POISONED_LOCK).len()
    }

    /// Number of idle call records kept for reuse.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Eq + Hash,
{
    /// Whether a call for `key` is currently in flight.
    #[must_use]
    pub fn is_in_flight<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.calls.lock().expect(ERR_POISONED_LOCK).contains_key(key)
    }

    /// Number of followers waiting on the call currently in flight for `key`, or [`None`] if no
    /// call is in flight for `key`.
    ///
    /// Cancelled followers remain counted, as they joined the call.
    #[must_use]
    pub fn followers<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.calls
            .lock()
            .expect(ERR_POISONED_LOCK)
            .get(key)
            .map(|record| record.followers())
    }

    /// Forgets the call in flight for `key`, if any.
    ///
    /// Callers that already joined the forgotten call still receive its outcome. Calls for `key`
    /// that arrive afterwards no longer join it and instead execute their own function, possibly
    /// while the forgotten call is still running.
    ///
    /// # Example
    ///
    /// ```rust
    /// use singleflight::Group;
    ///
    /// let group = Group::<String, u32, String>::new();
    ///
    /// // Forgetting a key that has nothing in flight does nothing.
    /// group.forget("config");
    /// assert!(!group.is_in_flight("config"));
    /// ```
    pub fn forget<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + Debug + ?Sized,
    {
        let removed = {
            let mut calls = self.calls.lock().expect(ERR_POISONED_LOCK);

            calls.remove(key).map(|record| {
                record.mark_forgotten();
                record.followers()
            })
        };

        if let Some(followers) = removed {
            debug!(?key, followers, "forgot in-flight call");
        }
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Clone,
{
    /// Executes `f` unless a call for `key` is already in flight, in which case the outcome of
    /// that call is awaited instead.
    ///
    /// The leader runs `f` inline as part of this future, handing it a clone of `token`. A
    /// follower races the completion of the in-flight call against its own `token` and
    /// stops waiting with [`Error::Cancelled`] if the token is cancelled first. Cancelling a
    /// follower has no effect on the in-flight call.
    ///
    /// If the future of the leader is dropped before `f` completes, the followers receive
    /// [`Error::Abandoned`].
    ///
    /// # Panics
    ///
    /// Re-raises the panic of `f` (with a [`Panicked`][crate::Panicked] payload) in the leader
    /// and in every follower that was waiting when `f` panicked.
    ///
    /// # Example
    ///
    /// ```rust
    /// use futures::executor::block_on;
    /// use singleflight::{CancellationToken, Group};
    ///
    /// let group = Group::<u32, String, String>::new();
    /// let token = CancellationToken::new();
    ///
    /// let response = block_on(group.execute(7, &token, |_| async { Ok("seven".to_string()) }));
    ///
    /// assert!(!response.is_shared());
    /// assert_eq!(response.into_result().unwrap(), "seven");
    /// ```
    pub async fn execute<F, Fut>(&self, key: K, token: &CancellationToken, f: F) -> Response<V, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match self.enter(&key) {
            Role::Follower(record) => Self::follow(&key, &record, token).await,
            Role::Leader(record) => {
                let guard = LeaderGuard {
                    group: self,
                    key,
                    record: Some(record),
                };

                let leader_token = token.clone();

                // Calling `f` happens inside the wrapped future, so a panic while creating the
                // future is caught just like a panic while polling it.
                let result = AssertUnwindSafe(async move { f(leader_token).await })
                    .catch_unwind()
                    .await;

                guard.finish(Outcome::from_unwind(result))
            }
        }
    }

    /// Executes `f` unless a call for `key` is already in flight, in which case the current
    /// thread blocks until the outcome of that call is available.
    ///
    /// This is the blocking counterpart of [`execute()`][Self::execute] with the same
    /// semantics. Both flavors can be mixed on the same group: a blocking follower can wait for
    /// an async leader and vice versa.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of `f` (with a [`Panicked`][crate::Panicked] payload) in the leader
    /// and in every follower that was waiting when `f` panicked.
    ///
    /// # Example
    ///
    /// ```rust
    /// use singleflight::{CancellationToken, Error, Group};
    ///
    /// let group = Group::<&str, u32, String>::new();
    /// let token = CancellationToken::new();
    ///
    /// let response = group.execute_blocking("key", &token, |_| Err("unavailable".to_string()));
    ///
    /// assert_eq!(
    ///     response.into_result(),
    ///     Err(Error::Failed("unavailable".to_string()))
    /// );
    /// ```
    pub fn execute_blocking<F>(&self, key: K, token: &CancellationToken, f: F) -> Response<V, E>
    where
        F: FnOnce(CancellationToken) -> Result<V, E>,
    {
        match self.enter(&key) {
            Role::Follower(record) => park_on(Self::follow(&key, &record, token)),
            Role::Leader(record) => {
                let guard = LeaderGuard {
                    group: self,
                    key,
                    record: Some(record),
                };

                let leader_token = token.clone();
                let result = panic::catch_unwind(AssertUnwindSafe(move || f(leader_token)));

                guard.finish(Outcome::from_unwind(result))
            }
        }
    }

    /// Decides whether the caller leads a new call or follows the one in flight.
    fn enter(&self, key: &K) -> Role<V, E> {
        let role = {
            let mut calls = self.calls.lock().expect(ERR_POISONED_LOCK);

            if let Some(record) = calls.get(key) {
                record.join();
                Role::Follower(Arc::clone(record))
            } else {
                let record = self.pool.get();
                calls.insert(key.clone(), Arc::clone(&record));
                Role::Leader(record)
            }
        };

        match &role {
            Role::Leader(_) => trace!(?key, "leading new call"),
            Role::Follower(record) => {
                trace!(?key, followers = record.followers(), "following in-flight call");
            }
        }

        role
    }

    async fn follow(
        key: &K,
        record: &CallRecord<V, E>,
        token: &CancellationToken,
    ) -> Response<V, E> {
        let signal = record
            .signal()
            .expect("joining a call always creates its completion signal");

        match CompletionOrCancellation::new(signal.wait(), token.cancelled()).await {
            Woken::Completed => record
                .outcome()
                .expect("the completion signal only fires after the outcome has been stored")
                .clone()
                .into_response(true),
            Woken::Cancelled => {
                debug!(?key, "follower cancelled while waiting");
                Response::new(Err(Error::Cancelled), true)
            }
        }
    }

    /// Stores the outcome, releases the followers, removes the map entry and recycles the
    /// record if possible.
    ///
    /// Returns the outcome for the leader along with whether any follower joined.
    #[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
    fn complete(
        &self,
        key: &K,
        mut record: Arc<CallRecord<V, E>>,
        outcome: Outcome<V, E>,
    ) -> (Outcome<V, E>, bool) {
        if let Outcome::Panicked(panicked) = &outcome {
            debug!(?key, message = panicked.message(), "coalesced call panicked");
        }

        record.complete(outcome);

        let (followers, recyclable) = {
            let mut calls = self.calls.lock().expect(ERR_POISONED_LOCK);

            // Anyone who joined did so before we took the lock, and nobody can join after we
            // remove the entry below, so firing here reaches every follower.
            if let Some(signal) = record.signal() {
                signal.fire();
            }

            // A forgotten record is no longer in the map. The key may meanwhile belong to a
            // newer call, which we must leave alone.
            if !record.is_forgotten()
                && calls
                    .get(key)
                    .is_some_and(|current| Arc::ptr_eq(current, &record))
            {
                calls.remove(key);
            }

            (record.followers(), record.is_recyclable())
        };

        let recycled = if recyclable {
            Arc::get_mut(&mut record).and_then(CallRecord::take_outcome)
        } else {
            None
        };

        if let Some(outcome) = recycled {
            self.pool.put(record);
            trace!(?key, "recycled call record");
            return (outcome, false);
        }

        let outcome = record
            .outcome()
            .expect("the outcome was stored at the start of completion")
            .clone();

        (outcome, followers > 0)
    }
}

impl<K, V, E> Default for Group<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> fmt::Debug for Group<K, V, E> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(any::type_name::<Self>())
            .field("in_flight", &self.in_flight())
            .field("pool", &self.pool)
            .finish()
    }
}

/// Completes the call on behalf of a leader that never got to do so itself.
///
/// The only way this happens is an async leader whose future is dropped while the coalesced
/// function is still running. Without the guard, the followers would wait forever and the key
/// would stay occupied.
struct LeaderGuard<'g, K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Clone,
{
    group: &'g Group<K, V, E>,
    key: K,

    // Taken once the leader completes the call normally.
    record: Option<Arc<CallRecord<V, E>>>,
}

impl<K, V, E> LeaderGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Clone,
{
    fn finish(mut self, outcome: Outcome<V, E>) -> Response<V, E> {
        let record = self
            .record
            .take()
            .expect("a leader guard completes its call at most once");

        let (outcome, shared) = self.group.complete(&self.key, record, outcome);
        outcome.into_response(shared)
    }
}

impl<K, V, E> Drop for LeaderGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            warn!(key = ?self.key, "leader dropped before its call completed");

            drop(self.group.complete(&self.key, record, Outcome::Abandoned));
        }
    }
}
