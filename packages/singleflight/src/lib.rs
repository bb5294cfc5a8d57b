#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Duplicate suppression for concurrent calls, also known as call coalescing or "singleflight".
//!
//! When many callers concurrently ask for the same expensive piece of work - a database query, a
//! remote lookup, a cache refill - a [`Group`] makes sure the work happens only once. The first
//! caller for a key becomes the *leader* and executes the work; every caller that arrives while
//! the leader is still busy becomes a *follower* and receives a clone of the leader's outcome.
//! This protects backing resources from a thundering herd of identical requests.
//!
//! This is part of the [Folo project](https://github.com/folo-rs/folo) that provides mechanisms
//! for high-performance hardware-aware programming in Rust.
//!
//! # Overview
//!
//! * [`Group`] - the registry of in-flight calls, offering [`Group::execute()`] for async code and
//!   [`Group::execute_blocking()`] for threads. Both flavors can be mixed freely.
//! * [`CancellationToken`] - lets a follower stop waiting. Only that follower is affected; the
//!   in-flight call and the other followers are not.
//! * [`Response`] - the outcome observed by one caller, plus whether it was shared.
//! * [`Error`] - why a caller did not receive a value.
//! * [`Panicked`] - payload of a panic raised by the coalesced function, re-raised in every caller
//!   that observed the call.
//! * [`CompletionSignal`] - the one-shot broadcast primitive the group is built on.
//!
//! Nothing is cached beyond the lifetime of a call: once a call completes, the next call for the
//! same key starts over.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::thread;
//!
//! use singleflight::{CancellationToken, Group};
//!
//! let group = Group::<String, u64, String>::new();
//! let executions = AtomicUsize::new(0);
//!
//! thread::scope(|s| {
//!     for _ in 0..10 {
//!         s.spawn(|| {
//!             let token = CancellationToken::new();
//!
//!             let response = group.execute_blocking("answer".to_string(), &token, |_| {
//!                 executions.fetch_add(1, Ordering::Relaxed);
//!                 Ok(42)
//!             });
//!
//!             assert_eq!(response.into_result(), Ok(42));
//!         });
//!     }
//! });
//!
//! // Between 1 and 10 executions, depending on how much the threads overlapped.
//! assert!(executions.load(Ordering::Relaxed) >= 1);
//! ```
//!
//! # Cancellation
//!
//! ```rust
//! use futures::executor::block_on;
//! use singleflight::{CancellationToken, Group};
//!
//! let group = Group::<&str, u64, String>::new();
//! let token = CancellationToken::new();
//!
//! // The token is handed to the coalesced function, which may honor it as it sees fit.
//! let response = block_on(group.execute("key", &token, |token| async move {
//!     if token.is_cancelled() {
//!         Err("cancelled".to_string())
//!     } else {
//!         Ok(1)
//!     }
//! }));
//!
//! assert_eq!(response.into_result(), Ok(1));
//! ```

mod builder;
mod cancel;
mod constants;
mod error;
mod group;
mod panicked;
mod park;
mod pool;
mod race;
mod record;
mod response;
mod signal;

pub use builder::*;
pub use cancel::*;
pub use constants::*;
pub use error::*;
pub use group::*;
pub use panicked::*;
pub use response::*;
pub use signal::*;
