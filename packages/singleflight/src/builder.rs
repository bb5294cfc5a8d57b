use std::any;
use std::fmt;
use std::marker::PhantomData;

use crate::{DEFAULT_POOL_CAPACITY, Group};

/// Configures and creates a [`Group`].
///
/// Obtained via [`Group::builder()`].
///
/// # Example
///
/// ```rust
/// use singleflight::Group;
///
/// let group = Group::<String, u64, String>::builder()
///     .pool_capacity(8)
///     .build();
///
/// assert_eq!(group.pooled(), 0);
/// ```
#[must_use]
pub struct GroupBuilder<K, V, E> {
    pool_capacity: usize,

    _types: PhantomData<fn() -> (K, V, E)>,
}

impl<K, V, E> GroupBuilder<K, V, E> {
    pub(crate) fn new() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            _types: PhantomData,
        }
    }

    /// Sets how many idle call records the group keeps for reuse.
    ///
    /// Records are only reused after calls that completed without followers and without
    /// panicking. Zero disables reuse, so every call allocates a new record.
    ///
    /// Defaults to [`DEFAULT_POOL_CAPACITY`].
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Creates the group.
    #[must_use]
    pub fn build(self) -> Group<K, V, E> {
        Group::with_pool_capacity(self.pool_capacity)
    }
}

impl<K, V, E> fmt::Debug for GroupBuilder<K, V, E> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(any::type_name::<Self>())
            .field("pool_capacity", &self.pool_capacity)
            .finish_non_exhaustive()
    }
}
