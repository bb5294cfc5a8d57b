use std::sync::{Arc, Mutex};
use std::{any, fmt};

use crate::ERR_POISONED_LOCK;
use crate::record::CallRecord;

/// Bounded stash of idle call records, so that a leader on the common path (no followers, no
/// panic) does not need to allocate a new record for every call.
///
/// Only records that are exclusively owned by the caller can be returned to the pool. This is
/// what guarantees that nobody can still be observing a record once it is handed out again.
pub(crate) struct RecordPool<V, E> {
    idle: Mutex<Vec<Arc<CallRecord<V, E>>>>,
    capacity: usize,
}

impl<V, E> RecordPool<V, E> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Takes a pristine record out of the pool or, if the pool is empty, allocates a new one.
    pub(crate) fn get(&self) -> Arc<CallRecord<V, E>> {
        let recycled = self.idle.lock().expect(ERR_POISONED_LOCK).pop();

        match recycled {
            Some(mut record) => {
                // Records in the pool are exclusively owned by the pool.
                if let Some(exclusive) = Arc::get_mut(&mut record) {
                    exclusive.reset();
                    record
                } else {
                    Arc::new(CallRecord::new())
                }
            }
            None => Arc::new(CallRecord::new()),
        }
    }

    /// Resets the record and keeps it for reuse.
    ///
    /// The record is dropped instead if the pool is full or if anything else still holds a
    /// reference to it.
    pub(crate) fn put(&self, mut record: Arc<CallRecord<V, E>>) {
        let Some(exclusive) = Arc::get_mut(&mut record) else {
            return;
        };

        // Drop the outcome here rather than whenever the record is reused.
        exclusive.reset();

        let mut idle = self.idle.lock().expect(ERR_POISONED_LOCK);

        if idle.len() < self.capacity {
            idle.push(record);
        }
    }

    /// Number of idle records currently held.
    pub(crate) fn len(&self) -> usize {
        self.idle.lock().expect(ERR_POISONED_LOCK).len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<V, E> fmt::Debug for RecordPool<V, E> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(any::type_name::<Self>())
            .field("idle", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
