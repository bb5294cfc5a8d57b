// A poisoned lock means a panic escaped while the group was mid-update. The map and the record
// coordination fields can no longer be trusted, so we refuse to continue.
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - the call registry may \
    be in an inconsistent state and continued execution is not safe";

/// Number of idle call records a [`Group`][crate::Group] keeps for reuse unless configured
/// otherwise via [`GroupBuilder::pool_capacity()`][crate::GroupBuilder::pool_capacity].
pub const DEFAULT_POOL_CAPACITY: usize = 64;
