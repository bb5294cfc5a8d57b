use crate::Error;

/// What one caller of [`Group::execute()`][crate::Group::execute] observed.
///
/// Besides the result, the response tells whether the outcome was shared between multiple
/// callers. Followers always observe `shared == true`, as do cancelled followers. The leader
/// observes `shared == true` only if at least one follower joined its call.
#[derive(Clone, Debug, Eq, PartialEq)]
#[must_use]
pub struct Response<V, E> {
    result: Result<V, Error<E>>,
    shared: bool,
}

impl<V, E> Response<V, E> {
    pub(crate) fn new(result: Result<V, Error<E>>, shared: bool) -> Self {
        Self { result, shared }
    }

    /// Whether the call was shared with at least one other caller.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// The result of the call, as observed by this caller.
    #[must_use]
    pub fn result(&self) -> &Result<V, Error<E>> {
        &self.result
    }

    /// Consumes the response, returning only the result.
    ///
    /// # Errors
    ///
    /// Returns the [`Error`] this caller observed, see its variants for details.
    pub fn into_result(self) -> Result<V, Error<E>> {
        self.result
    }

    /// Consumes the response, returning the result and the shared flag.
    #[must_use]
    pub fn into_parts(self) -> (Result<V, Error<E>>, bool) {
        (self.result, self.shared)
    }
}
