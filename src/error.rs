use thiserror::Error;

/// Handle-misuse errors.
///
/// Construction failures are not represented here: a failing
/// [`ResourceFactory`](crate::ResourceFactory) propagates its own error type
/// unchanged through [`Pool::acquire`](crate::Pool::acquire) and friends.
/// This enum covers only violations of the handle contract, which are
/// reported rather than silently tolerated.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandleError {
    /// The handle was issued by a different pool than the one asked to
    /// release it.
    #[error("handle does not belong to this pool")]
    ForeignHandle,

    /// The handle has already been released and no longer wraps an object.
    #[error("handle was already released")]
    Released,
}
