/// A trait defining how a pool constructs and recycles its backing objects.
///
/// This trait provides a fallible constructor along with hooks for resetting
/// objects before reuse and validating them before they are stored back in
/// the pool.
pub trait ResourceFactory<T> {
    /// The error produced when construction fails. Propagated unchanged to
    /// the caller of [`Pool::acquire`](crate::Pool::acquire).
    type Error;

    /// Creates a new object of type T, or fails with a construction error.
    fn create(&self) -> Result<T, Self::Error>;

    /// Resets the state of an object to its initial state if necessary.
    ///
    /// Runs on every pooled object before it is handed out again. By
    /// default, this method does nothing. Override this method to provide
    /// custom reset logic.
    #[inline(always)]
    fn reset(&self, _obj: &mut T) {}

    /// Validates that an object is in a good state to be stored back in the
    /// pool.
    ///
    /// Objects failing validation on release are dropped instead of pooled.
    /// By default, this method always returns true. Override this method to
    /// provide custom validation logic.
    #[inline(always)]
    fn is_valid(&self, _obj: &T) -> bool {
        true
    }
}

/// Any zero-argument fallible closure is a factory with default reset and
/// validation behavior.
impl<T, E, F> ResourceFactory<T> for F
where
    F: Fn() -> Result<T, E>,
{
    type Error = E;

    #[inline]
    fn create(&self) -> Result<T, E> {
        self()
    }
}
