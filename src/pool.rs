use crate::{HandleError, ResourceFactory};
use crossbeam_queue::SegQueue;
use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::{Deref, DerefMut},
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::trace;

/// A struct representing an object pool.
///
/// This struct uses a factory to create and manage objects, and stores the
/// ones not currently checked out in a lock-free queue. Acquiring never
/// blocks: when the queue is empty the pool grows by constructing a new
/// object on demand.
#[derive(Debug)]
pub struct Pool<P, T> {
    factory: P,
    available: SegQueue<T>,
    // Objects created and not yet discarded. Advisory only.
    allocated: AtomicUsize,
}

impl<P, T> Pool<P, T> {
    /// Creates a new, empty pool backed by the given factory.
    ///
    /// Unlike [`Self::prefilled`], this method does not immediately fill
    /// the pool with objects.
    pub fn new(factory: P) -> Self {
        Pool {
            factory,
            available: SegQueue::new(),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Wraps the pool with an atomic reference counter, enabling the use of
    /// [`Self::acquire_rc`] to obtain handles that carry shared ownership of
    /// the pool instead of a borrowed reference.
    pub fn to_rc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Gets the number of objects currently available for checkout.
    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Gets the number of objects this pool has created and not yet
    /// discarded, whether currently available or checked out.
    ///
    /// Not stable across concurrent use; suitable for diagnostics only.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Gets the number of objects currently checked out.
    ///
    /// Computed from [`Self::allocated`] and [`Self::available`]; suitable
    /// for diagnostics only.
    pub fn outstanding(&self) -> usize {
        self.allocated().saturating_sub(self.available())
    }
}

impl<P: ResourceFactory<T>, T> Pool<P, T> {
    /// Creates a new pool with the given number of objects already
    /// constructed, or fails with the first construction error.
    pub fn prefilled(pool_size: usize, factory: P) -> Result<Self, P::Error> {
        let pool = Pool::new(factory);
        for _ in 0..pool_size {
            pool.available.push(pool.factory.create()?);
            pool.allocated.fetch_add(1, Ordering::Relaxed);
        }
        Ok(pool)
    }

    /// Checks an object out of the pool.
    ///
    /// An available object is reset and handed out; if none is available, a
    /// new object is created using the factory. The only failure mode is a
    /// factory construction error.
    ///
    /// The returned handle releases the object back to this pool when
    /// dropped, on every exit path.
    pub fn acquire(&self) -> Result<RefHandle<'_, P, T>, P::Error> {
        match self.available.pop() {
            Some(mut obj) => {
                self.factory.reset(&mut obj);
                Ok(RefHandle::new(obj, self))
            }
            None => Ok(RefHandle::new(self.grow()?, self)),
        }
    }

    /// Checks an object out of the pool with a handle that holds an arc
    /// reference to the owning pool. These handles are not as cheap as the
    /// ones from [`Self::acquire`] but are easier to move as they are not
    /// limited by the pool's lifetime.
    pub fn acquire_rc(self: &Arc<Self>) -> Result<RcHandle<P, T>, P::Error> {
        match self.available.pop() {
            Some(mut obj) => {
                self.factory.reset(&mut obj);
                Ok(RcHandle::new(obj, self))
            }
            None => Ok(RcHandle::new(self.grow()?, self)),
        }
    }

    /// Explicitly releases a handle back to this pool.
    ///
    /// Transitions the handle from held to released and returns its object
    /// to the available set. Releasing an already-released handle is a
    /// no-op. Releasing a handle issued by a different pool is a contract
    /// violation reported as [`HandleError::ForeignHandle`]; the handle is
    /// left untouched and will still return to its own pool on drop.
    pub fn release(&self, handle: &mut RefHandle<'_, P, T>) -> Result<(), HandleError> {
        if !ptr::eq(handle.pool, self) {
            return Err(HandleError::ForeignHandle);
        }
        handle.release();
        Ok(())
    }

    /// Explicitly releases an arc handle back to this pool.
    ///
    /// Same contract as [`Self::release`].
    pub fn release_rc(&self, handle: &mut RcHandle<P, T>) -> Result<(), HandleError> {
        if !ptr::eq(Arc::as_ptr(&handle.pool), self) {
            return Err(HandleError::ForeignHandle);
        }
        handle.release();
        Ok(())
    }

    /// Acquires an object, runs `op` against it, and releases it afterward
    /// unconditionally: the object returns to the pool even if `op` panics.
    pub fn with<R>(&self, op: impl FnOnce(&mut T) -> R) -> Result<R, P::Error> {
        let mut handle = self.acquire()?;
        Ok(op(&mut handle))
    }

    fn grow(&self) -> Result<T, P::Error> {
        let obj = self.factory.create()?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        trace!("pool empty, constructed new object");
        Ok(obj)
    }

    /// Returns an object to the available set, dropping it instead if it
    /// fails factory validation.
    fn recycle(&self, obj: T) {
        if self.factory.is_valid(&obj) {
            self.available.push(obj);
        } else {
            trace!("discarding released object that failed validation");
            self.allocated.fetch_sub(1, Ordering::Relaxed);
            drop(obj);
        }
    }

    // An object leaving through `into_inner` is no longer the pool's.
    fn forget_one(&self) {
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A handle representing exclusive checkout of one object from a pool.
///
/// The handle is a one-way state machine: it starts out holding its object
/// and becomes released exactly once, either explicitly via
/// [`RefHandle::release`] (idempotent) or implicitly on drop. Dropping a
/// still-held handle always returns the object, including on panic
/// unwinding, so a checkout can never leak on a failure path.
///
/// Dereferencing a handle after it has been released is a contract
/// violation and panics; use [`RefHandle::try_get`] where released-state
/// access must be handled gracefully.
pub struct RefHandle<'a, P: ResourceFactory<T>, T> {
    obj: Option<T>,
    pool: &'a Pool<P, T>,
}

impl<'a, P: ResourceFactory<T>, T> RefHandle<'a, P, T> {
    fn new(obj: T, pool: &'a Pool<P, T>) -> Self {
        RefHandle {
            obj: Some(obj),
            pool,
        }
    }

    /// Releases the object back to the owning pool.
    ///
    /// Calling this on an already-released handle has no additional effect.
    pub fn release(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.recycle(obj);
        }
    }

    /// Whether this handle has already given its object back.
    pub fn is_released(&self) -> bool {
        self.obj.is_none()
    }

    /// Borrows the object, or reports the misuse if the handle was already
    /// released.
    pub fn try_get(&self) -> Result<&T, HandleError> {
        self.obj.as_ref().ok_or(HandleError::Released)
    }

    /// Mutably borrows the object, or reports the misuse if the handle was
    /// already released.
    pub fn try_get_mut(&mut self) -> Result<&mut T, HandleError> {
        self.obj.as_mut().ok_or(HandleError::Released)
    }

    /// Consumes the handle and returns the object, without returning it to
    /// the pool.
    ///
    /// This method should be used with caution, as it leads to objects not
    /// being returned to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the handle was already released.
    pub fn into_inner(mut self) -> T {
        match self.obj.take() {
            Some(obj) => {
                self.pool.forget_one();
                obj
            }
            None => panic!("handle was already released"),
        }
    }

    #[inline]
    fn held(&self) -> &T {
        match &self.obj {
            Some(obj) => obj,
            None => panic!("handle was already released"),
        }
    }

    #[inline]
    fn held_mut(&mut self) -> &mut T {
        match &mut self.obj {
            Some(obj) => obj,
            None => panic!("handle was already released"),
        }
    }
}

impl<'a, P: ResourceFactory<T>, T> Deref for RefHandle<'a, P, T> {
    type Target = T;
    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.held()
    }
}

impl<'a, P: ResourceFactory<T>, T> DerefMut for RefHandle<'a, P, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.held_mut()
    }
}

/// Dropping a held handle returns the object to the pool, unless the object
/// fails validation.
impl<'a, P: ResourceFactory<T>, T> Drop for RefHandle<'a, P, T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<'a, P: ResourceFactory<T>, T: Hash> Hash for RefHandle<'a, P, T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state);
    }
}
impl<'a, P: ResourceFactory<T>, T: fmt::Display> fmt::Display for RefHandle<'a, P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
impl<'a, P: ResourceFactory<T>, T: fmt::Debug> fmt::Debug for RefHandle<'a, P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.obj {
            Some(obj) => fmt::Debug::fmt(obj, f),
            None => f.write_str("<released>"),
        }
    }
}
impl<'a, P: ResourceFactory<T>, T: PartialEq> PartialEq for RefHandle<'a, P, T> {
    #[inline]
    fn eq(&self, other: &RefHandle<'a, P, T>) -> bool {
        self.deref().eq(other)
    }
}
impl<'a, P: ResourceFactory<T>, T: Eq> Eq for RefHandle<'a, P, T> {}
impl<'a, P: ResourceFactory<T>, T: PartialOrd> PartialOrd for RefHandle<'a, P, T> {
    #[inline]
    fn partial_cmp(&self, other: &RefHandle<'a, P, T>) -> Option<core::cmp::Ordering> {
        (**self).partial_cmp(&**other)
    }
}
impl<'a, P: ResourceFactory<T>, T: Ord> Ord for RefHandle<'a, P, T> {
    #[inline]
    fn cmp(&self, other: &RefHandle<'a, P, T>) -> core::cmp::Ordering {
        (**self).cmp(&**other)
    }
}
impl<'a, P: ResourceFactory<T>, T> std::borrow::Borrow<T> for RefHandle<'a, P, T> {
    #[inline(always)]
    fn borrow(&self) -> &T {
        self
    }
}
impl<'a, P: ResourceFactory<T>, T> AsRef<T> for RefHandle<'a, P, T> {
    #[inline(always)]
    fn as_ref(&self) -> &T {
        self
    }
}

/// A handle representing exclusive checkout of one object from a pool,
/// holding the pool alive through an arc reference.
///
/// Same contract as [`RefHandle`]: held until released exactly once, with
/// drop as the release of last resort.
pub struct RcHandle<P: ResourceFactory<T>, T> {
    obj: Option<T>,
    pool: Arc<Pool<P, T>>,
}

impl<P: ResourceFactory<T>, T> RcHandle<P, T> {
    fn new(obj: T, pool: &Arc<Pool<P, T>>) -> Self {
        Self {
            obj: Some(obj),
            pool: pool.clone(),
        }
    }

    /// Releases the object back to the owning pool.
    ///
    /// Calling this on an already-released handle has no additional effect.
    pub fn release(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.recycle(obj);
        }
    }

    /// Whether this handle has already given its object back.
    pub fn is_released(&self) -> bool {
        self.obj.is_none()
    }

    /// Borrows the object, or reports the misuse if the handle was already
    /// released.
    pub fn try_get(&self) -> Result<&T, HandleError> {
        self.obj.as_ref().ok_or(HandleError::Released)
    }

    /// Mutably borrows the object, or reports the misuse if the handle was
    /// already released.
    pub fn try_get_mut(&mut self) -> Result<&mut T, HandleError> {
        self.obj.as_mut().ok_or(HandleError::Released)
    }

    /// Consumes the handle and returns the object, without returning it to
    /// the pool.
    ///
    /// This method should be used with caution, as it leads to objects not
    /// being returned to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the handle was already released.
    pub fn into_inner(mut self) -> T {
        match self.obj.take() {
            Some(obj) => {
                self.pool.forget_one();
                obj
            }
            None => panic!("handle was already released"),
        }
    }

    #[inline]
    fn held(&self) -> &T {
        match &self.obj {
            Some(obj) => obj,
            None => panic!("handle was already released"),
        }
    }

    #[inline]
    fn held_mut(&mut self) -> &mut T {
        match &mut self.obj {
            Some(obj) => obj,
            None => panic!("handle was already released"),
        }
    }
}

impl<P: ResourceFactory<T>, T> Deref for RcHandle<P, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.held()
    }
}

impl<P: ResourceFactory<T>, T> DerefMut for RcHandle<P, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.held_mut()
    }
}

/// Dropping a held handle returns the object to the pool, unless the object
/// fails validation.
impl<P: ResourceFactory<T>, T> Drop for RcHandle<P, T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<P: ResourceFactory<T>, T: Hash> Hash for RcHandle<P, T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state);
    }
}
impl<P: ResourceFactory<T>, T: fmt::Display> fmt::Display for RcHandle<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
impl<P: ResourceFactory<T>, T: fmt::Debug> fmt::Debug for RcHandle<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.obj {
            Some(obj) => fmt::Debug::fmt(obj, f),
            None => f.write_str("<released>"),
        }
    }
}
impl<P: ResourceFactory<T>, T: PartialEq> PartialEq for RcHandle<P, T> {
    #[inline]
    fn eq(&self, other: &RcHandle<P, T>) -> bool {
        self.deref().eq(other)
    }
}
impl<P: ResourceFactory<T>, T: Eq> Eq for RcHandle<P, T> {}
impl<P: ResourceFactory<T>, T: PartialOrd> PartialOrd for RcHandle<P, T> {
    #[inline]
    fn partial_cmp(&self, other: &RcHandle<P, T>) -> Option<core::cmp::Ordering> {
        (**self).partial_cmp(&**other)
    }
}
impl<P: ResourceFactory<T>, T: Ord> Ord for RcHandle<P, T> {
    #[inline]
    fn cmp(&self, other: &RcHandle<P, T>) -> core::cmp::Ordering {
        (**self).cmp(&**other)
    }
}
impl<P: ResourceFactory<T>, T> std::borrow::Borrow<T> for RcHandle<P, T> {
    #[inline(always)]
    fn borrow(&self) -> &T {
        self
    }
}
impl<P: ResourceFactory<T>, T> AsRef<T> for RcHandle<P, T> {
    #[inline(always)]
    fn as_ref(&self) -> &T {
        self
    }
}
