use repool::{HandleError, Pool, ResourceFactory};
use std::convert::Infallible;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// Hands out sequential ids so tests can tell backing objects apart by
// identity, and counts how many objects were ever constructed.
struct CountingFactory {
    created: Arc<AtomicUsize>,
}

impl CountingFactory {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        (
            CountingFactory {
                created: created.clone(),
            },
            created,
        )
    }
}

impl ResourceFactory<usize> for CountingFactory {
    type Error = Infallible;

    fn create(&self) -> Result<usize, Infallible> {
        Ok(self.created.fetch_add(1, Ordering::Relaxed))
    }
}

#[test]
fn acquire_constructs_when_empty() {
    let (factory, created) = CountingFactory::new();
    let pool = Pool::new(factory);
    let handle = pool.acquire().unwrap();
    assert_eq!(*handle, 0);
    assert_eq!(created.load(Ordering::Relaxed), 1);
    assert_eq!(pool.outstanding(), 1);
}

// acquire -> release -> acquire with no other activity returns the same
// backing object; no second construction happens.
#[test]
fn released_object_is_reused() {
    let (factory, created) = CountingFactory::new();
    let pool = Pool::new(factory);

    let first = *pool.acquire().unwrap();
    let second = *pool.acquire().unwrap();
    assert_eq!(first, second);
    assert_eq!(created.load(Ordering::Relaxed), 1);
}

// No two handles held at the same time ever wrap the same backing object.
#[test]
fn held_handles_are_exclusive() {
    let (factory, _) = CountingFactory::new();
    let pool = Pool::new(factory);

    let handles: Vec<_> = (0..16).map(|_| pool.acquire().unwrap()).collect();
    let mut ids: Vec<usize> = handles.iter().map(|h| **h).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 16);
}

// N acquires without a release grow the pool by exactly N objects.
#[test]
fn pool_grows_on_demand() {
    let (factory, created) = CountingFactory::new();
    let pool = Pool::new(factory);

    let handles: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
    assert_eq!(created.load(Ordering::Relaxed), 5);
    assert_eq!(pool.allocated(), 5);
    assert_eq!(pool.outstanding(), 5);

    drop(handles);
    assert_eq!(pool.available(), 5);
    assert_eq!(pool.outstanding(), 0);
}

// The canonical checkout scenario: a factory that would produce "yam" then
// "sam". Reuse means the second acquire sees "yam" again; only a checkout
// while the first is still held reaches "sam".
#[test]
fn checkout_reuses_before_constructing() {
    let names = Mutex::new(vec!["yam", "sam"]);
    let factory = move || Ok::<String, Infallible>(names.lock().unwrap().remove(0).to_string());
    let pool = Pool::new(factory);

    let first = pool.acquire().unwrap();
    assert_eq!(*first, "yam");
    drop(first);

    let again = pool.acquire().unwrap();
    assert_eq!(*again, "yam");

    let fresh = pool.acquire().unwrap();
    assert_eq!(*fresh, "sam");
}

#[test]
fn prefilled_pool_does_not_construct_on_acquire() {
    let (factory, created) = CountingFactory::new();
    let pool = Pool::prefilled(3, factory).unwrap();
    assert_eq!(pool.available(), 3);
    assert_eq!(created.load(Ordering::Relaxed), 3);

    let _handle = pool.acquire().unwrap();
    assert_eq!(created.load(Ordering::Relaxed), 3);
}

// Explicit release is idempotent: held -> released once, further releases
// are no-ops.
#[test]
fn release_is_idempotent() {
    let (factory, _) = CountingFactory::new();
    let pool = Pool::new(factory);

    let mut handle = pool.acquire().unwrap();
    assert!(pool.release(&mut handle).is_ok());
    assert!(handle.is_released());
    assert_eq!(pool.available(), 1);

    // Second explicit release and the drop at scope end add nothing.
    assert!(pool.release(&mut handle).is_ok());
    handle.release();
    drop(handle);
    assert_eq!(pool.available(), 1);
}

// Releasing through a pool that did not issue the handle is reported, and
// the handle still returns to its true owner afterward.
#[test]
fn foreign_release_is_rejected() {
    let (factory_a, _) = CountingFactory::new();
    let (factory_b, _) = CountingFactory::new();
    let pool_a = Pool::new(factory_a);
    let pool_b = Pool::new(factory_b);

    let mut handle = pool_a.acquire().unwrap();
    assert_eq!(pool_b.release(&mut handle), Err(HandleError::ForeignHandle));
    assert!(!handle.is_released());
    assert_eq!(pool_b.available(), 0);

    drop(handle);
    assert_eq!(pool_a.available(), 1);
}

#[test]
fn released_handle_reports_stale_access() {
    let (factory, _) = CountingFactory::new();
    let pool = Pool::new(factory);

    let mut handle = pool.acquire().unwrap();
    assert!(handle.try_get().is_ok());
    handle.release();
    assert_eq!(handle.try_get(), Err(HandleError::Released));
    assert_eq!(handle.try_get_mut(), Err(HandleError::Released));
}

#[test]
#[should_panic(expected = "already released")]
fn deref_after_release_panics() {
    let (factory, _) = CountingFactory::new();
    let pool = Pool::new(factory);

    let mut handle = pool.acquire().unwrap();
    handle.release();
    let _ = *handle;
}

#[test]
fn scoped_use_returns_closure_result() {
    let (factory, _) = CountingFactory::new();
    let pool = Pool::new(factory);

    let doubled = pool.with(|obj| *obj * 2 + 7).unwrap();
    assert_eq!(doubled, 7);
    assert_eq!(pool.available(), 1);
}

// A scoped operation that panics still releases the checkout; the pool is
// back to its pre-call state.
#[test]
fn scoped_use_releases_on_panic() {
    let (factory, _) = CountingFactory::new();
    let pool = Pool::new(factory);
    drop(pool.acquire().unwrap());
    assert_eq!(pool.available(), 1);

    let result = catch_unwind(AssertUnwindSafe(|| {
        pool.with(|_obj| panic!("operation failed")).unwrap();
    }));
    assert!(result.is_err());
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.outstanding(), 0);
}

struct VecFactory;

impl ResourceFactory<Vec<u8>> for VecFactory {
    type Error = Infallible;

    fn create(&self) -> Result<Vec<u8>, Infallible> {
        Ok(Vec::new())
    }

    fn reset(&self, obj: &mut Vec<u8>) {
        obj.clear();
    }

    fn is_valid(&self, obj: &Vec<u8>) -> bool {
        obj.len() < 1024
    }
}

#[test]
fn objects_are_reset_before_reuse() {
    let pool = Pool::new(VecFactory);

    let mut handle = pool.acquire().unwrap();
    handle.extend_from_slice(b"leftover state");
    drop(handle);

    let handle = pool.acquire().unwrap();
    assert!(handle.is_empty());
}

#[test]
fn invalid_objects_are_dropped_instead_of_pooled() {
    let pool = Pool::new(VecFactory);

    let mut handle = pool.acquire().unwrap();
    handle.resize(4096, 0);
    drop(handle);

    assert_eq!(pool.available(), 0);
    assert_eq!(pool.allocated(), 0);
}

#[test]
fn into_inner_withdraws_object_from_pool() {
    let (factory, _) = CountingFactory::new();
    let pool = Pool::new(factory);

    let obj = pool.acquire().unwrap().into_inner();
    assert_eq!(obj, 0);
    assert_eq!(pool.available(), 0);
    assert_eq!(pool.allocated(), 0);
}

#[test]
fn factory_error_propagates_from_acquire() {
    let factory = || Err::<usize, &str>("construction refused");
    let pool = Pool::new(factory);
    assert_eq!(pool.acquire().err(), Some("construction refused"));
    assert_eq!(pool.allocated(), 0);
}

#[test]
fn rc_handles_share_the_pool() {
    let (factory, created) = CountingFactory::new();
    let pool = Pool::new(factory).to_rc();

    let handle = pool.acquire_rc().unwrap();
    assert_eq!(*handle, 0);
    drop(handle);

    let handle = pool.acquire_rc().unwrap();
    assert_eq!(*handle, 0);
    assert_eq!(created.load(Ordering::Relaxed), 1);
}

#[test]
fn rc_release_checks_ownership() {
    let (factory_a, _) = CountingFactory::new();
    let (factory_b, _) = CountingFactory::new();
    let pool_a = Pool::new(factory_a).to_rc();
    let pool_b = Pool::new(factory_b).to_rc();

    let mut handle = pool_a.acquire_rc().unwrap();
    assert_eq!(
        pool_b.release_rc(&mut handle),
        Err(HandleError::ForeignHandle)
    );
    assert!(pool_a.release_rc(&mut handle).is_ok());
    assert!(pool_a.release_rc(&mut handle).is_ok());
    assert_eq!(pool_a.available(), 1);
}

// An rc handle outlives the last direct reference to the pool and still
// releases into it.
#[test]
fn rc_handle_keeps_pool_alive() {
    let (factory, _) = CountingFactory::new();
    let pool = Pool::new(factory).to_rc();

    let handle = pool.acquire_rc().unwrap();
    drop(pool);
    assert_eq!(*handle, 0);
    drop(handle);
}
