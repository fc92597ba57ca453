use parking_lot::Mutex;
use std::{
    borrow::Borrow,
    collections::{hash_map::Entry, HashMap},
    convert::Infallible,
    fmt,
    hash::Hash,
    sync::{Arc, Weak},
};
use tracing::trace;

/// A table guaranteeing at most one live instance per distinct key.
///
/// Values are immutable once built and handed out as `Arc<V>`. The table
/// itself keeps only weak references: an entry stays live exactly as long
/// as some caller still holds an `Arc` to its value. Once the last `Arc` is
/// gone the entry is dead, and a later [`Interner::intern`] of the same key
/// rebuilds the value — content-equal (the factory must be deterministic
/// with respect to the key) but with a fresh identity.
///
/// Dead entries are swept lazily: re-interning a reclaimed key reuses its
/// slot, and [`Interner::prune`] removes the rest. [`Interner::len`] counts
/// only live entries either way.
///
/// The lock guards the entry map alone, never a factory call, so a slow
/// construction for one key cannot block requests for unrelated keys.
pub struct Interner<K, V> {
    entries: Mutex<HashMap<K, Weak<V>>>,
}

impl<K, V> Interner<K, V> {
    /// Creates an empty intern table.
    pub fn new() -> Self {
        Interner {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Count of currently live entries.
    ///
    /// Not stable across concurrent reclamation; suitable for diagnostics
    /// and tests.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether the table has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forcibly drops all entries, live or dead.
    ///
    /// Values already handed out remain valid: callers keep their `Arc`s
    /// and the objects behind them. What is lost is identity continuity — a
    /// subsequent [`Interner::intern`] of a cleared key constructs a new
    /// object rather than returning the pre-clear one.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        trace!(entries = entries.len(), "clearing intern table");
        entries.clear();
    }

    /// Sweeps dead entries out of the table, returning how many were
    /// removed. Purely a space optimization; live entries are untouched.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        let removed = before - entries.len();
        if removed > 0 {
            trace!(removed, "pruned dead intern entries");
        }
        removed
    }
}

impl<K, V> Interner<K, V>
where
    K: Hash + Eq,
{
    /// Returns the canonical instance for `key`, building it with `factory`
    /// if no live instance exists.
    ///
    /// While any caller still holds the returned `Arc`, every `intern` of
    /// the same key returns that identical instance and the factory is not
    /// invoked again. After reclamation (or [`Interner::clear`]) the
    /// factory runs once more to rebuild the value.
    pub fn intern(&self, key: K, factory: impl FnOnce(&K) -> V) -> Arc<V> {
        match self.try_intern(key, |key| Ok::<V, Infallible>(factory(key))) {
            Ok(value) => value,
            Err(infallible) => match infallible {},
        }
    }

    /// Fallible form of [`Interner::intern`]: a factory error propagates to
    /// the caller and nothing is recorded under the key.
    pub fn try_intern<E>(
        &self,
        key: K,
        factory: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        trace!("intern miss, constructing value");
        // Construct outside the lock; losers of the ensuing race discard
        // their candidate, which is sound only because the factory is
        // required to be deterministic per key.
        let candidate = Arc::new(factory(&key)?);
        Ok(self.install(key, candidate))
    }

    /// Whether a live entry exists for `key`.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.entries
            .lock()
            .get(key)
            .map_or(false, |weak| weak.strong_count() > 0)
    }

    fn lookup(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().get(key).and_then(Weak::upgrade)
    }

    fn install(&self, key: K, candidate: Arc<V>) -> Arc<V> {
        match self.entries.lock().entry(key) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                // A racing caller installed a live value after our lookup;
                // it wins and our candidate is dropped.
                Some(winner) => {
                    trace!("lost intern race, discarding candidate");
                    winner
                }
                None => {
                    entry.insert(Arc::downgrade(&candidate));
                    candidate
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(Arc::downgrade(&candidate));
                candidate
            }
        }
    }
}

impl<K, V> Default for Interner<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for Interner<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        let live = entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count();
        f.debug_struct("Interner")
            .field("live", &live)
            .field("entries", &entries.len())
            .finish()
    }
}
