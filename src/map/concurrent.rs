//! Concurrent Map Implementation
//!
//! This module implements a generic key-value map guarded by a single
//! reader/writer lock. Reads share the lock, every mutation takes it
//! exclusively, and each public operation runs inside exactly one critical
//! section, so compound operations such as "insert if absent" are atomic.
//!
//! ## Design
//!
//! The map uses:
//! - An `FxHashMap` as backing storage
//! - A `parking_lot::RwLock`, padded to its own cache line
//! - A double-checked commit for lazily computed values
//! - Address-ordered lock acquisition when two maps are locked together
//!
//! ## Lazy Insertion
//!
//! `get_or_set_func` and `set_if_not_exist_func` probe under the read lock,
//! compute the value with no lock held, then recheck under the write lock
//! before committing. Under contention the closure may run on several threads;
//! only one result is committed and the others are dropped.
//!
//! `get_or_set_func_lock` and `set_if_not_exist_func_lock` run the closure
//! while holding the write lock. The closure then runs at most once per first
//! insertion of a key, but all other access to the map waits for it.
//!
//! ## Example
//!
//! ```rust
//! use guardmap::map::ConcurrentMap;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let map = Arc::new(ConcurrentMap::new());
//!
//! let writer = thread::spawn({
//!     let map = Arc::clone(&map);
//!     move || {
//!         for i in 0..1000 {
//!             map.set(i, i * 2);
//!         }
//!     }
//! });
//!
//! writer.join().unwrap();
//! let sum: i32 = map.values().into_iter().sum();
//! assert_eq!(sum, 999000);
//! ```

use crate::metrics::{AtomicMetrics, MapMetrics, MetricsCollector};
use crate::util::CachePadded;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use fxhash::FxHashMap;
use log::{debug, trace};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// A thread-safe map with conditional, lazy and batch insertion
///
/// All operations take `&self`; share the map between threads with an `Arc`.
///
/// # Type Parameters
///
/// * `K` - The key type, must implement `Hash + Eq`
/// * `V` - The value type; operations that hand values out of the lock
///   require `V: Clone`
///
/// # Locking
///
/// Closures passed to [`iterator`](Self::iterator),
/// [`read_lock_func`](Self::read_lock_func), [`lock_func`](Self::lock_func)
/// and the `*_func_lock` operations run while the map is locked. They must not
/// call back into the same map; the lock is not reentrant and doing so
/// deadlocks.
///
/// # Examples
///
/// ```rust
/// use guardmap::map::ConcurrentMap;
///
/// let map: ConcurrentMap<i32, String> = ConcurrentMap::new();
/// map.set(1, "hello".to_string());
/// assert_eq!(map.get(&1), Some("hello".to_string()));
/// assert_eq!(map.get_or_set(1, "world".to_string()), "hello");
/// ```
pub struct ConcurrentMap<K, V> {
    // Backing storage, only touched through the lock
    data: CachePadded<RwLock<FxHashMap<K, V>>>,

    // Opt-in usage counters, not part of the map's contents
    metrics: AtomicMetrics,
}

impl<K, V> ConcurrentMap<K, V> {
    /// Create an empty map
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map: ConcurrentMap<i32, i32> = ConcurrentMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::from_entries(FxHashMap::default())
    }

    /// Create an empty map with room for at least `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_entries(FxHashMap::with_capacity_and_hasher(
            capacity,
            Default::default(),
        ))
    }

    fn from_entries(entries: FxHashMap<K, V>) -> Self {
        Self {
            data: CachePadded::new(RwLock::new(entries)),
            metrics: AtomicMetrics::default(),
        }
    }

    /// Get the number of entries in the map
    pub fn len(&self) -> usize {
        self.data.get().read().len()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries from the map
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.data.get().write();
            let removed = entries.len();
            entries.clear();
            removed
        };
        debug!("cleared {} entries", removed);
    }

    /// Visit every entry under the read lock
    ///
    /// Iteration stops as soon as `visit` returns `false`. The order is
    /// unspecified but does not change during one call, since no writer can
    /// run while the read lock is held.
    ///
    /// `visit` must not mutate this map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::from_arrays(0..10, 0..10);
    /// let mut seen = 0;
    /// map.iterator(|_, _| {
    ///     seen += 1;
    ///     seen < 3
    /// });
    /// assert_eq!(seen, 3);
    /// ```
    pub fn iterator<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let entries = self.data.get().read();
        for (key, value) in entries.iter() {
            if !visit(key, value) {
                break;
            }
        }
    }

    /// Run `f` with shared access to the backing map
    ///
    /// The backing map is an [`FxHashMap`], re-exported as
    /// [`guardmap::FxHashMap`](crate::FxHashMap); its hasher is part of this
    /// signature.
    pub fn read_lock_func<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&FxHashMap<K, V>) -> R,
    {
        f(&*self.data.get().read())
    }

    /// Run `f` with exclusive access to the backing map
    ///
    /// Every other reader and writer waits until `f` returns. As with
    /// [`read_lock_func`](Self::read_lock_func), `f` sees the [`FxHashMap`]
    /// itself.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::from_arrays([1, 2, 3], [10, 20, 30]);
    /// map.lock_func(|entries| entries.retain(|_, v| *v > 10));
    /// assert_eq!(map.len(), 2);
    /// ```
    pub fn lock_func<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut FxHashMap<K, V>) -> R,
    {
        f(&mut *self.data.get().write())
    }

    /// Consume the map and return its entries
    pub fn into_inner(self) -> FxHashMap<K, V> {
        self.data.into_inner().into_inner()
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Hash + Eq,
{
    /// Create a map holding the entries of `map`
    pub fn from_map<S>(map: HashMap<K, V, S>) -> Self
    where
        S: BuildHasher,
    {
        map.into_iter().collect()
    }

    /// Create a map by pairing `keys` with `values` in order
    ///
    /// If the sequences differ in length the extra elements of the longer one
    /// are ignored. Repeated keys keep the value paired with their last
    /// occurrence.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::from_arrays([1, 2, 3], [10, 20]);
    /// assert_eq!(map.len(), 2);
    /// assert!(!map.contains(&3));
    /// ```
    pub fn from_arrays<IK, IV>(keys: IK, values: IV) -> Self
    where
        IK: IntoIterator<Item = K>,
        IV: IntoIterator<Item = V>,
    {
        keys.into_iter().zip(values).collect()
    }

    /// Insert or overwrite the value for `key`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// map.set("a", 1);
    /// map.set("a", 2);
    /// assert_eq!(map.get("a"), Some(2));
    /// ```
    pub fn set(&self, key: K, value: V) {
        self.data.get().write().insert(key, value);
        self.metrics.record_insertions(1);
    }

    /// Get a copy of the value stored for `key`
    ///
    /// # Returns
    ///
    /// * `Some(value)` if the key exists in the map
    /// * `None` if the key does not exist
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let value = self.data.get().read().get(key).cloned();
        self.metrics.record_lookup(value.is_some());
        value
    }

    /// Check whether `key` is present
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let found = self.data.get().read().contains_key(key);
        self.metrics.record_lookup(found);
        found
    }

    /// Remove `key` from the map
    ///
    /// # Returns
    ///
    /// * `Some(value)` if the key existed and was removed
    /// * `None` if the key did not exist
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.data.get().write().remove(key)
    }

    /// Snapshot of the keys currently present, in unspecified order
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.data.get().read().keys().cloned().collect()
    }

    /// Snapshot of the values currently present, in unspecified order
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.data.get().read().values().cloned().collect()
    }

    /// Snapshot of every entry
    ///
    /// The returned map is independent of `self`; later mutation of either
    /// does not affect the other.
    pub fn to_map(&self) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
    {
        self.data
            .get()
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Return the value for `key`, inserting `value` first if it is absent
    ///
    /// The existence check and the insert happen under one write lock.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// assert_eq!(map.get_or_set(1, 10), 10);
    /// assert_eq!(map.get_or_set(1, 20), 10);
    /// ```
    pub fn get_or_set(&self, key: K, value: V) -> V
    where
        V: Clone,
    {
        let mut entries = self.data.get().write();
        let (stored, inserted) = match entries.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(value).clone(), true),
        };
        drop(entries);

        self.metrics.record_conditional(inserted);
        stored
    }

    /// Return the value for `key`, computing it with `f` if it is absent
    ///
    /// `f` runs with no lock held. If another writer inserts `key` while `f`
    /// runs, the computed value is dropped and the stored one is returned.
    /// Several threads missing the same key may each run their closure; only
    /// one result is committed. Use
    /// [`get_or_set_func_lock`](Self::get_or_set_func_lock) when `f` must run
    /// at most once.
    pub fn get_or_set_func<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
        V: Clone,
    {
        if let Some(existing) = self.probe(&key) {
            return existing;
        }

        let value = f();
        self.commit_if_absent(key, value)
    }

    /// Like [`get_or_set_func`](Self::get_or_set_func), for computations that
    /// can fail
    ///
    /// An error from `f` is returned as is and nothing is stored, so a failed
    /// lookup is retried by the next caller instead of being cached.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map: ConcurrentMap<&str, u16> = ConcurrentMap::new();
    /// assert!(map.try_get_or_set_func("port", || "http".parse::<u16>()).is_err());
    /// assert!(map.is_empty());
    /// assert_eq!(map.try_get_or_set_func("port", || "8080".parse::<u16>()), Ok(8080));
    /// ```
    pub fn try_get_or_set_func<F, E>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
        V: Clone,
    {
        if let Some(existing) = self.probe(&key) {
            return Ok(existing);
        }

        let value = f()?;
        Ok(self.commit_if_absent(key, value))
    }

    /// Return the value for `key`, computing it with `f` under the write lock
    /// if it is absent
    ///
    /// `f` runs at most once per first insertion of `key`, and every other
    /// reader and writer of this map waits for it. Keep `f` short and never
    /// touch this map from inside it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// assert_eq!(map.get_or_set_func_lock("answer", || 42), 42);
    /// assert_eq!(map.get_or_set_func_lock("answer", || unreachable!()), 42);
    /// ```
    pub fn get_or_set_func_lock<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
        V: Clone,
    {
        if let Some(existing) = self.probe(&key) {
            return existing;
        }

        let mut entries = self.data.get().write();
        let (stored, inserted) = match entries.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let started = self.metrics.start_timer();
                let value = f();
                self.metrics.record_locked_compute(started);
                (entry.insert(value).clone(), true)
            }
        };
        drop(entries);

        if inserted {
            trace!("committed value computed under write lock");
        }
        self.metrics.record_conditional(inserted);
        stored
    }

    /// Insert `value` only if `key` is absent
    ///
    /// # Returns
    ///
    /// * `true` if the key was absent and now maps to `value`
    /// * `false` if the key already existed; its value is unchanged
    pub fn set_if_not_exist(&self, key: K, value: V) -> bool {
        let inserted = match self.data.get().write().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        };
        self.metrics.record_conditional(inserted);
        inserted
    }

    /// Insert the result of `f` only if `key` is absent, computing it with no
    /// lock held
    ///
    /// Returns `true` only when this call's value was committed. If another
    /// writer inserts `key` while `f` runs, the computed value is dropped and
    /// `false` is returned.
    pub fn set_if_not_exist_func<F>(&self, key: K, f: F) -> bool
    where
        F: FnOnce() -> V,
    {
        if self.data.get().read().contains_key(&key) {
            self.metrics.record_conditional(false);
            return false;
        }

        let value = f();
        let inserted = match self.data.get().write().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        };

        self.note_commit(inserted);
        inserted
    }

    /// Insert the result of `f` only if `key` is absent, computing it under
    /// the write lock
    ///
    /// `f` is only called when the key is absent, and at most once per first
    /// insertion of `key`.
    pub fn set_if_not_exist_func_lock<F>(&self, key: K, f: F) -> bool
    where
        F: FnOnce() -> V,
    {
        if self.data.get().read().contains_key(&key) {
            self.metrics.record_conditional(false);
            return false;
        }

        let inserted = match self.data.get().write().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                let started = self.metrics.start_timer();
                entry.insert(f());
                self.metrics.record_locked_compute(started);
                true
            }
        };

        self.metrics.record_conditional(inserted);
        inserted
    }

    /// Insert or overwrite every pair from `entries` under one write lock
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// map.batch_set([(1, 1), (2, 2), (3, 3)]);
    /// map.batch_remove([1, 2, 7]);
    /// assert_eq!(map.keys(), vec![3]);
    /// ```
    pub fn batch_set<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut data = self.data.get().write();
        let before = data.len();
        let mut written = 0u64;
        for (key, value) in entries {
            data.insert(key, value);
            written += 1;
        }
        let after = data.len();
        drop(data);

        trace!("batch set {} entries ({} new)", written, after - before);
        self.metrics.record_insertions(written);
    }

    /// Remove every listed key under one write lock
    ///
    /// Keys that are not present are ignored. Like [`remove`](Self::remove),
    /// items may be any borrowed form of the key type. When that form is
    /// ambiguous, as with `&str` items for `String` keys, name it explicitly:
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::from_arrays(["a".to_string(), "b".to_string()], [1, 2]);
    /// map.batch_remove::<_, str>(["a", "missing"]);
    /// assert_eq!(map.keys(), vec!["b".to_string()]);
    /// ```
    pub fn batch_remove<I, Q>(&self, keys: I)
    where
        I: IntoIterator,
        I::Item: Borrow<Q>,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut data = self.data.get().write();
        for key in keys {
            data.remove(key.borrow());
        }
    }

    /// Replace the whole content of the map with `entries`
    ///
    /// The new content is built before the lock is taken; readers see either
    /// the old entries or the new ones, never a mix.
    pub fn replace<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let replacement: FxHashMap<K, V> = entries.into_iter().collect();
        let count = replacement.len();
        let old = core::mem::replace(&mut *self.data.get().write(), replacement);
        debug!("replaced {} entries with {}", old.len(), count);
    }

    /// Insert or overwrite every entry of `other` into this map
    ///
    /// `other` is read under its own read lock while this map is held under
    /// its write lock. The two locks are always taken in address order, so
    /// `a.merge(&b)` and `b.merge(&a)` may run concurrently without
    /// deadlocking. Merging a map into itself does nothing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let m1 = ConcurrentMap::from_arrays([1], [1]);
    /// let m2 = ConcurrentMap::from_arrays([2], [2]);
    /// m1.merge(&m2);
    /// assert_eq!(m1.len(), 2);
    /// assert_eq!(m2.len(), 1);
    /// ```
    pub fn merge(&self, other: &Self)
    where
        K: Clone,
        V: Clone,
    {
        if core::ptr::eq(self, other) {
            return;
        }

        let merged = if (self as *const Self) < (other as *const Self) {
            let mut target = self.data.get().write();
            let source = other.data.get().read();
            Self::merge_locked(&mut target, &source)
        } else {
            let source = other.data.get().read();
            let mut target = self.data.get().write();
            Self::merge_locked(&mut target, &source)
        };

        debug!("merged {} entries", merged);
        self.metrics.record_insertions(merged as u64);
    }

    fn merge_locked(target: &mut FxHashMap<K, V>, source: &FxHashMap<K, V>) -> usize
    where
        K: Clone,
        V: Clone,
    {
        target.reserve(source.len());
        for (key, value) in source.iter() {
            target.insert(key.clone(), value.clone());
        }
        source.len()
    }

    // Read-locked fast path shared by the lazy insertion operations
    fn probe(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let existing = self.data.get().read().get(key).cloned();
        if existing.is_some() {
            self.metrics.record_conditional(false);
        }
        existing
    }

    // Write-locked recheck for a value computed without the lock
    fn commit_if_absent(&self, key: K, value: V) -> V
    where
        V: Clone,
    {
        let mut entries = self.data.get().write();
        let (stored, inserted) = match entries.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(value).clone(), true),
        };
        drop(entries);

        self.note_commit(inserted);
        stored
    }

    fn note_commit(&self, inserted: bool) {
        if inserted {
            self.metrics.record_insertions(1);
        } else {
            trace!("discarded a computed value, key was inserted concurrently");
            self.metrics.record_discard();
        }
    }
}

impl<T> ConcurrentMap<T, T>
where
    T: Hash + Eq,
{
    /// Swap keys and values
    ///
    /// When several keys share a value only one of them survives as the new
    /// value for it; which one depends on the internal entry order and must
    /// not be relied on.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guardmap::map::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::from_arrays(["a", "b"], ["x", "y"]);
    /// map.flip();
    /// assert_eq!(map.get("x"), Some("a"));
    /// assert_eq!(map.get("y"), Some("b"));
    /// ```
    pub fn flip(&self) {
        let mut entries = self.data.get().write();
        let original = core::mem::take(&mut *entries);
        let before = original.len();

        let mut flipped = FxHashMap::with_capacity_and_hasher(before, Default::default());
        for (key, value) in original {
            flipped.insert(value, key);
        }

        let collisions = before - flipped.len();
        *entries = flipped;
        drop(entries);

        if collisions > 0 {
            debug!("flip collapsed {} entries with duplicate values", collisions);
        }
    }
}

impl<K, V> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies every entry into an independent map
///
/// Each key and value is cloned once. For plain values this is a full copy;
/// if `V` is a shared handle such as `Arc<T>`, the clone shares the pointee
/// with the original. Metrics are not copied and start disabled.
impl<K, V> Clone for ConcurrentMap<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self::from_entries(self.data.get().read().clone())
    }
}

impl<K, V> fmt::Debug for ConcurrentMap<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.data.get().read().iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for ConcurrentMap<K, V>
where
    K: Hash + Eq,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_entries(iter.into_iter().collect())
    }
}

impl<K, V> Extend<(K, V)> for ConcurrentMap<K, V>
where
    K: Hash + Eq,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.data.get_mut().get_mut().extend(iter);
    }
}

impl<K, V, S> From<HashMap<K, V, S>> for ConcurrentMap<K, V>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn from(map: HashMap<K, V, S>) -> Self {
        Self::from_map(map)
    }
}

impl<K, V> MetricsCollector for ConcurrentMap<K, V> {
    fn metrics(&self) -> MapMetrics {
        self.metrics.snapshot()
    }

    fn reset_metrics(&self) {
        self.metrics.reset();
    }

    fn set_metrics_enabled(&self, enabled: bool) {
        self.metrics.set_enabled(enabled);
    }

    fn is_metrics_enabled(&self) -> bool {
        self.metrics.is_enabled()
    }
}
