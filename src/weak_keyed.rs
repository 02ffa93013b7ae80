//! WeakKeyedCache: a map whose keys are held weakly.
//!
//! Keys are handed in as `Arc<K>` and stored as `Weak<K>`; the entry dies
//! when the caller drops the last `Arc`. Values are owned by the cache and
//! dropped when their entry is swept.

use crate::table::Table;
use crate::weak_table::{Liveness, WeakTable};
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::sync::{Arc, Weak};

struct KeyedEntry<K, V> {
    key: Weak<K>,
    value: V,
}

impl<K, V> Liveness for KeyedEntry<K, V> {
    #[inline]
    fn is_live(&self) -> bool {
        self.key.is_live()
    }
}

pub struct WeakKeyedCache<K, V, S = RandomState> {
    hasher: S,
    table: Mutex<WeakTable<KeyedEntry<K, V>>>,
}

impl<K, V> WeakKeyedCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<K, V> Default for WeakKeyedCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> WeakKeyedCache<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            table: Mutex::new(WeakTable::new()),
        }
    }

    /// Map `key` to `value`, replacing the mapping of an equal live key.
    ///
    /// The cache keeps only a `Weak` to `key`. The stored key handle becomes
    /// this one, so the entry from now on lives exactly as long as `key`'s
    /// allocation has strong handles.
    pub fn put(&self, key: &Arc<K>, value: V) -> Option<V> {
        let hash = self.hasher.hash_one(&**key);
        let entry = KeyedEntry {
            key: Arc::downgrade(key),
            value,
        };
        let mut held = Vec::new();
        let (dead, old) = {
            let mut table = self.table.lock();
            let dead = table.drain_dead_hash(hash);
            let (_h, old) = table.replace(hash, entry, |stored, _| {
                matches_key::<K, K>(&stored.key, &**key, &mut held)
            });
            (dead, old)
        };
        drop(dead);
        drop(held);
        old.map(|e| e.value)
    }

    pub fn get<Q>(&self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        let hash = self.hasher.hash_one(q);
        let mut held = Vec::new();
        let (dead, value) = {
            let mut table = self.table.lock();
            let dead = table.drain_dead_hash(hash);
            let value = table
                .find(hash, |e| matches_key(&e.key, q, &mut held))
                .and_then(|h| table.get(h))
                .map(|e| e.value.clone());
            (dead, value)
        };
        drop(dead);
        value
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(q);
        let mut held = Vec::new();
        let found = self
            .table
            .lock()
            .find(hash, |e| matches_key(&e.key, q, &mut held))
            .is_some();
        drop(held);
        found
    }

    pub fn remove<Q>(&self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(q);
        let mut held = Vec::new();
        let removed = {
            let mut table = self.table.lock();
            table
                .find(hash, |e| matches_key(&e.key, q, &mut held))
                .and_then(|h| table.remove(h))
        };
        drop(held);
        removed.map(|e| e.value)
    }

    /// Number of live entries. Sweeps dead entries first.
    pub fn len(&self) -> usize {
        let (dead, len) = {
            let mut table = self.table.lock();
            let dead = table.drain_dead();
            (dead, table.len())
        };
        drop(dead);
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep dead entries; returns how many were removed.
    pub fn expunge(&self) -> usize {
        let dead = self.table.lock().drain_dead();
        dead.len()
    }

    /// Strong handles to the keys that are live right now.
    pub fn keys(&self) -> Vec<Arc<K>> {
        let table = self.table.lock();
        table.iter().filter_map(|(_h, e)| e.key.upgrade()).collect()
    }
}

/// Compare a stored key with `q`. The upgraded handle goes into `held` so
/// that, if it turns out to be the last one, the key drops after the caller
/// has released the lock.
fn matches_key<K, Q>(stored: &Weak<K>, q: &Q, held: &mut Vec<Arc<K>>) -> bool
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    match stored.upgrade() {
        Some(k) => {
            let same = Borrow::<Q>::borrow(&*k) == q;
            held.push(k);
            same
        }
        None => false,
    }
}

impl<K, V, S> Table<Arc<K>, V> for WeakKeyedCache<K, V, S>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send,
    S: BuildHasher + Send + Sync,
{
    fn get(&self, key: &Arc<K>) -> Option<V> {
        WeakKeyedCache::get(self, &**key)
    }
    fn put(&self, key: Arc<K>, value: V) -> Option<V> {
        WeakKeyedCache::put(self, &key, value)
    }
    fn len(&self) -> usize {
        WeakKeyedCache::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: `get` after `put` returns the value while the key lives.
    #[test]
    fn put_then_get_returns_value() {
        let c: WeakKeyedCache<String, i32> = WeakKeyedCache::new();
        let k = Arc::new("alpha".to_string());
        assert_eq!(c.put(&k, 1), None);
        assert_eq!(c.get("alpha"), Some(1));
        assert!(c.contains_key("alpha"));
        assert_eq!(c.len(), 1);
    }

    /// Invariant: `put` on an equal key replaces the value and returns the
    /// previous one; the size does not grow.
    #[test]
    fn put_replaces_equal_key() {
        let c: WeakKeyedCache<String, i32> = WeakKeyedCache::new();
        let k1 = Arc::new("k".to_string());
        let k2 = Arc::new("k".to_string());
        c.put(&k1, 1);
        assert_eq!(c.put(&k2, 2), Some(1));
        assert_eq!(c.get("k"), Some(2));
        assert_eq!(c.len(), 1);
    }

    /// Invariant: the entry follows the most recently supplied key handle.
    /// Dropping the older equal key does not evict; dropping the newer does.
    #[test]
    fn entry_follows_latest_key_handle() {
        let c: WeakKeyedCache<String, i32> = WeakKeyedCache::new();
        let k1 = Arc::new("k".to_string());
        let k2 = Arc::new("k".to_string());
        c.put(&k1, 1);
        c.put(&k2, 2);
        drop(k1);
        assert_eq!(c.get("k"), Some(2));
        drop(k2);
        assert_eq!(c.get("k"), None);
        assert_eq!(c.len(), 0);
    }

    /// Invariant: dropping a key makes its entry absent; `len` sweeps it and
    /// a second `len` without mutation reports the same count.
    #[test]
    fn dropped_key_is_absent_and_len_is_idempotent() {
        let c: WeakKeyedCache<String, i32> = WeakKeyedCache::new();
        let a = Arc::new("a".to_string());
        let b = Arc::new("b".to_string());
        c.put(&a, 1);
        c.put(&b, 2);
        assert_eq!(c.len(), 2);

        drop(b);
        assert_eq!(c.get("b"), None);
        assert_eq!(c.len(), 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.keys(), vec![a]);
    }

    /// Invariant: `remove` returns the live value and leaves the key absent.
    #[test]
    fn remove_returns_value() {
        let c: WeakKeyedCache<String, i32> = WeakKeyedCache::new();
        let k = Arc::new("k".to_string());
        c.put(&k, 5);
        assert_eq!(c.remove("k"), Some(5));
        assert_eq!(c.remove("k"), None);
        assert!(c.is_empty());
    }

    /// Invariant: `expunge` reports exactly the number of dead entries.
    #[test]
    fn expunge_counts_dead_entries() {
        let c: WeakKeyedCache<u32, ()> = WeakKeyedCache::new();
        let keys: Vec<Arc<u32>> = (0..5).map(Arc::new).collect();
        for k in &keys {
            c.put(k, ());
        }
        let mut keys = keys;
        keys.truncate(2);
        assert_eq!(c.expunge(), 3);
        assert_eq!(c.expunge(), 0);
        assert_eq!(c.len(), 2);
    }

    /// Invariant: values are dropped when their entry is swept.
    #[test]
    fn values_are_released_on_sweep() {
        let c: WeakKeyedCache<u32, Arc<String>> = WeakKeyedCache::new();
        let value = Arc::new("payload".to_string());
        let key = Arc::new(1);
        c.put(&key, value.clone());
        assert_eq!(Arc::strong_count(&value), 2);
        drop(key);
        assert_eq!(c.len(), 0);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    /// Invariant: a key upgraded for comparison is kept by the caller, so
    /// when the owner drops its last handle mid-probe, the key itself drops
    /// only when the caller releases `held`.
    #[test]
    fn compared_keys_drop_with_held_handles() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        #[derive(PartialEq, Eq, Hash)]
        struct Counted(u32);
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let owner = Arc::new(Counted(1));
        let stored = Arc::downgrade(&owner);
        let mut held = Vec::new();
        assert!(matches_key::<Counted, Counted>(&stored, &Counted(1), &mut held));
        let after_probe = DROPS.load(Ordering::SeqCst);
        drop(owner);
        assert_eq!(DROPS.load(Ordering::SeqCst), after_probe);
        drop(held);
        assert_eq!(DROPS.load(Ordering::SeqCst), after_probe + 1);
        assert!(!stored.is_live());
    }

    /// Invariant: the cache is shareable across threads and concurrent puts
    /// of distinct keys are all retained.
    #[test]
    fn concurrent_puts_are_all_visible() {
        let c: Arc<WeakKeyedCache<u32, u32>> = Arc::new(WeakKeyedCache::new());
        let keys: Vec<Arc<u32>> = (0..64).map(Arc::new).collect();
        std::thread::scope(|s| {
            for chunk in keys.chunks(16) {
                let c = c.clone();
                s.spawn(move || {
                    for k in chunk {
                        c.put(k, **k * 2);
                    }
                });
            }
        });
        assert_eq!(c.len(), 64);
        assert_eq!(c.get(&10), Some(20));
    }
}
