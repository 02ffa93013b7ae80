//! WeakValueCache: strong keys, weak values.
//!
//! A lookup only succeeds while somebody else still owns the value. The
//! runtime's code-base cache and protocol-handler registry use this so a
//! handler or code base never outlives the component that created it.

use crate::table::Table;
use crate::weak_table::{Liveness, WeakTable};
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::sync::{Arc, Weak};

struct ValueEntry<K, V: ?Sized> {
    key: K,
    value: Weak<V>,
}

impl<K, V: ?Sized> Liveness for ValueEntry<K, V> {
    #[inline]
    fn is_live(&self) -> bool {
        self.value.is_live()
    }
}

pub struct WeakValueCache<K, V: ?Sized, S = RandomState> {
    hasher: S,
    table: Mutex<WeakTable<ValueEntry<K, V>>>,
}

impl<K: Eq + Hash, V: ?Sized> WeakValueCache<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<K: Eq + Hash, V: ?Sized> Default for WeakValueCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    V: ?Sized,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            table: Mutex::new(WeakTable::new()),
        }
    }

    /// Map `key` to a weak handle of `value`. Returns the previous value if
    /// it was still alive.
    pub fn put(&self, key: K, value: &Arc<V>) -> Option<Arc<V>> {
        let hash = self.hasher.hash_one(&key);
        let entry = ValueEntry {
            key,
            value: Arc::downgrade(value),
        };
        let (dead, old) = {
            let mut table = self.table.lock();
            let dead = table.drain_dead_hash(hash);
            let (_h, old) = table.replace(hash, entry, |stored, new| stored.key == new.key);
            (dead, old)
        };
        drop(dead);
        old.and_then(|e| e.value.upgrade())
    }

    pub fn get<Q>(&self, q: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(q);
        let (dead, value) = {
            let mut table = self.table.lock();
            let dead = table.drain_dead_hash(hash);
            let value = table
                .find(hash, |e| key_eq(&e.key, q))
                .and_then(|h| table.get(h))
                .and_then(|e| e.value.upgrade());
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
        self.table
            .lock()
            .find(hash, |e| key_eq(&e.key, q))
            .is_some()
    }

    pub fn remove<Q>(&self, q: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(q);
        let removed = {
            let mut table = self.table.lock();
            table
                .find(hash, |e| key_eq(&e.key, q))
                .and_then(|h| table.remove(h))
        };
        removed.and_then(|e| e.value.upgrade())
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

    pub fn expunge(&self) -> usize {
        let dead = self.table.lock().drain_dead();
        dead.len()
    }
}

fn key_eq<K: Borrow<Q>, Q: ?Sized + Eq>(stored: &K, q: &Q) -> bool {
    Borrow::<Q>::borrow(stored) == q
}

impl<K, V, S> Table<K, Arc<V>> for WeakValueCache<K, V, S>
where
    K: Eq + Hash + Send,
    V: ?Sized + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn get(&self, key: &K) -> Option<Arc<V>> {
        WeakValueCache::get(self, key)
    }
    fn put(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        WeakValueCache::put(self, key, &value)
    }
    fn len(&self) -> usize {
        WeakValueCache::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: a value is reachable through the cache only while it has
    /// an owner outside the cache.
    #[test]
    fn value_lives_only_while_owned() {
        let c: WeakValueCache<String, str> = WeakValueCache::new();
        let v: Arc<str> = Arc::from("file:/opt/app.jar");
        c.put("app".into(), &v);
        assert_eq!(c.get("app").as_deref(), Some("file:/opt/app.jar"));

        drop(v);
        assert!(c.get("app").is_none());
        assert!(!c.contains_key("app"));
        assert_eq!(c.len(), 0);
    }

    /// Invariant: re-putting a key returns the previous live value and keeps
    /// one entry.
    #[test]
    fn put_replaces_previous_value() {
        let c: WeakValueCache<u32, u32> = WeakValueCache::new();
        let a = Arc::new(1);
        let b = Arc::new(2);
        assert!(c.put(7, &a).is_none());
        assert_eq!(c.put(7, &b).as_deref(), Some(&1));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&7).as_deref(), Some(&2));
    }

    /// Invariant: replacing a key whose value already died yields `None`
    /// rather than a stale value.
    #[test]
    fn put_over_dead_value_returns_none() {
        let c: WeakValueCache<u32, u32> = WeakValueCache::new();
        let a = Arc::new(1);
        c.put(7, &a);
        drop(a);
        let b = Arc::new(2);
        assert!(c.put(7, &b).is_none());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn remove_and_expunge() {
        let c: WeakValueCache<u32, u32> = WeakValueCache::new();
        let keep = Arc::new(1);
        let gone = Arc::new(2);
        c.put(1, &keep);
        c.put(2, &gone);
        drop(gone);
        assert_eq!(c.expunge(), 1);
        assert_eq!(c.remove(&1).as_deref(), Some(&1));
        assert!(c.is_empty());
    }
}
