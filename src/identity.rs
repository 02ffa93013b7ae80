//! Identity-keyed weak storage.
//!
//! `IdentityKey` is a weak reference that compares by pointer and by a hash
//! code fixed at construction, and hashes by that code. `WeakIdentityRegistry` is a map keyed by
//! allocation identity whose keys are held weakly.

use crate::table::{addr_of, Table};
use crate::weak_table::{Liveness, WeakTable};
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::sync::{Arc, Weak};

/// Weak, identity-compared key with a caller-supplied hash code.
///
/// Two keys are equal iff they point at the same allocation and carry the
/// same code, so equal keys always hash alike. Distinct targets may share a
/// code; they still compare unequal. Keys built with different codes for
/// one target are different keys.
pub struct IdentityKey<T: ?Sized> {
    target: Weak<T>,
    hash: u32,
}

impl<T: ?Sized> IdentityKey<T> {
    pub fn new(target: &Arc<T>, hash: u32) -> Self {
        Self {
            target: Arc::downgrade(target),
            hash,
        }
    }

    pub fn upgrade(&self) -> Option<Arc<T>> {
        self.target.upgrade()
    }

    pub fn hash_code(&self) -> u32 {
        self.hash
    }

    pub fn is_live(&self) -> bool {
        self.target.is_live()
    }
}

impl<T: ?Sized> Clone for IdentityKey<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            hash: self.hash,
        }
    }
}

impl<T: ?Sized> PartialEq for IdentityKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && Weak::ptr_eq(&self.target, &other.target)
    }
}

impl<T: ?Sized> Eq for IdentityKey<T> {}

impl<T: ?Sized> Hash for IdentityKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

impl<T: ?Sized> fmt::Debug for IdentityKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("hash", &self.hash)
            .field("live", &self.is_live())
            .finish()
    }
}

struct IdentityEntry<K: ?Sized, V> {
    key: Weak<K>,
    addr: usize,
    value: V,
}

impl<K: ?Sized, V> Liveness for IdentityEntry<K, V> {
    #[inline]
    fn is_live(&self) -> bool {
        self.key.is_live()
    }
}

pub struct WeakIdentityRegistry<K: ?Sized, V, S = RandomState> {
    hasher: S,
    table: Mutex<WeakTable<IdentityEntry<K, V>>>,
}

impl<K: ?Sized, V> WeakIdentityRegistry<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<K: ?Sized, V> Default for WeakIdentityRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ?Sized, V, S: BuildHasher> WeakIdentityRegistry<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            table: Mutex::new(WeakTable::new()),
        }
    }

    pub fn put(&self, key: &Arc<K>, value: V) -> Option<V> {
        let addr = addr_of(key);
        let hash = self.hasher.hash_one(addr);
        let entry = IdentityEntry {
            key: Arc::downgrade(key),
            addr,
            value,
        };
        let (dead, old) = {
            let mut table = self.table.lock();
            let dead = table.drain_dead_hash(hash);
            let (_h, old) = table.replace(hash, entry, |stored, new| stored.addr == new.addr);
            (dead, old)
        };
        drop(dead);
        old.map(|e| e.value)
    }

    pub fn get(&self, key: &Arc<K>) -> Option<V>
    where
        V: Clone,
    {
        let addr = addr_of(key);
        let hash = self.hasher.hash_one(addr);
        let table = self.table.lock();
        table
            .find(hash, |e| e.addr == addr)
            .and_then(|h| table.get(h))
            .map(|e| e.value.clone())
    }

    pub fn contains_key(&self, key: &Arc<K>) -> bool {
        let addr = addr_of(key);
        let hash = self.hasher.hash_one(addr);
        self.table.lock().find(hash, |e| e.addr == addr).is_some()
    }

    pub fn remove(&self, key: &Arc<K>) -> Option<V> {
        let addr = addr_of(key);
        let hash = self.hasher.hash_one(addr);
        let removed = {
            let mut table = self.table.lock();
            table
                .find(hash, |e| e.addr == addr)
                .and_then(|h| table.remove(h))
        };
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

    pub fn expunge(&self) -> usize {
        let dead = self.table.lock().drain_dead();
        dead.len()
    }
}

impl<K, V, S> Table<Arc<K>, V> for WeakIdentityRegistry<K, V, S>
where
    K: ?Sized + Send + Sync,
    V: Clone + Send,
    S: BuildHasher + Send + Sync,
{
    fn get(&self, key: &Arc<K>) -> Option<V> {
        WeakIdentityRegistry::get(self, key)
    }
    fn put(&self, key: Arc<K>, value: V) -> Option<V> {
        WeakIdentityRegistry::put(self, &key, value)
    }
    fn len(&self) -> usize {
        WeakIdentityRegistry::len(self)
    }
}
