//! The `Table` seam shared by runtime caches.
//!
//! Every cache slot of the host runtime is typed as `dyn Table<K, V>`, so the
//! strong defaults below can be replaced by any weak cache with the same key
//! and value types without the runtime noticing.

use core::hash::Hash;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Minimal synchronized map contract: lookup, store, size.
pub trait Table<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&self, key: K, value: V) -> Option<V>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Equality-keyed table holding keys and values strongly.
pub struct StrongTable<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> StrongTable<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> Default for StrongTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Table<K, V> for StrongTable<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }
    fn put(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().insert(key, value)
    }
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Identity-keyed table holding its keys strongly.
///
/// Keys are compared by allocation address. Holding the `Arc` keeps the
/// address from being reused, which is also why nothing stored here is ever
/// released.
pub struct StrongIdentityTable<K: ?Sized, V> {
    inner: Mutex<HashMap<usize, (Arc<K>, V)>>,
}

pub(crate) fn addr_of<K: ?Sized>(key: &Arc<K>) -> usize {
    Arc::as_ptr(key) as *const () as usize
}

impl<K: ?Sized, V> StrongIdentityTable<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: ?Sized, V> Default for StrongIdentityTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Table<Arc<K>, V> for StrongIdentityTable<K, V>
where
    K: ?Sized + Send + Sync,
    V: Clone + Send,
{
    fn get(&self, key: &Arc<K>) -> Option<V> {
        self.inner.lock().get(&addr_of(key)).map(|(_, v)| v.clone())
    }
    fn put(&self, key: Arc<K>, value: V) -> Option<V> {
        self.inner
            .lock()
            .insert(addr_of(&key), (key, value))
            .map(|(_, v)| v)
    }
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: the strong identity table tells apart equal values that
    /// live in different allocations.
    #[test]
    fn identity_table_ignores_equality() {
        let t: StrongIdentityTable<String, u8> = StrongIdentityTable::new();
        let a = Arc::new("same".to_string());
        let b = Arc::new("same".to_string());
        t.put(a.clone(), 1);
        t.put(b.clone(), 2);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(&a), Some(1));
        assert_eq!(t.get(&b), Some(2));
    }

    /// Invariant: strong tables keep entries after callers drop their keys.
    #[test]
    fn strong_tables_never_release() {
        let t: StrongIdentityTable<u32, ()> = StrongIdentityTable::new();
        t.put(Arc::new(1), ());
        assert_eq!(t.len(), 1);

        let s: StrongTable<String, u32> = StrongTable::new();
        assert_eq!(s.put("k".into(), 1), None);
        assert_eq!(s.put("k".into(), 2), Some(1));
        assert_eq!(Table::get(&s, &"k".to_string()), Some(2));
        assert!(!s.is_empty());
    }

    #[test]
    fn tables_are_object_safe() {
        let t: Box<dyn Table<String, u32>> = Box::new(StrongTable::new());
        t.put("x".into(), 3);
        assert_eq!(t.len(), 1);
    }
}
