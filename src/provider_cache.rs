//! ProviderCache: entries that live exactly as long as their provider.
//!
//! A `WeakKeyedCache` alone would lose an entry as soon as the caller drops
//! its key. Here every stored key is wrapped in a shared `PinnedEntry` and a
//! strong handle to it is spliced into the end of the provider's properties
//! chain. The cache itself keeps only the weak side, so the entry dies when
//! the provider (and with it the chain) is dropped.
//!
//! Reference shape, with `~>` weak:
//!
//! ```text
//! provider -> properties -> .. -> keep-alive node -> PinnedEntry -> key ~> provider
//! cache ~> PinnedEntry
//! ```

use crate::error::CacheError;
use crate::provider::ProviderKey;
use crate::table::Table;
use crate::weak_keyed::WeakKeyedCache;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash, Hasher};
use std::collections::hash_map::RandomState;
use std::sync::Arc;
use tracing::trace;

/// A key shared between the cache (weakly) and its provider (strongly).
#[derive(Debug)]
pub struct PinnedEntry<K>(K);

impl<K> PinnedEntry<K> {
    pub fn key(&self) -> &K {
        &self.0
    }
}

impl<K> Borrow<K> for PinnedEntry<K> {
    fn borrow(&self) -> &K {
        &self.0
    }
}

impl<K: PartialEq> PartialEq for PinnedEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<K: Eq> Eq for PinnedEntry<K> {}

impl<K: Hash> Hash for PinnedEntry<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

pub struct ProviderCache<K, V, S = RandomState> {
    entries: WeakKeyedCache<PinnedEntry<K>, V, S>,
}

impl<K: Eq + Hash, V> ProviderCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: WeakKeyedCache::new(),
        }
    }
}

impl<K: Eq + Hash, V> Default for ProviderCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> ProviderCache<K, V, S>
where
    K: ProviderKey + Eq + Hash + Send + Sync + 'static,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            entries: WeakKeyedCache::with_hasher(hasher),
        }
    }

    /// Store `value` for `key` and pin the key to its provider.
    ///
    /// A key that names no live provider is not stored.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let Some(provider) = key.provider() else {
            trace!("key names no live provider; entry not stored");
            return None;
        };
        let entry = Arc::new(PinnedEntry(key));
        provider.properties().splice_keep_alive(entry.clone());
        self.entries.put(&entry, value)
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Entries whose provider is still alive. Sweeps first.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn expunge(&self) -> usize {
        self.entries.expunge()
    }

    /// Always fails: entries can't be enumerated without resurrecting keys
    /// the provider chain alone is meant to own.
    pub fn entry_set(&self) -> Result<Vec<(K, V)>, CacheError> {
        Err(CacheError::Unsupported("entry_set"))
    }
}

impl<K, V, S> Table<K, V> for ProviderCache<K, V, S>
where
    K: ProviderKey + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send,
    S: BuildHasher + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        ProviderCache::get(self, key)
    }
    fn put(&self, key: K, value: V) -> Option<V> {
        ProviderCache::put(self, key, value)
    }
    fn len(&self) -> usize {
        ProviderCache::len(self)
    }
}
