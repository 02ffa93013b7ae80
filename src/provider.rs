//! Providers and their property chains.
//!
//! A `Provider` owns a `Properties` node. Each node may point at a defaults
//! node, and lookups fall through the chain. The provider cache appends
//! keep-alive nodes to the chain's end so that pinned data shares the
//! provider's lifetime.

use crate::identity::IdentityKey;
use core::any::Any;
use core::fmt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

type KeepAlive = Arc<dyn Any + Send + Sync>;

// Serializes every splice so two concurrent appends can't both claim the
// same terminal node.
static SPLICE_LOCK: Mutex<()> = parking_lot::const_mutex(());

pub struct Properties {
    values: Mutex<BTreeMap<String, String>>,
    defaults: Mutex<Option<Arc<Properties>>>,
    pin: Option<KeepAlive>,
}

impl Properties {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(BTreeMap::new()),
            defaults: Mutex::new(None),
            pin: None,
        }
    }

    pub fn with_defaults(defaults: Arc<Properties>) -> Self {
        let p = Self::new();
        *p.defaults.lock() = Some(defaults);
        p
    }

    fn keep_alive(pin: KeepAlive) -> Self {
        Self {
            values: Mutex::new(BTreeMap::new()),
            defaults: Mutex::new(None),
            pin: Some(pin),
        }
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.lock().insert(key.into(), value.into())
    }

    /// Look `key` up in this node, then down the defaults chain.
    pub fn get_property(&self, key: &str) -> Option<String> {
        if let Some(v) = self.values.lock().get(key) {
            return Some(v.clone());
        }
        let mut next = self.defaults.lock().clone();
        while let Some(node) = next {
            if let Some(v) = node.values.lock().get(key) {
                return Some(v.clone());
            }
            next = node.defaults.lock().clone();
        }
        None
    }

    pub fn defaults(&self) -> Option<Arc<Properties>> {
        self.defaults.lock().clone()
    }

    /// Number of nodes below this one.
    pub fn chain_len(&self) -> usize {
        let mut n = 0;
        let mut next = self.defaults.lock().clone();
        while let Some(node) = next {
            n += 1;
            next = node.defaults.lock().clone();
        }
        n
    }

    /// Number of keep-alive nodes below this one.
    pub fn pinned_len(&self) -> usize {
        let mut n = 0;
        let mut next = self.defaults.lock().clone();
        while let Some(node) = next {
            if node.pin.is_some() {
                n += 1;
            }
            next = node.defaults.lock().clone();
        }
        n
    }

    /// Append a keep-alive node holding `pin` after the current terminal
    /// node. The pin lives until this chain is dropped.
    pub(crate) fn splice_keep_alive(&self, pin: KeepAlive) {
        let node = Arc::new(Properties::keep_alive(pin));
        let _g = SPLICE_LOCK.lock();
        let head = self.defaults.lock().clone();
        let mut last = match head {
            Some(n) => n,
            None => {
                *self.defaults.lock() = Some(node);
                return;
            }
        };
        loop {
            let next = last.defaults.lock().clone();
            match next {
                Some(n) => last = n,
                None => break,
            }
        }
        *last.defaults.lock() = Some(node);
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Properties {
    // Unlink uniquely owned nodes one at a time; a long chain would
    // otherwise drop recursively.
    fn drop(&mut self) {
        let mut next = self.defaults.get_mut().take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut props) => next = props.defaults.get_mut().take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Properties")
            .field("values", &*self.values.lock())
            .field("chain_len", &self.chain_len())
            .field("pinned", &self.pin.is_some())
            .finish()
    }
}

/// A named, versioned service implementation.
#[derive(Debug)]
pub struct Provider {
    name: String,
    version: String,
    info: String,
    properties: Properties,
}

impl Provider {
    pub fn new(name: impl Into<String>, version: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            info: info.into(),
            properties: Properties::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Identity key for this provider, hashed by its allocation address.
    pub fn identity_key(self: &Arc<Self>) -> IdentityKey<Provider> {
        let addr = Arc::as_ptr(self) as usize as u64;
        IdentityKey::new(self, (addr ^ (addr >> 32)) as u32)
    }
}

/// Keys that can name the provider they belong to.
///
/// Implementors must reference the provider weakly: a key pinned into the
/// provider's own chain would otherwise keep the provider alive forever.
pub trait ProviderKey {
    fn provider(&self) -> Option<Arc<Provider>>;
}

impl ProviderKey for IdentityKey<Provider> {
    fn provider(&self) -> Option<Arc<Provider>> {
        self.upgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    /// Invariant: lookups fall through to the defaults chain.
    #[test]
    fn property_lookup_walks_defaults() {
        let base = Arc::new(Properties::new());
        base.set_property("alg", "sha256");
        let top = Properties::with_defaults(base);
        top.set_property("name", "p");
        assert_eq!(top.get_property("name").as_deref(), Some("p"));
        assert_eq!(top.get_property("alg").as_deref(), Some("sha256"));
        assert_eq!(top.get_property("nope"), None);
        assert_eq!(top.chain_len(), 1);
    }

    /// Invariant: every splice appends exactly one terminal node and keeps
    /// the previously spliced ones.
    #[test]
    fn splice_appends_at_terminal_node() {
        let p = Provider::new("p", "1.0", "test");
        let a: KeepAlive = Arc::new(1u32);
        let b: KeepAlive = Arc::new(2u32);
        let wa = Arc::downgrade(&a);
        p.properties().splice_keep_alive(a);
        p.properties().splice_keep_alive(b);
        assert_eq!(p.properties().chain_len(), 2);
        assert_eq!(p.properties().pinned_len(), 2);
        assert!(wa.upgrade().is_some());
    }

    /// Invariant: pins are released together with the provider.
    #[test]
    fn pins_die_with_provider() {
        let p = Arc::new(Provider::new("p", "1.0", "test"));
        let pin: KeepAlive = Arc::new("payload".to_string());
        let w: Weak<dyn Any + Send + Sync> = Arc::downgrade(&pin);
        p.properties().splice_keep_alive(pin);
        assert!(w.upgrade().is_some());
        drop(p);
        assert!(w.upgrade().is_none());
    }

    /// Invariant: dropping a very long chain does not recurse per node.
    #[test]
    fn long_chain_drops_without_overflow() {
        let p = Provider::new("p", "1.0", "test");
        let mut tail = Arc::new(Properties::new());
        for _ in 0..100_000 {
            tail = Arc::new(Properties::with_defaults(tail));
        }
        *p.properties().defaults.lock() = Some(tail);
        drop(p);
    }

    #[test]
    fn identity_key_names_its_provider() {
        let p = Arc::new(Provider::new("p", "1.0", "test"));
        let k = p.identity_key();
        assert!(Arc::ptr_eq(&k.provider().unwrap(), &p));
        assert_eq!(k, p.identity_key());
    }
}
