// Provider-pinned cache: entries share their provider's lifetime, not the
// lifetime of the key handle the caller passed in.
use std::sync::Arc;
use std::thread;
use weaklayer::{IdentityKey, Provider, ProviderCache};

fn provider(name: &str) -> Arc<Provider> {
    Arc::new(Provider::new(name, "1.0", "integration test provider"))
}

/// Three providers whose keys collide on the caller-supplied hash; dropping
/// the middle provider removes exactly its entry.
#[test]
fn dropping_middle_provider_shrinks_cache_by_one() {
    let cache: ProviderCache<IdentityKey<Provider>, String> = ProviderCache::new();
    let p1 = provider("p1");
    let p2 = provider("p2");
    let p3 = provider("p3");
    for p in [&p1, &p2, &p3] {
        cache.put(IdentityKey::new(p, 3), format!("verified {}", p.name()));
    }
    assert_eq!(cache.len(), 3);

    let k2 = IdentityKey::new(&p2, 3);
    drop(p2);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&k2), None);
    assert_eq!(cache.get(&IdentityKey::new(&p1, 3)).as_deref(), Some("verified p1"));
    assert_eq!(cache.get(&IdentityKey::new(&p3, 3)).as_deref(), Some("verified p3"));
    assert_eq!(cache.len(), 2);
}

/// Invariant: repeated sweeps never drop an entry whose provider lives.
#[test]
fn live_provider_entries_survive_sweeps() {
    let cache: ProviderCache<IdentityKey<Provider>, u32> = ProviderCache::new();
    let p = provider("p");
    cache.put(p.identity_key(), 42);
    for _ in 0..10 {
        assert_eq!(cache.expunge(), 0);
        assert_eq!(cache.get(&p.identity_key()), Some(42));
    }
}

/// Invariant: putting an equal key again replaces the value; the chain
/// gains a keep-alive node per put and the cache stays at one entry.
#[test]
fn re_put_replaces_value() {
    let cache: ProviderCache<IdentityKey<Provider>, u32> = ProviderCache::new();
    let p = provider("p");
    assert_eq!(cache.put(p.identity_key(), 1), None);
    assert_eq!(cache.put(p.identity_key(), 2), Some(1));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&p.identity_key()), Some(2));
    assert_eq!(p.properties().pinned_len(), 2);
}

#[test]
fn concurrent_puts_from_many_threads() {
    let cache: Arc<ProviderCache<IdentityKey<Provider>, usize>> = Arc::new(ProviderCache::new());
    let providers: Vec<Arc<Provider>> = (0..8).map(|i| provider(&format!("p{i}"))).collect();
    let handles: Vec<_> = providers
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, p)| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    cache.put(p.identity_key(), i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(cache.len(), 8);
    for (i, p) in providers.iter().enumerate() {
        assert_eq!(cache.get(&p.identity_key()), Some(i));
        assert_eq!(p.properties().pinned_len(), 50);
    }
    drop(providers);
    assert!(cache.is_empty());
}

/// Invariant: a key rebuilt from the same provider and code finds the
/// entry; a key with another code for that provider is a different key.
#[test]
fn lookup_key_must_match_target_and_code() {
    let cache: ProviderCache<IdentityKey<Provider>, u32> = ProviderCache::new();
    let p = provider("p");
    cache.put(IdentityKey::new(&p, 3), 7);
    assert_eq!(cache.get(&IdentityKey::new(&p, 3)), Some(7));

    let by_address = p.identity_key();
    assert_ne!(by_address.hash_code(), 3);
    assert_eq!(cache.get(&by_address), None);
    assert_eq!(cache.get(&IdentityKey::new(&p, by_address.hash_code())), None);

    cache.put(by_address.clone(), 8);
    assert_eq!(cache.get(&IdentityKey::new(&p, by_address.hash_code())), Some(8));
    assert_eq!(cache.get(&IdentityKey::new(&p, 3)), Some(7));
    assert_eq!(cache.len(), 2);
}
