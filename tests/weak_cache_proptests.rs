// Weak cache property tests.
//
// Property 1: keyed cache liveness matches outstanding key handles.
//  - Model: per-key stack of external `Arc<String>` handles, plus the value
//    last put for that key.
//  - Invariant: contains_key(k) == !held[k].is_empty();
//               len() == count(keys with !held[k].is_empty()).
//  - Operations: put (fresh allocation), clone handle, drop one, drop all,
//    get.
//
// Property 2: the same for the identity registry, where every put mints a
// distinct allocation and so a distinct entry.
use proptest::prelude::*;
use std::sync::Arc;
use weaklayer::{WeakIdentityRegistry, WeakKeyedCache};

proptest! {
    #[test]
    fn prop_keyed_cache_liveness(keys in 1usize..=5, ops in proptest::collection::vec((0u8..=4u8, 0usize..100usize, any::<u16>()), 1..100)) {
        let cache: WeakKeyedCache<String, u16> = WeakKeyedCache::new();
        let mut held: Vec<Vec<Arc<String>>> = vec![Vec::new(); keys];
        let mut last: Vec<Option<u16>> = vec![None; keys];

        for (op, raw_k, v) in ops {
            let k = raw_k % keys;
            let name = format!("k{}", k);
            match op {
                // Put through a fresh handle; it becomes the entry's key.
                // Older handles no longer keep the entry alive.
                0 => {
                    let handle = Arc::new(name.clone());
                    cache.put(&handle, v);
                    held[k].clear();
                    held[k].push(handle);
                    last[k] = Some(v);
                }
                1 => {
                    if let Some(h) = held[k].last().cloned() {
                        held[k].push(h);
                    }
                }
                2 => {
                    held[k].pop();
                }
                3 => held[k].clear(),
                _ => {
                    let got = cache.get(name.as_str());
                    if held[k].is_empty() {
                        prop_assert_eq!(got, None);
                    } else {
                        prop_assert_eq!(got, last[k]);
                    }
                }
            }

            for (i, h) in held.iter().enumerate() {
                let present = cache.contains_key(format!("k{}", i).as_str());
                prop_assert_eq!(present, !h.is_empty(), "key k{}", i);
            }
            let expected = held.iter().filter(|h| !h.is_empty()).count();
            prop_assert_eq!(cache.len(), expected);
            prop_assert_eq!(cache.len(), expected);
        }
    }
}

proptest! {
    #[test]
    fn prop_identity_registry_liveness(ops in proptest::collection::vec((0u8..=2u8, 0usize..8usize), 1..80)) {
        let reg: WeakIdentityRegistry<String, usize> = WeakIdentityRegistry::new();
        let mut live: Vec<Arc<String>> = Vec::new();

        for (op, idx) in ops {
            match op {
                0 => {
                    let key = Arc::new("same contents".to_string());
                    reg.put(&key, live.len());
                    live.push(key);
                }
                1 => {
                    if !live.is_empty() {
                        let i = idx % live.len();
                        live.swap_remove(i);
                    }
                }
                _ => {
                    if !live.is_empty() {
                        let i = idx % live.len();
                        prop_assert!(reg.get(&live[i]).is_some());
                    }
                }
            }
            prop_assert_eq!(reg.len(), live.len());
        }
    }
}
