// Weak cache behaviour through the public API: map laws while keys are
// owned, eviction once they are not, idempotent sweeps.
use std::sync::Arc;
use weaklayer::{Level, Table, WeakIdentityRegistry, WeakKeyedCache, WeakSequence, WeakValueCache};

/// Invariant: while every key is owned, the cache behaves like a map.
#[test]
fn keyed_cache_obeys_map_laws_while_owned() {
    let cache: WeakKeyedCache<String, usize> = WeakKeyedCache::new();
    let keys: Vec<Arc<String>> = (0..50).map(|i| Arc::new(format!("k{i}"))).collect();
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(cache.put(k, i), None);
    }
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(cache.get(k.as_str()), Some(i));
    }
    assert_eq!(cache.len(), 50);

    // Re-putting an equal key replaces the value without growing.
    let again = Arc::new("k7".to_string());
    assert_eq!(cache.put(&again, 700), Some(7));
    assert_eq!(cache.len(), 50);
    assert_eq!(cache.get("k7"), Some(700));
}

/// Invariant: dropping a key's only owner evicts it; an equal but distinct
/// key finds nothing, and `len` shrinks by exactly the dropped entries.
#[test]
fn keyed_cache_evicts_dropped_keys() {
    let cache: WeakKeyedCache<String, u32> = WeakKeyedCache::new();
    let mut keys: Vec<Arc<String>> = (0..10).map(|i| Arc::new(format!("k{i}"))).collect();
    for k in &keys {
        cache.put(k, 1);
    }
    let dropped: Vec<Arc<String>> = keys.drain(..4).collect();
    drop(dropped);

    let equal_but_distinct = "k0".to_string();
    assert_eq!(cache.get(&equal_but_distinct), None);
    assert_eq!(cache.len(), 6);
    assert_eq!(cache.len(), 6);
    assert_eq!(cache.expunge(), 0);
    assert_eq!(cache.keys().len(), 6);
}

#[test]
fn value_cache_forgets_unowned_values() {
    let cache: WeakValueCache<String, str> = WeakValueCache::new();
    let held: Arc<str> = Arc::from("held");
    cache.put("a".into(), &held);
    cache.put("b".into(), &Arc::from("temporary"));
    assert_eq!(cache.get("a").as_deref(), Some("held"));
    assert_eq!(cache.get("b"), None);
    assert_eq!(cache.len(), 1);
    drop(held);
    assert!(cache.is_empty());
}

/// Invariant: the identity registry keeps distinct allocations apart even
/// when their contents are equal.
#[test]
fn identity_registry_is_by_address() {
    let reg: WeakIdentityRegistry<String, &'static str> = WeakIdentityRegistry::new();
    let a = Arc::new("same".to_string());
    let b = Arc::new("same".to_string());
    reg.put(&a, "a");
    reg.put(&b, "b");
    assert_eq!(reg.get(&a), Some("a"));
    assert_eq!(reg.get(&b), Some("b"));
    drop(a);
    assert_eq!(reg.len(), 1);
    assert_eq!(reg.get(&b), Some("b"));
}

/// Invariant: every cache is usable through the `Table` seam.
#[test]
fn caches_share_the_table_seam() {
    let tables: Vec<Box<dyn Table<Arc<String>, u8>>> = vec![
        Box::new(WeakKeyedCache::<String, u8>::new()),
        Box::new(WeakIdentityRegistry::<String, u8>::new()),
    ];
    let k = Arc::new("k".to_string());
    for t in &tables {
        assert_eq!(t.put(k.clone(), 1), None);
        assert_eq!(t.get(&k), Some(1));
        assert_eq!(t.len(), 1);
    }
    drop(k);
    for t in &tables {
        assert!(t.is_empty());
    }
}

/// Invariant: in-range reads never fail; collected slots read as the
/// sentinel, and strong lists keep insertion order.
#[test]
fn weak_sequence_reads_sentinel_for_collected_slots() {
    let seq = WeakSequence::new(Level::off());
    let a = Level::new("A", 1);
    let b = Level::new("B", 2);
    let c = Level::new("C", 3);
    seq.add_all([&a, &b, &c]);
    drop(b);

    assert_eq!(seq.get(1).unwrap().name(), "OFF");
    assert!(seq.get(3).is_none());
    let names = |s: &WeakSequence<Level>| {
        s.create_strong_list()
            .iter()
            .map(|l| l.name().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&seq), vec!["A", "C"]);
    assert_eq!(names(&seq), vec!["A", "C"]);
    assert_eq!(seq.len(), 2);
    assert_eq!(seq.get(1).unwrap().name(), "C");
}
