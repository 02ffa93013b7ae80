#![cfg(test)]

// Property tests for WeakTable kept inside the crate so they can reach
// crate-private constructors.

use crate::weak_table::{Liveness, WeakTable};
use proptest::prelude::*;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::{Arc, Weak};

struct Entry {
    key: String,
    referent: Weak<i32>,
}

impl Liveness for Entry {
    fn is_live(&self) -> bool {
        self.referent.is_live()
    }
}

#[derive(Clone, Debug)]
enum Op {
    Put(usize, i32),
    Release(usize),
    Find(usize),
    SweepChain(usize),
    Sweep,
}

fn arb_scenario() -> impl Strategy<Value = (usize, Vec<Op>)> {
    (1usize..=6).prop_flat_map(|keys| {
        let op = prop_oneof![
            (0..keys, any::<i32>()).prop_map(|(k, v)| Op::Put(k, v)),
            (0..keys).prop_map(Op::Release),
            (0..keys).prop_map(Op::Find),
            (0..keys).prop_map(Op::SweepChain),
            Just(Op::Sweep),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (keys, ops))
    })
}

// Property: WeakTable driven by puts and releases agrees with a model map
// of currently-held referents.
// - `find(k)` is `Some` iff the model holds a referent for `k`.
// - `replace` displaces exactly the live entry for `k`, never a dead one.
// - After `drain_dead`, `len()` equals the number of held referents.
// - `live_len()` always equals the number of held referents.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_weak_table_matches_model((keys, ops) in arb_scenario()) {
        let hasher = std::collections::hash_map::RandomState::new();
        let mut sut: WeakTable<Entry> = WeakTable::new();
        let mut model: HashMap<usize, Arc<i32>> = HashMap::new();
        let names: Vec<String> = (0..keys).map(|k| format!("k{k}")).collect();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    let referent = Arc::new(v);
                    let hash = hasher.hash_one(&names[k]);
                    let entry = Entry { key: names[k].clone(), referent: Arc::downgrade(&referent) };
                    let (_h, old) = sut.replace(hash, entry, |a, b| a.key == b.key);
                    prop_assert_eq!(old.is_some(), model.contains_key(&k));
                    model.insert(k, referent);
                }
                Op::Release(k) => {
                    model.remove(&k);
                }
                Op::Find(k) => {
                    let hash = hasher.hash_one(&names[k]);
                    let found = sut.find(hash, |e| e.key == names[k]);
                    prop_assert_eq!(found.is_some(), model.contains_key(&k));
                    if let (Some(h), Some(held)) = (found, model.get(&k)) {
                        let entry = sut.get(h).unwrap();
                        prop_assert!(Weak::ptr_eq(&entry.referent, &Arc::downgrade(held)));
                    }
                }
                Op::SweepChain(k) => {
                    let hash = hasher.hash_one(&names[k]);
                    for e in sut.drain_dead_hash(hash) {
                        prop_assert_eq!(&e.key, &names[k]);
                        prop_assert!(!e.is_live());
                    }
                }
                Op::Sweep => {
                    let _ = sut.drain_dead();
                    prop_assert_eq!(sut.len(), model.len());
                }
            }
            prop_assert_eq!(sut.live_len(), model.len());
        }

        let _ = sut.expunge();
        prop_assert_eq!(sut.len(), model.len());
    }
}
