//! WeakTable: hash-indexed storage whose entries can die behind its back.
//!
//! The caller computes hashes and supplies equality; the table stores each
//! entry with its precomputed hash and never calls user `Hash` again. An
//! entry is dead once `Liveness::is_live` turns false (for `Weak` handles:
//! the last `Arc` is gone). Dead entries are never returned by lookups and
//! are pruned lazily by the sweep methods.

use crate::reentrancy::DebugReentrancy;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::sync::Weak;

/// Reports whether an entry's referent is still reachable.
pub trait Liveness {
    fn is_live(&self) -> bool;
}

impl<T: ?Sized> Liveness for Weak<T> {
    #[inline]
    fn is_live(&self) -> bool {
        self.strong_count() > 0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.0
    }

    /// Resolve the handle against `table`; `None` once removed or dead.
    pub fn entry<'a, E: Liveness>(&self, table: &'a WeakTable<E>) -> Option<&'a E> {
        table.get(*self)
    }
}

#[derive(Debug)]
struct Slot<E> {
    entry: E,
    hash: u64,
}

pub struct WeakTable<E> {
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Slot<E>>,
    reentrancy: DebugReentrancy,
}

impl<E: Liveness> Default for WeakTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over live entries in `WeakTable`.
pub struct Iter<'a, E> {
    it: slotmap::basic::Iter<'a, DefaultKey, Slot<E>>,
}

impl<'a, E: Liveness> Iterator for Iter<'a, E> {
    type Item = (Handle, &'a E);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it
            .by_ref()
            .find(|(_, s)| s.entry.is_live())
            .map(|(k, s)| (Handle::new(k), &s.entry))
    }
}

impl<E: Liveness> WeakTable<E> {
    pub fn new() -> Self {
        Self {
            index: HashTable::new(),
            slots: SlotMap::with_key(),
            reentrancy: DebugReentrancy::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashTable::with_capacity(capacity),
            slots: SlotMap::with_capacity_and_key(capacity),
            reentrancy: DebugReentrancy::new(),
        }
    }

    /// Stored entries, dead ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Entries whose referent is still reachable right now.
    pub fn live_len(&self) -> usize {
        let _g = self.reentrancy.enter("live_len");
        self.slots.values().filter(|s| s.entry.is_live()).count()
    }

    /// Find a live entry with this hash accepted by `eq`.
    pub fn find(&self, hash: u64, mut eq: impl FnMut(&E) -> bool) -> Option<Handle> {
        let _g = self.reentrancy.enter("find");
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|s| s.hash == hash && s.entry.is_live() && eq(&s.entry))
                    .unwrap_or(false)
            })
            .map(|&k| Handle::new(k))
    }

    pub fn get(&self, h: Handle) -> Option<&E> {
        let _g = self.reentrancy.enter("get");
        self.slots
            .get(h.raw_handle())
            .filter(|s| s.entry.is_live())
            .map(|s| &s.entry)
    }

    pub fn get_mut(&mut self, h: Handle) -> Option<&mut E> {
        let _g = self.reentrancy.enter("get_mut");
        self.slots
            .get_mut(h.raw_handle())
            .filter(|s| s.entry.is_live())
            .map(|s| &mut s.entry)
    }

    /// Insert without looking for an existing entry.
    pub fn insert(&mut self, hash: u64, entry: E) -> Handle {
        let _g = self.reentrancy.enter("insert");
        Handle::new(Self::insert_slot(&mut self.slots, &mut self.index, hash, entry))
    }

    /// Replace the live entry that `same` matches with `entry`, or insert
    /// `entry` if there is none. Returns the displaced entry.
    pub fn replace(
        &mut self,
        hash: u64,
        entry: E,
        mut same: impl FnMut(&E, &E) -> bool,
    ) -> (Handle, Option<E>) {
        let _g = self.reentrancy.enter("replace");
        let found = self
            .index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|s| s.hash == hash && s.entry.is_live() && same(&s.entry, &entry))
                    .unwrap_or(false)
            })
            .copied();
        match found {
            Some(k) => {
                let slot = self
                    .slots
                    .get_mut(k)
                    .expect("indexed slot must be present");
                let old = core::mem::replace(&mut slot.entry, entry);
                (Handle::new(k), Some(old))
            }
            None => {
                let k = Self::insert_slot(&mut self.slots, &mut self.index, hash, entry);
                (Handle::new(k), None)
            }
        }
    }

    pub fn remove(&mut self, handle: Handle) -> Option<E> {
        let _g = self.reentrancy.enter("remove");
        let k = handle.raw_handle();
        let slot = self.slots.remove(k)?;
        self.index
            .find_entry(slot.hash, |&kk| kk == k)
            .expect("slot must be indexed under its stored hash")
            .remove();
        Some(slot.entry)
    }

    /// Remove every dead entry and hand them back, so the caller can drop
    /// them after releasing whatever lock guards this table.
    pub fn drain_dead(&mut self) -> Vec<E> {
        let _g = self.reentrancy.enter("drain_dead");
        let slots = &mut self.slots;
        let mut dead = Vec::new();
        self.index.retain(|k| {
            let live = slots.get(*k).map(|s| s.entry.is_live()).unwrap_or(false);
            if !live {
                if let Some(s) = slots.remove(*k) {
                    dead.push(s.entry);
                }
            }
            live
        });
        dead
    }

    /// Like `drain_dead`, restricted to entries stored under `hash`.
    pub fn drain_dead_hash(&mut self, hash: u64) -> Vec<E> {
        let _g = self.reentrancy.enter("drain_dead_hash");
        let mut dead = Vec::new();
        loop {
            let slots = &self.slots;
            let found = self.index.find_entry(hash, |&k| {
                slots
                    .get(k)
                    .map(|s| s.hash == hash && !s.entry.is_live())
                    .unwrap_or(false)
            });
            match found {
                Ok(occupied) => {
                    let (k, _) = occupied.remove();
                    if let Some(s) = self.slots.remove(k) {
                        dead.push(s.entry);
                    }
                }
                Err(_) => break,
            }
        }
        dead
    }

    /// Sweep and return how many entries were removed.
    pub fn expunge(&mut self) -> usize {
        self.drain_dead().len()
    }

    pub fn iter(&self) -> Iter<'_, E> {
        Iter {
            it: self.slots.iter(),
        }
    }

    // Takes the fields apart so callers can hold the reentrancy guard.
    fn insert_slot(
        slots: &mut SlotMap<DefaultKey, Slot<E>>,
        index: &mut HashTable<DefaultKey>,
        hash: u64,
        entry: E,
    ) -> DefaultKey {
        let k = slots.insert(Slot { entry, hash });
        let slots = &*slots;
        index.insert_unique(hash, k, |&kk| slots.get(kk).map(|s| s.hash).unwrap_or(0));
        k
    }
}
