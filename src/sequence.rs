//! WeakSequence: an append-only list of weak handles.
//!
//! Reading a slot whose referent is gone yields the sentinel given at
//! construction instead of failing, so index-based readers that raced a
//! drop still see a valid element.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub struct WeakSequence<E: ?Sized> {
    sentinel: Arc<E>,
    refs: Mutex<Vec<Weak<E>>>,
}

impl<E: ?Sized> WeakSequence<E> {
    pub fn new(sentinel: Arc<E>) -> Self {
        Self {
            sentinel,
            refs: Mutex::new(Vec::new()),
        }
    }

    pub fn sentinel(&self) -> &Arc<E> {
        &self.sentinel
    }

    /// Append a weak handle to `e`. Always succeeds.
    pub fn add(&self, e: &Arc<E>) -> bool {
        self.refs.lock().push(Arc::downgrade(e));
        true
    }

    pub fn add_all<'a, I>(&self, items: I) -> bool
    where
        I: IntoIterator<Item = &'a Arc<E>>,
        E: 'a,
    {
        let mut refs = self.refs.lock();
        refs.extend(items.into_iter().map(Arc::downgrade));
        true
    }

    /// The element at `index`, or the sentinel if it was dropped.
    /// `None` only when `index` is out of range.
    pub fn get(&self, index: usize) -> Option<Arc<E>> {
        let refs = self.refs.lock();
        let slot = refs.get(index)?;
        Some(slot.upgrade().unwrap_or_else(|| self.sentinel.clone()))
    }

    /// Live elements. Sweeps first.
    pub fn len(&self) -> usize {
        let mut refs = self.refs.lock();
        refs.retain(|w| w.strong_count() > 0);
        refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop dead handles; returns how many were removed.
    pub fn expunge(&self) -> usize {
        let mut refs = self.refs.lock();
        let before = refs.len();
        refs.retain(|w| w.strong_count() > 0);
        before - refs.len()
    }

    /// Strong handles to the live elements in insertion order. Dead
    /// handles met along the way are removed.
    pub fn create_strong_list(&self) -> Vec<Arc<E>> {
        let mut refs = self.refs.lock();
        let mut strong = Vec::with_capacity(refs.len());
        refs.retain(|w| match w.upgrade() {
            Some(e) => {
                strong.push(e);
                true
            }
            None => false,
        });
        strong
    }
}

impl<E: ?Sized> Clone for WeakSequence<E> {
    fn clone(&self) -> Self {
        Self {
            sentinel: self.sentinel.clone(),
            refs: Mutex::new(self.refs.lock().clone()),
        }
    }
}
