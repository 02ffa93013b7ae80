//! Debug-only reentrancy guard for `WeakTable`.
//!
//! A table method that probes with caller-supplied equality must not be
//! re-entered from that closure. Debug builds remember which operation is
//! running and panic naming both operations; release builds compile the
//! guard away.
//!
//! The tracker is `Send` but not `Sync`: it lives inside a table that is
//! itself only reachable through its owner's lock.

#[cfg(debug_assertions)]
use core::cell::Cell;
#[cfg(not(debug_assertions))]
use core::marker::PhantomData;

#[derive(Debug, Default)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    active: Cell<Option<&'static str>>,
}

impl DebugReentrancy {
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Cell::new(None),
        }
    }

    /// Mark `op` as running until the guard drops.
    #[inline]
    pub fn enter(&self, op: &'static str) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            if let Some(outer) = self.active.replace(Some(op)) {
                self.active.set(Some(outer));
                panic!("WeakTable::{op} entered while WeakTable::{outer} is running");
            }
            ReentrancyGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            let _ = op;
            ReentrancyGuard { _z: PhantomData }
        }
    }

    /// The operation currently running, if any. Always `None` in release
    /// builds.
    pub fn active(&self) -> Option<&'static str> {
        #[cfg(debug_assertions)]
        {
            self.active.get()
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    }
}

pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let was = self.owner.active.take();
            debug_assert!(was.is_some());
        }
    }
}
