//! weaklayer: a bootstrap enhancer that swaps a host runtime's strong
//! process-wide caches for weak ones, then launches the application from a
//! dynamically defined module layer.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: let code loaded by a short-lived loader be reclaimed even though
//!   the host runtime caches things about it in globals forever.
//! - Layers:
//!   - WeakTable<E>: hash-indexed slot storage whose entries report their
//!     own liveness; dead entries are invisible to lookups and swept
//!     lazily. Carries a debug-only reentrancy guard.
//!   - Weak caches over WeakTable: WeakKeyedCache (weak keys),
//!     WeakValueCache (weak values), WeakIdentityRegistry (weak keys
//!     compared by address), ProviderCache (values pinned to a provider's
//!     lifetime), plus WeakSequence and the level registries.
//!   - HostRuntime: named slots typed as `dyn Table` that the patch pass
//!     replaces with the weak caches.
//!   - Module system and Enhancer: resolve the runtime archives into a
//!     layer over the boot layer, patch, and run the main class.
//!
//! Constraints
//! - Thread-safe: every cache serializes on one `parking_lot::Mutex`.
//! - Each table entry stores its precomputed `u64` hash; user `Hash` never
//!   runs again after insertion.
//! - Dead entries leave the table while the lock is held but are dropped
//!   only after it is released, so a value's `Drop` may use the cache.
//! - `len()` sweeps first and counts only live entries.
//!
//! Pinning rule
//! - ProviderCache holds its entry weakly and splices a strong handle to
//!   the entry into the provider's properties chain. The entry then lives
//!   exactly as long as the provider. The key refers back to the provider
//!   weakly, so nothing forms a cycle.
//!
//! Failure boundaries
//! - Boot argument, properties, resolution and main-class errors are
//!   fatal (`BootError`).
//! - A patch that cannot be applied is traced and skipped.
//! - Native library and platform failures are warnings.
//! - Application errors come back unchanged.

pub mod config;
pub mod enhancer;
pub mod entry;
pub mod error;
pub mod host;
pub mod identity;
pub mod level;
pub mod logging;
pub mod module;
pub mod native;
pub mod patch;
pub mod provider;
pub mod provider_cache;
pub mod proxy;
mod reentrancy;
pub mod sequence;
pub mod shutdown;
pub mod table;
pub mod weak_keyed;
pub mod weak_table;
mod weak_table_proptest;
pub mod weak_value;
pub mod worker;

// Public surface
pub use config::{BootArgs, EnhancerProperties, MainSpec, Platform};
pub use enhancer::{BootOutcome, Enhancer};
pub use entry::{CoreContext, EnhancedContext, EntryKind, EntryPointRegistry};
pub use error::{BootError, CacheError, ModuleError, ShutdownError, SlotError};
pub use host::{HostRuntime, RuntimeProfile, Slot};
pub use identity::{IdentityKey, WeakIdentityRegistry};
pub use level::{KnownLevels, Level, WeakLevelMaps};
pub use provider::{Properties, Provider};
pub use provider_cache::ProviderCache;
pub use sequence::WeakSequence;
pub use table::Table;
pub use weak_keyed::WeakKeyedCache;
pub use weak_table::{Liveness, WeakTable};
pub use weak_value::WeakValueCache;
