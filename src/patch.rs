//! Swapping the host's strong caches for weak ones.
//!
//! Every patch first loads its support class from the privileged runtime
//! loader, then replaces its slot. A patch that can't be applied is traced
//! and skipped; the rest still run.

use crate::host::{ClassHandle, CodeBase, HostRuntime, UrlStreamHandler, Verification};
use crate::identity::{IdentityKey, WeakIdentityRegistry};
use crate::level::{KnownLevels, Level, WeakLevelMaps};
use crate::module::ModuleClassLoader;
use crate::provider::Provider;
use crate::provider_cache::ProviderCache;
use crate::sequence::WeakSequence;
use crate::weak_value::WeakValueCache;
use std::sync::Arc;
use tracing::{debug, trace};

/// Package holding the runtime's support classes.
pub const SUPPORT_PACKAGE: &str = "weaklayer.runtime";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

impl PatchReport {
    pub fn is_applied(&self, slot: &str) -> bool {
        self.applied.iter().any(|s| *s == slot)
    }
}

struct Patcher<'a> {
    loader: &'a ModuleClassLoader,
    report: PatchReport,
}

impl Patcher<'_> {
    fn apply<F>(&mut self, slot: &'static str, support: &str, install: F)
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        debug!("Replacing {slot}");
        let outcome = self
            .loader
            .load_class(&format!("{SUPPORT_PACKAGE}.{support}"))
            .map_err(anyhow::Error::from)
            .and_then(|_| install());
        match outcome {
            Ok(()) => self.report.applied.push(slot),
            Err(error) => {
                trace!(slot, %error, "patch skipped");
                self.report.skipped.push(slot);
            }
        }
    }
}

/// Replace every cache slot of `runtime` that this profile has, loading
/// support classes through `loader`.
pub fn apply_patches(runtime: &HostRuntime, loader: &ModuleClassLoader) -> PatchReport {
    let mut p = Patcher {
        loader,
        report: PatchReport::default(),
    };

    if runtime.verification_results().is_present() {
        p.apply("verification_results", "ProviderCache", || {
            let cache = ProviderCache::<IdentityKey<Provider>, Verification>::new();
            runtime.verification_results().replace(Arc::new(cache))?;
            Ok(())
        });
    } else {
        p.apply("legacy_verification_results", "WeakIdentityRegistry", || {
            let registry = WeakIdentityRegistry::<Provider, Verification>::new();
            runtime.legacy_verification_results().replace(Arc::new(registry))?;
            Ok(())
        });
    }

    p.apply("code_base_cache", "WeakValueCache", || {
        let cache = WeakValueCache::<String, CodeBase>::new();
        runtime.code_base_cache().replace(Arc::new(cache))?;
        Ok(())
    });

    p.apply("verifying_providers", "WeakIdentityRegistry", || {
        let registry = WeakIdentityRegistry::<Provider, bool>::new();
        runtime.verifying_providers().replace(Arc::new(registry))?;
        Ok(())
    });

    p.apply("url_handlers", "WeakValueCache", || {
        let cache = WeakValueCache::<String, dyn UrlStreamHandler>::new();
        runtime.url_handlers().replace(Arc::new(cache))?;
        Ok(())
    });

    p.apply("subclass_audits", "WeakIdentityRegistry", || {
        let registry = WeakIdentityRegistry::<ClassHandle, bool>::new();
        runtime.subclass_audits().replace(Arc::new(registry))?;
        Ok(())
    });

    if runtime.known_level_list().is_present() {
        p.apply("known_level_list", "WeakSequence", || {
            let slot = runtime.known_level_list();
            let current = slot.require()?.snapshot();
            let seq = WeakSequence::new(Level::off());
            seq.add_all(current.iter());
            slot.replace(Arc::new(seq))?;
            Ok(())
        });
    } else {
        p.apply("known_level_maps", "WeakLevelMaps", || {
            let slot = runtime.known_level_maps();
            let current = slot.require()?.snapshot();
            let maps = WeakLevelMaps::new(Level::off());
            for level in &current {
                maps.register(level);
            }
            slot.replace(Arc::new(maps))?;
            Ok(())
        });
    }

    debug!(
        applied = p.report.applied.len(),
        skipped = p.report.skipped.len(),
        "patching done"
    );
    p.report
}
