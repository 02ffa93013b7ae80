//! The host runtime: the process-wide state the enhancer patches.
//!
//! Each cache the host keeps in a global is a named [`Slot`] holding a
//! `dyn Table` (or a level registry, or a proxy selector). The host's own
//! defaults hold everything strongly; the enhancer swaps them for weak
//! variants. Which slots exist depends on the [`RuntimeProfile`]: asking to
//! replace a slot the profile doesn't have fails with `SlotError::Absent`,
//! the same way a patch against an older runtime finds no such field.

use crate::entry::{AddHookFn, EnhancedContext, EntryPointRegistry, RemoveHookFn};
use crate::error::{ModuleError, SlotError};
use crate::identity::IdentityKey;
use crate::level::{KnownLevels, StrongLevelList, StrongLevelMaps};
use crate::module::{Archive, Configuration, ModuleClassLoader, ModuleDescriptor, ModuleGraph, ModuleLayer};
use crate::native::NativeLibrary;
use crate::provider::Provider;
use crate::proxy::{DefaultProxySelector, ProxySelector};
use crate::shutdown::{NativeShutdownHook, ShutdownHooks};
use crate::table::{StrongIdentityTable, StrongTable, Table};
use core::fmt;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Builtin module every boot layer carries.
pub const BASE_MODULE: &str = "host.base";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeProfile {
    /// Class-path boot; identity-keyed verification results; one level list.
    Legacy,
    /// Module-layer boot; wrapped-key verification results; two level maps.
    Modular,
}

/// A named, swappable global.
pub struct Slot<T: ?Sized> {
    name: &'static str,
    current: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Slot<T> {
    pub fn new(name: &'static str, value: Arc<T>) -> Self {
        Self {
            name,
            current: RwLock::new(Some(value)),
        }
    }

    /// A slot this runtime doesn't have.
    pub fn absent(name: &'static str) -> Self {
        Self {
            name,
            current: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_present(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.current.read().clone()
    }

    pub fn require(&self) -> Result<Arc<T>, SlotError> {
        self.get().ok_or(SlotError::Absent(self.name))
    }

    /// Install `value`, returning what was there.
    pub fn replace(&self, value: Arc<T>) -> Result<Arc<T>, SlotError> {
        let mut current = self.current.write();
        match current.as_mut() {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(SlotError::Absent(self.name)),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.name)
            .field("present", &self.is_present())
            .finish()
    }
}

/// Outcome of verifying a provider's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified,
    Rejected(String),
}

/// Where a piece of code was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeBase {
    pub location: String,
}

impl CodeBase {
    pub fn new(location: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            location: location.into(),
        })
    }
}

/// Handler for one URL protocol.
pub trait UrlStreamHandler: Send + Sync {
    fn protocol(&self) -> &str;
}

/// A loaded class, as seen by the subclass audit cache.
#[derive(Debug, PartialEq, Eq)]
pub struct ClassHandle {
    pub name: String,
    pub loader: String,
}

impl ClassHandle {
    pub fn new(name: impl Into<String>, loader: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            loader: loader.into(),
        })
    }
}

pub type VerificationResults = dyn Table<IdentityKey<Provider>, Verification>;
pub type LegacyVerificationResults = dyn Table<Arc<Provider>, Verification>;
pub type CodeBaseCache = dyn Table<String, Arc<CodeBase>>;
pub type VerifyingProviders = dyn Table<Arc<Provider>, bool>;
pub type UrlHandlers = dyn Table<String, Arc<dyn UrlStreamHandler>>;
pub type SubclassAudits = dyn Table<Arc<ClassHandle>, bool>;

pub type PreloadFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Work run on the boot worker before the runtime loader is built.
#[derive(Clone)]
pub struct Preload {
    pub name: String,
    pub action: PreloadFn,
}

impl fmt::Debug for Preload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preload").field("name", &self.name).finish()
    }
}

pub struct HostRuntime {
    profile: RuntimeProfile,

    verification_results: Slot<VerificationResults>,
    legacy_verification_results: Slot<LegacyVerificationResults>,
    code_base_cache: Slot<CodeBaseCache>,
    verifying_providers: Slot<VerifyingProviders>,
    url_handlers: Slot<UrlHandlers>,
    subclass_audits: Slot<SubclassAudits>,
    known_level_list: Slot<dyn KnownLevels>,
    known_level_maps: Slot<dyn KnownLevels>,
    proxy_selector: Slot<dyn ProxySelector>,

    shutdown_hooks: Arc<ShutdownHooks>,
    native_shutdown: Mutex<Option<NativeShutdownHook>>,
    native_libraries: Mutex<Vec<NativeLibrary>>,

    graph: Arc<ModuleGraph>,
    boot_layer: Arc<ModuleLayer>,
    app_loader: Arc<ModuleClassLoader>,
    entry_points: EntryPointRegistry,
    preloads: Vec<Preload>,
}

static GLOBAL: Lazy<Result<Arc<HostRuntime>, ModuleError>> =
    Lazy::new(|| HostRuntime::builder(RuntimeProfile::Modular).build());

impl HostRuntime {
    pub fn builder(profile: RuntimeProfile) -> HostRuntimeBuilder {
        HostRuntimeBuilder {
            profile,
            module_path: Vec::new(),
            entry_points: EntryPointRegistry::new(),
            preloads: Vec::new(),
        }
    }

    /// Process-wide modular runtime with no application modules.
    /// The first call builds it; a build failure is returned to every caller.
    pub fn global() -> Result<Arc<HostRuntime>, &'static ModuleError> {
        GLOBAL.as_ref().map(Arc::clone)
    }

    pub fn profile(&self) -> RuntimeProfile {
        self.profile
    }

    pub fn verification_results(&self) -> &Slot<VerificationResults> {
        &self.verification_results
    }

    pub fn legacy_verification_results(&self) -> &Slot<LegacyVerificationResults> {
        &self.legacy_verification_results
    }

    pub fn code_base_cache(&self) -> &Slot<CodeBaseCache> {
        &self.code_base_cache
    }

    pub fn verifying_providers(&self) -> &Slot<VerifyingProviders> {
        &self.verifying_providers
    }

    pub fn url_handlers(&self) -> &Slot<UrlHandlers> {
        &self.url_handlers
    }

    pub fn subclass_audits(&self) -> &Slot<SubclassAudits> {
        &self.subclass_audits
    }

    pub fn known_level_list(&self) -> &Slot<dyn KnownLevels> {
        &self.known_level_list
    }

    pub fn known_level_maps(&self) -> &Slot<dyn KnownLevels> {
        &self.known_level_maps
    }

    /// Whichever level registry this profile has.
    pub fn known_levels(&self) -> Option<Arc<dyn KnownLevels>> {
        self.known_level_list.get().or_else(|| self.known_level_maps.get())
    }

    pub fn proxy_selector(&self) -> &Slot<dyn ProxySelector> {
        &self.proxy_selector
    }

    /// The host's own shutdown hook registry.
    pub fn shutdown_hooks(&self) -> &Arc<ShutdownHooks> {
        &self.shutdown_hooks
    }

    /// Hook registry applications should use: the native one once
    /// installed, the host's otherwise.
    pub fn active_shutdown_hooks(&self) -> Arc<ShutdownHooks> {
        match self.native_shutdown.lock().as_ref() {
            Some(native) => native.hooks().clone(),
            None => self.shutdown_hooks.clone(),
        }
    }

    pub fn shutdown_hook_fns(&self) -> (AddHookFn, RemoveHookFn) {
        let hooks = self.active_shutdown_hooks();
        (hooks.add_fn(), hooks.remove_fn())
    }

    pub fn install_native_shutdown(&self, hook: NativeShutdownHook) {
        *self.native_shutdown.lock() = Some(hook);
    }

    pub fn has_native_shutdown(&self) -> bool {
        self.native_shutdown.lock().is_some()
    }

    /// Keep `library` loaded for the life of the runtime.
    pub fn retain_library(&self, library: NativeLibrary) {
        debug!(path = %library.path().display(), "retaining native library");
        self.native_libraries.lock().push(library);
    }

    pub fn native_library_count(&self) -> usize {
        self.native_libraries.lock().len()
    }

    /// Run every registered hook, native and host.
    pub fn shutdown(&self) {
        let native = self.native_shutdown.lock().as_ref().map(|n| n.hooks().clone());
        if let Some(hooks) = native {
            hooks.run();
        }
        self.shutdown_hooks.run();
    }

    pub fn graph(&self) -> &Arc<ModuleGraph> {
        &self.graph
    }

    pub fn boot_layer(&self) -> &Arc<ModuleLayer> {
        &self.boot_layer
    }

    pub fn app_loader(&self) -> &Arc<ModuleClassLoader> {
        &self.app_loader
    }

    pub fn entry_points(&self) -> &EntryPointRegistry {
        &self.entry_points
    }

    pub fn preloads(&self) -> &[Preload] {
        &self.preloads
    }
}

impl fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRuntime")
            .field("profile", &self.profile)
            .field("boot_modules", &self.boot_layer.module_names().collect::<Vec<_>>())
            .field("preloads", &self.preloads.len())
            .finish_non_exhaustive()
    }
}

pub struct HostRuntimeBuilder {
    profile: RuntimeProfile,
    module_path: Vec<PathBuf>,
    entry_points: EntryPointRegistry,
    preloads: Vec<Preload>,
}

impl HostRuntimeBuilder {
    /// Add an application archive. Modular runtimes treat it as a named
    /// module; legacy ones put it on the class path.
    pub fn module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_path.push(path.into());
        self
    }

    pub fn enhanced_entry_point<F>(self, class: impl Into<String>, f: F) -> Self
    where
        F: Fn(EnhancedContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entry_points.register_enhanced(class, f);
        self
    }

    pub fn entry_point<F>(self, class: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<String>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entry_points.register_main(class, f);
        self
    }

    pub fn preload<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.preloads.push(Preload {
            name: name.into(),
            action: Arc::new(f),
        });
        self
    }

    pub fn build(self) -> Result<Arc<HostRuntime>, ModuleError> {
        let profile = self.profile;
        let graph = Arc::new(ModuleGraph::new());
        let root = ModuleLayer::empty(graph.clone());
        let archives = self
            .module_path
            .iter()
            .map(Archive::open)
            .collect::<Result<Vec<_>, _>>()?;

        let mut boot = ModuleDescriptor::new(crate::module::bootstrap::BOOT_MODULE);
        boot.requires.push(BASE_MODULE.to_string());
        let builtins = vec![ModuleDescriptor::new(BASE_MODULE), boot];

        let (configuration, app_loader) = match profile {
            RuntimeProfile::Modular => {
                let names: Vec<String> = archives
                    .iter()
                    .map(|a| a.module_descriptor().map(|d| d.name))
                    .collect::<Result<_, _>>()?;
                let roots: Vec<&str> = names.iter().map(String::as_str).collect();
                let cfg = Configuration::resolve_with_builtins(Some(&root), builtins, archives, &roots)?;
                let loader = ModuleClassLoader::for_configuration("app", &cfg, None);
                (cfg, loader)
            }
            RuntimeProfile::Legacy => {
                let cfg = Configuration::resolve_with_builtins(Some(&root), builtins, Vec::new(), &[])?;
                (cfg, ModuleClassLoader::classpath("app", archives, None))
            }
        };
        let app_loader = Arc::new(app_loader);
        let boot_layer = ModuleLayer::define(&configuration, &root, app_loader.clone())?
            .layer()
            .clone();

        let modular = profile == RuntimeProfile::Modular;
        let runtime = HostRuntime {
            profile,
            verification_results: if modular {
                Slot::new(
                    "verification_results",
                    Arc::new(StrongTable::<IdentityKey<Provider>, Verification>::new()),
                )
            } else {
                Slot::absent("verification_results")
            },
            legacy_verification_results: if modular {
                Slot::absent("legacy_verification_results")
            } else {
                Slot::new(
                    "legacy_verification_results",
                    Arc::new(StrongIdentityTable::<Provider, Verification>::new()),
                )
            },
            code_base_cache: Slot::new(
                "code_base_cache",
                Arc::new(StrongTable::<String, Arc<CodeBase>>::new()),
            ),
            verifying_providers: Slot::new(
                "verifying_providers",
                Arc::new(StrongIdentityTable::<Provider, bool>::new()),
            ),
            url_handlers: Slot::new(
                "url_handlers",
                Arc::new(StrongTable::<String, Arc<dyn UrlStreamHandler>>::new()),
            ),
            subclass_audits: Slot::new(
                "subclass_audits",
                Arc::new(StrongIdentityTable::<ClassHandle, bool>::new()),
            ),
            known_level_list: if modular {
                Slot::absent("known_level_list")
            } else {
                Slot::new("known_level_list", Arc::new(StrongLevelList::with_standard()))
            },
            known_level_maps: if modular {
                Slot::new("known_level_maps", Arc::new(StrongLevelMaps::with_standard()))
            } else {
                Slot::absent("known_level_maps")
            },
            proxy_selector: Slot::new("proxy_selector", Arc::new(DefaultProxySelector)),
            shutdown_hooks: Arc::new(ShutdownHooks::new()),
            native_shutdown: Mutex::new(None),
            native_libraries: Mutex::new(Vec::new()),
            graph,
            boot_layer,
            app_loader,
            entry_points: self.entry_points,
            preloads: self.preloads,
        };
        debug!(?profile, "host runtime built");
        Ok(Arc::new(runtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;

    /// Invariant: each profile has exactly one verification slot and one
    /// level registry.
    #[test]
    fn profile_decides_present_slots() {
        let legacy = HostRuntime::builder(RuntimeProfile::Legacy).build().unwrap();
        assert!(legacy.legacy_verification_results().is_present());
        assert!(!legacy.verification_results().is_present());
        assert!(legacy.known_level_list().is_present());
        assert!(!legacy.known_level_maps().is_present());

        let modular = HostRuntime::builder(RuntimeProfile::Modular).build().unwrap();
        assert!(modular.verification_results().is_present());
        assert!(!modular.legacy_verification_results().is_present());
        assert!(modular.known_level_maps().is_present());
        assert_eq!(modular.known_levels().unwrap().len(), 9);
    }

    #[test]
    fn replacing_an_absent_slot_fails() {
        let rt = HostRuntime::builder(RuntimeProfile::Modular).build().unwrap();
        let err = rt
            .known_level_list()
            .replace(Arc::new(StrongLevelList::new()))
            .err()
            .expect("modular runtimes have no level list");
        assert_eq!(err, SlotError::Absent("known_level_list"));
        assert_eq!(rt.known_level_list().require().err(), Some(err));
    }

    #[test]
    fn replace_returns_previous_value() {
        let rt = HostRuntime::builder(RuntimeProfile::Legacy).build().unwrap();
        let old = rt
            .known_level_list()
            .replace(Arc::new(StrongLevelList::new()))
            .unwrap();
        assert_eq!(old.len(), 9);
        assert_eq!(rt.known_levels().unwrap().len(), 0);
        rt.known_levels().unwrap().register(&Level::off());
        assert_eq!(rt.known_level_list().require().unwrap().len(), 1);
    }

    /// Invariant: the default caches hold their keys strongly.
    #[test]
    fn default_caches_are_strong() {
        let rt = HostRuntime::builder(RuntimeProfile::Legacy).build().unwrap();
        let table = rt.verifying_providers().require().unwrap();
        table.put(Arc::new(Provider::new("p", "1", "")), true);
        assert_eq!(table.len(), 1);
        let codebases = rt.code_base_cache().require().unwrap();
        codebases.put("file:/a".into(), CodeBase::new("file:/a"));
        assert_eq!(codebases.len(), 1);
    }

    #[test]
    fn boot_layer_carries_builtins() {
        let rt = HostRuntime::global().unwrap();
        assert!(rt.boot_layer().find_module(BASE_MODULE).is_some());
        assert!(rt.graph().reads(crate::module::bootstrap::BOOT_MODULE, BASE_MODULE));
        assert!(Arc::ptr_eq(&rt, &HostRuntime::global().unwrap()));
    }

    #[test]
    fn shutdown_fns_route_to_host_registry() {
        let rt = HostRuntime::builder(RuntimeProfile::Legacy).build().unwrap();
        let (add, _remove) = rt.shutdown_hook_fns();
        add(crate::shutdown::ShutdownHook::new("h", || {})).unwrap();
        assert_eq!(rt.shutdown_hooks().len(), 1);
        assert!(!rt.has_native_shutdown());
        rt.shutdown();
        assert!(rt.shutdown_hooks().is_shutting_down());
    }
}
