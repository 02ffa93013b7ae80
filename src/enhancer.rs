//! The boot sequence.
//!
//! 1. Parse `[baseDirectory, propertiesFile, mainModule[/mainClass], args...]`.
//! 2. Load the properties file. Failing to read it is fatal.
//! 3. Start the boot worker and run the host's preloads on it.
//! 4. With `runtime.jar` set: build the runtime loader on the worker, patch
//!    the host's caches, install the system proxy selector and, on Windows,
//!    the native shutdown hook. The runtime loader becomes the only
//!    privileged loader. Without it nothing is patched.
//! 5. Stop and join the worker.
//! 6. Locate the main class and grant the boot module a read edge to it.
//! 7. Invoke its entry point.

use crate::config::{BootArgs, EnhancerProperties, Os, Platform};
use crate::entry::{CoreContext, EnhancedContext, EntryKind};
use crate::error::{BootError, ModuleError};
use crate::host::{HostRuntime, RuntimeProfile};
use crate::module::bootstrap::parse_locations;
use crate::module::{find_main, launch_entry_point, Archive, ModuleClassLoader, ModuleLayerBootstrapper};
use crate::native::NativeLibrary;
use crate::patch::{apply_patches, PatchReport, SUPPORT_PACKAGE};
use crate::proxy::SystemProxySelector;
use crate::shutdown::NativeShutdownHook;
use crate::worker::Worker;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Serializes proxy selector installation across runtimes.
static SELECTOR_LOCK: Mutex<()> = parking_lot::const_mutex(());

const WORKER_NAME: &str = "weaklayer-boot";

#[derive(Debug)]
pub struct BootOutcome {
    pub entry: EntryKind,
    pub patches: PatchReport,
    pub privileged_loaders: Vec<Arc<ModuleClassLoader>>,
}

#[derive(Debug)]
pub struct Enhancer {
    runtime: Arc<HostRuntime>,
    platform: Platform,
}

impl Enhancer {
    pub fn new(runtime: Arc<HostRuntime>) -> Self {
        Self {
            runtime,
            platform: Platform::current(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn runtime(&self) -> &Arc<HostRuntime> {
        &self.runtime
    }

    pub fn boot<I, S>(&self, args: I) -> Result<BootOutcome, BootError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = BootArgs::parse(args)?;
        debug!(base_dir = %args.base_dir.display(), main = %args.main.raw(), "booting");

        let properties = match args.properties_path() {
            Some(path) => EnhancerProperties::load(&path)
                .map_err(|source| BootError::Properties { path, source })?,
            None => EnhancerProperties::empty(),
        };

        let worker = Worker::spawn(WORKER_NAME)?;
        self.run_preloads(&worker);

        let mut patches = PatchReport::default();
        let mut privileged_loaders = Vec::new();
        let mut bootstrapper = None;
        if let Some(paths) = properties.runtime_path() {
            let locations = parse_locations(&args.base_dir, paths);
            let loader = match self.runtime.profile() {
                RuntimeProfile::Modular => {
                    let boot_layer = self.runtime.boot_layer().clone();
                    let parent = Some(self.runtime.app_loader().clone());
                    let b = worker.run(move || {
                        let mut b = ModuleLayerBootstrapper::new(boot_layer, parent, locations);
                        b.resolve()?;
                        b.define()?;
                        Ok::<_, ModuleError>(b)
                    })??;
                    let loader = b.loader().cloned().ok_or(ModuleError::InvalidState {
                        expected: "defined",
                        actual: b.state().as_str(),
                    })?;
                    bootstrapper = Some(b);
                    loader
                }
                RuntimeProfile::Legacy => {
                    let parent = Some(self.runtime.app_loader().clone());
                    worker.run(move || {
                        let archives = locations
                            .iter()
                            .map(Archive::open)
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok::<_, ModuleError>(Arc::new(ModuleClassLoader::classpath(
                            "runtime", archives, parent,
                        )))
                    })??
                }
            };

            patches = apply_patches(&self.runtime, &loader);
            if self.install_proxy_selector(&loader, &properties, &args.base_dir) {
                patches.applied.push("proxy_selector");
            } else {
                patches.skipped.push("proxy_selector");
            }
            if self.platform.is_windows() {
                self.install_native_shutdown(&properties, &args.base_dir);
            }
            privileged_loaders.push(loader);
        } else {
            debug!("no runtime path; host caches left as they are");
        }

        worker.interrupt();
        worker.join();

        let (add_shutdown_hook, remove_shutdown_hook) = self.runtime.shutdown_hook_fns();
        let context = EnhancedContext {
            core: CoreContext {
                runtime: self.runtime.clone(),
                base_dir: args.base_dir.clone(),
            },
            add_shutdown_hook,
            remove_shutdown_hook,
            privileged_loaders: privileged_loaders.clone(),
            controller: bootstrapper.as_ref().and_then(|b| b.controller().cloned()),
            args: args.args.clone(),
        };

        let entries = self.runtime.entry_points();
        let entry = match (self.runtime.profile(), bootstrapper.as_mut()) {
            (RuntimeProfile::Modular, Some(b)) => b.launch(&args.main, entries, context)?,
            (RuntimeProfile::Modular, None) => {
                let target = find_main(self.runtime.boot_layer(), &args.main)?;
                launch_entry_point(self.runtime.graph(), &target, entries, context)?
            }
            (RuntimeProfile::Legacy, _) => {
                let class = self.runtime.app_loader().load_class(&args.main.raw())?;
                entries.invoke(&class.name, context)?
            }
        };

        Ok(BootOutcome {
            entry,
            patches,
            privileged_loaders,
        })
    }

    fn run_preloads(&self, worker: &Worker) {
        for preload in self.runtime.preloads() {
            let action = preload.action.clone();
            match worker.run(move || action()) {
                Ok(Ok(())) => debug!(preload = %preload.name, "preloaded"),
                Ok(Err(error)) => trace!(preload = %preload.name, %error, "preload failed"),
                Err(error) => trace!(preload = %preload.name, %error, "preload failed"),
            }
        }
    }

    fn install_proxy_selector(
        &self,
        loader: &ModuleClassLoader,
        properties: &EnhancerProperties,
        base_dir: &Path,
    ) -> bool {
        let _guard = SELECTOR_LOCK.lock();
        debug!("Replacing proxy_selector");
        if let Err(error) = loader.load_class(&format!("{SUPPORT_PACKAGE}.SystemProxySelector")) {
            warn!(%error, "cannot install system proxy selector");
            return false;
        }
        self.load_native_proxy(properties, base_dir);

        let slot = self.runtime.proxy_selector();
        let selector = Arc::new(SystemProxySelector::system());
        selector.set_next_handler(slot.get());
        match slot.replace(selector) {
            Ok(_) => true,
            Err(error) => {
                warn!(%error, "cannot install system proxy selector");
                false
            }
        }
    }

    fn load_native_proxy(&self, properties: &EnhancerProperties, base_dir: &Path) {
        let arch = &self.platform.arch;
        let path = match self.platform.os {
            Os::Windows => properties.proxy_util(arch),
            Os::MacOs => None,
            Os::Other => properties.proxy_gsettings(arch),
        };
        let Some(path) = path else {
            return;
        };
        match NativeLibrary::load(base_dir.join(path)) {
            Ok(library) => self.runtime.retain_library(library),
            Err(error) => warn!(%error, "cannot load native proxy library"),
        }
    }

    fn install_native_shutdown(&self, properties: &EnhancerProperties, base_dir: &Path) {
        let Some(path) = properties.shutdown_hook(&self.platform.arch) else {
            debug!(arch = %self.platform.arch, "no native shutdown hook configured");
            return;
        };
        match NativeShutdownHook::install(&base_dir.join(path)) {
            Ok(hook) => self.runtime.install_native_shutdown(hook),
            Err(error) => warn!(%error, "cannot install native shutdown hook"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_arguments_fail_before_anything_runs() {
        let rt = HostRuntime::builder(RuntimeProfile::Modular)
            .preload("never", || anyhow::bail!("must not run"))
            .build()
            .unwrap();
        let err = Enhancer::new(rt).boot(["base"]).unwrap_err();
        assert!(matches!(err, BootError::MissingArguments(1)));
    }

    #[test]
    fn unreadable_properties_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let rt = HostRuntime::builder(RuntimeProfile::Legacy).build().unwrap();
        let base = dir.path().to_string_lossy().into_owned();
        let err = Enhancer::new(rt)
            .boot([base.as_str(), "missing.properties", "app.Main"])
            .unwrap_err();
        assert!(matches!(err, BootError::Properties { .. }));
    }
}
