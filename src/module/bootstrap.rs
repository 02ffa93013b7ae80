//! Building the runtime layer and launching the application's main class.
//!
//! ```text
//!  Unresolved --resolve()--> Resolved --define()--> Defined --launch()--> Booted
//! ```
//!
//! `resolve` reads the runtime archives and resolves `weaklayer.runtime`
//! against the boot layer. `define` builds the runtime class loader and the
//! layer. `launch` finds the main class (the runtime layer first, then the
//! boot layer behind it), grants `weaklayer.boot` a read edge to its module
//! and invokes its entry point.

use super::descriptor::Archive;
use super::layer::{Configuration, Controller, Module, ModuleLayer};
use super::loader::{LoadedClass, ModuleClassLoader};
use super::graph::ModuleGraph;
use crate::config::MainSpec;
use crate::entry::{EnhancedContext, EntryKind, EntryPointRegistry};
use crate::error::{BootError, ModuleError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Root module of the runtime layer.
pub const RUNTIME_MODULE: &str = "weaklayer.runtime";
/// Builtin module that launches application code.
pub const BOOT_MODULE: &str = "weaklayer.boot";

#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Unresolved,
    Resolved,
    Defined,
    Booted,
}

impl BootstrapState {
    pub fn as_str(self) -> &'static str {
        match self {
            BootstrapState::Unresolved => "unresolved",
            BootstrapState::Resolved => "resolved",
            BootstrapState::Defined => "defined",
            BootstrapState::Booted => "booted",
        }
    }
}

/// Split a path list on the platform separator. Empty items are skipped and
/// relative items are taken relative to `base`.
pub fn parse_locations(base: &Path, paths: &str) -> Vec<PathBuf> {
    paths
        .split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let p = Path::new(p);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct ModuleLayerBootstrapper {
    state: BootstrapState,
    boot_layer: Arc<ModuleLayer>,
    parent_loader: Option<Arc<ModuleClassLoader>>,
    locations: Vec<PathBuf>,
    configuration: Option<Configuration>,
    loader: Option<Arc<ModuleClassLoader>>,
    controller: Option<Controller>,
}

impl ModuleLayerBootstrapper {
    pub fn new(
        boot_layer: Arc<ModuleLayer>,
        parent_loader: Option<Arc<ModuleClassLoader>>,
        locations: Vec<PathBuf>,
    ) -> Self {
        Self {
            state: BootstrapState::Unresolved,
            boot_layer,
            parent_loader,
            locations,
            configuration: None,
            loader: None,
            controller: None,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    fn expect_state(&self, expected: BootstrapState) -> Result<(), ModuleError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ModuleError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    pub fn resolve(&mut self) -> Result<&Configuration, ModuleError> {
        self.expect_state(BootstrapState::Unresolved)?;
        let archives = self
            .locations
            .iter()
            .map(Archive::open)
            .collect::<Result<Vec<_>, _>>()?;
        let configuration = Configuration::resolve(Some(&self.boot_layer), archives, &[RUNTIME_MODULE])?;
        debug!(
            locations = self.locations.len(),
            modules = configuration.modules().len(),
            "runtime configuration resolved"
        );
        self.state = BootstrapState::Resolved;
        Ok(self.configuration.insert(configuration))
    }

    pub fn define(&mut self) -> Result<Controller, ModuleError> {
        self.expect_state(BootstrapState::Resolved)?;
        let configuration = self.configuration.as_ref().ok_or(ModuleError::InvalidState {
            expected: BootstrapState::Resolved.as_str(),
            actual: self.state.as_str(),
        })?;
        let loader = Arc::new(ModuleClassLoader::for_configuration(
            "runtime",
            configuration,
            self.parent_loader.clone(),
        ));
        let controller = ModuleLayer::define(configuration, &self.boot_layer, loader.clone())?;
        debug!("runtime layer defined");
        self.loader = Some(loader);
        self.controller = Some(controller.clone());
        self.state = BootstrapState::Defined;
        Ok(controller)
    }

    pub fn controller(&self) -> Option<&Controller> {
        self.controller.as_ref()
    }

    pub fn loader(&self) -> Option<&Arc<ModuleClassLoader>> {
        self.loader.as_ref()
    }

    /// Find `main` from the runtime layer and run its entry point.
    pub fn launch(
        &mut self,
        main: &MainSpec,
        entries: &EntryPointRegistry,
        context: EnhancedContext,
    ) -> Result<EntryKind, BootError> {
        self.expect_state(BootstrapState::Defined)?;
        let layer = match &self.controller {
            Some(c) => c.layer().clone(),
            None => self.boot_layer.clone(),
        };
        let target = find_main(&layer, main)?;
        self.state = BootstrapState::Booted;
        launch_entry_point(layer.graph(), &target, entries, context)
    }
}

/// The module and class named by a `module[/class]` argument.
#[derive(Debug, Clone)]
pub struct MainTarget {
    pub module: Arc<Module>,
    pub class: LoadedClass,
}

pub fn find_main(layer: &ModuleLayer, main: &MainSpec) -> Result<MainTarget, BootError> {
    let module = layer
        .find_module(&main.module)
        .ok_or_else(|| BootError::ModuleNotFound(main.module.clone()))?;
    let class = main
        .class
        .clone()
        .or_else(|| module.descriptor().main_class.clone())
        .ok_or_else(|| BootError::NoMainClass(main.module.clone()))?;
    let class = module.loader().load_class(&class)?;
    debug!(module = module.name(), class = %class.name, "main class found");
    Ok(MainTarget { module, class })
}

/// Grant `weaklayer.boot` a read edge to the main module, then invoke the
/// main class's entry point.
pub fn launch_entry_point(
    graph: &ModuleGraph,
    target: &MainTarget,
    entries: &EntryPointRegistry,
    context: EnhancedContext,
) -> Result<EntryKind, BootError> {
    let module = target.module.name();
    graph.add_reads(BOOT_MODULE, module);
    if !graph.reads(BOOT_MODULE, module) {
        return Err(ModuleError::Inaccessible {
            module: BOOT_MODULE.to_string(),
            target: module.to_string(),
        }
        .into());
    }
    entries.invoke(&target.class.name, context)
}
