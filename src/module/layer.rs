//! Resolution of module archives into configurations, and layers of
//! defined modules.

use super::descriptor::{Archive, ModuleDescriptor};
use super::graph::ModuleGraph;
use super::loader::ModuleClassLoader;
use crate::error::ModuleError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

const ROOTS: &str = "configuration roots";

#[derive(Debug, Clone)]
pub struct ResolvedModule {
    pub descriptor: ModuleDescriptor,
    /// `None` for modules built into the host.
    pub archive: Option<Archive>,
}

impl ResolvedModule {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn packages(&self) -> BTreeSet<String> {
        self.archive
            .as_ref()
            .map(Archive::packages)
            .unwrap_or_default()
    }
}

/// The outcome of resolution: the modules a new layer will define, in
/// resolution order.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    modules: Vec<ResolvedModule>,
}

impl Configuration {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve `roots` and everything they transitively require.
    ///
    /// Names are looked up in `parent` (and its ancestors) first, then in
    /// `archives`. Archives that nothing reaches are ignored.
    pub fn resolve(
        parent: Option<&ModuleLayer>,
        archives: Vec<Archive>,
        roots: &[&str],
    ) -> Result<Self, ModuleError> {
        Self::resolve_with_builtins(parent, Vec::new(), archives, roots)
    }

    /// Like `resolve`, with host-provided modules that have no archive.
    /// Builtins are always part of the result.
    pub fn resolve_with_builtins(
        parent: Option<&ModuleLayer>,
        builtins: Vec<ModuleDescriptor>,
        archives: Vec<Archive>,
        roots: &[&str],
    ) -> Result<Self, ModuleError> {
        let mut candidates: BTreeMap<String, ResolvedModule> = BTreeMap::new();
        for descriptor in builtins {
            let name = descriptor.name.clone();
            let module = ResolvedModule {
                descriptor,
                archive: None,
            };
            if candidates.insert(name.clone(), module).is_some() {
                return Err(ModuleError::Duplicate(name));
            }
        }
        let builtin_names: Vec<String> = candidates.keys().cloned().collect();
        for archive in archives {
            let descriptor = archive.module_descriptor()?;
            let name = descriptor.name.clone();
            let module = ResolvedModule {
                descriptor,
                archive: Some(archive),
            };
            if candidates.insert(name.clone(), module).is_some() {
                return Err(ModuleError::Duplicate(name));
            }
        }

        let mut queue: VecDeque<(String, String)> = builtin_names
            .into_iter()
            .chain(roots.iter().map(|r| r.to_string()))
            .map(|r| (r, ROOTS.to_string()))
            .collect();
        let mut seen = BTreeSet::new();
        let mut modules = Vec::new();

        while let Some((name, required_by)) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let in_parent = parent.map(|p| p.find_module(&name).is_some()).unwrap_or(false);
            match (in_parent, candidates.remove(&name)) {
                (true, Some(_)) => return Err(ModuleError::AlreadyDefined(name)),
                (true, None) => {}
                (false, Some(module)) => {
                    for req in &module.descriptor.requires {
                        queue.push_back((req.clone(), name.clone()));
                    }
                    modules.push(module);
                }
                (false, None) => return Err(ModuleError::NotFound { name, required_by }),
            }
        }

        debug!(modules = modules.len(), "resolved configuration");
        Ok(Self { modules })
    }

    pub fn modules(&self) -> &[ResolvedModule] {
        &self.modules
    }

    pub fn find(&self, name: &str) -> Option<&ResolvedModule> {
        self.modules.iter().find(|m| m.name() == name)
    }
}

/// A named module defined in a layer.
#[derive(Debug)]
pub struct Module {
    name: String,
    descriptor: ModuleDescriptor,
    packages: BTreeSet<String>,
    loader: Arc<ModuleClassLoader>,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn packages(&self) -> &BTreeSet<String> {
        &self.packages
    }

    pub fn loader(&self) -> &Arc<ModuleClassLoader> {
        &self.loader
    }
}

#[derive(Debug)]
pub struct ModuleLayer {
    parent: Option<Arc<ModuleLayer>>,
    modules: BTreeMap<String, Arc<Module>>,
    graph: Arc<ModuleGraph>,
}

impl ModuleLayer {
    /// A layer with no modules, used as the root of a hierarchy.
    pub fn empty(graph: Arc<ModuleGraph>) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            modules: BTreeMap::new(),
            graph,
        })
    }

    /// Define every module of `configuration` in a new layer, all mapped
    /// to `loader`, and record their edges in the parent's graph. On failure
    /// the graph is left as it was.
    pub fn define(
        configuration: &Configuration,
        parent: &Arc<ModuleLayer>,
        loader: Arc<ModuleClassLoader>,
    ) -> Result<Controller, ModuleError> {
        let graph = parent.graph.clone();
        let mut modules: BTreeMap<String, Arc<Module>> = BTreeMap::new();
        for resolved in configuration.modules() {
            let name = resolved.name().to_string();
            if parent.find_module(&name).is_some() || !graph.add_module(&name) {
                for added in modules.keys() {
                    graph.remove_module(added);
                }
                return Err(ModuleError::AlreadyDefined(name));
            }
            let module = Module {
                name: name.clone(),
                descriptor: resolved.descriptor.clone(),
                packages: resolved.packages(),
                loader: loader.clone(),
            };
            modules.insert(name, Arc::new(module));
        }
        for module in modules.values() {
            let d = &module.descriptor;
            for req in &d.requires {
                graph.add_reads(&d.name, req);
            }
            for pkg in &d.exports {
                graph.add_exports(&d.name, pkg, None);
            }
            for pkg in &d.opens {
                graph.add_opens(&d.name, pkg, None);
            }
            if d.automatic {
                let visible = modules.keys().cloned().chain(parent.visible_module_names());
                for other in visible.filter(|n| *n != d.name) {
                    graph.add_reads(&d.name, &other);
                }
            }
        }
        debug!(modules = modules.len(), "defined module layer");
        Ok(Controller {
            layer: Arc::new(Self {
                parent: Some(parent.clone()),
                modules,
                graph,
            }),
        })
    }

    /// Search this layer, then its ancestors.
    pub fn find_module(&self, name: &str) -> Option<Arc<Module>> {
        let mut layer = Some(self);
        while let Some(l) = layer {
            if let Some(m) = l.modules.get(name) {
                return Some(m.clone());
            }
            layer = l.parent.as_deref();
        }
        None
    }

    pub fn parent(&self) -> Option<&Arc<ModuleLayer>> {
        self.parent.as_ref()
    }

    pub fn graph(&self) -> &Arc<ModuleGraph> {
        &self.graph
    }

    /// Names of the modules of this layer and its ancestors.
    pub fn visible_module_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut layer = Some(self);
        while let Some(l) = layer {
            names.extend(l.modules.keys().cloned());
            layer = l.parent.as_deref();
        }
        names
    }

    /// Names of the modules defined in this layer only.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

/// Run-time grants on a layer's modules.
#[derive(Debug, Clone)]
pub struct Controller {
    layer: Arc<ModuleLayer>,
}

impl Controller {
    pub fn layer(&self) -> &Arc<ModuleLayer> {
        &self.layer
    }

    /// Make `source` read `target`. `target` must be visible from this
    /// layer; `source` may live in any layer sharing the graph.
    pub fn add_reads(&self, source: &str, target: &str) -> Result<(), ModuleError> {
        self.require_visible(target)?;
        self.layer.graph.add_reads(source, target);
        Ok(())
    }

    /// Export `package` of a module of this layer to `to`.
    pub fn add_exports(&self, module: &str, package: &str, to: &str) -> Result<(), ModuleError> {
        self.require_own(module)?;
        self.layer.graph.add_exports(module, package, Some(to));
        Ok(())
    }

    pub fn add_opens(&self, module: &str, package: &str, to: &str) -> Result<(), ModuleError> {
        self.require_own(module)?;
        self.layer.graph.add_opens(module, package, Some(to));
        Ok(())
    }

    fn require_visible(&self, name: &str) -> Result<(), ModuleError> {
        match self.layer.find_module(name) {
            Some(_) => Ok(()),
            None => Err(ModuleError::NotFound {
                name: name.to_string(),
                required_by: "controller".to_string(),
            }),
        }
    }

    fn require_own(&self, name: &str) -> Result<(), ModuleError> {
        if self.layer.modules.contains_key(name) {
            Ok(())
        } else {
            Err(ModuleError::NotFound {
                name: name.to_string(),
                required_by: "controller".to_string(),
            })
        }
    }
}
