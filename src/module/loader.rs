//! Class loading over archives with package encapsulation.
//!
//! Lookups search this loader's archives first and then the parent. When
//! enforcement is on, a non-class resource inside a package its module
//! does not export is only found for callers from that same module. Class
//! files are always found; access to the class itself is a question for the
//! module graph.

use super::descriptor::{class_resource, package_of, Archive};
use super::layer::Configuration;
use crate::error::ModuleError;
use hashbrown::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedClass {
    pub name: String,
    /// Owning module, `None` for class-path archives.
    pub module: Option<String>,
    /// Name of the loader that found the class.
    pub loader: String,
}

#[derive(Debug)]
pub struct ModuleClassLoader {
    name: String,
    archives: Vec<Archive>,
    module_names: Vec<Option<String>>,
    module_by_package: HashMap<String, String>,
    encapsulated: HashSet<String>,
    parent: Option<Arc<ModuleClassLoader>>,
    enforce: bool,
}

impl ModuleClassLoader {
    /// A loader for every archive-backed module of `configuration`.
    pub fn for_configuration(
        name: impl Into<String>,
        configuration: &Configuration,
        parent: Option<Arc<ModuleClassLoader>>,
    ) -> Self {
        let mut archives = Vec::new();
        let mut module_names = Vec::new();
        let mut module_by_package = HashMap::new();
        let mut encapsulated = HashSet::new();
        for module in configuration.modules() {
            let Some(archive) = &module.archive else {
                continue;
            };
            let d = &module.descriptor;
            for pkg in archive.packages() {
                if !d.exports.contains(&pkg) {
                    encapsulated.insert(pkg.clone());
                }
                module_by_package.insert(pkg, d.name.clone());
            }
            archives.push(archive.clone());
            module_names.push(Some(d.name.clone()));
        }
        Self {
            name: name.into(),
            archives,
            module_names,
            module_by_package,
            encapsulated,
            parent,
            enforce: true,
        }
    }

    /// A loader over plain archives with no encapsulation.
    pub fn classpath(
        name: impl Into<String>,
        archives: Vec<Archive>,
        parent: Option<Arc<ModuleClassLoader>>,
    ) -> Self {
        let module_names = archives.iter().map(|_| None).collect();
        Self {
            name: name.into(),
            archives,
            module_names,
            module_by_package: HashMap::new(),
            encapsulated: HashSet::new(),
            parent,
            enforce: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ModuleClassLoader>> {
        self.parent.as_ref()
    }

    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    pub fn module_of_package(&self, package: &str) -> Option<&str> {
        self.module_by_package.get(package).map(String::as_str)
    }

    /// Locate `resource` on behalf of `caller` (a module name, or `None`
    /// for unnamed code).
    pub fn find_resource(&self, caller: Option<&str>, resource: &str) -> Option<PathBuf> {
        if self.visible(caller, resource) {
            if let Some(path) = self.archives.iter().find_map(|a| a.resource_path(resource)) {
                return Some(path);
            }
        }
        self.parent
            .as_ref()
            .and_then(|p| p.find_resource(caller, resource))
    }

    fn visible(&self, caller: Option<&str>, resource: &str) -> bool {
        if !self.enforce || resource.ends_with(".class") {
            return true;
        }
        let Some(pkg) = package_of(resource) else {
            return true;
        };
        if !self.encapsulated.contains(&pkg) {
            return true;
        }
        self.module_by_package.get(&pkg).map(String::as_str) == caller
    }

    pub fn load_class(&self, class: &str) -> Result<LoadedClass, ModuleError> {
        let resource = class_resource(class);
        let found = self
            .archives
            .iter()
            .position(|a| a.contains(&resource));
        match found {
            Some(i) => Ok(LoadedClass {
                name: class.to_string(),
                module: self.module_names[i].clone(),
                loader: self.name.clone(),
            }),
            None => match &self.parent {
                Some(p) => p.load_class(class),
                None => Err(ModuleError::ClassNotFound(class.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::DESCRIPTOR_FILE;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    fn lib_archive(root: &Path) -> Archive {
        let dir = root.join("lib");
        write(&dir, DESCRIPTOR_FILE, "name = \"lib\"\nexports = [\"lib.api\"]\n");
        write(&dir, "lib/api/Api.class", "");
        write(&dir, "lib/api/api.txt", "public");
        write(&dir, "lib/impl/Impl.class", "");
        write(&dir, "lib/impl/secret.txt", "hidden");
        Archive::open(&dir).unwrap()
    }

    /// Invariant: resources of non-exported packages are only visible to the
    /// owning module; class files and exported resources are visible to all.
    #[test]
    fn encapsulated_resources_need_owner() {
        let root = tempfile::tempdir().unwrap();
        let cfg = Configuration::resolve(None, vec![lib_archive(root.path())], &["lib"]).unwrap();
        let l = ModuleClassLoader::for_configuration("runtime", &cfg, None);

        assert!(l.find_resource(None, "lib/api/api.txt").is_some());
        assert!(l.find_resource(None, "lib/impl/secret.txt").is_none());
        assert!(l.find_resource(Some("app"), "lib/impl/secret.txt").is_none());
        assert!(l.find_resource(Some("lib"), "lib/impl/secret.txt").is_some());
        assert!(l.find_resource(None, "lib/impl/Impl.class").is_some());
        assert_eq!(l.module_of_package("lib.impl"), Some("lib"));
    }

    /// Invariant: classes resolve in this loader before the parent, and a
    /// miss in both is `ClassNotFound`.
    #[test]
    fn load_class_searches_self_then_parent() {
        let root = tempfile::tempdir().unwrap();
        let cfg = Configuration::resolve(None, vec![lib_archive(root.path())], &["lib"]).unwrap();
        let parent = Arc::new(ModuleClassLoader::for_configuration("runtime", &cfg, None));

        let app_dir = root.path().join("app");
        write(&app_dir, "app/Main.class", "");
        write(&app_dir, "lib/api/Api.class", "");
        let app = ModuleClassLoader::classpath("app", vec![Archive::open(&app_dir).unwrap()], Some(parent));

        let main = app.load_class("app.Main").unwrap();
        assert_eq!(main.loader, "app");
        assert_eq!(main.module, None);
        let shadowed = app.load_class("lib.api.Api").unwrap();
        assert_eq!(shadowed.loader, "app");
        let inherited = app.load_class("lib.impl.Impl").unwrap();
        assert_eq!(inherited.loader, "runtime");
        assert_eq!(inherited.module.as_deref(), Some("lib"));
        assert!(matches!(
            app.load_class("nope.Missing"),
            Err(ModuleError::ClassNotFound(_))
        ));
    }

    #[test]
    fn classpath_loader_does_not_enforce() {
        let root = tempfile::tempdir().unwrap();
        let l = ModuleClassLoader::classpath("cp", vec![lib_archive(root.path())], None);
        assert!(l.find_resource(None, "lib/impl/secret.txt").is_some());
    }
}
