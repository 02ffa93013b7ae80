//! Module descriptors and the archives that carry them.
//!
//! An archive is a directory. If it holds a `module-info.toml` at its root
//! it is an explicit module; otherwise, on a module path, it is an automatic
//! module named after the directory. Its packages are whatever directories
//! contain `.class` files. Class `a.b.C` exists iff the archive has `a/b/C.class`.

use crate::error::ModuleError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DESCRIPTOR_FILE: &str = "module-info.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModuleDescriptor {
    pub name: String,
    pub requires: Vec<String>,
    pub exports: Vec<String>,
    pub opens: Vec<String>,
    #[serde(rename = "main-class")]
    pub main_class: Option<String>,
    /// Derived from an archive without a descriptor: exports and opens every
    /// package and reads every module.
    #[serde(skip)]
    pub automatic: bool,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ModuleError> {
        toml::from_str(text).map_err(|source| ModuleError::Descriptor {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Archive {
    path: PathBuf,
    descriptor: Option<ModuleDescriptor>,
    resources: BTreeSet<String>,
}

impl Archive {
    /// Scan the directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ModuleError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source: io::Error| ModuleError::Io {
            path: path.clone(),
            source,
        };

        let descriptor_path = path.join(DESCRIPTOR_FILE);
        let descriptor = if descriptor_path.is_file() {
            let text = fs::read_to_string(&descriptor_path).map_err(io_err)?;
            Some(ModuleDescriptor::parse(&text, &descriptor_path)?)
        } else {
            None
        };

        let mut resources = BTreeSet::new();
        for entry in WalkDir::new(&path).min_depth(1) {
            let entry = entry.map_err(|e| io_err(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&path) else {
                continue;
            };
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if name != DESCRIPTOR_FILE {
                resources.insert(name);
            }
        }

        Ok(Self {
            path,
            descriptor,
            resources,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptor(&self) -> Option<&ModuleDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.descriptor.as_ref().map(|d| d.name.as_str())
    }

    /// The explicit descriptor, or an automatic one named after the
    /// directory. Fails when the directory name yields no module name.
    pub fn module_descriptor(&self) -> Result<ModuleDescriptor, ModuleError> {
        if let Some(d) = &self.descriptor {
            return Ok(d.clone());
        }
        let name = self
            .path
            .file_name()
            .and_then(|n| automatic_name(&n.to_string_lossy()))
            .ok_or_else(|| ModuleError::MissingDescriptor(self.path.clone()))?;
        let packages: Vec<String> = self.packages().into_iter().collect();
        Ok(ModuleDescriptor {
            name,
            exports: packages.clone(),
            opens: packages,
            automatic: true,
            ..ModuleDescriptor::default()
        })
    }

    /// Packages holding at least one class, in dotted form.
    pub fn packages(&self) -> BTreeSet<String> {
        self.resources
            .iter()
            .filter(|r| r.ends_with(".class"))
            .filter_map(|r| r.rsplit_once('/').map(|(dir, _)| dir.replace('/', ".")))
            .collect()
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.resources.contains(resource)
    }

    pub fn resource_path(&self, resource: &str) -> Option<PathBuf> {
        self.contains(resource).then(|| self.path.join(resource))
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(String::as_str)
    }
}

/// Module name for a directory without a descriptor: a trailing
/// `-<digit>...` version is dropped, every run of other characters than
/// letters and digits becomes one dot, and outer dots are trimmed.
/// `commons-io-2.11` -> `commons.io`.
pub fn automatic_name(file_name: &str) -> Option<String> {
    let bytes = file_name.as_bytes();
    let stem = (0..bytes.len())
        .find(|&i| bytes[i] == b'-' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
        .map(|i| &file_name[..i])
        .unwrap_or(file_name);
    let mut name = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_alphanumeric() {
            name.push(c);
        } else if !name.is_empty() && !name.ends_with('.') {
            name.push('.');
        }
    }
    let name = name.trim_end_matches('.');
    (!name.is_empty()).then(|| name.to_string())
}

/// `a.b.C` -> `a/b/C.class`
pub fn class_resource(class: &str) -> String {
    format!("{}.class", class.replace('.', "/"))
}

/// Dotted package of a resource path; `None` for the unnamed package.
pub fn package_of(resource: &str) -> Option<String> {
    resource
        .rsplit_once('/')
        .map(|(dir, _)| dir.replace('/', "."))
}
