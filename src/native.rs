//! Native libraries loaded by path.

use crate::error::NativeError;
use libloading::{Library, Symbol};
use std::fmt;
use std::path::{Path, PathBuf};

pub struct NativeLibrary {
    path: PathBuf,
    library: Library,
}

impl NativeLibrary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NativeError> {
        let path = path.as_ref().to_path_buf();
        // SAFETY: loading runs the library's initializers; the library files
        // named by the enhancer properties are trusted like the host itself.
        let library = unsafe { Library::new(&path) }.map_err(|source| NativeError::Load {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, library })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up `name`.
    ///
    /// # Safety
    /// `T` must match the symbol's real type.
    pub unsafe fn symbol<T>(&self, name: &str) -> Result<Symbol<'_, T>, NativeError> {
        self.library
            .get::<T>(name.as_bytes())
            .map_err(|source| NativeError::Symbol {
                path: self.path.clone(),
                symbol: name.to_string(),
                source,
            })
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary").field("path", &self.path).finish()
    }
}
