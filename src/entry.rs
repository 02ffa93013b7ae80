//! Application entry points and the context handed to them.
//!
//! An application class may register an enhanced entry point, which gets
//! the full `EnhancedContext`, and a plain one, which only gets its
//! arguments. The enhanced one wins when both exist.

use crate::error::{BootError, ShutdownError};
use crate::host::HostRuntime;
use crate::module::{Controller, ModuleClassLoader};
use crate::shutdown::ShutdownHook;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct CoreContext {
    pub runtime: Arc<HostRuntime>,
    pub base_dir: PathBuf,
}

impl fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreContext")
            .field("profile", &self.runtime.profile())
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

pub type AddHookFn = Arc<dyn Fn(Arc<ShutdownHook>) -> Result<(), ShutdownError> + Send + Sync>;
pub type RemoveHookFn = Arc<dyn Fn(&Arc<ShutdownHook>) -> Result<bool, ShutdownError> + Send + Sync>;

pub struct EnhancedContext {
    pub core: CoreContext,
    pub add_shutdown_hook: AddHookFn,
    pub remove_shutdown_hook: RemoveHookFn,
    /// Loaders whose code the application may treat as trusted.
    pub privileged_loaders: Vec<Arc<ModuleClassLoader>>,
    pub controller: Option<Controller>,
    pub args: Vec<String>,
}

pub type EnhancedMain = Arc<dyn Fn(EnhancedContext) -> anyhow::Result<()> + Send + Sync>;
pub type PlainMain = Arc<dyn Fn(Vec<String>) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub enum EntryPoint {
    Enhanced(EnhancedMain),
    Plain(PlainMain),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Enhanced,
    Plain,
}

#[derive(Default, Clone)]
struct Registered {
    enhanced: Option<EnhancedMain>,
    plain: Option<PlainMain>,
}

/// Entry points by fully qualified class name.
#[derive(Default)]
pub struct EntryPointRegistry {
    entries: RwLock<HashMap<String, Registered>>,
}

impl EntryPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_enhanced<F>(&self, class: impl Into<String>, f: F)
    where
        F: Fn(EnhancedContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries.write().entry(class.into()).or_default().enhanced = Some(Arc::new(f));
    }

    pub fn register_main<F>(&self, class: impl Into<String>, f: F)
    where
        F: Fn(Vec<String>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries.write().entry(class.into()).or_default().plain = Some(Arc::new(f));
    }

    pub fn lookup(&self, class: &str) -> Option<EntryPoint> {
        let entries = self.entries.read();
        let r = entries.get(class)?;
        match (&r.enhanced, &r.plain) {
            (Some(e), _) => Some(EntryPoint::Enhanced(e.clone())),
            (None, Some(p)) => Some(EntryPoint::Plain(p.clone())),
            (None, None) => None,
        }
    }

    /// Run the entry point of `class`, enhanced if available.
    pub fn invoke(&self, class: &str, context: EnhancedContext) -> Result<EntryKind, BootError> {
        match self.lookup(class) {
            Some(EntryPoint::Enhanced(f)) => {
                debug!(class, "invoking enhanced entry point");
                f(context).map_err(BootError::Application)?;
                Ok(EntryKind::Enhanced)
            }
            Some(EntryPoint::Plain(f)) => {
                debug!(class, "invoking plain entry point");
                f(context.args).map_err(BootError::Application)?;
                Ok(EntryKind::Plain)
            }
            None => Err(BootError::NoEntryPoint(class.to_string())),
        }
    }
}
