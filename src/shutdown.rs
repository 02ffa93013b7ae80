//! Shutdown hooks.
//!
//! `ShutdownHooks` is an identity set of hooks that runs each hook on its
//! own thread exactly once. After `run` has started, the set is gone and
//! every further `add` or `remove` fails with `InProgress`.

use crate::entry::{AddHookFn, RemoveHookFn};
use crate::error::{NativeError, ShutdownError};
use crate::native::NativeLibrary;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

type Action = Box<dyn FnOnce() + Send>;

pub struct ShutdownHook {
    name: String,
    action: Mutex<Option<Action>>,
    running: AtomicBool,
}

impl ShutdownHook {
    pub fn new<F>(name: impl Into<String>, action: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            action: Mutex::new(Some(Box::new(action))),
            running: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the action if it has not run yet.
    pub fn run(&self) {
        let Some(action) = self.action.lock().take() else {
            return;
        };
        self.running.store(true, Ordering::Release);
        let _running = RunningFlag(&self.running);
        action();
    }
}

/// Clears `running` on the way out, panicking actions included.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Debug)]
pub struct ShutdownHooks {
    hooks: Mutex<Option<Vec<Arc<ShutdownHook>>>>,
}

impl Default for ShutdownHooks {
    fn default() -> Self {
        Self {
            hooks: Mutex::new(Some(Vec::new())),
        }
    }
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hook: Arc<ShutdownHook>) -> Result<(), ShutdownError> {
        let mut guard = self.hooks.lock();
        let hooks = guard.as_mut().ok_or(ShutdownError::InProgress)?;
        if hook.is_running() {
            return Err(ShutdownError::AlreadyRunning(hook.name.clone()));
        }
        if hooks.iter().any(|h| Arc::ptr_eq(h, &hook)) {
            return Err(ShutdownError::AlreadyRegistered(hook.name.clone()));
        }
        hooks.push(hook);
        Ok(())
    }

    pub fn remove(&self, hook: &Arc<ShutdownHook>) -> Result<bool, ShutdownError> {
        let mut guard = self.hooks.lock();
        let hooks = guard.as_mut().ok_or(ShutdownError::InProgress)?;
        let before = hooks.len();
        hooks.retain(|h| !Arc::ptr_eq(h, hook));
        Ok(hooks.len() != before)
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.hooks.lock().is_none()
    }

    /// Start every registered hook on its own thread and wait for all of
    /// them. Only the first call does anything.
    pub fn run(&self) {
        let Some(hooks) = self.hooks.lock().take() else {
            return;
        };
        debug!(hooks = hooks.len(), "running shutdown hooks");
        let mut threads = Vec::with_capacity(hooks.len());
        for hook in hooks {
            let h = hook.clone();
            match thread::Builder::new()
                .name(format!("shutdown-{}", hook.name))
                .spawn(move || h.run())
            {
                Ok(t) => threads.push(t),
                Err(e) => {
                    warn!(hook = %hook.name, error = %e, "cannot spawn shutdown thread; running inline");
                    hook.run();
                }
            }
        }
        for t in threads {
            if t.join().is_err() {
                warn!("shutdown hook panicked");
            }
        }
    }

    /// The registration function handed to applications.
    pub fn add_fn(self: &Arc<Self>) -> AddHookFn {
        let hooks = self.clone();
        Arc::new(move |hook: Arc<ShutdownHook>| hooks.add(hook))
    }

    pub fn remove_fn(self: &Arc<Self>) -> RemoveHookFn {
        let hooks = self.clone();
        Arc::new(move |hook: &Arc<ShutdownHook>| hooks.remove(hook))
    }
}

/// Symbol a native shutdown library exports. It receives the callback to
/// invoke when the operating system announces shutdown and returns 0 on
/// success.
pub const REGISTER_SYMBOL: &str = "weaklayer_register_shutdown";

type RegisterFn = unsafe extern "C" fn(extern "C" fn()) -> i32;

static NATIVE_HOOKS: RwLock<Option<Arc<ShutdownHooks>>> = parking_lot::const_rwlock(None);

extern "C" fn run_native_hooks() {
    let hooks = NATIVE_HOOKS.read().clone();
    if let Some(hooks) = hooks {
        hooks.run();
    }
}

/// Shutdown hooks driven by a native library instead of the host.
#[derive(Debug)]
pub struct NativeShutdownHook {
    library: NativeLibrary,
    hooks: Arc<ShutdownHooks>,
}

impl NativeShutdownHook {
    /// Load the library at `path` and register a fresh hook set with it.
    pub fn install(path: &Path) -> Result<Self, NativeError> {
        let library = NativeLibrary::load(path)?;
        let hooks = Arc::new(ShutdownHooks::new());
        let previous = NATIVE_HOOKS.write().replace(hooks.clone());
        // SAFETY: the exported registration function has the `RegisterFn`
        // signature by contract with the native library.
        let registered = unsafe {
            library
                .symbol::<RegisterFn>(REGISTER_SYMBOL)
                .map(|register| register(run_native_hooks))
        };
        let failure = match registered {
            Ok(0) => None,
            Ok(status) => Some(NativeError::Rejected {
                path: path.to_path_buf(),
                status,
            }),
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            *NATIVE_HOOKS.write() = previous;
            return Err(e);
        }
        debug!(path = %path.display(), "native shutdown hook installed");
        Ok(Self { library, hooks })
    }

    pub fn hooks(&self) -> &Arc<ShutdownHooks> {
        &self.hooks
    }

    pub fn library(&self) -> &NativeLibrary {
        &self.library
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(name: &str, counter: &Arc<AtomicUsize>) -> Arc<ShutdownHook> {
        let c = counter.clone();
        ShutdownHook::new(name, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Invariant: registration is by identity; the same hook twice fails,
    /// an equal-named distinct hook is fine.
    #[test]
    fn add_rejects_duplicate_identity() {
        let hooks = ShutdownHooks::new();
        let n = Arc::new(AtomicUsize::new(0));
        let a = counting("a", &n);
        hooks.add(a.clone()).unwrap();
        assert_eq!(
            hooks.add(a.clone()),
            Err(ShutdownError::AlreadyRegistered("a".into()))
        );
        hooks.add(counting("a", &n)).unwrap();
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks.remove(&a), Ok(true));
        assert_eq!(hooks.remove(&a), Ok(false));
    }

    /// Invariant: `run` executes each hook exactly once, and the set then
    /// refuses changes.
    #[test]
    fn run_executes_each_hook_once_then_closes() {
        let hooks = Arc::new(ShutdownHooks::new());
        let n = Arc::new(AtomicUsize::new(0));
        let add = hooks.add_fn();
        let remove = hooks.remove_fn();
        for i in 0..4 {
            add(counting(&format!("h{i}"), &n)).unwrap();
        }
        hooks.run();
        hooks.run();
        assert_eq!(n.load(Ordering::SeqCst), 4);
        assert!(hooks.is_shutting_down());

        let late = counting("late", &n);
        assert_eq!(add(late.clone()), Err(ShutdownError::InProgress));
        assert_eq!(remove(&late), Err(ShutdownError::InProgress));
    }

    /// Invariant: a hook whose action panics is not left marked running.
    #[test]
    fn panicking_hook_clears_running_flag() {
        let hook = ShutdownHook::new("boom", || panic!("hook failed"));
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook.run()));
        assert!(res.is_err());
        assert!(!hook.is_running());
        hook.run();
        assert!(!hook.is_running());
    }

    #[test]
    fn install_fails_for_missing_library() {
        let err = NativeShutdownHook::install(Path::new("/nonexistent/libhook.so")).unwrap_err();
        assert!(matches!(err, NativeError::Load { .. }));
    }
}
