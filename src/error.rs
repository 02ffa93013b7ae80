//! Error types.
//!
//! `BootError` is what the launcher sees. The others belong to the
//! component that raises them and convert into `BootError` where boot can't
//! continue without that component.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootError {
    #[error("expected <baseDirectory> <propertiesFile> <mainModule[/mainClass]> [args...], got {0} argument(s)")]
    MissingArguments(usize),

    #[error("cannot read enhancer properties {path}: {source}")]
    Properties {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("module {0} not found")]
    ModuleNotFound(String),

    #[error("module {0} does not declare a main class")]
    NoMainClass(String),

    #[error("class {0} has no entry point")]
    NoEntryPoint(String),

    /// Raised by the application itself; carried through unchanged.
    #[error(transparent)]
    Application(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid module descriptor {path}: {source}")]
    Descriptor {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0} is not a module: no module-info.toml")]
    MissingDescriptor(PathBuf),

    #[error("module {name} not found (required by {required_by})")]
    NotFound { name: String, required_by: String },

    #[error("module {0} is provided by more than one archive")]
    Duplicate(String),

    #[error("module {0} is already defined in a parent layer")]
    AlreadyDefined(String),

    #[error("class {0} not found")]
    ClassNotFound(String),

    #[error("{module} cannot access {target}")]
    Inaccessible { module: String, target: String },

    #[error("bootstrapper is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotError {
    #[error("runtime has no {0} slot")]
    Absent(&'static str),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    #[error("operation {0} is not supported")]
    Unsupported(&'static str),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("shutdown in progress")]
    InProgress,
    #[error("hook {0} is already running")]
    AlreadyRunning(String),
    #[error("hook {0} is already registered")]
    AlreadyRegistered(String),
}

#[derive(Error, Debug)]
pub enum NativeError {
    #[error("cannot load native library {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("native library {path} has no symbol {symbol}: {source}")]
    Symbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },
    #[error("native library {path} rejected registration (status {status})")]
    Rejected { path: PathBuf, status: i32 },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker {0} no longer accepts jobs")]
    Interrupted(String),
    #[error("job on worker {0} panicked")]
    Panicked(String),
    #[error("cannot spawn worker {name}: {reason}")]
    Spawn { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid main module {0:?}")]
    MainSpec(String),
    #[error("line {line}: invalid unicode escape")]
    Escape { line: usize },
}
