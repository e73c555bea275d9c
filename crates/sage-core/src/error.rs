use crate::boot::BootPhase;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Opening a unit or resolving its entry points failed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unit not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to open '{path}': {message}")]
    Open {
        path: PathBuf,
        message: String,
    },

    #[error("missing symbol '{0}'")]
    MissingSymbol(String),

    #[error("incompatible abi version: expected {expected}, found {found}")]
    IncompatibleVersion {
        expected: u32,
        found: u32,
    },

    #[error("io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Constructing the bridge table for a generation failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("bridge schema mismatch: engine {expected}, application {found}")]
    VersionMismatch {
        expected: u32,
        found: u32,
    },

    #[error("application state needs {required} bytes but the capsule holds {capacity}")]
    StateTooLarge {
        required: u64,
        capacity: usize,
    },

    #[error("invalid state layout: size={size} align={align}")]
    InvalidStateLayout {
        size: u64,
        align: u64,
    },

    #[error("capsule allocation of {size} bytes (align {align}) failed")]
    CapsuleAllocation {
        size: u64,
        align: u64,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown subsystem '{0}'")]
    UnknownSubsystem(String),

    #[error("config read failed: path={path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config parse failed (json): path={path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid params for '{subsystem}': {message}")]
    InvalidParams {
        subsystem: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("event loop: {0}")]
    EventLoop(String),

    #[error("window creation failed: {0}")]
    WindowCreation(String),

    #[error("unknown platform handle {0}")]
    UnknownHandle(u64),

    #[error("window subsystem enabled but no platform layer was provided")]
    NotConfigured,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SubsystemError(pub String);

impl SubsystemError {
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A reload attempt failed; the previous generation stays live.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Failures that abort boot. Anything raised before `ApplicationBooted` ends up here.
#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("subsystem '{id}' failed: {source}")]
    Subsystem {
        id: &'static str,
        #[source]
        source: SubsystemError,
    },

    #[error("app_init returned error code {0}")]
    AppInit(i32),

    #[error("invalid boot transition: {from} -> {to}")]
    InvalidTransition {
        from: BootPhase,
        to: BootPhase,
    },
}

pub type BootResult<T> = Result<T, BootError>;
