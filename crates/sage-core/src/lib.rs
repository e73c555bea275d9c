#![forbid(unsafe_op_in_unsafe_fn)]

pub mod boot;
pub mod bridge;
pub mod build_mode;
pub mod capsule;
pub mod config;
pub mod error;
pub mod host;
pub mod platform;
pub mod subsystem;
pub mod sync;
pub mod unit;

#[cfg(feature = "hot-reload")]
pub mod hot;

pub use boot::{BootPhase, BootSequencer, FrameOutcome, ReloadEvent};
pub use bridge::BridgeTable;
pub use build_mode::{BuildMode, BUILD_MODE};
pub use capsule::Capsule;
pub use config::{ConfigLoadReport, EngineConfig, SubsystemConfig, WindowConfig};
pub use error::{
    BootError, BootResult, BuildError, ConfigError, LoadError, PlatformError, ReloadError,
    SubsystemError,
};
pub use platform::{HeadlessPlatform, PlatformHandle, PlatformLayer, PumpStatus};
pub use subsystem::Subsystem;
pub use sync::ShutdownToken;
pub use unit::AppSource;

#[cfg(feature = "hot-reload")]
pub use hot::{ChangeSignal, ChangeStream, LoaderConfig, Module, ModuleLoader, ReloadTrigger};

pub use sage_app_api as api;
