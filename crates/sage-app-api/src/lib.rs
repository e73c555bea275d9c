#![forbid(unsafe_op_in_unsafe_fn)]

//! ABI contract between the Sage engine and an application unit.
//!
//! Nothing in here links the two sides together: the engine resolves a handful of
//! C symbols (`sage_abi_version`, `sage_app_manifest`, `app_init`, `app_update`,
//! `app_shutdown`) and from then on talks to the unit only through the tables below.
//! Every type that crosses the boundary is `#[repr(C)]` plain data.

mod abi;
mod context;
mod export;

pub use abi::{
    AppCapability, AppEntryFn, AppExports, AppHookEntry, AppManifestV1, EngineContext,
    FrameInfo, HostApiV1, HostCapability, HostElapsedFn, HostLogFn, HostRequestShutdownFn,
    LogLevel, StateCapsule, Status, StatusKind, StatusOutcome, ABI_VERSION,
    BRIDGE_SCHEMA_VERSION, STATUS_NULL_ARGUMENT, STATUS_PANIC, STATUS_STATE_LAYOUT,
    SYMBOL_ABI_VERSION, SYMBOL_APP_INIT, SYMBOL_APP_MANIFEST, SYMBOL_APP_SHUTDOWN,
    SYMBOL_APP_UPDATE,
};
pub use context::{dispatch, AppContext, AppFn};

#[doc(hidden)]
pub use abi_stable;
pub use bytemuck;
