use abi_stable::std_types::{RSlice, RStr};
use abi_stable::StableAbi;
use std::ffi::c_void;

/// Revision of the entry-point calling convention. Checked when a unit is loaded.
pub const ABI_VERSION: u32 = 1;

/// Revision of the bridge tables (host capabilities, manifest layout). Checked when the
/// bridge is built.
pub const BRIDGE_SCHEMA_VERSION: u32 = 1;

pub const SYMBOL_ABI_VERSION: &str = "sage_abi_version";
pub const SYMBOL_APP_MANIFEST: &str = "sage_app_manifest";
pub const SYMBOL_APP_INIT: &str = "app_init";
pub const SYMBOL_APP_UPDATE: &str = "app_update";
pub const SYMBOL_APP_SHUTDOWN: &str = "app_shutdown";

/// A callback panicked; the panic was caught at the boundary.
pub const STATUS_PANIC: i32 = -1;
/// The capsule is too small or misaligned for the application's state type.
pub const STATUS_STATE_LAYOUT: i32 = -2;
/// The engine passed a null context or capsule.
pub const STATUS_NULL_ARGUMENT: i32 = -3;

/* =============================================================================================
   Status
   ============================================================================================= */

#[repr(u8)]
#[derive(StableAbi, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Ok = 0,
    RequestShutdown = 1,
    Error = 2,
}

/// Result of every application entry point.
#[repr(C)]
#[derive(StableAbi, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub code: i32,
}

/// Rust-side view of a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Ok,
    RequestShutdown,
    Error(i32),
}

impl Status {
    pub const OK: Status = Status {
        kind: StatusKind::Ok,
        code: 0,
    };

    pub const REQUEST_SHUTDOWN: Status = Status {
        kind: StatusKind::RequestShutdown,
        code: 0,
    };

    #[inline]
    pub const fn error(code: i32) -> Self {
        Self {
            kind: StatusKind::Error,
            code,
        }
    }

    #[inline]
    pub fn outcome(self) -> StatusOutcome {
        match self.kind {
            StatusKind::Ok => StatusOutcome::Ok,
            StatusKind::RequestShutdown => StatusOutcome::RequestShutdown,
            StatusKind::Error => StatusOutcome::Error(self.code),
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self.kind == StatusKind::Ok
    }
}

impl From<StatusOutcome> for Status {
    #[inline]
    fn from(value: StatusOutcome) -> Self {
        match value {
            StatusOutcome::Ok => Status::OK,
            StatusOutcome::RequestShutdown => Status::REQUEST_SHUTDOWN,
            StatusOutcome::Error(code) => Status::error(code),
        }
    }
}

#[repr(u8)]
#[derive(StableAbi, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

/* =============================================================================================
   Engine -> application
   ============================================================================================= */

/// Per-frame snapshot written by the engine before every call.
#[repr(C)]
#[derive(StableAbi, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_index: u64,
    pub dt_ns: u64,
    pub elapsed_ns: u64,
    pub generation: u64,
}

pub type HostRequestShutdownFn = extern "C" fn(ctx: *mut EngineContext);
pub type HostElapsedFn = extern "C" fn(ctx: *const EngineContext) -> u64;
pub type HostLogFn = extern "C" fn(ctx: *const EngineContext, level: LogLevel, msg: RStr<'_>);

/// Engine capabilities, one slot per [`HostCapability`] key.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostApiV1 {
    pub schema_version: u32,
    pub request_shutdown: HostRequestShutdownFn,
    pub elapsed_ns: HostElapsedFn,
    pub log: HostLogFn,
}

/// Stable keys of the engine->application capabilities.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostCapability {
    RequestShutdown = 1,
    ElapsedTime = 2,
    Log = 3,
}

impl HostCapability {
    pub const ALL: [HostCapability; 3] = [
        HostCapability::RequestShutdown,
        HostCapability::ElapsedTime,
        HostCapability::Log,
    ];

    #[inline]
    pub const fn key(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostCapability::RequestShutdown => "request_shutdown",
            HostCapability::ElapsedTime => "elapsed_time",
            HostCapability::Log => "log",
        }
    }
}

/// The single context value the engine passes to every entry point.
///
/// `engine` is private to the engine; applications must never dereference it.
#[repr(C)]
pub struct EngineContext {
    pub host: HostApiV1,
    pub frame: FrameInfo,
    pub engine: *mut c_void,
}

/// Engine-owned memory block whose layout belongs to the application.
///
/// The block keeps its address for the whole process lifetime. Its contents are
/// reinterpreted, never migrated, when a new generation of the application is loaded.
#[repr(C)]
#[derive(StableAbi, Debug)]
pub struct StateCapsule {
    pub data: *mut u8,
    pub capacity: usize,
    pub align: usize,
}

impl StateCapsule {
    /// # Safety
    /// `data` must point to `capacity` bytes that stay valid for the returned borrow.
    #[inline]
    pub unsafe fn bytes_mut(&mut self) -> &mut [u8] {
        if self.data.is_null() || self.capacity == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.data, self.capacity) }
    }

    /// Views the head of the capsule as `T`.
    ///
    /// Returns `None` when the capsule is smaller than `T` or misaligned for it.
    ///
    /// # Safety
    /// Same contract as [`StateCapsule::bytes_mut`].
    #[inline]
    pub unsafe fn state_mut<T: bytemuck::Pod>(&mut self) -> Option<&mut T> {
        let size = std::mem::size_of::<T>();
        let bytes = unsafe { self.bytes_mut() };
        if size > bytes.len() {
            return None;
        }
        bytemuck::try_from_bytes_mut(&mut bytes[..size]).ok()
    }
}

/* =============================================================================================
   Application -> engine
   ============================================================================================= */

pub type AppEntryFn =
    unsafe extern "C" fn(ctx: *mut EngineContext, capsule: *mut StateCapsule) -> Status;

/// Stable keys of the application->engine capabilities.
///
/// `Init`, `Update` and `Shutdown` are resolved from exported symbols; the hooks are
/// declared in the manifest.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AppCapability {
    Init = 1,
    Update = 2,
    Shutdown = 3,
    /// Called on the outgoing generation once its replacement has been validated.
    BeforeUnload = 16,
    /// Called on the incoming generation right after the swap.
    AfterReload = 17,
}

impl AppCapability {
    #[inline]
    pub const fn key(self) -> u32 {
        self as u32
    }

    pub fn from_key(key: u32) -> Option<Self> {
        match key {
            1 => Some(AppCapability::Init),
            2 => Some(AppCapability::Update),
            3 => Some(AppCapability::Shutdown),
            16 => Some(AppCapability::BeforeUnload),
            17 => Some(AppCapability::AfterReload),
            _ => None,
        }
    }

    #[inline]
    pub fn is_hook(self) -> bool {
        matches!(self, AppCapability::BeforeUnload | AppCapability::AfterReload)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppCapability::Init => "init",
            AppCapability::Update => "update",
            AppCapability::Shutdown => "shutdown",
            AppCapability::BeforeUnload => "before_unload",
            AppCapability::AfterReload => "after_reload",
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct AppHookEntry {
    pub key: u32,
    pub entry: AppEntryFn,
}

/// What the application declares about itself.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AppManifestV1 {
    pub schema_version: u32,
    pub state_size: u64,
    pub state_align: u64,
    pub hooks: RSlice<'static, AppHookEntry>,
}

impl AppManifestV1 {
    #[inline]
    pub fn new<S>(hooks: &'static [AppHookEntry]) -> Self {
        Self {
            schema_version: BRIDGE_SCHEMA_VERSION,
            state_size: std::mem::size_of::<S>() as u64,
            state_align: std::mem::align_of::<S>() as u64,
            hooks: RSlice::from_slice(hooks),
        }
    }
}

/// Entry points of one application unit, whether resolved from a dynamic library or
/// linked directly into the host.
#[derive(Clone, Copy)]
pub struct AppExports {
    pub abi_version: extern "C" fn() -> u32,
    pub manifest: extern "C" fn() -> AppManifestV1,
    pub init: AppEntryFn,
    pub update: AppEntryFn,
    pub shutdown: AppEntryFn,
}

impl std::fmt::Debug for AppExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppExports")
            .field("abi_version", &(self.abi_version as usize))
            .field("init", &(self.init as usize))
            .field("update", &(self.update as usize))
            .field("shutdown", &(self.shutdown as usize))
            .finish()
    }
}
