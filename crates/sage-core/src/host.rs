use crate::sync::ShutdownToken;

use abi_stable::std_types::RStr;
use sage_app_api::{EngineContext, FrameInfo, HostApiV1, LogLevel, BRIDGE_SCHEMA_VERSION};
use std::ffi::c_void;
use std::time::{Duration, Instant};

/// Engine state reachable from the host capabilities through `EngineContext::engine`.
struct HostState {
    clock: Instant,
    shutdown: ShutdownToken,
}

/// Owns the single `EngineContext` passed to every bridge call.
///
/// Both halves are boxed so the raw pointers handed to the application stay valid when the
/// `HostContext` itself moves.
pub struct HostContext {
    state: Box<HostState>,
    ctx: Box<EngineContext>,
}

impl HostContext {
    pub fn new(shutdown: ShutdownToken) -> Self {
        let mut state = Box::new(HostState {
            clock: Instant::now(),
            shutdown,
        });
        let engine = &mut *state as *mut HostState as *mut c_void;
        let ctx = Box::new(EngineContext {
            host: host_api_v1(),
            frame: FrameInfo::default(),
            engine,
        });
        Self { state, ctx }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.state.clock.elapsed()
    }

    #[inline]
    pub fn frame(&self) -> FrameInfo {
        self.ctx.frame
    }

    /// Publishes the frame snapshot the next bridge calls will observe.
    pub fn begin_frame(&mut self, frame_index: u64, dt: Duration) -> FrameInfo {
        let f = &mut self.ctx.frame;
        f.frame_index = frame_index;
        f.dt_ns = dt.as_nanos() as u64;
        f.elapsed_ns = self.state.clock.elapsed().as_nanos() as u64;
        *f
    }

    #[inline]
    pub fn set_generation(&mut self, generation: u64) {
        self.ctx.frame.generation = generation;
    }

    #[inline]
    pub fn host_api(&self) -> HostApiV1 {
        self.ctx.host
    }

    #[inline]
    pub fn as_raw(&mut self) -> *mut EngineContext {
        &mut *self.ctx as *mut EngineContext
    }
}

/// Capability table exposed to the application, version [`BRIDGE_SCHEMA_VERSION`].
pub fn host_api_v1() -> HostApiV1 {
    HostApiV1 {
        schema_version: BRIDGE_SCHEMA_VERSION,
        request_shutdown: host_request_shutdown,
        elapsed_ns: host_elapsed_ns,
        log: host_log,
    }
}

/// # Safety
/// `ctx` must be null or point to a context created by [`HostContext::new`] that is still alive.
unsafe fn host_state<'a>(ctx: *const EngineContext) -> Option<&'a HostState> {
    if ctx.is_null() {
        return None;
    }
    let engine = unsafe { (*ctx).engine };
    if engine.is_null() {
        return None;
    }
    Some(unsafe { &*(engine as *const HostState) })
}

extern "C" fn host_request_shutdown(ctx: *mut EngineContext) {
    let Some(state) = (unsafe { host_state(ctx) }) else {
        return;
    };
    if !state.shutdown.is_requested() {
        log::info!(target: "sage::app", "application requested shutdown");
    }
    state.shutdown.request();
}

extern "C" fn host_elapsed_ns(ctx: *const EngineContext) -> u64 {
    match unsafe { host_state(ctx) } {
        Some(state) => state.clock.elapsed().as_nanos() as u64,
        None => 0,
    }
}

extern "C" fn host_log(_ctx: *const EngineContext, level: LogLevel, msg: RStr<'_>) {
    let level = match level {
        LogLevel::Error => log::Level::Error,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Info => log::Level::Info,
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Trace => log::Level::Trace,
    };
    log::log!(target: "sage::app", level, "{}", msg.as_str());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shutdown_reaches_token() {
        let token = ShutdownToken::new();
        let mut host = HostContext::new(token.clone());
        let raw = host.as_raw();

        let api = host.host_api();
        (api.request_shutdown)(raw);
        assert!(token.is_requested());
    }

    #[test]
    fn capabilities_tolerate_null_context() {
        let api = host_api_v1();
        (api.request_shutdown)(std::ptr::null_mut());
        assert_eq!((api.elapsed_ns)(std::ptr::null()), 0);
        (api.log)(std::ptr::null(), LogLevel::Info, RStr::from_str("ignored"));
    }

    #[test]
    fn frame_snapshot_tracks_generation() {
        let mut host = HostContext::new(ShutdownToken::new());
        host.set_generation(4);
        let f = host.begin_frame(7, Duration::from_millis(2));
        assert_eq!(f.frame_index, 7);
        assert_eq!(f.dt_ns, 2_000_000);
        assert_eq!(f.generation, 4);

        let raw = host.as_raw();
        assert_eq!(unsafe { (*raw).frame.generation }, 4);
        assert!((host.host_api().elapsed_ns)(raw) >= f.elapsed_ns);
    }
}
