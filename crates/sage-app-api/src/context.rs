use crate::abi::{
    EngineContext, FrameInfo, LogLevel, StateCapsule, Status, STATUS_NULL_ARGUMENT, STATUS_PANIC,
    STATUS_STATE_LAYOUT,
};
use abi_stable::std_types::RStr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Safe application-side view of the engine context for the duration of one call.
pub struct AppContext<'a> {
    raw: &'a mut EngineContext,
}

impl<'a> AppContext<'a> {
    #[inline]
    pub fn new(raw: &'a mut EngineContext) -> Self {
        Self { raw }
    }

    #[inline]
    pub fn frame(&self) -> FrameInfo {
        self.raw.frame
    }

    /// Generation of the unit currently executing. 0 for the first load.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.raw.frame.generation
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos((self.raw.host.elapsed_ns)(&*self.raw as *const EngineContext))
    }

    #[inline]
    pub fn request_shutdown(&mut self) {
        (self.raw.host.request_shutdown)(&mut *self.raw as *mut EngineContext);
    }

    pub fn log(&self, level: LogLevel, msg: &str) {
        (self.raw.host.log)(&*self.raw as *const EngineContext, level, RStr::from_str(msg));
    }

    #[inline]
    pub fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }

    #[inline]
    pub fn warn(&self, msg: &str) {
        self.log(LogLevel::Warn, msg);
    }

    #[inline]
    pub fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    #[inline]
    pub fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }
}

pub type AppFn<S> = fn(&mut AppContext<'_>, &mut S) -> Status;

/// Runs a safe application callback behind an exported entry point.
///
/// Null arguments, a capsule that cannot hold `S`, and panics are all turned into an
/// error [`Status`]; nothing unwinds across the boundary.
///
/// # Safety
/// `ctx` and `capsule` must be null or valid for the duration of the call, and the capsule
/// must describe memory owned by the engine.
pub unsafe fn dispatch<S: bytemuck::Pod>(
    ctx: *mut EngineContext,
    capsule: *mut StateCapsule,
    f: AppFn<S>,
) -> Status {
    if ctx.is_null() || capsule.is_null() {
        return Status::error(STATUS_NULL_ARGUMENT);
    }

    let raw = unsafe { &mut *ctx };
    let capsule = unsafe { &mut *capsule };

    let result = catch_unwind(AssertUnwindSafe(|| {
        let state = match unsafe { capsule.state_mut::<S>() } {
            Some(s) => s,
            None => return Status::error(STATUS_STATE_LAYOUT),
        };
        let mut app = AppContext::new(raw);
        f(&mut app, state)
    }));

    result.unwrap_or(Status::error(STATUS_PANIC))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{HostApiV1, StatusOutcome, BRIDGE_SCHEMA_VERSION};
    use std::cell::Cell;

    thread_local! {
        static SHUTDOWNS: Cell<u32> = const { Cell::new(0) };
        static LOGS: Cell<u32> = const { Cell::new(0) };
    }

    extern "C" fn t_shutdown(_ctx: *mut EngineContext) {
        SHUTDOWNS.with(|c| c.set(c.get() + 1));
    }

    extern "C" fn t_elapsed(_ctx: *const EngineContext) -> u64 {
        1_500_000
    }

    extern "C" fn t_log(_ctx: *const EngineContext, _level: LogLevel, msg: RStr<'_>) {
        assert_eq!(msg.as_str(), "hello");
        LOGS.with(|c| c.set(c.get() + 1));
    }

    fn context() -> EngineContext {
        EngineContext {
            host: HostApiV1 {
                schema_version: BRIDGE_SCHEMA_VERSION,
                request_shutdown: t_shutdown,
                elapsed_ns: t_elapsed,
                log: t_log,
            },
            frame: FrameInfo {
                generation: 3,
                ..FrameInfo::default()
            },
            engine: std::ptr::null_mut(),
        }
    }

    fn bump(ctx: &mut AppContext<'_>, state: &mut u64) -> Status {
        *state += ctx.generation();
        ctx.info("hello");
        ctx.request_shutdown();
        Status::OK
    }

    fn boom(_ctx: &mut AppContext<'_>, _state: &mut u64) -> Status {
        panic!("application bug");
    }

    #[test]
    fn dispatch_runs_callback_against_capsule() {
        let mut ctx = context();
        let mut storage = [7u64; 2];
        let mut capsule = StateCapsule {
            data: storage.as_mut_ptr() as *mut u8,
            capacity: 16,
            align: 8,
        };

        let status = unsafe { dispatch::<u64>(&mut ctx, &mut capsule, bump) };
        assert_eq!(status.outcome(), StatusOutcome::Ok);
        assert_eq!(storage[0], 10);
        assert_eq!(SHUTDOWNS.with(|c| c.get()), 1);
        assert_eq!(LOGS.with(|c| c.get()), 1);

        let app = AppContext::new(&mut ctx);
        assert_eq!(app.elapsed(), Duration::from_micros(1500));
    }

    #[test]
    fn dispatch_rejects_null_and_small_capsules() {
        let mut ctx = context();
        let status = unsafe { dispatch::<u64>(&mut ctx, std::ptr::null_mut(), bump) };
        assert_eq!(status, Status::error(STATUS_NULL_ARGUMENT));

        let mut byte = [0u8; 1];
        let mut capsule = StateCapsule {
            data: byte.as_mut_ptr(),
            capacity: 1,
            align: 1,
        };
        let status = unsafe { dispatch::<u64>(&mut ctx, &mut capsule, bump) };
        assert_eq!(status, Status::error(STATUS_STATE_LAYOUT));
    }

    #[test]
    fn dispatch_contains_panics() {
        let mut ctx = context();
        let mut storage = [0u64; 1];
        let mut capsule = StateCapsule {
            data: storage.as_mut_ptr() as *mut u8,
            capacity: 8,
            align: 8,
        };
        let status = unsafe { dispatch::<u64>(&mut ctx, &mut capsule, boom) };
        assert_eq!(status, Status::error(STATUS_PANIC));
    }
}
