use sage_core::api::{
    dispatch, AppContext, AppExports, AppManifestV1, EngineContext, StateCapsule, Status,
    ABI_VERSION,
};
use sage_core::{
    AppSource, BootError, BootPhase, BootSequencer, BuildError, ConfigError, EngineConfig,
    FrameOutcome, LoadError, PlatformError, PlatformHandle, PlatformLayer, PumpStatus,
    Subsystem, SubsystemConfig, SubsystemError, WindowConfig,
};

use serde_json::{json, Value};
use std::cell::RefCell;

thread_local! {
    static JOURNAL: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn note(entry: impl Into<String>) {
    JOURNAL.with(|j| j.borrow_mut().push(entry.into()));
}

fn journal() -> Vec<String> {
    JOURNAL.with(|j| j.borrow().clone())
}

fn reset() {
    JOURNAL.with(|j| j.borrow_mut().clear());
}

fn position(entries: &[String], needle: &str) -> usize {
    entries
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("'{needle}' missing from {entries:?}"))
}

/* ------------------------------------------------------------------------------------------ */
/* Test application                                                                            */
/* ------------------------------------------------------------------------------------------ */

#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Counter {
    inits: u32,
    updates: u32,
    shutdowns: u32,
    _pad: u32,
}

extern "C" fn abi_ok() -> u32 {
    ABI_VERSION
}

extern "C" fn abi_future() -> u32 {
    ABI_VERSION + 1
}

extern "C" fn manifest_v1() -> AppManifestV1 {
    AppManifestV1::new::<Counter>(&[])
}

extern "C" fn manifest_v2() -> AppManifestV1 {
    AppManifestV1 {
        schema_version: 2,
        ..AppManifestV1::new::<Counter>(&[])
    }
}

extern "C" fn manifest_unrepresentable() -> AppManifestV1 {
    AppManifestV1 {
        state_size: u64::MAX - 64,
        ..AppManifestV1::new::<Counter>(&[])
    }
}

extern "C" fn manifest_exhausting() -> AppManifestV1 {
    AppManifestV1 {
        state_size: 1 << 62,
        ..AppManifestV1::new::<Counter>(&[])
    }
}

unsafe extern "C" fn init_ok(ctx: *mut EngineContext, c: *mut StateCapsule) -> Status {
    unsafe {
        dispatch::<Counter>(ctx, c, |_ctx, s| {
            let zeroed = s.inits == 0 && s.updates == 0 && s.shutdowns == 0;
            note(if zeroed { "app:init:zeroed" } else { "app:init:dirty" });
            s.inits += 1;
            Status::OK
        })
    }
}

unsafe extern "C" fn init_fail(ctx: *mut EngineContext, c: *mut StateCapsule) -> Status {
    unsafe {
        dispatch::<Counter>(ctx, c, |_ctx, _s| {
            note("app:init");
            Status::error(3)
        })
    }
}

unsafe extern "C" fn update_ok(ctx: *mut EngineContext, c: *mut StateCapsule) -> Status {
    unsafe {
        dispatch::<Counter>(ctx, c, |_ctx, s| {
            s.updates += 1;
            note("app:update");
            Status::OK
        })
    }
}

unsafe extern "C" fn update_err(ctx: *mut EngineContext, c: *mut StateCapsule) -> Status {
    unsafe {
        dispatch::<Counter>(ctx, c, |_ctx, s| {
            s.updates += 1;
            Status::error(7)
        })
    }
}

unsafe extern "C" fn update_stop_at_two(ctx: *mut EngineContext, c: *mut StateCapsule) -> Status {
    unsafe {
        dispatch::<Counter>(ctx, c, |_ctx, s| {
            s.updates += 1;
            if s.updates == 2 {
                Status::REQUEST_SHUTDOWN
            } else {
                Status::OK
            }
        })
    }
}

unsafe extern "C" fn update_host_shutdown(ctx: *mut EngineContext, c: *mut StateCapsule) -> Status {
    unsafe {
        dispatch::<Counter>(ctx, c, |ctx: &mut AppContext<'_>, s| {
            s.updates += 1;
            ctx.info("leaving");
            ctx.request_shutdown();
            Status::OK
        })
    }
}

unsafe extern "C" fn shutdown_ok(ctx: *mut EngineContext, c: *mut StateCapsule) -> Status {
    unsafe {
        dispatch::<Counter>(ctx, c, |_ctx, s| {
            s.shutdowns += 1;
            note("app:shutdown");
            Status::OK
        })
    }
}

fn app(
    update: unsafe extern "C" fn(*mut EngineContext, *mut StateCapsule) -> Status,
) -> AppExports {
    AppExports {
        abi_version: abi_ok,
        manifest: manifest_v1,
        init: init_ok,
        update,
        shutdown: shutdown_ok,
    }
}

fn source(exports: AppExports) -> AppSource {
    AppSource::linked("test_app", exports)
}

fn counter(seq: &BootSequencer) -> Counter {
    let bytes = seq.capsule_bytes().expect("capsule");
    bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<Counter>()])
}

/* ------------------------------------------------------------------------------------------ */
/* Engine-side collaborators                                                                   */
/* ------------------------------------------------------------------------------------------ */

struct Recorder {
    id: &'static str,
    fail_start: bool,
}

impl Recorder {
    fn new(id: &'static str) -> Self {
        Self { id, fail_start: false }
    }
}

impl Subsystem for Recorder {
    fn id(&self) -> &'static str {
        self.id
    }

    fn configure(&mut self, params: &Value) -> Result<(), SubsystemError> {
        note(format!("{}:configure:{}", self.id, params));
        Ok(())
    }

    fn start(&mut self) -> Result<(), SubsystemError> {
        if self.fail_start {
            return Err(SubsystemError::new("refused"));
        }
        note(format!("{}:start", self.id));
        Ok(())
    }

    fn update(&mut self, _frame: &sage_core::api::FrameInfo) -> Result<(), SubsystemError> {
        note(format!("{}:update", self.id));
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SubsystemError> {
        note(format!("{}:shutdown", self.id));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPlatform {
    close_after: Option<u64>,
    pumped: u64,
}

impl PlatformLayer for RecordingPlatform {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn init_window(&mut self, cfg: &WindowConfig) -> Result<PlatformHandle, PlatformError> {
        note(format!("platform:init:{}", cfg.title));
        Ok(PlatformHandle(42))
    }

    fn process_pending_messages(&mut self, _handle: PlatformHandle) -> PumpStatus {
        self.pumped += 1;
        match self.close_after {
            Some(n) if self.pumped >= n => PumpStatus::CloseRequested,
            _ => PumpStatus::Continue,
        }
    }

    fn release(&mut self, handle: PlatformHandle) -> Result<(), PlatformError> {
        note("platform:release");
        if handle != PlatformHandle(42) {
            return Err(PlatformError::UnknownHandle(handle.0));
        }
        Ok(())
    }
}

fn with_window() -> EngineConfig {
    EngineConfig::default().with_subsystem(
        "window",
        SubsystemConfig::with_params(json!({ "title": "Test" })),
    )
}

/* ------------------------------------------------------------------------------------------ */
/* Tests                                                                                       */
/* ------------------------------------------------------------------------------------------ */

#[test]
fn window_enabled_boots_through_each_phase() {
    reset();
    let mut seq = BootSequencer::new(with_window(), source(app(update_ok)))
        .with_platform(RecordingPlatform::default());

    seq.boot_engine().unwrap();
    assert_eq!(seq.phase(), BootPhase::EngineBooted);
    assert!(journal().is_empty());

    seq.start_engine().unwrap();
    assert_eq!(seq.phase(), BootPhase::EngineStarted);
    assert_eq!(seq.platform_handle(), Some(PlatformHandle(42)));
    assert_eq!(journal(), vec!["platform:init:Test".to_string()]);

    seq.boot_application().unwrap();
    assert_eq!(seq.phase(), BootPhase::ApplicationBooted);
    assert_eq!(seq.generation(), 0);
}

#[test]
fn omitted_window_still_reaches_application_booted() {
    reset();
    let mut seq = BootSequencer::new(EngineConfig::default(), source(app(update_ok)));
    seq.boot().unwrap();
    assert_eq!(seq.phase(), BootPhase::ApplicationBooted);
    assert_eq!(seq.platform_handle(), None);
}

#[test]
fn window_without_platform_is_fatal() {
    let mut seq = BootSequencer::new(with_window(), source(app(update_ok)));
    let err = seq.boot().unwrap_err();
    assert!(matches!(err, BootError::Platform(PlatformError::NotConfigured)), "{err:?}");
    assert_eq!(seq.phase(), BootPhase::Uninitialized);
}

#[test]
fn unknown_subsystem_is_fatal() {
    let cfg = EngineConfig::default().with_subsystem("physics", SubsystemConfig::enabled());
    let mut seq =
        BootSequencer::new(cfg, source(app(update_ok))).with_subsystem(Recorder::new("audio"));

    match seq.boot() {
        Err(BootError::Config(ConfigError::UnknownSubsystem(name))) => assert_eq!(name, "physics"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(seq.phase(), BootPhase::Uninitialized);
}

#[test]
fn schema_mismatch_stays_in_engine_started() {
    let exports = AppExports {
        manifest: manifest_v2,
        ..app(update_ok)
    };
    let mut seq = BootSequencer::new(EngineConfig::default(), source(exports));

    match seq.boot() {
        Err(BootError::Build(BuildError::VersionMismatch { expected, found })) => {
            assert_eq!(expected, 1);
            assert_eq!(found, 2);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(seq.phase(), BootPhase::EngineStarted);
    assert!(seq.capsule_address().is_none());
}

#[test]
fn unrepresentable_state_size_fails_boot() {
    reset();
    let exports = AppExports {
        manifest: manifest_unrepresentable,
        ..app(update_ok)
    };
    let mut seq = BootSequencer::new(EngineConfig::default(), source(exports));

    let err = seq.boot().unwrap_err();
    match err {
        BootError::Build(BuildError::InvalidStateLayout { size, .. }) => {
            assert_eq!(size, u64::MAX - 64)
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(seq.phase(), BootPhase::EngineStarted);
    assert!(seq.capsule_address().is_none());
    assert!(journal().is_empty(), "app_init must not run without a capsule");
}

#[cfg(target_pointer_width = "64")]
#[test]
fn capsule_allocation_failure_fails_boot() {
    reset();
    let exports = AppExports {
        manifest: manifest_exhausting,
        ..app(update_ok)
    };
    let mut seq = BootSequencer::new(EngineConfig::default(), source(exports));

    let err = seq.boot().unwrap_err();
    assert!(
        matches!(err, BootError::Build(BuildError::CapsuleAllocation { .. })),
        "{err:?}"
    );
    assert_eq!(seq.phase(), BootPhase::EngineStarted);
    assert!(seq.capsule_address().is_none());
    assert!(journal().is_empty());

    seq.shutdown();
    assert_eq!(seq.phase(), BootPhase::ShuttingDown);
}

#[test]
fn abi_mismatch_is_rejected_before_bridge() {
    let exports = AppExports {
        abi_version: abi_future,
        ..app(update_ok)
    };
    let mut seq = BootSequencer::new(EngineConfig::default(), source(exports));
    let err = seq.boot().unwrap_err();
    assert!(
        matches!(err, BootError::Load(LoadError::IncompatibleVersion { .. })),
        "{err:?}"
    );
    assert_eq!(seq.phase(), BootPhase::EngineStarted);
}

#[test]
fn init_sees_zeroed_capsule() {
    reset();
    let mut seq = BootSequencer::new(EngineConfig::default(), source(app(update_ok)));
    seq.boot().unwrap();

    assert_eq!(journal(), vec!["app:init:zeroed".to_string()]);
    let c = counter(&seq);
    assert_eq!(c.inits, 1);
    assert_eq!(c.updates, 0);
    assert!(seq.capsule_bytes().unwrap()[16..].iter().all(|b| *b == 0));
}

#[test]
fn app_init_error_is_fatal() {
    reset();
    let exports = AppExports {
        init: init_fail,
        ..app(update_ok)
    };
    let mut seq = BootSequencer::new(EngineConfig::default(), source(exports));
    assert!(matches!(seq.boot(), Err(BootError::AppInit(3))));
    assert_eq!(seq.phase(), BootPhase::EngineStarted);

    seq.shutdown();
    // app_shutdown is never called for an application that failed to initialize.
    assert_eq!(journal(), vec!["app:init".to_string()]);
}

#[test]
fn update_errors_do_not_stop_the_loop() {
    let mut seq = BootSequencer::new(EngineConfig::default(), source(app(update_err)));
    seq.boot().unwrap();

    for _ in 0..3 {
        assert_eq!(seq.run_frame().unwrap(), FrameOutcome::Continue);
    }
    assert_eq!(seq.phase(), BootPhase::Running);
    assert_eq!(seq.frame_index(), 3);
    assert_eq!(counter(&seq).updates, 3);
}

#[test]
fn request_shutdown_status_ends_run() {
    reset();
    let mut cfg = EngineConfig::default();
    cfg.runtime.frame_interval_ms = 0;
    let mut seq = BootSequencer::new(cfg, source(app(update_stop_at_two)));
    seq.boot().unwrap();
    seq.run().unwrap();

    assert_eq!(seq.phase(), BootPhase::ShuttingDown);
    assert_eq!(seq.frame_index(), 2);
    assert!(journal().contains(&"app:shutdown".to_string()));
    assert!(seq.capsule_address().is_none());
}

#[test]
fn host_request_shutdown_capability_stops_after_frame() {
    let mut seq = BootSequencer::new(EngineConfig::default(), source(app(update_host_shutdown)));
    seq.boot().unwrap();

    assert_eq!(seq.run_frame().unwrap(), FrameOutcome::Shutdown);
    assert!(seq.shutdown_token().is_requested());
    assert_eq!(counter(&seq).updates, 1);
    assert_eq!(seq.run_frame().unwrap(), FrameOutcome::Shutdown);
    assert_eq!(counter(&seq).updates, 1);
}

#[test]
fn external_token_stops_before_update() {
    let mut seq = BootSequencer::new(EngineConfig::default(), source(app(update_ok)));
    seq.boot().unwrap();
    seq.shutdown_token().request();
    assert_eq!(seq.run_frame().unwrap(), FrameOutcome::Shutdown);
    assert_eq!(counter(&seq).updates, 0);
}

#[test]
fn platform_close_and_teardown_order() {
    reset();
    let mut cfg = with_window();
    cfg.runtime.frame_interval_ms = 0;
    let mut seq = BootSequencer::new(cfg, source(app(update_ok)))
        .with_platform(RecordingPlatform {
            close_after: Some(2),
            pumped: 0,
        })
        .with_subsystem(Recorder::new("a"))
        .with_subsystem(Recorder::new("b"));

    seq.boot().unwrap();
    seq.run().unwrap();

    let j = journal();
    assert_eq!(j.iter().filter(|e| *e == "app:update").count(), 2);

    assert!(position(&j, "platform:init:Test") < position(&j, "a:start"));
    assert!(position(&j, "a:start") < position(&j, "b:start"));
    assert!(position(&j, "b:start") < position(&j, "app:init:zeroed"));

    let app_shutdown = position(&j, "app:shutdown");
    let b = position(&j, "b:shutdown");
    let a = position(&j, "a:shutdown");
    let release = position(&j, "platform:release");
    assert!(app_shutdown < b && b < a && a < release, "{j:?}");
}

#[test]
fn subsystem_params_and_disable_flag() {
    reset();
    let cfg = EngineConfig::default()
        .with_subsystem("a", SubsystemConfig::with_params(json!({ "level": 3 })))
        .with_subsystem("b", SubsystemConfig::disabled());
    let mut seq = BootSequencer::new(cfg, source(app(update_ok)))
        .with_subsystem(Recorder::new("a"))
        .with_subsystem(Recorder::new("b"))
        .with_subsystem(Recorder::new("c"));

    seq.boot().unwrap();
    seq.run_frame().unwrap();

    let j = journal();
    assert!(j.contains(&r#"a:configure:{"level":3}"#.to_string()));
    assert!(j.contains(&"c:configure:null".to_string()));
    assert!(!j.iter().any(|e| e.starts_with("b:")));
    assert!(position(&j, "a:update") < position(&j, "app:update"));
}

#[test]
fn subsystem_start_failure_is_reported_with_id() {
    reset();
    let mut seq = BootSequencer::new(EngineConfig::default(), source(app(update_ok)))
        .with_subsystem(Recorder::new("a"))
        .with_subsystem(Recorder {
            id: "b",
            fail_start: true,
        });

    match seq.boot() {
        Err(BootError::Subsystem { id, .. }) => assert_eq!(id, "b"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(seq.phase(), BootPhase::EngineBooted);

    seq.shutdown();
    let j = journal();
    assert!(j.contains(&"a:shutdown".to_string()));
    assert!(!j.contains(&"b:shutdown".to_string()));
}

#[test]
fn phases_cannot_be_skipped() {
    let mut seq = BootSequencer::new(EngineConfig::default(), source(app(update_ok)));
    match seq.start_engine() {
        Err(BootError::InvalidTransition { from, to }) => {
            assert_eq!(from, BootPhase::Uninitialized);
            assert_eq!(to, BootPhase::EngineStarted);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(matches!(
        seq.run_frame(),
        Err(BootError::InvalidTransition { .. })
    ));
}

#[test]
fn frame_budget_and_idempotent_shutdown() {
    reset();
    let mut cfg = EngineConfig::default();
    cfg.runtime.max_frames = Some(4);
    cfg.runtime.frame_interval_ms = 0;
    let mut seq = BootSequencer::new(cfg, source(app(update_ok)));
    seq.boot().unwrap();
    seq.run().unwrap();
    seq.shutdown();
    drop(seq);

    let j = journal();
    assert_eq!(j.iter().filter(|e| *e == "app:update").count(), 4);
    assert_eq!(j.iter().filter(|e| *e == "app:shutdown").count(), 1);
}

#[test]
fn capsule_address_is_stable_across_frames() {
    let mut seq = BootSequencer::new(EngineConfig::default(), source(app(update_ok)));
    seq.boot().unwrap();
    let addr = seq.capsule_address();
    for _ in 0..5 {
        seq.run_frame().unwrap();
    }
    assert_eq!(seq.capsule_address(), addr);
    assert_eq!(counter(&seq).updates, 5);
    assert_eq!(seq.bridge().map(|b| b.generation()), Some(0));
}
