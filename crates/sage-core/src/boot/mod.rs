mod events;
mod phase;

pub use events::ReloadEvent;
pub use phase::BootPhase;

use events::ReloadNotifier;

use crate::bridge::BridgeTable;
use crate::build_mode::BUILD_MODE;
use crate::capsule::Capsule;
use crate::config::{EngineConfig, WindowConfig};
use crate::error::{BootError, BootResult, BuildError, PlatformError};
use crate::host::HostContext;
use crate::platform::{PlatformHandle, PlatformLayer, PumpStatus};
use crate::subsystem::Subsystem;
use crate::sync::ShutdownToken;
use crate::unit::{AppSource, AppUnit, StaticApp};

#[cfg(feature = "hot-reload")]
use crate::error::ReloadError;
#[cfg(feature = "hot-reload")]
use crate::hot::{ChangeSignal, ChangeStream, ModuleLoader, ReloadTrigger};

use crossbeam_channel::Receiver;
use sage_app_api::{AppCapability, Status, StatusOutcome};
use serde_json::Value;
use std::time::{Duration, Instant};

const MAX_FRAME_DT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    Shutdown,
}

/// Drives the engine from `Uninitialized` to `Running`, owns the reload transition and tears
/// everything down in reverse order.
///
/// The sequencer is the only writer of the boot phase. All calls into the application happen
/// on the thread that owns the sequencer.
pub struct BootSequencer {
    config: EngineConfig,
    source: AppSource,
    phase: BootPhase,
    shutdown: ShutdownToken,

    platform: Option<Box<dyn PlatformLayer>>,
    window: Option<WindowConfig>,
    platform_handle: Option<PlatformHandle>,

    subsystems: Vec<Box<dyn Subsystem>>,
    enabled: Vec<usize>,
    started: Vec<usize>,

    host: Option<HostContext>,
    unit: Option<AppUnit>,
    bridge: Option<BridgeTable>,
    capsule: Option<Capsule>,
    app_initialized: bool,

    #[cfg(feature = "hot-reload")]
    loader: Option<ModuleLoader>,
    #[cfg(feature = "hot-reload")]
    watch: Option<ChangeStream>,
    #[cfg(feature = "hot-reload")]
    reload_failures: u32,

    notifier: ReloadNotifier,
    frame_index: u64,
    last_frame: Option<Instant>,
    finished: bool,
}

impl BootSequencer {
    pub fn new(config: EngineConfig, source: AppSource) -> Self {
        Self {
            config,
            source,
            phase: BootPhase::Uninitialized,
            shutdown: ShutdownToken::new(),
            platform: None,
            window: None,
            platform_handle: None,
            subsystems: Vec::new(),
            enabled: Vec::new(),
            started: Vec::new(),
            host: None,
            unit: None,
            bridge: None,
            capsule: None,
            app_initialized: false,
            #[cfg(feature = "hot-reload")]
            loader: None,
            #[cfg(feature = "hot-reload")]
            watch: None,
            #[cfg(feature = "hot-reload")]
            reload_failures: 0,
            notifier: ReloadNotifier::default(),
            frame_index: 0,
            last_frame: None,
            finished: false,
        }
    }

    #[inline]
    pub fn with_platform(mut self, platform: impl PlatformLayer + 'static) -> Self {
        self.platform = Some(Box::new(platform));
        self
    }

    #[inline]
    pub fn with_boxed_platform(mut self, platform: Box<dyn PlatformLayer>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Subsystems start in registration order and shut down in reverse.
    #[inline]
    pub fn with_subsystem(mut self, subsystem: impl Subsystem + 'static) -> Self {
        self.subsystems.push(Box::new(subsystem));
        self
    }

    #[inline]
    pub fn with_shutdown_token(mut self, token: ShutdownToken) -> Self {
        self.shutdown = token;
        self
    }

    #[inline]
    pub fn subscribe(&mut self) -> Receiver<ReloadEvent> {
        self.notifier.subscribe()
    }

    #[inline]
    pub fn phase(&self) -> BootPhase {
        self.phase
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Generation of the live application, 0 before the first load and in static builds.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.unit.as_ref().map_or(0, AppUnit::generation)
    }

    /// Number of completed `app_update` frames.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn capsule_address(&self) -> Option<usize> {
        self.capsule.as_ref().map(Capsule::address)
    }

    #[inline]
    pub fn capsule_bytes(&self) -> Option<&[u8]> {
        self.capsule.as_ref().map(Capsule::as_bytes)
    }

    #[inline]
    pub fn bridge(&self) -> Option<&BridgeTable> {
        self.bridge.as_ref()
    }

    #[inline]
    pub fn platform_handle(&self) -> Option<PlatformHandle> {
        self.platform_handle
    }

    /// Manual reload trigger for the live unit. `None` for statically linked applications.
    #[cfg(feature = "hot-reload")]
    pub fn reload_trigger(&self) -> Option<ReloadTrigger> {
        self.watch.as_ref().map(ChangeStream::trigger)
    }

    #[cfg(feature = "hot-reload")]
    #[inline]
    pub fn reload_failures(&self) -> u32 {
        self.reload_failures
    }

    #[cfg(feature = "hot-reload")]
    #[inline]
    pub fn open_handles(&self) -> usize {
        self.loader.as_ref().map_or(0, ModuleLoader::open_handles)
    }

    /// `Uninitialized` through `ApplicationBooted`. On error the phase stays at the last one
    /// reached; call [`BootSequencer::shutdown`] (or drop) to release what was acquired.
    pub fn boot(&mut self) -> BootResult<()> {
        self.boot_engine()?;
        self.start_engine()?;
        self.boot_application()
    }

    /// `Uninitialized -> EngineBooted`: validates the subsystem mapping and configures every
    /// enabled subsystem. Nothing runs yet.
    pub fn boot_engine(&mut self) -> BootResult<()> {
        self.check_transition(BootPhase::EngineBooted)?;
        log::info!(target: "sage::boot", "boot: build mode {}", BUILD_MODE);

        let known: Vec<&str> = self.subsystems.iter().map(|s| s.id()).collect();
        self.config.validate_subsystems(&known)?;

        let window = self.config.window_config()?;
        if window.is_some() && self.platform.is_none() {
            return Err(PlatformError::NotConfigured.into());
        }

        let mut enabled = Vec::new();
        for (i, s) in self.subsystems.iter_mut().enumerate() {
            let id = s.id();
            if !self.config.is_enabled(id) {
                log::debug!(target: "sage::boot", "boot: subsystem '{}' disabled", id);
                continue;
            }
            let params = self
                .config
                .subsystem(id)
                .map(|c| c.params.clone())
                .unwrap_or(Value::Null);
            s.configure(&params)
                .map_err(|source| BootError::Subsystem { id, source })?;
            log::debug!(target: "sage::boot", "boot: subsystem '{}' configured", id);
            enabled.push(i);
        }

        self.enabled = enabled;
        self.window = window;
        self.host = Some(HostContext::new(self.shutdown.clone()));
        self.set_phase(BootPhase::EngineBooted)
    }

    /// `EngineBooted -> EngineStarted`: creates the window (when requested) and starts the
    /// enabled subsystems.
    pub fn start_engine(&mut self) -> BootResult<()> {
        self.check_transition(BootPhase::EngineStarted)?;

        if let Some(window) = self.window.clone() {
            let platform = self.platform.as_mut().ok_or(PlatformError::NotConfigured)?;
            let handle = platform.init_window(&window)?;
            log::info!(
                target: "sage::boot",
                "boot: window '{}' created by '{}' ({:?})",
                window.title,
                platform.name(),
                handle
            );
            self.platform_handle = Some(handle);
        }

        for &i in &self.enabled {
            let s = &mut self.subsystems[i];
            let id = s.id();
            s.start().map_err(|source| BootError::Subsystem { id, source })?;
            self.started.push(i);
            log::debug!(target: "sage::boot", "boot: subsystem '{}' started", id);
        }

        self.set_phase(BootPhase::EngineStarted)
    }

    /// `EngineStarted -> ApplicationBooted`: first load, bridge, capsule, `app_init`.
    pub fn boot_application(&mut self) -> BootResult<()> {
        self.check_transition(BootPhase::ApplicationBooted)?;

        let unit = self.open_unit()?;
        let generation = unit.generation();

        let host = self.host.as_mut().ok_or(BootError::InvalidTransition {
            from: self.phase,
            to: BootPhase::ApplicationBooted,
        })?;
        host.set_generation(generation);

        let bridge = BridgeTable::build(unit.exports(), generation, host.host_api(), None)?;

        let size = usize::try_from(bridge.state_size());
        let align = usize::try_from(bridge.state_align());
        let (Ok(size), Ok(align)) = (size, align) else {
            return Err(BuildError::InvalidStateLayout {
                size: bridge.state_size(),
                align: bridge.state_align(),
            }
            .into());
        };
        let mut capsule = match Capsule::allocate(size, align, self.config.capsule.min_capacity) {
            Ok(c) => c,
            Err(e) => {
                log::error!(target: "sage::boot", "boot: {}", e);
                drop(bridge);
                self.release_unit(unit);
                return Err(e.into());
            }
        };

        host.begin_frame(0, Duration::ZERO);
        // SAFETY: the unit backing `bridge` is alive, the context and capsule are ours.
        let status = unsafe {
            bridge.invoke(AppCapability::Init, host.as_raw(), capsule.as_raw())
        }
        .unwrap_or(Status::OK);

        match status.outcome() {
            StatusOutcome::Ok => {}
            StatusOutcome::RequestShutdown => {
                log::info!(target: "sage::boot", "boot: application requested shutdown from init");
                self.shutdown.request();
            }
            StatusOutcome::Error(code) => {
                log::error!(target: "sage::boot", "boot: app_init failed with code {}", code);
                drop(bridge);
                self.release_unit(unit);
                return Err(BootError::AppInit(code));
            }
        }

        log::info!(
            target: "sage::boot",
            "boot: application '{}' booted (generation {}, capsule {} bytes at {:#x})",
            unit.name(),
            generation,
            capsule.capacity(),
            capsule.address()
        );

        #[cfg(feature = "hot-reload")]
        if let (Some(loader), AppUnit::Dynamic(module)) = (self.loader.as_ref(), &unit) {
            self.watch = Some(loader.watch(module.artifact()));
        }

        self.unit = Some(unit);
        self.bridge = Some(bridge);
        self.capsule = Some(capsule);
        self.app_initialized = true;
        self.set_phase(BootPhase::ApplicationBooted)
    }

    /// One iteration of the main loop: subsystems, `app_update`, platform messages, then the
    /// reload check at the quiescent point.
    pub fn run_frame(&mut self) -> BootResult<FrameOutcome> {
        match self.phase {
            BootPhase::Running => {}
            BootPhase::ApplicationBooted => self.set_phase(BootPhase::Running)?,
            BootPhase::ShuttingDown => return Ok(FrameOutcome::Shutdown),
            from => {
                return Err(BootError::InvalidTransition {
                    from,
                    to: BootPhase::Running,
                })
            }
        }

        if self.shutdown.is_requested() {
            return Ok(FrameOutcome::Shutdown);
        }

        let now = Instant::now();
        let dt = self
            .last_frame
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t))
            .min(MAX_FRAME_DT);
        self.last_frame = Some(now);

        let frame = match self.host.as_mut() {
            Some(h) => h.begin_frame(self.frame_index, dt),
            None => return Ok(FrameOutcome::Shutdown),
        };

        for &i in &self.enabled {
            let s = &mut self.subsystems[i];
            if let Err(e) = s.update(&frame) {
                log::warn!(
                    target: "sage::boot",
                    "boot: subsystem '{}' update failed: {}",
                    s.id(),
                    e
                );
            }
        }

        if let Some(status) = self.invoke_app(AppCapability::Update) {
            match status.outcome() {
                StatusOutcome::Ok => {}
                StatusOutcome::RequestShutdown => {
                    log::info!(target: "sage::boot", "boot: application requested shutdown");
                    self.shutdown.request();
                }
                StatusOutcome::Error(code) => {
                    log::warn!(
                        target: "sage::boot",
                        "boot: app_update returned error {} (generation {}, frame {})",
                        code,
                        self.generation(),
                        self.frame_index
                    );
                }
            }
        }
        self.frame_index += 1;

        if let (Some(platform), Some(handle)) = (self.platform.as_mut(), self.platform_handle) {
            if platform.process_pending_messages(handle) == PumpStatus::CloseRequested {
                log::info!(target: "sage::boot", "boot: platform requested close");
                self.shutdown.request();
            }
        }

        if self.shutdown.is_requested() {
            return Ok(FrameOutcome::Shutdown);
        }

        #[cfg(feature = "hot-reload")]
        self.poll_reload();

        if let Some(max) = self.config.runtime.max_frames {
            if self.frame_index >= max {
                log::info!(target: "sage::boot", "boot: frame budget of {} reached", max);
                return Ok(FrameOutcome::Shutdown);
            }
        }

        Ok(FrameOutcome::Continue)
    }

    /// Runs frames until shutdown is requested, then tears down.
    pub fn run(&mut self) -> BootResult<()> {
        let interval = Duration::from_millis(self.config.runtime.frame_interval_ms);
        loop {
            let start = Instant::now();
            if self.run_frame()? == FrameOutcome::Shutdown {
                break;
            }
            let spent = start.elapsed();
            if spent < interval {
                std::thread::sleep(interval - spent);
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Cancels the watcher, calls `app_shutdown`, unloads the unit, frees the capsule, then
    /// stops subsystems and releases the window in reverse acquisition order. Idempotent.
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        if self.phase != BootPhase::ShuttingDown {
            log::info!(target: "sage::boot", "boot: {} -> {}", self.phase, BootPhase::ShuttingDown);
            self.phase = BootPhase::ShuttingDown;
        }

        #[cfg(feature = "hot-reload")]
        if let Some(mut watch) = self.watch.take() {
            watch.cancel();
        }

        if self.app_initialized {
            self.app_initialized = false;
            if let Some(status) = self.invoke_app(AppCapability::Shutdown) {
                if let StatusOutcome::Error(code) = status.outcome() {
                    log::warn!(target: "sage::boot", "boot: app_shutdown returned error {}", code);
                }
            }
        }

        self.bridge = None;
        if let Some(unit) = self.unit.take() {
            self.release_unit(unit);
        }
        self.capsule = None;

        let started = std::mem::take(&mut self.started);
        for &i in started.iter().rev() {
            let s = &mut self.subsystems[i];
            if let Err(e) = s.shutdown() {
                log::warn!(
                    target: "sage::boot",
                    "boot: subsystem '{}' shutdown failed: {}",
                    s.id(),
                    e
                );
            }
        }

        if let (Some(platform), Some(handle)) =
            (self.platform.as_mut(), self.platform_handle.take())
        {
            if let Err(e) = platform.release(handle) {
                log::warn!(target: "sage::boot", "boot: platform release failed: {}", e);
            }
        }

        self.host = None;
        self.finished = true;
        log::info!(target: "sage::boot", "boot: shutdown complete");
    }

    fn check_transition(&self, to: BootPhase) -> BootResult<()> {
        if self.phase.can_transition(to) {
            Ok(())
        } else {
            Err(BootError::InvalidTransition {
                from: self.phase,
                to,
            })
        }
    }

    fn set_phase(&mut self, to: BootPhase) -> BootResult<()> {
        self.check_transition(to)?;
        log::debug!(target: "sage::boot", "boot: {} -> {}", self.phase, to);
        self.phase = to;
        Ok(())
    }

    fn open_unit(&mut self) -> BootResult<AppUnit> {
        match self.source.clone() {
            AppSource::Static { name, exports } => {
                Ok(AppUnit::Static(StaticApp::link(name, exports)?))
            }
            #[cfg(feature = "hot-reload")]
            AppSource::Dynamic(cfg) => {
                let loader = ModuleLoader::new(cfg)?;
                let module = loader.load(&loader.artifact_path())?;
                self.loader = Some(loader);
                Ok(AppUnit::Dynamic(module))
            }
        }
    }

    fn release_unit(&self, unit: AppUnit) {
        match unit {
            AppUnit::Static(_) => {}
            #[cfg(feature = "hot-reload")]
            AppUnit::Dynamic(module) => match self.loader.as_ref() {
                Some(loader) => loader.unload(module),
                None => drop(module),
            },
        }
    }

    fn invoke_app(&mut self, cap: AppCapability) -> Option<Status> {
        let bridge = self.bridge.as_ref()?;
        let host = self.host.as_mut()?;
        let capsule = self.capsule.as_mut()?;
        // SAFETY: `bridge` belongs to the live unit; it is dropped before the unit is released.
        unsafe { bridge.invoke(cap, host.as_raw(), capsule.as_raw()) }
    }
}

#[cfg(feature = "hot-reload")]
impl BootSequencer {
    fn poll_reload(&mut self) {
        let Some(watch) = self.watch.as_mut() else {
            return;
        };
        let Some(signal) = watch.poll() else {
            return;
        };
        self.perform_reload(signal == ChangeSignal::Manual);
    }

    /// `Running -> ReloadPending -> Running`. Failures keep the previous generation.
    fn perform_reload(&mut self, force: bool) {
        if let Err(e) = self.set_phase(BootPhase::ReloadPending) {
            log::warn!(target: "sage::boot", "boot: reload skipped: {}", e);
            return;
        }

        let previous = self.generation();
        match self.try_reload(force) {
            Ok(Some(generation)) => {
                self.reload_failures = 0;
                log::info!(
                    target: "sage::boot",
                    "boot: reloaded generation {} -> {}",
                    previous,
                    generation
                );
            }
            Ok(None) => {
                log::debug!(target: "sage::boot", "boot: artifact unchanged, reload skipped");
            }
            Err(e) => {
                self.reload_failures += 1;
                log::error!(
                    target: "sage::boot",
                    "boot: reload failed ({} consecutive): {}; keeping generation {}",
                    self.reload_failures,
                    e,
                    previous
                );
                self.notifier.publish(ReloadEvent::Failed {
                    generation: previous,
                    message: e.to_string(),
                });
            }
        }

        if let Err(e) = self.set_phase(BootPhase::Running) {
            log::error!(target: "sage::boot", "boot: {}", e);
        }
    }

    /// Load-then-swap. The old library is released only once the new bridge is built.
    fn try_reload(&mut self, force: bool) -> Result<Option<u64>, ReloadError> {
        let (Some(loader), Some(AppUnit::Dynamic(current))) =
            (self.loader.as_ref(), self.unit.as_ref())
        else {
            return Ok(None);
        };

        if !force && !loader.artifact_changed(current) {
            return Ok(None);
        }

        let previous = current.generation();
        let candidate = loader.reload(current)?;
        let Some(host_api) = self.host.as_ref().map(HostContext::host_api) else {
            loader.unload(candidate);
            return Ok(None);
        };

        let bridge = match BridgeTable::build(
            candidate.exports(),
            candidate.generation(),
            host_api,
            self.capsule.as_ref(),
        ) {
            Ok(b) => b,
            Err(e) => {
                loader.unload(candidate);
                return Err(e.into());
            }
        };
        let generation = candidate.generation();

        self.notifier.publish(ReloadEvent::AboutToReload { generation: previous });

        if let Some(status) = self.invoke_app(AppCapability::BeforeUnload) {
            self.log_hook_status(AppCapability::BeforeUnload, status);
        }

        self.bridge = Some(bridge);
        let old = self.unit.replace(AppUnit::Dynamic(candidate));
        if let Some(host) = self.host.as_mut() {
            host.set_generation(generation);
        }
        if let Some(old) = old {
            self.release_unit(old);
        }

        if let Some(status) = self.invoke_app(AppCapability::AfterReload) {
            self.log_hook_status(AppCapability::AfterReload, status);
        }

        self.notifier.publish(ReloadEvent::Reloaded { generation });
        Ok(Some(generation))
    }

    fn log_hook_status(&self, cap: AppCapability, status: Status) {
        match status.outcome() {
            StatusOutcome::Ok => {}
            StatusOutcome::RequestShutdown => {
                log::info!(
                    target: "sage::boot",
                    "boot: application requested shutdown from {}",
                    cap.as_str()
                );
                self.shutdown.request();
            }
            StatusOutcome::Error(code) => {
                log::warn!(target: "sage::boot", "boot: {} returned error {}", cap.as_str(), code);
            }
        }
    }
}

impl Drop for BootSequencer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
