use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use sage_core::{PlatformError, PlatformHandle, PlatformLayer, PumpStatus, WindowConfig};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus as LoopStatus},
    window::{Window, WindowAttributes, WindowId},
};

const CREATE_PUMP_SLICE: Duration = Duration::from_millis(5);
const CREATE_PUMP_ATTEMPTS: u32 = 400;

/// Raw handles of the live window, for renderers that attach a surface.
#[derive(Debug, Clone, Copy)]
pub struct WinitWindowHandles {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

#[derive(Default)]
struct PumpHost {
    pending: Option<WindowConfig>,
    window: Option<Window>,
    close_requested: bool,
    error: Option<String>,
}

impl PumpHost {
    fn create_pending(&mut self, event_loop: &ActiveEventLoop) {
        let Some(cfg) = self.pending.take() else {
            return;
        };
        let attrs = WindowAttributes::default()
            .with_title(cfg.title.clone())
            .with_inner_size(LogicalSize::new(cfg.width, cfg.height));

        match event_loop.create_window(attrs) {
            Ok(w) => self.window = Some(w),
            Err(e) => self.error = Some(e.to_string()),
        }
    }
}

impl ApplicationHandler for PumpHost {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        self.create_pending(event_loop);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.create_pending(event_loop);
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.close_requested = true;
            }
            _ => {}
        }
    }
}

/// winit-backed platform layer. Must be created and driven on the main thread.
pub struct WinitPlatform {
    event_loop: EventLoop<()>,
    host: PumpHost,
    handle: Option<PlatformHandle>,
    next_handle: u64,
}

impl WinitPlatform {
    pub fn new() -> Result<Self, PlatformError> {
        let event_loop = EventLoop::new().map_err(|e| PlatformError::EventLoop(e.to_string()))?;
        Ok(Self {
            event_loop,
            host: PumpHost::default(),
            handle: None,
            next_handle: 0,
        })
    }

    pub fn window_handles(&self) -> Option<WinitWindowHandles> {
        let w = self.host.window.as_ref()?;
        let window = w.window_handle().ok()?.as_raw();
        let display = w.display_handle().ok()?.as_raw();
        Some(WinitWindowHandles { window, display })
    }

    fn pump(&mut self, timeout: Duration) -> bool {
        matches!(
            self.event_loop.pump_app_events(Some(timeout), &mut self.host),
            LoopStatus::Exit(_)
        )
    }
}

impl PlatformLayer for WinitPlatform {
    fn name(&self) -> &'static str {
        "winit"
    }

    fn init_window(&mut self, cfg: &WindowConfig) -> Result<PlatformHandle, PlatformError> {
        if self.handle.is_some() {
            return Err(PlatformError::WindowCreation("window already created".into()));
        }

        self.host.pending = Some(cfg.clone());
        self.host.error = None;

        for _ in 0..CREATE_PUMP_ATTEMPTS {
            if self.pump(CREATE_PUMP_SLICE) {
                return Err(PlatformError::EventLoop(
                    "event loop exited during window creation".into(),
                ));
            }
            if let Some(e) = self.host.error.take() {
                return Err(PlatformError::WindowCreation(e));
            }
            if self.host.window.is_some() {
                self.next_handle += 1;
                let handle = PlatformHandle(self.next_handle);
                self.handle = Some(handle);
                log::debug!(target: "sage::boot", "platform: winit window {:?} ready", handle);
                return Ok(handle);
            }
        }

        self.host.pending = None;
        Err(PlatformError::WindowCreation("window was not created in time".into()))
    }

    fn process_pending_messages(&mut self, handle: PlatformHandle) -> PumpStatus {
        if self.handle != Some(handle) {
            return PumpStatus::Continue;
        }
        let exited = self.pump(Duration::ZERO);
        if exited || self.host.close_requested {
            PumpStatus::CloseRequested
        } else {
            PumpStatus::Continue
        }
    }

    fn release(&mut self, handle: PlatformHandle) -> Result<(), PlatformError> {
        if self.handle != Some(handle) {
            return Err(PlatformError::UnknownHandle(handle.0));
        }
        self.handle = None;
        self.host.window = None;
        // Let the OS see the destroy.
        let _ = self.pump(Duration::ZERO);
        Ok(())
    }
}
