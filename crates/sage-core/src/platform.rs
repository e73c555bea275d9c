use crate::config::WindowConfig;
use crate::error::PlatformError;

/// Opaque handle to platform window resources. The core stores it and passes it back; it never
/// looks inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    Continue,
    CloseRequested,
}

/// Window and message-pump layer consumed by the boot sequencer.
pub trait PlatformLayer {
    fn name(&self) -> &'static str;

    fn init_window(&mut self, cfg: &WindowConfig) -> Result<PlatformHandle, PlatformError>;

    /// Drains pending OS messages. Must not block.
    fn process_pending_messages(&mut self, handle: PlatformHandle) -> PumpStatus;

    fn release(&mut self, handle: PlatformHandle) -> Result<(), PlatformError>;
}

/// Platform layer without a window. Optionally reports a close request after a number of pumps.
#[derive(Debug, Default)]
pub struct HeadlessPlatform {
    next_handle: u64,
    live: Option<PlatformHandle>,
    close_after: Option<u64>,
    pumped: u64,
}

impl HeadlessPlatform {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests close on the `frames`-th pump.
    #[inline]
    pub fn close_after(mut self, frames: u64) -> Self {
        self.close_after = Some(frames);
        self
    }

    #[inline]
    pub fn pumped(&self) -> u64 {
        self.pumped
    }
}

impl PlatformLayer for HeadlessPlatform {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn init_window(&mut self, cfg: &WindowConfig) -> Result<PlatformHandle, PlatformError> {
        self.next_handle += 1;
        let handle = PlatformHandle(self.next_handle);
        self.live = Some(handle);
        log::info!(
            target: "sage::boot",
            "platform: headless window '{}' {}x{}",
            cfg.title,
            cfg.width,
            cfg.height
        );
        Ok(handle)
    }

    fn process_pending_messages(&mut self, handle: PlatformHandle) -> PumpStatus {
        if self.live != Some(handle) {
            return PumpStatus::Continue;
        }
        self.pumped += 1;
        match self.close_after {
            Some(n) if self.pumped >= n => PumpStatus::CloseRequested,
            _ => PumpStatus::Continue,
        }
    }

    fn release(&mut self, handle: PlatformHandle) -> Result<(), PlatformError> {
        if self.live != Some(handle) {
            return Err(PlatformError::UnknownHandle(handle.0));
        }
        self.live = None;
        Ok(())
    }
}
