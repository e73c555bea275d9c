#![forbid(unsafe_op_in_unsafe_fn)]

//! Native window layer for the Sage boot sequencer, built on winit's non-blocking pump.

#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
mod pump;

#[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
pub use pump::{WinitPlatform, WinitWindowHandles};

use sage_core::{HeadlessPlatform, PlatformLayer};

/// Picks the platform layer for this process.
///
/// `SAGE_HEADLESS=1` (or a desktop without a usable event loop) selects the headless layer.
pub fn default_platform() -> Box<dyn PlatformLayer> {
    let headless = std::env::var("SAGE_HEADLESS")
        .map(|v| v != "0")
        .unwrap_or(false);
    select_platform(headless)
}

pub fn select_platform(headless: bool) -> Box<dyn PlatformLayer> {
    if headless {
        return Box::new(HeadlessPlatform::new());
    }

    #[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
    {
        match WinitPlatform::new() {
            Ok(p) => return Box::new(p),
            Err(e) => {
                log::warn!(
                    target: "sage::boot",
                    "platform: winit unavailable ({}), running headless",
                    e
                );
            }
        }
    }

    Box::new(HeadlessPlatform::new())
}
