//! Demo application unit. Built as a `cdylib` for hot reload and as an `rlib` for static hosts.

use sage_app_api::{AppContext, Status};

/// Everything the demo keeps across frames and reloads. Lives in the engine's capsule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DemoState {
    pub boots: u64,
    pub frames: u64,
    pub reloads: u64,
    pub checksum: u64,
}

const REPORT_EVERY: u64 = 120;

impl DemoState {
    /// One deterministic simulation step.
    #[inline]
    pub fn step(&mut self) {
        self.frames += 1;
        self.checksum = self.checksum.wrapping_mul(31).wrapping_add(self.frames);
    }
}

fn init(ctx: &mut AppContext<'_>, state: &mut DemoState) -> Status {
    state.boots += 1;
    ctx.info(&format!("demo: init (generation {})", ctx.generation()));
    Status::OK
}

fn update(ctx: &mut AppContext<'_>, state: &mut DemoState) -> Status {
    state.step();
    if state.frames % REPORT_EVERY == 0 {
        ctx.debug(&format!(
            "demo: frame {} checksum {:016x} uptime {:.1}s",
            state.frames,
            state.checksum,
            ctx.elapsed().as_secs_f32()
        ));
    }
    Status::OK
}

fn shutdown(ctx: &mut AppContext<'_>, state: &mut DemoState) -> Status {
    ctx.info(&format!(
        "demo: shutdown after {} frames, {} reloads",
        state.frames, state.reloads
    ));
    Status::OK
}

fn before_unload(ctx: &mut AppContext<'_>, state: &mut DemoState) -> Status {
    ctx.debug(&format!(
        "demo: generation {} unloading at frame {}",
        ctx.generation(),
        state.frames
    ));
    Status::OK
}

fn after_reload(ctx: &mut AppContext<'_>, state: &mut DemoState) -> Status {
    state.reloads += 1;
    ctx.info(&format!(
        "demo: reloaded as generation {} (frame {}, reload #{})",
        ctx.generation(),
        state.frames,
        state.reloads
    ));
    Status::OK
}

sage_app_api::export_app! {
    state: DemoState,
    init: init,
    update: update,
    shutdown: shutdown,
    hooks: {
        BeforeUnload => before_unload,
        AfterReload => after_reload,
    },
}
