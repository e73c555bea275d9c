use crate::error::SubsystemError;

use sage_app_api::FrameInfo;
use serde_json::Value;

/// An engine subsystem driven by the boot sequencer.
///
/// `configure` runs at `EngineBooted` with the params from the subsystem mapping (`Null` when
/// none were given), `start` at `EngineStarted`, `update` once per frame before the
/// application, and `shutdown` in reverse registration order.
pub trait Subsystem {
    fn id(&self) -> &'static str;

    fn configure(&mut self, _params: &Value) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn update(&mut self, _frame: &FrameInfo) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SubsystemError> {
        Ok(())
    }
}
