#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BootPhase {
    Uninitialized,
    EngineBooted,
    EngineStarted,
    ApplicationBooted,
    Running,
    ReloadPending,
    ShuttingDown,
}

impl BootPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            BootPhase::Uninitialized => "Uninitialized",
            BootPhase::EngineBooted => "EngineBooted",
            BootPhase::EngineStarted => "EngineStarted",
            BootPhase::ApplicationBooted => "ApplicationBooted",
            BootPhase::Running => "Running",
            BootPhase::ReloadPending => "ReloadPending",
            BootPhase::ShuttingDown => "ShuttingDown",
        }
    }

    /// Whether the sequencer may move from `self` to `to`.
    ///
    /// Shutdown is reachable from every phase so partially booted engines can be torn down.
    pub fn can_transition(self, to: BootPhase) -> bool {
        use BootPhase::*;
        matches!(
            (self, to),
            (Uninitialized, EngineBooted)
                | (EngineBooted, EngineStarted)
                | (EngineStarted, ApplicationBooted)
                | (ApplicationBooted, Running)
                | (Running, ReloadPending)
                | (ReloadPending, Running)
                | (_, ShuttingDown)
        )
    }
}

impl std::fmt::Display for BootPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::BootPhase::*;

    #[test]
    fn forward_path_is_linear() {
        assert!(Uninitialized.can_transition(EngineBooted));
        assert!(!Uninitialized.can_transition(EngineStarted));
        assert!(!EngineStarted.can_transition(Running));
        assert!(Running.can_transition(ReloadPending));
        assert!(ReloadPending.can_transition(Running));
        assert!(!ReloadPending.can_transition(ApplicationBooted));
        assert!(EngineBooted.can_transition(ShuttingDown));
        assert!(!ShuttingDown.can_transition(Running));
    }
}
