//! Engine lifecycle state.

/// Where a [`crate::DiscoveryEngine`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No sockets open. Initial and terminal state.
    Inactive,
    /// Binding sockets and sending the first announcement.
    Starting,
    /// Pulsing and answering peers.
    Broadcasting,
}

impl EngineState {
    /// Whether `start` would open sockets from this state.
    pub fn can_start(self) -> bool {
        self == Self::Inactive
    }

    pub fn is_running(self) -> bool {
        self == Self::Broadcasting
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Starting => write!(f, "starting"),
            Self::Broadcasting => write!(f, "broadcasting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_inactive_can_start() {
        assert!(EngineState::Inactive.can_start());
        assert!(!EngineState::Starting.can_start());
        assert!(!EngineState::Broadcasting.can_start());
    }

    #[test]
    fn only_broadcasting_is_running() {
        assert!(EngineState::Broadcasting.is_running());
        assert!(!EngineState::Starting.is_running());
        assert!(!EngineState::Inactive.is_running());
    }

    #[test]
    fn display() {
        assert_eq!(EngineState::Broadcasting.to_string(), "broadcasting");
    }
}
