//! Bridge lifecycle states and their allowed transitions

use std::fmt;

/// Lifecycle of a [`BridgeLoop`](super::BridgeLoop).
///
/// ```text
/// Starting -> Connecting <-> Running
///     |           |            |
///     +-----------+------------+--> Draining -> Stopped
///
/// any non-terminal state --> Faulted
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    Starting,
    Connecting,
    Running,
    Draining,
    Stopped,
    Faulted(String),
}

impl BridgeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeState::Stopped | BridgeState::Faulted(_))
    }

    pub fn can_transition_to(&self, next: &BridgeState) -> bool {
        use BridgeState::*;
        match (self, next) {
            (Stopped | Faulted(_), _) => false,
            (_, Faulted(_)) => true,
            (Starting, Connecting | Draining) => true,
            (Connecting, Running | Draining) => true,
            (Running, Connecting | Draining) => true,
            (Draining, Stopped) => true,
            _ => false,
        }
    }

    /// Short name used for metrics and log fields
    pub fn name(&self) -> &'static str {
        match self {
            BridgeState::Starting => "starting",
            BridgeState::Connecting => "connecting",
            BridgeState::Running => "running",
            BridgeState::Draining => "draining",
            BridgeState::Stopped => "stopped",
            BridgeState::Faulted(_) => "faulted",
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Faulted(reason) => write!(f, "faulted: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}
