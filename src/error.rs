//! Top-level error type for the bridge
//!
//! Component errors stay in their own modules; only what can end a bridge
//! run is collected here.

use crate::bridge::BridgeState;
use crate::config::ConfigError;
use crate::transport::ConnectError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: BridgeState, to: BridgeState },

    /// The bridge reached its Faulted terminal state
    #[error("Bridge faulted: {reason}")]
    Faulted { reason: String },
}

impl BridgeError {
    pub fn faulted<S: Into<String>>(reason: S) -> Self {
        Self::Faulted {
            reason: reason.into(),
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config(_) => 2,
            _ => 1,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faulted_constructor() {
        let err = BridgeError::faulted("Serial device closed");
        assert!(matches!(err, BridgeError::Faulted { ref reason } if reason == "Serial device closed"));
        assert_eq!(err.to_string(), "Bridge faulted: Serial device closed");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = BridgeError::InvalidTransition {
            from: BridgeState::Stopped,
            to: BridgeState::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from stopped to running"
        );
    }

    #[test]
    fn test_from_component_errors() {
        let err: BridgeError = ConnectError::Timeout { timeout_ms: 10 }.into();
        assert_eq!(err.to_string(), "Connection error: No ConnAck within 10ms");

        let err: BridgeError = ConfigError::InvalidConfig("bad".to_string()).into();
        assert_eq!(err.exit_code(), 2);
    }
}
