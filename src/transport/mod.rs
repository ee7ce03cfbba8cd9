//! Publish/subscribe transport boundary
//!
//! The bridge only needs to connect, publish and learn about connection
//! state changes. [`PubSubClient`] captures exactly that so the MQTT adapter
//! can be swapped for a mock in tests.

use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

pub mod mqtt;

/// Connection state owned by the client and observed by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The session ended with an error
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Delivery guarantee requested for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    /// Fire and forget; what the sensor topics use
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Errors establishing a broker session
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("Connection refused or lost before ConnAck: {0}")]
    Rejected(String),
    #[error("No ConnAck within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors publishing a payload
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Publishing failed")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
}

/// Transport used by the bridge loop
///
/// Broker endpoint, credentials and TLS settings are supplied once when the
/// client is constructed; `connect` may be called again after a session is
/// lost.
#[async_trait::async_trait]
pub trait PubSubClient: Send + Sync {
    /// Establish a session, returning once the broker acknowledged it
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// End the current session
    async fn disconnect(&mut self);

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), PublishError>;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Notification channel for state transitions.
    ///
    /// Transitions happen on the client's own task; receivers observe them
    /// without re-entering the bridge.
    fn state_events(&self) -> watch::Receiver<ConnectionState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Failed("io error".to_string()).to_string(),
            "failed: io error"
        );
    }

    #[test]
    fn test_only_connected_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Failed("x".to_string()).is_connected());
    }

    #[test]
    fn test_default_qos_is_at_most_once() {
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[test]
    fn test_publish_error_display() {
        let err = PublishError::NotConnected {
            state: ConnectionState::Disconnected,
        };
        assert_eq!(err.to_string(), "Not connected - current state: disconnected");
    }
}
