//! Ripple sensor bridge
//!
//! Reads `water:temperature` frames from a serial device and publishes each
//! reading as a JSON envelope to its MQTT topic, reconnecting to the broker
//! and buffering readings in a bounded queue while it is unavailable.
//!
//! # Overview
//!
//! - [`protocol`]: frame parsing, the published envelope and the topic table
//! - [`serial`]: line-oriented reading from the serial device
//! - [`transport`]: the [`PubSubClient`](transport::PubSubClient) boundary and its MQTT adapter
//! - [`bridge`]: the supervisory loop, its state machine and reconnect policy
//!
//! # Quick Start
//!
//! ```rust
//! use ripple_bridge::protocol::{parse, RawLine, SensorEnvelope};
//!
//! let pair = parse(&RawLine::from("21.5:19.2")).unwrap();
//! let water = SensorEnvelope::build(1, pair.water).serialize().unwrap();
//! assert_eq!(water, r#"{"sensorId":1,"data":"21.5"}"#);
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod serial;
pub mod testing;
pub mod transport;

pub use bridge::{BridgeHandle, BridgeLoop, BridgeSettings, BridgeState, BridgeStats};
pub use config::*;
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
pub use serial::{LineSource, SerialError, SerialReader};
pub use transport::mqtt::MqttClient;
pub use transport::{ConnectionState, PubSubClient, QoS};
