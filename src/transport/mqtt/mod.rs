//! MQTT adapter for the [`PubSubClient`](crate::transport::PubSubClient) boundary
//!
//! - [`connection`] - pure option building from configuration
//! - [`message_handler`] - pure routing of rumqttc events
//! - [`tls`] - rustls transport selection
//! - [`client`] - event loop task and publishing
//!
//! ```rust,no_run
//! use ripple_bridge::config::MqttSection;
//! use ripple_bridge::transport::mqtt::MqttClient;
//! use ripple_bridge::transport::{PubSubClient, QoS};
//!
//! # tokio_test::block_on(async {
//! let mut client = MqttClient::new(MqttSection::with_broker_url("mqtt://localhost:1883"))?;
//! client.connect().await?;
//! client
//!     .publish("ripple-water", br#"{"sensorId":1,"data":"21.5"}"#.to_vec(), QoS::AtMostOnce)
//!     .await?;
//! client.disconnect().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod tls;

pub use client::MqttClient;
pub use connection::{build_client_id, configure_mqtt_options, parse_endpoint, BrokerEndpoint};
pub use message_handler::{EventRoute, MessageHandler};
