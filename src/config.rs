//! Bridge configuration
//!
//! All settings are read once at startup from a TOML file and passed by value
//! into the serial reader, the MQTT client and the bridge loop. Broker
//! credentials never live in the file: it names the environment variables
//! that hold them.

use crate::bridge::ReconnectConfig;
use crate::protocol::TopicTable;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub serial: SerialSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub topics: TopicTable,
    #[serde(default)]
    pub bridge: BridgeSection,
}

/// Serial device settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialSection {
    /// Device path, e.g. `/dev/ttyACM0` or `/dev/cu.usbmodem1201`
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Inactivity bound for one line read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// "none", "even" or "odd"
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Longest accepted line in bytes, terminator excluded
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Consecutive read failures tolerated before the bridge faults
    #[serde(default = "default_max_read_failures")]
    pub max_read_failures: u32,
    #[serde(default = "default_read_retry_delay_ms")]
    pub read_retry_delay_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_max_line_length() -> usize {
    1024
}

fn default_max_read_failures() -> u32 {
    5
}

fn default_read_retry_delay_ms() -> u64 {
    100
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            max_line_length: default_max_line_length(),
            max_read_failures: default_max_read_failures(),
            read_retry_delay_ms: default_read_retry_delay_ms(),
        }
    }
}

impl SerialSection {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// `mqtt://host:port` for plain TCP, `mqtts://host:port` for TLS
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Skip server certificate validation on `mqtts://` connections
    #[serde(default)]
    pub allow_insecure_certificates: bool,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long one connect attempt waits for the broker's ConnAck
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_client_id_prefix() -> String {
    "publish".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl MqttSection {
    /// Section pointing at a broker with every optional field defaulted
    pub fn with_broker_url(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            username_env: None,
            password_env: None,
            allow_insecure_certificates: false,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Username from the configured environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Password from the configured environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

/// Bridge loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// `sensorId` written into every envelope
    #[serde(default = "default_sensor_id")]
    pub sensor_id: u32,
    /// Reading pairs buffered while the broker is unavailable
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Grace period for flushing buffered pairs on shutdown
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_sensor_id() -> u32 {
    crate::protocol::DEFAULT_SENSOR_ID
}

fn default_queue_capacity() -> usize {
    100
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            sensor_id: default_sensor_id(),
            queue_capacity: default_queue_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BridgeSection {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_serial(&self.serial)?;
        validate_broker_url(&self.mqtt.broker_url)?;

        if self.mqtt.client_id_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id_prefix must not be empty".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.topics
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("topics: {e}")))?;

        if self.bridge.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.queue_capacity must be greater than 0".to_string(),
            ));
        }
        self.bridge
            .reconnect
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("bridge.reconnect: {e}")))?;

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[serial]
device = "/dev/ttyACM0"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn validate_serial(serial: &SerialSection) -> Result<(), ConfigError> {
    if serial.device.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(
            "serial.device must not be empty".to_string(),
        ));
    }
    if serial.baud_rate == 0 {
        return Err(ConfigError::InvalidConfig(
            "serial.baud_rate must be greater than 0".to_string(),
        ));
    }
    if serial.read_timeout_ms == 0 {
        return Err(ConfigError::InvalidConfig(
            "serial.read_timeout_ms must be greater than 0".to_string(),
        ));
    }
    if !(5..=8).contains(&serial.data_bits) {
        return Err(ConfigError::InvalidConfig(format!(
            "serial.data_bits must be 5-8, got {}",
            serial.data_bits
        )));
    }
    if !matches!(
        serial.parity.to_lowercase().as_str(),
        "none" | "even" | "odd"
    ) {
        return Err(ConfigError::InvalidConfig(format!(
            "serial.parity must be none, even or odd, got '{}'",
            serial.parity
        )));
    }
    if !(1..=2).contains(&serial.stop_bits) {
        return Err(ConfigError::InvalidConfig(format!(
            "serial.stop_bits must be 1 or 2, got {}",
            serial.stop_bits
        )));
    }
    if serial.max_line_length == 0 {
        return Err(ConfigError::InvalidConfig(
            "serial.max_line_length must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Broker URLs must be `mqtt://` or `mqtts://` with a host
pub fn validate_broker_url(broker_url: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "mqtt" | "mqtts") {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (scheme must be mqtt or mqtts)"
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string()));
    }

    Ok(url)
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}
