//! Configuration loading and validation tests
//!
//! Tests focus on behavior of loading from disk: defaults, overrides and
//! the errors a broken file produces.

use ripple_bridge::bridge::BridgeSettings;
use ripple_bridge::config::{BridgeConfig, ConfigError};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_minimal_config_loads_with_defaults() {
    let file = write_config(
        r#"
[serial]
device = "/dev/ttyACM0"

[mqtt]
broker_url = "mqtts://broker.example.com"
"#,
    );

    let config = BridgeConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.serial.device, "/dev/ttyACM0");
    assert_eq!(config.serial.baud_rate, 9600);
    assert_eq!(config.serial.max_line_length, 1024);
    assert_eq!(config.mqtt.keep_alive_secs, 60);
    assert_eq!(config.mqtt.connect_timeout(), Duration::from_secs(10));
    assert_eq!(config.topics.water, "ripple-water");
    assert_eq!(config.topics.temperature, "ripple-temperature");
    assert_eq!(config.topics.solar, "ripple-solar");
    assert_eq!(config.bridge.drain_timeout(), Duration::from_secs(5));
    assert_eq!(config.bridge.reconnect.max_attempts, None);
    assert_eq!(config.bridge.reconnect.initial_delay_ms, 500);
    assert_eq!(config.bridge.reconnect.max_delay_ms, 30_000);
}

#[test]
fn test_bridge_settings_follow_config() {
    let file = write_config(
        r#"
[serial]
device = "/dev/cu.usbmodem1201"
max_read_failures = 9
read_retry_delay_ms = 250

[mqtt]
broker_url = "mqtt://localhost:1883"

[bridge]
sensor_id = 3
queue_capacity = 7
drain_timeout_ms = 1500

[bridge.reconnect]
max_attempts = 4
"#,
    );

    let config = BridgeConfig::load_from_file(file.path()).unwrap();
    let settings = BridgeSettings::from_config(&config);

    assert_eq!(settings.sensor_id, 3);
    assert_eq!(settings.queue_capacity, 7);
    assert_eq!(settings.drain_timeout, Duration::from_millis(1500));
    assert_eq!(settings.max_read_failures, 9);
    assert_eq!(settings.read_retry_delay, Duration::from_millis(250));
    assert_eq!(settings.reconnect.max_attempts, Some(4));
}

#[test]
fn test_missing_file_is_read_error() {
    let result = BridgeConfig::load_from_file(std::path::Path::new(
        "/nonexistent/ripple-bridge.toml",
    ));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_missing_required_field_is_parse_error() {
    let file = write_config(
        r#"
[serial]
baud_rate = 115200

[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    let result = BridgeConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_wrong_scheme_rejected() {
    let file = write_config(
        r#"
[serial]
device = "/dev/ttyACM0"

[mqtt]
broker_url = "tcp://localhost:1883"
"#,
    );

    let result = BridgeConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
}

#[test]
fn test_duplicate_topics_rejected() {
    let file = write_config(
        r#"
[serial]
device = "/dev/ttyACM0"

[mqtt]
broker_url = "mqtt://localhost:1883"

[topics]
water = "ripple"
temperature = "ripple"
"#,
    );

    let result = BridgeConfig::load_from_file(file.path());
    assert!(matches!(
        result,
        Err(ConfigError::InvalidConfig(msg)) if msg.contains("share topic")
    ));
}

#[test]
fn test_zero_max_attempts_rejected() {
    let file = write_config(
        r#"
[serial]
device = "/dev/ttyACM0"

[mqtt]
broker_url = "mqtt://localhost:1883"

[bridge.reconnect]
max_attempts = 0
"#,
    );

    let result = BridgeConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_round_trips_through_toml() {
    let file = write_config(
        r#"
[serial]
device = "/dev/ttyACM0"

[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "RIPPLE_MQTT_USER"
"#,
    );

    let config = BridgeConfig::load_from_file(file.path()).unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = BridgeConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(config, reparsed);
}
