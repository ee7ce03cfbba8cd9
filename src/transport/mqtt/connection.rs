//! Pure connection configuration for the MQTT client
//!
//! Builds rumqttc options from [`MqttSection`]: endpoint, client id,
//! credentials and TLS transport.

use super::tls::tls_transport;
use crate::config::{validate_broker_url, MqttSection};
use crate::transport::{ConnectError, QoS};
use rumqttc::v5::{mqttbytes::QoS as RumqttcQoS, MqttOptions};
use std::time::Duration;
use tracing::warn;

/// Broker endpoint extracted from the configured URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse the broker URL; `mqtts` selects TLS and port 8883 by default
pub fn parse_endpoint(broker_url: &str) -> Result<BrokerEndpoint, ConnectError> {
    let url = validate_broker_url(broker_url)
        .map_err(|_| ConnectError::InvalidBrokerUrl(broker_url.to_string()))?;

    let host = url
        .host_str()
        .ok_or_else(|| ConnectError::InvalidBrokerUrl(broker_url.to_string()))?;
    let tls = url.scheme() == "mqtts";
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Client id unique per connection attempt: `<prefix>-<unix millis>`
pub fn build_client_id(prefix: &str) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{prefix}-{timestamp}")
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, ConnectError> {
    let endpoint = parse_endpoint(&config.broker_url)?;

    let mut mqtt_options = MqttOptions::new(
        build_client_id(&config.client_id_prefix),
        endpoint.host.as_str(),
        endpoint.port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    if endpoint.tls {
        if config.allow_insecure_certificates {
            warn!(
                broker = %config.broker_url,
                "Server certificate validation is disabled for this broker"
            );
        }
        mqtt_options.set_transport(tls_transport(config.allow_insecure_certificates)?);
    } else if config.allow_insecure_certificates {
        warn!(
            broker = %config.broker_url,
            "allow_insecure_certificates has no effect on a plain mqtt:// connection"
        );
    }

    Ok(mqtt_options)
}

/// Map the transport-neutral QoS onto rumqttc's
pub fn to_rumqttc_qos(qos: QoS) -> RumqttcQoS {
    match qos {
        QoS::AtMostOnce => RumqttcQoS::AtMostOnce,
        QoS::AtLeastOnce => RumqttcQoS::AtLeastOnce,
        QoS::ExactlyOnce => RumqttcQoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_endpoint() {
        let endpoint = parse_endpoint("mqtt://localhost").unwrap();
        assert_eq!(
            endpoint,
            BrokerEndpoint {
                host: "localhost".to_string(),
                port: 1883,
                tls: false
            }
        );
    }

    #[test]
    fn test_parse_tls_endpoint() {
        let endpoint = parse_endpoint("mqtts://broker.example.com").unwrap();
        assert_eq!(endpoint.port, 8883);
        assert!(endpoint.tls);

        let endpoint = parse_endpoint("mqtts://broker.example.com:9883").unwrap();
        assert_eq!(endpoint.port, 9883);
    }

    #[test]
    fn test_invalid_broker_url() {
        assert!(matches!(
            parse_endpoint("invalid-url"),
            Err(ConnectError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            parse_endpoint("ws://localhost:1883"),
            Err(ConnectError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_client_id_uses_prefix() {
        let id = build_client_id("publish");
        assert!(id.starts_with("publish-"));
        assert!(id["publish-".len()..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = MqttSection::with_broker_url("mqtt://localhost:1883");
        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_configure_insecure_tls_options() {
        let mut config = MqttSection::with_broker_url("mqtts://localhost");
        config.allow_insecure_certificates = true;
        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 8883));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_rumqttc_qos(QoS::AtMostOnce), RumqttcQoS::AtMostOnce);
        assert_eq!(to_rumqttc_qos(QoS::AtLeastOnce), RumqttcQoS::AtLeastOnce);
        assert_eq!(to_rumqttc_qos(QoS::ExactlyOnce), RumqttcQoS::ExactlyOnce);
    }
}
