//! Pure routing of rumqttc events onto connection state

use crate::transport::ConnectionState;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use tracing::{debug, error, info, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to a handling decision (pure function)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged(ack.pkid),
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// State the client moves to after a routed event, if it changes
    pub fn next_state(route: &EventRoute) -> Option<ConnectionState> {
        match route {
            EventRoute::ConnectionAcknowledged => Some(ConnectionState::Connected),
            EventRoute::Disconnected => Some(ConnectionState::Disconnected),
            EventRoute::PublishAcknowledged(_)
            | EventRoute::InfrastructureEvent(_)
            | EventRoute::OutgoingEvent => None,
        }
    }

    /// State after the event loop returned an error
    pub fn state_after_error(current: &ConnectionState, error: &str) -> ConnectionState {
        match current {
            // A locally requested disconnect also ends in a socket error
            ConnectionState::Disconnected => ConnectionState::Disconnected,
            _ => ConnectionState::Failed(error.to_string()),
        }
    }

    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!("MQTT broker closed the session");
            }
            (ConnectionState::Connected, ConnectionState::Failed(reason)) => {
                warn!(reason = %reason, "MQTT connection lost");
            }
            (_, ConnectionState::Failed(reason)) => {
                error!(reason = %reason, "MQTT connection failed");
            }
            _ => {
                debug!(from = %from, to = %to, "MQTT connection state changed");
            }
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the session
    ConnectionAcknowledged,
    /// Broker sent DISCONNECT
    Disconnected,
    PublishAcknowledged(u16),
    /// PingResp and other bookkeeping packets
    InfrastructureEvent(String),
    /// Outgoing event (handled by rumqttc)
    OutgoingEvent,
}
