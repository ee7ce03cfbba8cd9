//! rumqttc-backed [`PubSubClient`]
//!
//! Each `connect` builds a fresh rumqttc client and event loop with a new
//! client id. The event loop runs on its own task and reports state through
//! a watch channel; rumqttc's internal reconnection is not used, the bridge
//! decides when to reconnect.

use super::connection::{configure_mqtt_options, to_rumqttc_qos};
use super::message_handler::MessageHandler;
use crate::config::MqttSection;
use crate::mqtt_span;
use crate::transport::{ConnectError, ConnectionState, PubSubClient, PublishError, QoS};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Capacity of rumqttc's request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `disconnect` waits for the event loop to flush DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

pub struct MqttClient {
    config: MqttSection,
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl MqttClient {
    /// Create a client; the broker URL is validated here so configuration
    /// mistakes surface before the bridge starts
    pub fn new(config: MqttSection) -> Result<Self, ConnectError> {
        configure_mqtt_options(&config)?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            config,
            client: None,
            event_loop_handle: None,
            shutdown_tx: None,
            state_tx: Arc::new(state_tx),
            state_rx,
        })
    }

    pub fn broker_url(&self) -> &str {
        &self.config.broker_url
    }

    fn set_state(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
        let previous = state_tx.send_replace(next.clone());
        if previous != next {
            MessageHandler::log_state_transition(&previous, &next);
        }
    }

    /// Drive rumqttc until the session ends or shutdown is signalled
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!("MQTT event loop shutdown requested");
                    break;
                }
                event = event_loop.poll() => match event {
                    Ok(event) => {
                        let route = MessageHandler::route_mqtt_event(&event);
                        debug!(target: "mqtt_transport", route = ?route, "MQTT event");

                        if let Some(next) = MessageHandler::next_state(&route) {
                            let session_over = !next.is_connected();
                            Self::set_state(&state_tx, next);
                            if session_over {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        let next = MessageHandler::state_after_error(&state_tx.borrow(), &e.to_string());
                        Self::set_state(&state_tx, next);
                        break;
                    }
                }
            }
        }
        debug!("MQTT event loop stopped");
    }

    /// Wait until the event loop leaves `Connecting`
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        let outcome = tokio::time::timeout(timeout, async {
            let state = state_rx
                .wait_for(|state| !matches!(state, ConnectionState::Connecting))
                .await
                .map_err(|_| ConnectError::Rejected("state channel closed".to_string()))?;

            match &*state {
                ConnectionState::Connected => Ok(()),
                ConnectionState::Failed(reason) => Err(ConnectError::Rejected(reason.clone())),
                other => Err(ConnectError::Rejected(other.to_string())),
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Stop the event loop task without sending DISCONNECT
    async fn stop_event_loop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.client = None;
    }
}

#[async_trait]
impl PubSubClient for MqttClient {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.stop_event_loop().await;

        let mqtt_options = configure_mqtt_options(&self.config)?;
        let client_id = mqtt_options.client_id();
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self::set_state(&self.state_tx, ConnectionState::Connecting);
        let state_rx = self.state_tx.subscribe();

        let span = mqtt_span!(broker = %self.config.broker_url, client_id = %client_id);
        info!(parent: &span, "Connecting to MQTT broker");

        let handle = tokio::spawn(
            Self::run_event_loop(event_loop, self.state_tx.clone(), shutdown_rx).instrument(span),
        );

        self.client = Some(client);
        self.shutdown_tx = Some(shutdown_tx);
        self.event_loop_handle = Some(handle);

        let result =
            Self::wait_for_connection_confirmation(state_rx, self.config.connect_timeout()).await;

        if let Err(e) = &result {
            self.stop_event_loop().await;
            Self::set_state(&self.state_tx, ConnectionState::Failed(e.to_string()));
        }
        result
    }

    async fn disconnect(&mut self) {
        // Marks the coming socket close as expected
        Self::set_state(&self.state_tx, ConnectionState::Disconnected);

        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "DISCONNECT could not be queued");
            }
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("MQTT event loop finished after disconnect"),
                Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "MQTT event loop task failed"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("MQTT event loop did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        self.shutdown_tx = None;

        info!(broker = %self.config.broker_url, "MQTT client disconnected");
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), PublishError> {
        let state = self.connection_state();
        if !state.is_connected() {
            return Err(PublishError::NotConnected { state });
        }
        let client = self
            .client
            .as_ref()
            .ok_or(PublishError::NotConnected { state })?;

        client
            .publish(topic, to_rumqttc_qos(qos), false, payload)
            .await
            .map_err(|e| PublishError::Client(Box::new(e)))?;

        debug!(topic = %topic, "Queued MQTT publish");
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    fn state_events(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_broker_url() {
        let config = MqttSection::with_broker_url("http://localhost:1883");
        assert!(matches!(
            MqttClient::new(config),
            Err(ConnectError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_new_client_starts_disconnected() {
        let client = MqttClient::new(MqttSection::with_broker_url("mqtt://localhost")).unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.broker_url(), "mqtt://localhost");
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let client = MqttClient::new(MqttSection::with_broker_url("mqtt://localhost")).unwrap();
        let result = client
            .publish("ripple-water", b"{}".to_vec(), QoS::AtMostOnce)
            .await;
        assert!(matches!(
            result,
            Err(PublishError::NotConnected {
                state: ConnectionState::Disconnected
            })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_confirmation_times_out() {
        let (_tx, rx) = watch::channel(ConnectionState::Connecting);
        let result =
            MqttClient::wait_for_connection_confirmation(rx, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ConnectError::Timeout { timeout_ms: 20 })));
    }

    #[tokio::test]
    async fn test_wait_for_confirmation_reports_failure() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        tx.send_replace(ConnectionState::Failed("connection refused".to_string()));
        let result =
            MqttClient::wait_for_connection_confirmation(rx, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ConnectError::Rejected(reason)) if reason == "connection refused"));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let mut config = MqttSection::with_broker_url("mqtt://127.0.0.1:1");
        config.connect_timeout_ms = 2000;
        let mut client = MqttClient::new(config).unwrap();

        assert!(client.connect().await.is_err());
        assert!(matches!(
            client.connection_state(),
            ConnectionState::Failed(_)
        ));
    }
}
