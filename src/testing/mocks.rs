//! Mock implementations for testing
//!
//! [`MockPubSubClient`] records publishes and lets tests drive connection
//! state; [`MockLineSource`] replays scripted serial reads.

use crate::protocol::RawLine;
use crate::serial::{LineSource, SerialError};
use crate::transport::{ConnectError, ConnectionState, PubSubClient, PublishError, QoS};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

pub type PublishedMessage = (String, Vec<u8>);

/// How long a mock read waits before reporting an idle timeout
const MOCK_READ_IDLE: Duration = Duration::from_millis(20);

/// How long each mock publish takes to complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishPace {
    Immediate,
    Delayed(Duration),
    Hung,
}

struct MockClientInner {
    published: Mutex<Vec<PublishedMessage>>,
    published_notify: Notify,
    state_tx: watch::Sender<ConnectionState>,
    gate_tx: watch::Sender<bool>,
    connect_attempts: AtomicU32,
    failing_connects: AtomicU32,
    /// Remaining publishes that succeed; `None` means unlimited
    publish_budget: Mutex<Option<usize>>,
    publish_pace: Mutex<PublishPace>,
}

/// Mock pub/sub client; clones share state
#[derive(Clone)]
pub struct MockPubSubClient {
    inner: Arc<MockClientInner>,
}

impl Default for MockPubSubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPubSubClient {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (gate_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(MockClientInner {
                published: Mutex::new(Vec::new()),
                published_notify: Notify::new(),
                state_tx,
                gate_tx,
                connect_attempts: AtomicU32::new(0),
                failing_connects: AtomicU32::new(0),
                publish_budget: Mutex::new(None),
                publish_pace: Mutex::new(PublishPace::Immediate),
            }),
        }
    }

    /// Make the next `count` connect calls fail
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Park connect calls until [`release_connections`](Self::release_connections)
    pub fn hold_connections(&self) {
        self.inner.gate_tx.send_replace(false);
    }

    pub fn release_connections(&self) {
        self.inner.gate_tx.send_replace(true);
    }

    /// Mark the client connected without a connect call
    pub fn connect_now(&self) {
        self.inner.state_tx.send_replace(ConnectionState::Connected);
    }

    /// Drop the session as a broker or network failure would
    pub fn simulate_disconnect(&self) {
        self.inner
            .state_tx
            .send_replace(ConnectionState::Failed("simulated disconnect".to_string()));
    }

    /// Let `count` more publishes succeed, then fail every publish
    pub fn fail_publishes_after(&self, count: usize) {
        if let Ok(mut budget) = self.inner.publish_budget.lock() {
            *budget = Some(count);
        }
    }

    pub fn clear_publish_failures(&self) {
        if let Ok(mut budget) = self.inner.publish_budget.lock() {
            *budget = None;
        }
    }

    /// Make every publish take `delay` before it completes
    pub fn delay_publishes(&self, delay: Duration) {
        self.set_pace(PublishPace::Delayed(delay));
    }

    /// Make every publish wait forever, like a stalled broker
    pub fn hang_publishes(&self) {
        self.set_pace(PublishPace::Hung);
    }

    fn set_pace(&self, pace: PublishPace) {
        if let Ok(mut current) = self.inner.publish_pace.lock() {
            *current = pace;
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner
            .published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.published().into_iter().map(|(topic, _)| topic).collect()
    }

    pub fn published_payloads(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|(_, payload)| String::from_utf8_lossy(&payload).into_owned())
            .collect()
    }

    /// Wait until at least `count` messages were published
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.inner.published_notify.notified();
                if self.published().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state_tx.send_replace(state);
    }
}

#[async_trait]
impl PubSubClient for MockPubSubClient {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        let mut gate = self.inner.gate_tx.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let should_fail = self
            .inner
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            self.set_state(ConnectionState::Failed("mock connection refused".to_string()));
            return Err(ConnectError::Rejected("mock connection refused".to_string()));
        }

        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.set_state(ConnectionState::Disconnected);
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), PublishError> {
        let state = self.connection_state();
        if !state.is_connected() {
            return Err(PublishError::NotConnected { state });
        }

        let pace = self
            .inner
            .publish_pace
            .lock()
            .map(|pace| *pace)
            .unwrap_or(PublishPace::Immediate);
        match pace {
            PublishPace::Immediate => {}
            PublishPace::Delayed(delay) => tokio::time::sleep(delay).await,
            PublishPace::Hung => std::future::pending::<()>().await,
        }

        if let Ok(mut budget) = self.inner.publish_budget.lock() {
            match budget.as_mut() {
                Some(0) => {
                    return Err(PublishError::Client(Box::new(std::io::Error::other(
                        "mock publish failure",
                    ))))
                }
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }

        if let Ok(mut published) = self.inner.published.lock() {
            published.push((topic.to_string(), payload));
        }
        self.inner.published_notify.notify_waiters();
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    fn state_events(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }
}

pub type ScriptedRead = Result<Option<RawLine>, SerialError>;

/// Line source fed through a channel
pub struct MockLineSource {
    rx: mpsc::UnboundedReceiver<ScriptedRead>,
}

/// Sending half of a [`MockLineSource`]
#[derive(Clone)]
pub struct MockLineFeed {
    tx: mpsc::UnboundedSender<ScriptedRead>,
}

impl MockLineSource {
    pub fn channel() -> (Self, MockLineFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, MockLineFeed { tx })
    }

    /// Source that yields `reads` in order, then only idle timeouts
    pub fn scripted(reads: Vec<ScriptedRead>) -> Self {
        let (source, feed) = Self::channel();
        for read in reads {
            feed.push(read);
        }
        source
    }
}

impl MockLineFeed {
    pub fn push(&self, read: ScriptedRead) {
        // The source may already be dropped at the end of a test
        let _ = self.tx.send(read);
    }

    pub fn line(&self, line: &str) {
        self.push(Ok(Some(RawLine::from(line))));
    }

    pub fn error(&self, error: SerialError) {
        self.push(Err(error));
    }
}

#[async_trait]
impl LineSource for MockLineSource {
    async fn next_line(&mut self) -> Result<Option<RawLine>, SerialError> {
        match tokio::time::timeout(MOCK_READ_IDLE, self.rx.recv()).await {
            Ok(Some(read)) => read,
            Ok(None) => {
                tokio::time::sleep(MOCK_READ_IDLE).await;
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_connect_and_publish() {
        let mut client = MockPubSubClient::new();
        assert!(client
            .publish("t", b"x".to_vec(), QoS::AtMostOnce)
            .await
            .is_err());

        client.connect().await.unwrap();
        client
            .publish("ripple-water", b"{}".to_vec(), QoS::AtMostOnce)
            .await
            .unwrap();

        assert_eq!(client.connect_attempts(), 1);
        assert_eq!(client.published_topics(), vec!["ripple-water"]);
    }

    #[tokio::test]
    async fn test_mock_client_failing_connects() {
        let mut client = MockPubSubClient::new();
        client.fail_next_connects(2);

        assert!(client.connect().await.is_err());
        assert!(client.connect().await.is_err());
        assert!(client.connect().await.is_ok());
        assert_eq!(client.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_mock_client_publish_pace() {
        let mut client = MockPubSubClient::new();
        client.connect().await.unwrap();

        client.hang_publishes();
        let stalled = tokio::time::timeout(
            Duration::from_millis(30),
            client.publish("t", b"x".to_vec(), QoS::AtMostOnce),
        )
        .await;
        assert!(stalled.is_err());
        assert!(client.published().is_empty());

        client.delay_publishes(Duration::from_millis(5));
        client
            .publish("t", b"y".to_vec(), QoS::AtMostOnce)
            .await
            .unwrap();
        assert_eq!(client.published_payloads(), vec!["y"]);
    }

    #[tokio::test]
    async fn test_mock_client_state_events() {
        let client = MockPubSubClient::new();
        let mut events = client.state_events();

        client.connect_now();
        events.changed().await.unwrap();
        assert_eq!(*events.borrow(), ConnectionState::Connected);

        client.simulate_disconnect();
        events.changed().await.unwrap();
        assert!(!events.borrow().is_connected());
    }

    #[tokio::test]
    async fn test_mock_line_source_replays_then_idles() {
        let mut source = MockLineSource::scripted(vec![
            Ok(Some(RawLine::from("1:2"))),
            Err(SerialError::DeviceClosed),
        ]);

        assert_eq!(source.next_line().await.unwrap(), Some(RawLine::from("1:2")));
        assert!(matches!(
            source.next_line().await,
            Err(SerialError::DeviceClosed)
        ));
        assert_eq!(source.next_line().await.unwrap(), None);
    }
}
