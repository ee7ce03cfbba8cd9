//! Serial-to-broker bridge
//!
//! [`BridgeLoop`] runs two tasks. The ingest task reads serial lines, parses
//! them and pushes reading pairs into a [`BoundedQueue`]. The supervisor
//! owns the [`PubSubClient`] and the lifecycle state machine: it connects
//! with backoff, publishes queued pairs in order while connected, falls back
//! to reconnecting when the client reports a lost session, and drains on
//! shutdown.
//!
//! Bridge state, queue and statistics share one `tokio::sync::Mutex`.
//! Only the supervisor changes state or publishes, so a reconnect never
//! overlaps a publish.

mod ingest;
pub mod queue;
pub mod reconnect;
pub mod state;

pub use queue::BoundedQueue;
pub use reconnect::{ReconnectConfig, ReconnectionDecision};
pub use state::BridgeState;

use crate::bridge_span;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::observability::metrics;
use crate::protocol::{Channel, ReadingPair, SensorEnvelope, TopicTable};
use crate::serial::{LineSource, SerialError};
use crate::transport::{PubSubClient, PublishError, QoS};
use ingest::{run_ingest, IngestContext, IngestLimits};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// How long the ingest task gets to notice a stop request
const INGEST_STOP_GRACE: Duration = Duration::from_secs(1);

/// Runtime settings for one bridge
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub sensor_id: u32,
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub max_read_failures: u32,
    pub read_retry_delay: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            sensor_id: crate::protocol::DEFAULT_SENSOR_ID,
            queue_capacity: 100,
            drain_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
            max_read_failures: 5,
            read_retry_delay: Duration::from_millis(100),
        }
    }
}

impl BridgeSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            sensor_id: config.bridge.sensor_id,
            queue_capacity: config.bridge.queue_capacity,
            drain_timeout: config.bridge.drain_timeout(),
            reconnect: config.bridge.reconnect.clone(),
            max_read_failures: config.serial.max_read_failures,
            read_retry_delay: config.serial.read_retry_delay(),
        }
    }
}

/// Per-bridge counters, kept under the bridge lock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Lines received, blank ones included
    pub lines_read: u64,
    pub parse_errors: u64,
    pub malformed_lines: u64,
    pub read_failures: u64,
    pub pairs_queued: u64,
    pub pairs_dropped: u64,
    /// Pairs with both envelopes delivered to the client
    pub pairs_published: u64,
    pub envelopes_published: u64,
    pub publish_failures: u64,
    pub reconnects: u64,
    /// Pairs still unpublished when the bridge stopped
    pub pairs_abandoned: u64,
}

pub(crate) struct SharedState {
    state: BridgeState,
    queue: BoundedQueue<ReadingPair>,
    stats: BridgeStats,
}

/// A dequeued pair and the index of the next channel to publish
#[derive(Debug)]
struct PendingPair {
    pair: ReadingPair,
    next: usize,
}

/// Why the supervisor left its connect/publish cycle
#[derive(Debug)]
enum Stop {
    Shutdown,
    Fault(String),
}

/// How a connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The client reported the session dropped
    Lost,
    /// A publish was rejected while the client still looked connected
    PublishFailed,
}

/// Cloneable control surface for a running bridge
#[derive(Clone)]
pub struct BridgeHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    state_tx: Arc<watch::Sender<BridgeState>>,
    shared: Arc<Mutex<SharedState>>,
}

impl BridgeHandle {
    /// Request a graceful drain; safe to call more than once
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn state(&self) -> BridgeState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    pub async fn stats(&self) -> BridgeStats {
        self.shared.lock().await.stats.clone()
    }

    /// Pairs currently buffered
    pub async fn queue_len(&self) -> usize {
        self.shared.lock().await.queue.len()
    }
}

pub struct BridgeLoop<T> {
    settings: BridgeSettings,
    topics: TopicTable,
    client: T,
    shared: Arc<Mutex<SharedState>>,
    notify: Arc<Notify>,
    state_tx: Arc<watch::Sender<BridgeState>>,
    // Held so `changed()` never reports a closed channel
    _shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    in_flight: Option<PendingPair>,
    /// Consecutive connect or publish failures without a delivered envelope
    failed_attempts: u32,
    /// Set when a shutdown interrupted a publish; bounds the drain
    drain_deadline: Option<tokio::time::Instant>,
}

impl<T: PubSubClient + 'static> BridgeLoop<T> {
    pub fn new(config: &BridgeConfig, client: T) -> (Self, BridgeHandle) {
        Self::with_settings(
            BridgeSettings::from_config(config),
            config.topics.clone(),
            client,
        )
    }

    pub fn with_settings(
        settings: BridgeSettings,
        topics: TopicTable,
        client: T,
    ) -> (Self, BridgeHandle) {
        let shared = Arc::new(Mutex::new(SharedState {
            state: BridgeState::Starting,
            queue: BoundedQueue::new(settings.queue_capacity),
            stats: BridgeStats::default(),
        }));
        let (state_tx, _) = watch::channel(BridgeState::Starting);
        let state_tx = Arc::new(state_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let handle = BridgeHandle {
            shutdown_tx: shutdown_tx.clone(),
            state_tx: state_tx.clone(),
            shared: shared.clone(),
        };

        let bridge = Self {
            settings,
            topics,
            client,
            shared,
            notify: Arc::new(Notify::new()),
            state_tx,
            _shutdown_tx: shutdown_tx,
            shutdown_rx,
            in_flight: None,
            failed_attempts: 0,
            drain_deadline: None,
        };
        (bridge, handle)
    }

    /// Run the bridge to a terminal state.
    ///
    /// `open_source` acquires the serial input during Starting. Returns
    /// `Ok(())` after a graceful drain and `Err(BridgeError::Faulted)` when
    /// the bridge faults.
    pub async fn run<F, S>(self, open_source: F) -> BridgeResult<()>
    where
        F: FnOnce() -> Result<S, SerialError>,
        S: LineSource,
    {
        let span = bridge_span!(sensor_id = self.settings.sensor_id);
        self.run_inner(open_source).instrument(span).await
    }

    async fn run_inner<F, S>(mut self, open_source: F) -> BridgeResult<()>
    where
        F: FnOnce() -> Result<S, SerialError>,
        S: LineSource,
    {
        metrics().set_bridge_state(BridgeState::Starting.name());
        info!("Bridge starting");

        let source = match open_source() {
            Ok(source) => source,
            Err(e) => return self.fault(e.to_string()).await,
        };

        let (fault_tx, mut fault_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = IngestContext {
            shared: self.shared.clone(),
            notify: self.notify.clone(),
            fault_tx,
            limits: IngestLimits {
                max_read_failures: self.settings.max_read_failures,
                read_retry_delay: self.settings.read_retry_delay,
            },
        };
        let ingest_handle = tokio::spawn(run_ingest(source, ctx, stop_rx).in_current_span());

        if let Err(e) = self.transition(BridgeState::Connecting).await {
            stop_ingest(stop_tx, ingest_handle).await;
            return Err(e);
        }

        match self.supervise(&mut fault_rx).await {
            Stop::Shutdown => {
                stop_ingest(stop_tx, ingest_handle).await;
                self.drain().await
            }
            Stop::Fault(reason) => {
                stop_ingest(stop_tx, ingest_handle).await;
                self.client.disconnect().await;
                self.fault(reason).await
            }
        }
    }

    /// Connect, publish until the session drops, repeat
    async fn supervise(&mut self, fault_rx: &mut mpsc::Receiver<String>) -> Stop {
        loop {
            if let Err(stop) = self.connect_with_backoff(fault_rx).await {
                return stop;
            }
            if let Err(e) = self.transition(BridgeState::Running).await {
                return Stop::Fault(e.to_string());
            }

            match self.publish_while_connected(fault_rx).await {
                Err(stop) => return stop,
                Ok(SessionEnd::Lost) => self.failed_attempts = 0,
                // A broker that accepts connections but rejects every
                // publish must back off and count toward max_attempts
                Ok(SessionEnd::PublishFailed) => {
                    self.failed_attempts = self.failed_attempts.saturating_add(1);
                }
            }

            metrics().mqtt_connection_lost();
            self.shared.lock().await.stats.reconnects += 1;
            if let Err(e) = self.transition(BridgeState::Connecting).await {
                return Stop::Fault(e.to_string());
            }
        }
    }

    async fn connect_with_backoff(
        &mut self,
        fault_rx: &mut mpsc::Receiver<String>,
    ) -> Result<(), Stop> {
        loop {
            let shutdown_requested = *self.shutdown_rx.borrow();
            let (attempt, delay_ms) = match self
                .settings
                .reconnect
                .should_attempt_reconnection(self.failed_attempts, shutdown_requested)
            {
                ReconnectionDecision::Proceed { attempt, delay_ms } => (attempt, delay_ms),
                ReconnectionDecision::AbortShutdownRequested => return Err(Stop::Shutdown),
                ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts } => {
                    return Err(Stop::Fault(format!(
                        "Broker unreachable after {max_attempts} connection attempts"
                    )));
                }
            };

            if delay_ms > 0 {
                info!(attempt, delay_ms, "Waiting before reconnecting");
                tokio::select! {
                    _ = self.shutdown_rx.changed() => continue,
                    Some(reason) = fault_rx.recv() => return Err(Stop::Fault(reason)),
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
            }

            metrics().mqtt_connection_attempt();
            info!(attempt, "Connecting to broker");

            let result = tokio::select! {
                result = self.client.connect() => result,
                _ = self.shutdown_rx.changed() => continue,
                Some(reason) = fault_rx.recv() => return Err(Stop::Fault(reason)),
            };

            match result {
                Ok(()) => {
                    metrics().mqtt_connection_established();
                    info!(attempt, "Connected to broker");
                    return Ok(());
                }
                Err(e) => {
                    metrics().mqtt_connection_failed();
                    warn!(attempt, error = %e, "Broker connection failed");
                    self.failed_attempts = self.failed_attempts.saturating_add(1);
                }
            }
        }
    }

    /// Publish queued pairs until the session ends (`Ok`) or the bridge
    /// must stop (`Err`)
    async fn publish_while_connected(
        &mut self,
        fault_rx: &mut mpsc::Receiver<String>,
    ) -> Result<SessionEnd, Stop> {
        let mut state_rx = self.client.state_events();

        loop {
            if *self.shutdown_rx.borrow() {
                return Err(Stop::Shutdown);
            }
            if let Ok(reason) = fault_rx.try_recv() {
                return Err(Stop::Fault(reason));
            }
            let connection = self.client.connection_state();
            if !connection.is_connected() {
                warn!(state = %connection, "Broker session lost");
                return Ok(SessionEnd::Lost);
            }

            if self.take_next_pair().await {
                match self.publish_until_shutdown().await {
                    Some(Ok(())) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "Publishing reading pair failed, reconnecting");
                        return Ok(SessionEnd::PublishFailed);
                    }
                    None => {
                        warn!("Publish still pending at drain timeout, abandoning it");
                        return Err(Stop::Shutdown);
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown_rx.changed() => {}
                Some(reason) = fault_rx.recv() => return Err(Stop::Fault(reason)),
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(Stop::Fault("Client state channel closed".to_string()));
                    }
                }
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Publish the in-flight pair while watching for shutdown.
    ///
    /// A shutdown request starts the drain clock: the publish keeps its
    /// chance to finish until `drain_timeout` elapses, after which it is
    /// dropped and `None` is returned.
    async fn publish_until_shutdown(&mut self) -> Option<Result<(), PublishError>> {
        let grace = self.settings.drain_timeout;
        let mut shutdown_rx = self.shutdown_rx.clone();

        let (result, deadline) = {
            let publish = self.publish_in_flight();
            tokio::pin!(publish);
            tokio::select! {
                result = &mut publish => (Some(result), None),
                _ = shutdown_rx.changed() => {
                    let deadline = tokio::time::Instant::now() + grace;
                    (tokio::time::timeout_at(deadline, &mut publish).await.ok(), Some(deadline))
                }
            }
        };

        if deadline.is_some() {
            self.drain_deadline = deadline;
        }
        result
    }

    /// Make sure a pair is in flight, pulling from the queue if needed
    async fn take_next_pair(&mut self) -> bool {
        if self.in_flight.is_some() {
            return true;
        }
        let mut shared = self.shared.lock().await;
        match shared.queue.pop() {
            Some(pair) => {
                metrics().record_queue_depth(shared.queue.len());
                self.in_flight = Some(PendingPair { pair, next: 0 });
                true
            }
            None => false,
        }
    }

    /// Publish the remaining channels of the in-flight pair, in order.
    ///
    /// On failure the pair stays in flight with its progress kept, so a
    /// retry resumes at the channel that failed.
    async fn publish_in_flight(&mut self) -> Result<(), PublishError> {
        loop {
            let Some(pending) = self.in_flight.as_ref() else {
                return Ok(());
            };

            let Some(&channel) = Channel::PRODUCED.get(pending.next) else {
                debug!(
                    water = %pending.pair.water,
                    temperature = %pending.pair.temperature,
                    "Reading pair published"
                );
                self.in_flight = None;
                self.shared.lock().await.stats.pairs_published += 1;
                return Ok(());
            };

            if let Some(token) = pending.pair.token(channel) {
                let payload = SensorEnvelope::build(self.settings.sensor_id, token)
                    .serialize()
                    .map_err(PublishError::Serialization)?;
                let topic = self.topics.topic(channel);

                let started = Instant::now();
                if let Err(e) = self
                    .client
                    .publish(topic, payload.clone().into_bytes(), QoS::AtMostOnce)
                    .await
                {
                    metrics().publish_failed();
                    self.shared.lock().await.stats.publish_failures += 1;
                    return Err(e);
                }
                metrics().envelope_published(started.elapsed());
                debug!(topic = %topic, payload = %payload, "Published envelope");
                self.failed_attempts = 0;
                self.shared.lock().await.stats.envelopes_published += 1;
            }

            if let Some(pending) = self.in_flight.as_mut() {
                pending.next += 1;
            }
        }
    }

    /// Publish everything still buffered while the session holds
    async fn flush(&mut self) -> Result<(), PublishError> {
        while self.take_next_pair().await {
            self.publish_in_flight().await?;
        }
        Ok(())
    }

    async fn drain(&mut self) -> BridgeResult<()> {
        self.transition(BridgeState::Draining).await?;

        let deadline = self
            .drain_deadline
            .unwrap_or_else(|| tokio::time::Instant::now() + self.settings.drain_timeout);
        let connected = self.client.connection_state().is_connected();
        if connected && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout_at(deadline, self.flush()).await {
                Ok(Ok(())) => debug!("Buffered reading pairs flushed"),
                Ok(Err(e)) => warn!(error = %e, "Flush interrupted by publish failure"),
                Err(_) => warn!(
                    timeout_ms = self.settings.drain_timeout.as_millis() as u64,
                    "Drain timed out"
                ),
            }
        }

        let abandoned = {
            let mut shared = self.shared.lock().await;
            let queued = shared.queue.drain_all().len();
            let abandoned = (queued + usize::from(self.in_flight.take().is_some())) as u64;
            shared.stats.pairs_abandoned += abandoned;
            metrics().record_queue_depth(0);
            abandoned
        };
        if abandoned > 0 {
            warn!(abandoned, "Abandoning unpublished reading pairs");
        }

        self.client.disconnect().await;
        self.transition(BridgeState::Stopped).await?;
        info!("Bridge stopped");
        Ok(())
    }

    async fn fault(&self, reason: String) -> BridgeResult<()> {
        error!(reason = %reason, "Bridge faulted");
        self.transition(BridgeState::Faulted(reason.clone())).await?;
        Err(BridgeError::Faulted { reason })
    }

    /// Apply a state change under the bridge lock
    async fn transition(&self, next: BridgeState) -> BridgeResult<()> {
        let mut shared = self.shared.lock().await;
        if !shared.state.can_transition_to(&next) {
            return Err(BridgeError::InvalidTransition {
                from: shared.state.clone(),
                to: next,
            });
        }

        info!(from = %shared.state, to = %next, "Bridge state transition");
        shared.state = next.clone();
        metrics().set_bridge_state(next.name());
        metrics().record_queue_depth(shared.queue.len());
        self.state_tx.send_replace(next);
        Ok(())
    }
}

async fn stop_ingest(stop_tx: watch::Sender<bool>, mut handle: JoinHandle<()>) {
    let _ = stop_tx.send(true);
    if tokio::time::timeout(INGEST_STOP_GRACE, &mut handle)
        .await
        .is_err()
    {
        warn!("Serial ingest did not stop in time, aborting");
        handle.abort();
    }
}
