//! Process-wide counters for the bridge
//!
//! Hot-path counters are atomics; the state name and publish latency
//! samples sit behind std mutexes. A [`MetricsSnapshot`] serializes the
//! whole set for logging.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of publish latency samples kept for percentiles
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

pub struct MetricsCollector {
    // Serial side
    lines_read: AtomicU64,
    blank_lines: AtomicU64,
    parse_errors: AtomicU64,
    malformed_lines: AtomicU64,
    read_failures: AtomicU64,

    // Queue
    pairs_enqueued: AtomicU64,
    pairs_dropped: AtomicU64,
    queue_depth: AtomicU64,
    max_queue_depth: AtomicU64,

    // Broker side
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    envelopes_published: AtomicU64,
    publish_failures: AtomicU64,
    publish_latencies_us: Mutex<Vec<u64>>,

    // Lifecycle
    bridge_state: Mutex<String>,
    state_transitions: AtomicU64,
    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            lines_read: AtomicU64::new(0),
            blank_lines: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            pairs_enqueued: AtomicU64::new(0),
            pairs_dropped: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            max_queue_depth: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            envelopes_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            publish_latencies_us: Mutex::new(Vec::new()),
            bridge_state: Mutex::new("starting".to_string()),
            state_transitions: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Serial metrics
    pub fn line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blank_line(&self) {
        self.blank_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_line(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Queue metrics
    pub fn pair_enqueued(&self, depth: usize) {
        self.pairs_enqueued.fetch_add(1, Ordering::Relaxed);
        self.record_queue_depth(depth);
    }

    pub fn pair_dropped(&self) {
        self.pairs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_depth(&self, depth: usize) {
        let depth = depth as u64;
        self.queue_depth.store(depth, Ordering::Relaxed);
        self.max_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn envelope_published(&self, latency: Duration) {
        self.envelopes_published.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut samples) = self.publish_latencies_us.lock() {
            samples.push(latency.as_micros() as u64);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_bridge_state(&self, state: &str) {
        if let Ok(mut current) = self.bridge_state.lock() {
            if *current != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current = state.to_string();
            }
        }
    }

    fn latency_percentiles(&self) -> (f64, f64, f64) {
        let Ok(samples) = self.publish_latencies_us.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if samples.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95) = self.latency_percentiles();
        let current_state = self
            .bridge_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            serial: SerialMetrics {
                lines_read: self.lines_read.load(Ordering::Relaxed),
                blank_lines: self.blank_lines.load(Ordering::Relaxed),
                parse_errors: self.parse_errors.load(Ordering::Relaxed),
                malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
                read_failures: self.read_failures.load(Ordering::Relaxed),
            },
            queue: QueueMetrics {
                pairs_enqueued: self.pairs_enqueued.load(Ordering::Relaxed),
                pairs_dropped: self.pairs_dropped.load(Ordering::Relaxed),
                depth: self.queue_depth.load(Ordering::Relaxed),
                max_depth: self.max_queue_depth.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                envelopes_published: self.envelopes_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                avg_publish_latency_us: avg,
                publish_latency_p50_us: p50,
                publish_latency_p95_us: p95,
            },
            lifecycle: LifecycleMetrics {
                current_state,
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub serial: SerialMetrics,
    pub queue: QueueMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SerialMetrics {
    pub lines_read: u64,
    pub blank_lines: u64,
    pub parse_errors: u64,
    pub malformed_lines: u64,
    pub read_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub pairs_enqueued: u64,
    pub pairs_dropped: u64,
    pub depth: u64,
    pub max_depth: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub envelopes_published: u64,
    pub publish_failures: u64,
    pub avg_publish_latency_us: f64,
    pub publish_latency_p50_us: f64,
    pub publish_latency_p95_us: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub state_transitions: u64,
    pub uptime_seconds: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
