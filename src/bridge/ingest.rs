//! Serial ingest task: lines in, reading pairs into the bounded queue

use super::{BridgeStats, SharedState};
use crate::observability::metrics;
use crate::protocol::{parse, ReadingPair};
use crate::serial::{LineSource, SerialError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, error, warn};

/// Limits applied while reading
#[derive(Debug, Clone, Copy)]
pub(crate) struct IngestLimits {
    pub max_read_failures: u32,
    pub read_retry_delay: Duration,
}

/// Everything the ingest task shares with the supervisor
pub(crate) struct IngestContext {
    pub shared: Arc<Mutex<SharedState>>,
    pub notify: Arc<Notify>,
    pub fault_tx: mpsc::Sender<String>,
    pub limits: IngestLimits,
}

/// Read until stopped or a fatal serial error
pub(crate) async fn run_ingest<S: LineSource>(
    mut source: S,
    ctx: IngestContext,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut consecutive_failures = 0u32;

    loop {
        let next = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            next = source.next_line() => next,
        };

        match next {
            Ok(None) => continue,
            Ok(Some(line)) => {
                consecutive_failures = 0;
                metrics().line_read();
                debug!(raw = %line, "Serial line");

                if line.is_blank() {
                    metrics().blank_line();
                    ctx.update_stats(|stats| stats.lines_read += 1).await;
                    continue;
                }

                match parse(&line) {
                    Ok(pair) => ctx.enqueue(pair).await,
                    Err(e) => {
                        warn!(raw = ?line.as_str(), error = %e, "Discarding invalid frame");
                        metrics().parse_error();
                        ctx.update_stats(|stats| {
                            stats.lines_read += 1;
                            stats.parse_errors += 1;
                        })
                        .await;
                    }
                }
            }
            Err(SerialError::Malformed { raw, reason }) => {
                warn!(raw = ?raw, reason = %reason, "Discarding malformed serial line");
                metrics().malformed_line();
                ctx.update_stats(|stats| stats.malformed_lines += 1).await;
            }
            Err(SerialError::ReadFailure(e)) => {
                consecutive_failures += 1;
                metrics().read_failure();
                ctx.update_stats(|stats| stats.read_failures += 1).await;

                if consecutive_failures > ctx.limits.max_read_failures {
                    ctx.fault(format!(
                        "{consecutive_failures} consecutive serial read failures, last: {e}"
                    ))
                    .await;
                    break;
                }

                warn!(
                    error = %e,
                    attempt = consecutive_failures,
                    max = ctx.limits.max_read_failures,
                    "Serial read failed, retrying"
                );
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(ctx.limits.read_retry_delay) => {}
                }
            }
            Err(fatal) => {
                ctx.fault(fatal.to_string()).await;
                break;
            }
        }
    }
    debug!("Serial ingest stopped");
}

impl IngestContext {
    async fn enqueue(&self, pair: ReadingPair) {
        let mut shared = self.shared.lock().await;
        shared.stats.lines_read += 1;

        if let Some(dropped) = shared.queue.push(pair) {
            shared.stats.pairs_dropped += 1;
            metrics().pair_dropped();
            warn!(
                water = %dropped.water,
                temperature = %dropped.temperature,
                capacity = shared.queue.capacity(),
                "Queue full, dropped oldest reading pair"
            );
        }
        shared.stats.pairs_queued += 1;
        metrics().pair_enqueued(shared.queue.len());
        drop(shared);

        self.notify.notify_one();
    }

    async fn update_stats<F>(&self, update: F)
    where
        F: FnOnce(&mut BridgeStats),
    {
        let mut shared = self.shared.lock().await;
        update(&mut shared.stats);
    }

    async fn fault(&self, reason: String) {
        error!(reason = %reason, "Serial input failed");
        // The supervisor may already be gone during shutdown
        let _ = self.fault_tx.send(reason).await;
    }
}
