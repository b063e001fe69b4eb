//! Broadcast hub - fans each reading out to every live subscriber.
//!
//! The hub is a single pump. For every reading it receives it:
//! 1. hands the reading to the persistence sink (never waits on it),
//! 2. encodes the wire frame once,
//! 3. snapshots the registry and delivers the frame to every connection.
//!
//! # Delivery
//!
//! ```text
//!            snapshot()
//! registry ─────────────▶ [c1, c2, c3, ...]
//!                             │ try_deliver (no wait)
//!               ┌─────────────┼──────────────┐
//!               ▼             ▼              ▼
//!             queued     queue full       closed ──▶ evict
//!                             │
//!                  JoinSet: deliver(frame, send_timeout)
//!                   (all waits run concurrently)
//!                             │
//!                    ok ◀─────┴─────▶ timeout/closed ──▶ evict
//! ```
//!
//! Because slow connections wait concurrently, one publish takes at most
//! one `send_timeout` no matter how many consumers are stuck. A publish
//! finishes before the next reading is taken, which keeps per-connection
//! ordering identical to arrival order.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - `publish` cannot fail; every problem is logged and isolated

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sensorhub_core::Reading;
use sensorhub_protocol::encode_reading;

use crate::persistence::PersistenceSink;
use crate::registry::{Connection, ConnectionId, ConnectionRegistry, DeliveryError, Frame, TryDeliverError};

/// Default bound on how long one delivery may wait for a full queue.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of publishing one reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Connections in the snapshot
    pub recipients: usize,

    /// Connections the frame was queued for
    pub delivered: usize,

    /// Connections evicted during this publish
    pub evicted: usize,

    /// Whether the persistence sink accepted the reading
    pub persistence_queued: bool,
}

/// Fans readings out to the connection registry and persistence.
pub struct BroadcastHub {
    registry: ConnectionRegistry,
    sink: PersistenceSink,
    send_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(registry: ConnectionRegistry, sink: PersistenceSink, send_timeout: Duration) -> Self {
        Self {
            registry,
            sink,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &PersistenceSink {
        &self.sink
    }

    /// Persists and delivers one reading.
    ///
    /// Returns once every connection in the snapshot has been attempted.
    pub async fn publish(&self, reading: &Reading) -> PublishReport {
        let persistence_queued = self.sink.submit(*reading);

        let frame: Frame = match encode_reading(reading) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!(error = %e, "Failed to encode reading, skipping delivery");
                return PublishReport {
                    persistence_queued,
                    ..PublishReport::default()
                };
            }
        };

        let snapshot = self.registry.snapshot().await;
        let mut report = PublishReport {
            recipients: snapshot.len(),
            persistence_queued,
            ..PublishReport::default()
        };

        let mut dead: Vec<(ConnectionId, DeliveryError)> = Vec::new();
        let mut pending = JoinSet::new();

        for conn in snapshot {
            match conn.try_deliver(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(TryDeliverError::Closed) => dead.push((conn.id(), DeliveryError::Closed)),
                Err(TryDeliverError::Full(frame)) => {
                    let bound = self.send_timeout;
                    pending.spawn(slow_delivery(conn, frame, bound));
                }
            }
        }

        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((id, Err(e))) => dead.push((id, e)),
                Err(e) => error!(error = %e, "Delivery task failed"),
            }
        }

        for (id, reason) in dead {
            if self.registry.unregister(id).await {
                report.evicted += 1;
                warn!(connection_id = %id, reason = %reason, "Evicted subscriber");
            }
        }

        debug!(
            timestamp = reading.timestamp().as_millis(),
            recipients = report.recipients,
            delivered = report.delivered,
            evicted = report.evicted,
            "Reading published"
        );

        report
    }

    /// Runs the pump until cancelled or every producer has gone away.
    ///
    /// Readings are published strictly one after another in the order they
    /// arrive on `readings`. On exit the persistence queue is drained.
    pub async fn run(self, mut readings: mpsc::Receiver<Reading>, cancel: CancellationToken) {
        info!(send_timeout = ?self.send_timeout, "Broadcast hub started");
        let mut published: u64 = 0;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Broadcast hub shutting down");
                    break;
                }

                next = readings.recv() => {
                    match next {
                        Some(reading) => {
                            self.publish(&reading).await;
                            published += 1;
                        }
                        None => {
                            debug!("Reading channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.sink.shutdown().await;
        info!(published, "Broadcast hub stopped");
    }
}

/// Waits, bounded, for room in one connection's queue.
async fn slow_delivery(
    conn: Connection,
    frame: Frame,
    bound: Duration,
) -> (ConnectionId, Result<(), DeliveryError>) {
    let result = conn.deliver(frame, bound).await;
    (conn.id(), result)
}
