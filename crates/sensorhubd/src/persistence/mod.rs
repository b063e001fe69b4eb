//! Durable storage of readings.
//!
//! The hub never waits on storage. Readings are handed to a
//! [`PersistenceSink`], a bounded queue drained by one worker task that
//! calls the configured [`ReadingStore`]. A full queue drops the reading,
//! a failing store is logged, and nothing is retried: persistence is
//! best-effort and at-most-once.
//!
//! ```text
//! BroadcastHub ──submit()──▶ [bounded queue] ──▶ worker ──▶ ReadingStore
//!                  (never waits)                   │
//!                                                  └─ errors: logged only
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use sensorhub_core::Reading;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, DEFAULT_MEMORY_CAPACITY};

/// Default depth of the persistence queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Backend that durably records readings and serves recent history.
#[async_trait]
pub trait ReadingStore: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Persists one reading.
    async fn store(&self, reading: &Reading) -> Result<(), StoreError>;

    /// Returns up to `limit` of the most recently stored readings, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError>;
}

/// Errors raised by a [`ReadingStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode reading: {0}")]
    Encode(String),

    #[error("failed to decode stored reading: {0}")]
    Decode(String),
}

/// Counters kept by the persistence worker.
#[derive(Debug, Default)]
pub struct SinkStats {
    stored: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl SinkStats {
    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Readings discarded because the queue was full or the worker was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Fire-and-forget front of a [`ReadingStore`].
pub struct PersistenceSink {
    name: String,
    tx: mpsc::Sender<Reading>,
    stats: Arc<SinkStats>,
    worker: JoinHandle<()>,
}

impl PersistenceSink {
    /// Spawns the worker task for `store` with a queue of `capacity` readings.
    pub fn spawn(store: Arc<dyn ReadingStore>, capacity: usize) -> Self {
        let name = store.name().to_string();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(SinkStats::default());

        let worker = tokio::spawn(persist_worker(store, rx, Arc::clone(&stats)));

        Self {
            name,
            tx,
            stats,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &Arc<SinkStats> {
        &self.stats
    }

    /// Queues a reading for storage without waiting.
    ///
    /// Returns true if queued, false if it was dropped.
    pub fn submit(&self, reading: Reading) -> bool {
        match self.tx.try_send(reading) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(r)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    store = %self.name,
                    timestamp = r.timestamp().as_millis(),
                    "Persistence queue full, reading dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!(store = %self.name, "Persistence worker stopped unexpectedly");
                false
            }
        }
    }

    /// Stops accepting readings and waits for the queue to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(store = %self.name, error = ?e, "Persistence worker panicked");
        }
        debug!(
            store = %self.name,
            stored = self.stats.stored(),
            failed = self.stats.failed(),
            dropped = self.stats.dropped(),
            "Persistence sink shut down"
        );
    }
}

async fn persist_worker(
    store: Arc<dyn ReadingStore>,
    mut rx: mpsc::Receiver<Reading>,
    stats: Arc<SinkStats>,
) {
    debug!(store = %store.name(), "Persistence worker started");

    while let Some(reading) = rx.recv().await {
        match store.store(&reading).await {
            Ok(()) => {
                stats.stored.fetch_add(1, Ordering::Relaxed);
                debug!(store = %store.name(), reading = %reading, "Reading stored");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    store = %store.name(),
                    timestamp = reading.timestamp().as_millis(),
                    error = %e,
                    "Failed to store reading"
                );
            }
        }
    }

    debug!(store = %store.name(), "Persistence worker stopped");
}
