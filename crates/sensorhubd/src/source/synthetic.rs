//! Synthetic reading generator.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use sensorhub_core::{Reading, Timestamp};

/// Sampling period of the generator.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

const TEMPERATURE_RANGE: std::ops::Range<f64> = 20.0..30.0;
const HUMIDITY_RANGE: std::ops::Range<f64> = 40.0..60.0;
const SOIL_MOISTURE_RANGE: std::ops::Range<f64> = 50.0..100.0;

/// Rounds to two decimal places, the precision real sensors report.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Produces one plausible reading stamped with the current time.
pub fn synthetic_reading<R: Rng>(rng: &mut R) -> Option<Reading> {
    let reading = Reading::new(
        round2(rng.random_range(TEMPERATURE_RANGE)),
        round2(rng.random_range(HUMIDITY_RANGE)),
        Some(round2(rng.random_range(SOIL_MOISTURE_RANGE))),
        Timestamp::now(),
    );
    match reading {
        Ok(reading) => Some(reading),
        Err(e) => {
            error!(error = %e, "Generated an invalid reading");
            None
        }
    }
}

/// Produces one reading from the thread-local generator.
///
/// `ThreadRng` is not `Send`; it must not live across an await.
pub fn generate_reading() -> Option<Reading> {
    synthetic_reading(&mut rand::rng())
}

/// Ticker-driven generator.
pub struct SyntheticSource {
    period: Duration,
}

impl SyntheticSource {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Starts the ticker. The first reading is produced immediately.
    ///
    /// Stops when `cancel` fires or the receiving side of `tx` is dropped.
    pub fn spawn(self, tx: mpsc::Sender<Reading>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period = ?self.period, "Synthetic source started");

            loop {
                let reading = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Synthetic source cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(reading) = generate_reading() else {
                            continue;
                        };
                        debug!(reading = %reading, "Generated reading");
                        reading
                    }
                };

                // A full hub channel must not hold off shutdown.
                let sent = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Synthetic source cancelled while hub was busy");
                        break;
                    }
                    sent = tx.send(reading) => sent,
                };
                if sent.is_err() {
                    debug!("Synthetic source stopping: hub channel closed");
                    break;
                }
            }

            info!("Synthetic source stopped");
        })
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD)
    }
}
