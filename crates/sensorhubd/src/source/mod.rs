//! Source adapters - producers of readings.
//!
//! Every source pushes validated readings into the hub's ingest channel in
//! the order it produces them. Two kinds exist:
//! - [`SyntheticSource`] - ticker-driven generator of plausible values
//! - [`LineSource`] - newline-delimited sample text from a live sensor link
//!
//! Sources own their own task and stop when cancelled or when the hub
//! side of the channel is gone.

use std::path::PathBuf;

mod line;
mod synthetic;

pub use line::{LineSource, SampleLine, SampleLineCodec, MAX_SAMPLE_LINE};
pub use synthetic::{generate_reading, synthetic_reading, SyntheticSource, DEFAULT_PERIOD};

/// Errors raised while bringing a source up.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open sensor device {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
