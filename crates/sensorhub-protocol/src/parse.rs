//! Parsing delimited sensor sample lines.
//!
//! A live sensor emits one line per sample:
//!
//! ```text
//! 21.50,55.20        temperature,humidity
//! 21.50,55.20,63.10  temperature,humidity,soilMoisture
//! ```
//!
//! The link is noisy and lines are often truncated, so every line is
//! validated before it can become a [`Reading`].

use sensorhub_core::{DomainError, Field, Reading, Timestamp};
use thiserror::Error;

/// Column separator in sample lines.
pub const SAMPLE_DELIMITER: char = ',';

/// Column order of a sample line.
const COLUMNS: [Field; 3] = [Field::Temperature, Field::Humidity, Field::SoilMoisture];

/// Why a sample line was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("empty sample line")]
    Empty,

    #[error("too many fields: {count} (max: {max})", max = COLUMNS.len())]
    TooManyFields { count: usize },

    #[error(transparent)]
    Field(#[from] DomainError),
}

/// Parses one sample line into a validated reading stamped with `timestamp`.
///
/// Temperature and humidity are required; soil moisture is optional.
/// Surrounding whitespace (including a trailing `\r`) is ignored.
///
/// # Errors
///
/// - `SampleError::Empty` for a blank line
/// - `SampleError::TooManyFields` for more than three columns
/// - `SampleError::Field` for a missing, unparsable or non-finite column
pub fn parse_sample(line: &str, timestamp: Timestamp) -> Result<Reading, SampleError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(SampleError::Empty);
    }

    let parts: Vec<&str> = line.split(SAMPLE_DELIMITER).map(str::trim).collect();
    if parts.len() > COLUMNS.len() {
        return Err(SampleError::TooManyFields { count: parts.len() });
    }

    let mut values = [None; 3];
    for (slot, (field, raw)) in values.iter_mut().zip(COLUMNS.iter().zip(parts.iter())) {
        *slot = parse_column(*field, raw)?;
    }

    let [temperature, humidity, soil_moisture] = values;
    let temperature = temperature.ok_or(DomainError::MissingField {
        field: Field::Temperature,
    })?;
    let humidity = humidity.ok_or(DomainError::MissingField {
        field: Field::Humidity,
    })?;

    Ok(Reading::new(temperature, humidity, soil_moisture, timestamp)?)
}

/// Parses a single column. An empty column counts as absent.
fn parse_column(field: Field, raw: &str) -> Result<Option<f64>, DomainError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|e| DomainError::ParseError {
            field,
            reason: format!("{raw:?}: {e}"),
        })
}
