//! Environmental reading value objects.

use crate::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Field Identifiers
// ============================================================================

/// Identifies one measured quantity of a [`Reading`].
///
/// Used in error reports so callers can tell which column of a sample
/// was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Temperature,
    Humidity,
    SoilMoisture,
    Timestamp,
}

impl Field {
    /// Returns the wire name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::SoilMoisture => "soilMoisture",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Timestamp
// ============================================================================

/// Milliseconds since the Unix epoch.
///
/// The producer's clock is authoritative: timestamps are not required to be
/// monotonic and nothing in the system reorders readings by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from raw epoch milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Returns the raw epoch milliseconds.
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Converts to a chrono datetime, if the value is within chrono's range.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

// ============================================================================
// Reading
// ============================================================================

/// One timestamped environmental sample.
///
/// Immutable once constructed. Every numeric field is guaranteed finite:
/// the only constructors are [`Reading::new`] and deserialization, and both
/// validate.
///
/// Serializes to the flat wire object
/// `{"temperature":..,"humidity":..,"soilMoisture":..,"timestamp":..}`,
/// omitting `soilMoisture` when the sensor does not report it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "UncheckedReading")]
pub struct Reading {
    temperature: f64,
    humidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    soil_moisture: Option<f64>,
    timestamp: Timestamp,
}

impl Reading {
    /// Creates a validated reading.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NonFinite` if any present value is NaN or infinite.
    pub fn new(
        temperature: f64,
        humidity: f64,
        soil_moisture: Option<f64>,
        timestamp: Timestamp,
    ) -> DomainResult<Self> {
        ensure_finite(Field::Temperature, temperature)?;
        ensure_finite(Field::Humidity, humidity)?;
        if let Some(value) = soil_moisture {
            ensure_finite(Field::SoilMoisture, value)?;
        }

        Ok(Self {
            temperature,
            humidity,
            soil_moisture,
            timestamp,
        })
    }

    /// Air temperature in degrees Celsius.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Relative humidity in percent.
    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    /// Soil moisture in percent, if the sensor reports it.
    pub fn soil_moisture(&self) -> Option<f64> {
        self.soil_moisture
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}°C {:.2}%RH",
            self.temperature, self.humidity
        )?;
        if let Some(soil) = self.soil_moisture {
            write!(f, " {soil:.2}% soil")?;
        }
        write!(f, " @ {}", self.timestamp)
    }
}

fn ensure_finite(field: Field, value: f64) -> DomainResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DomainError::NonFinite { field, value })
    }
}

/// Deserialization shadow of [`Reading`]; converted through [`Reading::new`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UncheckedReading {
    temperature: f64,
    humidity: f64,
    #[serde(default)]
    soil_moisture: Option<f64>,
    timestamp: Timestamp,
}

impl TryFrom<UncheckedReading> for Reading {
    type Error = DomainError;

    fn try_from(raw: UncheckedReading) -> Result<Self, Self::Error> {
        Reading::new(raw.temperature, raw.humidity, raw.soil_moisture, raw.timestamp)
    }
}
