//! Raw sensor readings and bounded batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A single telemetry reading from an external sensor source.
///
/// Immutable once created; consumed exactly once by the batch aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Sensor identifier (e.g. `sensor_003`)
    pub sensor_id: String,
    /// Time the reading was taken at the sensor
    pub timestamp: DateTime<Utc>,
    /// Temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
}

/// A bounded, ordered group of readings processed as one scoring/routing unit.
///
/// Owned exclusively by the aggregator while open; handed out by value on
/// close, which makes the closed batch immutable by ownership.
#[derive(Debug, Clone)]
pub struct Batch {
    pub readings: Vec<SensorReading>,
    /// When the first slot of this batch opened (age-trigger reference)
    pub opened_at: Instant,
    /// Monotonic batch number, advanced only when a non-empty batch closes
    pub sequence_no: u64,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Features fed to the scoring model. Derived, never persisted standalone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub temperature: f64,
    pub humidity: f64,
    /// temperature / humidity - undefined when humidity is zero, which the
    /// scorer treats as a feature error rather than a fault
    pub temp_humidity_ratio: f64,
}

impl FeatureVector {
    /// Feature values in model input order.
    pub fn as_array(&self) -> [f64; 3] {
        [self.temperature, self.humidity, self.temp_humidity_ratio]
    }
}
