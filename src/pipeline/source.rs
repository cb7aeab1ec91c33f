//! Reading sources feeding the pipeline controller.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use crate::config::{defaults, SimulatorConfig};
use crate::types::SensorReading;

/// One pull from a reading source.
#[derive(Debug)]
pub enum SourceEvent {
    Reading(SensorReading),
    /// The source is exhausted; the controller drains and stops.
    Eof,
}

#[async_trait]
pub trait ReadingSource: Send {
    async fn next_reading(&mut self) -> SourceEvent;
}

/// Newline-delimited JSON readings from stdin. Malformed lines are logged
/// and skipped rather than stopping the pipeline.
pub struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
    skipped: u64,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            skipped: 0,
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingSource for StdinSource {
    async fn next_reading(&mut self) -> SourceEvent {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<SensorReading>(line) {
                        Ok(reading) => return SourceEvent::Reading(reading),
                        Err(e) => {
                            self.skipped += 1;
                            warn!(error = %e, skipped = self.skipped, "Skipping malformed reading");
                        }
                    }
                }
                Ok(None) => {
                    info!(skipped = self.skipped, "Stdin closed");
                    return SourceEvent::Eof;
                }
                Err(e) => {
                    warn!(error = %e, "Stdin read error, treating as end of input");
                    return SourceEvent::Eof;
                }
            }
        }
    }
}

/// Built-in sensor fleet simulator: two regimes, one clearly normal and one
/// clearly anomalous, matching the regimes the model is trained on.
pub struct SimulatedSource {
    config: SimulatorConfig,
    rng: StdRng,
    emitted: u64,
    /// Stop after this many readings; `None` runs until cancelled.
    limit: Option<u64>,
}

impl SimulatedSource {
    pub fn new(config: SimulatorConfig, limit: Option<u64>) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
            emitted: 0,
            limit,
        }
    }

    fn generate(&mut self) -> SensorReading {
        let sensor_index = self.rng.gen_range(1..=self.config.sensor_count.max(1));
        let anomalous = self.rng.gen_bool(self.config.anomaly_probability.clamp(0.0, 1.0));

        let (temp_range, humidity_range) = if anomalous {
            (defaults::ANOMALY_TEMP_RANGE, defaults::ANOMALY_HUMIDITY_RANGE)
        } else {
            (defaults::NORMAL_TEMP_RANGE, defaults::NORMAL_HUMIDITY_RANGE)
        };

        SensorReading {
            sensor_id: format!("sensor_{sensor_index:03}"),
            timestamp: Utc::now(),
            temperature: self.rng.gen_range(temp_range.0..temp_range.1),
            humidity: self.rng.gen_range(humidity_range.0..humidity_range.1),
        }
    }
}

#[async_trait]
impl ReadingSource for SimulatedSource {
    async fn next_reading(&mut self) -> SourceEvent {
        if let Some(limit) = self.limit {
            if self.emitted >= limit {
                info!(emitted = self.emitted, "Simulator reached reading limit");
                return SourceEvent::Eof;
            }
        }
        if self.emitted > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.reading_interval_ms)).await;
        }
        self.emitted += 1;
        SourceEvent::Reading(self.generate())
    }
}
