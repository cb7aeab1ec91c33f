//! Anomaly scorer - feature extraction plus model application.
//!
//! Pure function of (reading, model version): no hidden state. A malformed
//! reading (zero humidity, non-finite values) is a `feature_error` - it is
//! audited and scored as normal with score 0 rather than propagated, so a
//! single bad reading never blocks its batch.

use std::sync::Arc;
use tracing::warn;

use crate::metrics::Recorder;
use crate::model::ScoringModel;
use crate::types::{
    Batch, EventStatus, EventType, FeatureVector, ScoredReading, SensorReading, SystemEvent,
    Verdict,
};

pub struct AnomalyScorer {
    model: Arc<ScoringModel>,
    recorder: Arc<dyn Recorder>,
}

/// A scored batch, order-preserving: N readings in, N scored readings out.
pub struct ScoredBatch {
    pub scored: Vec<ScoredReading>,
    pub feature_errors: usize,
}

impl AnomalyScorer {
    pub fn new(model: Arc<ScoringModel>, recorder: Arc<dyn Recorder>) -> Self {
        Self { model, recorder }
    }

    /// Extract the model features for a reading.
    ///
    /// `humidity <= 0` leaves the temperature/humidity ratio undefined, and
    /// non-finite inputs poison every downstream z-score - both are feature
    /// errors, not faults.
    fn extract_features(reading: &SensorReading) -> Result<FeatureVector, String> {
        if !reading.temperature.is_finite() || !reading.humidity.is_finite() {
            return Err(format!(
                "non-finite input (temperature={}, humidity={})",
                reading.temperature, reading.humidity
            ));
        }
        if reading.humidity <= 0.0 {
            return Err(format!(
                "humidity {} leaves temperature/humidity ratio undefined",
                reading.humidity
            ));
        }
        Ok(FeatureVector {
            temperature: reading.temperature,
            humidity: reading.humidity,
            temp_humidity_ratio: reading.temperature / reading.humidity,
        })
    }

    /// Score a single reading. Never fails; feature errors degrade to a
    /// normal verdict with score 0 plus an audit event.
    pub fn score_reading(&self, reading: &SensorReading) -> (ScoredReading, bool) {
        match Self::extract_features(reading) {
            Ok(features) => {
                let out = self.model.score(&features);
                let verdict = if out.raw_label == -1 {
                    Verdict::Anomalous
                } else {
                    Verdict::Normal
                };
                (
                    ScoredReading {
                        reading: reading.clone(),
                        score: out.score,
                        verdict,
                        model_version: self.model.version().to_string(),
                    },
                    false,
                )
            }
            Err(reason) => {
                warn!(
                    sensor_id = %reading.sensor_id,
                    reason = %reason,
                    "Feature extraction failed - scoring reading as normal"
                );
                self.recorder.record_event(SystemEvent::now(
                    EventType::FeatureError,
                    EventStatus::Warning,
                    format!("{}: {}", reading.sensor_id, reason),
                ));
                (
                    ScoredReading {
                        reading: reading.clone(),
                        score: 0.0,
                        verdict: Verdict::Normal,
                        model_version: self.model.version().to_string(),
                    },
                    true,
                )
            }
        }
    }

    /// Score every reading in a closed batch, preserving order.
    pub fn score_batch(&self, batch: &Batch) -> ScoredBatch {
        let mut scored = Vec::with_capacity(batch.len());
        let mut feature_errors = 0usize;
        for reading in &batch.readings {
            let (s, errored) = self.score_reading(reading);
            if errored {
                feature_errors += 1;
            }
            scored.push(s);
        }
        ScoredBatch {
            scored,
            feature_errors,
        }
    }

    pub fn model_version(&self) -> &str {
        self.model.version()
    }
}
