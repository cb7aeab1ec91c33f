//! Tiered router - classifies scored readings into persistence tiers.
//!
//! Deterministic and total: every scored reading maps to exactly one of
//! Silver (normal) or Gold (anomalous), and every batch gets an
//! unconditional Bronze record of its raw readings for lineage. Alert
//! severity comes from configurable score bands, never hard-coded - model
//! score distributions drift between artifact versions.

use chrono::Utc;
use tracing::debug;

use crate::config::SeverityBandsConfig;
use crate::types::{AnomalyAlert, Batch, ScoredReading, Tier, TierPayload, TierRecord, Verdict};

/// Routing decision for one scored reading.
#[derive(Debug, Clone)]
pub struct RoutedReading {
    /// Exactly one of Silver or Gold (Bronze is batch-level, not per-reading)
    pub destination: Tier,
    /// Present iff the verdict was anomalous
    pub alert: Option<AnomalyAlert>,
}

pub struct TieredRouter {
    bands: SeverityBandsConfig,
}

impl TieredRouter {
    pub fn new(bands: SeverityBandsConfig) -> Self {
        Self { bands }
    }

    /// Map a scored reading to its destination tier, deriving the alert for
    /// anomalous verdicts.
    pub fn route(&self, scored: &ScoredReading) -> RoutedReading {
        match scored.verdict {
            Verdict::Normal => RoutedReading {
                destination: Tier::Silver,
                alert: None,
            },
            Verdict::Anomalous => RoutedReading {
                destination: Tier::Gold,
                alert: Some(AnomalyAlert {
                    sensor_id: scored.reading.sensor_id.clone(),
                    timestamp: scored.reading.timestamp,
                    temperature: scored.reading.temperature,
                    humidity: scored.reading.humidity,
                    score: scored.score,
                    severity: self.bands.severity_for(scored.score),
                    model_version: scored.model_version.clone(),
                    alert_type: AnomalyAlert::ML_DETECTED.to_string(),
                }),
            },
        }
    }

    /// Shape the tier records for one scored batch.
    ///
    /// Bronze always carries the raw readings; Silver and Gold are emitted
    /// only when they would be non-empty (an all-anomalous batch has no
    /// Silver record, and vice versa).
    pub fn build_tier_records(
        &self,
        batch: &Batch,
        scored: &[ScoredReading],
        model_version: &str,
    ) -> Vec<TierRecord> {
        let created_at = Utc::now();
        let mut normal: Vec<ScoredReading> = Vec::new();
        let mut alerts: Vec<AnomalyAlert> = Vec::new();

        for s in scored {
            let routed = self.route(s);
            match routed.destination {
                Tier::Silver => normal.push(s.clone()),
                Tier::Gold => {
                    if let Some(alert) = routed.alert {
                        alerts.push(alert);
                    }
                }
                Tier::Bronze => unreachable!("route() never targets Bronze"),
            }
        }

        let mut records = vec![TierRecord {
            tier: Tier::Bronze,
            sequence_no: batch.sequence_no,
            model_version: model_version.to_string(),
            created_at,
            payload: TierPayload::Raw(batch.readings.clone()),
        }];

        if !normal.is_empty() {
            records.push(TierRecord {
                tier: Tier::Silver,
                sequence_no: batch.sequence_no,
                model_version: model_version.to_string(),
                created_at,
                payload: TierPayload::Normal(normal),
            });
        }
        if !alerts.is_empty() {
            records.push(TierRecord {
                tier: Tier::Gold,
                sequence_no: batch.sequence_no,
                model_version: model_version.to_string(),
                created_at,
                payload: TierPayload::Alerts(alerts),
            });
        }

        debug!(
            sequence_no = batch.sequence_no,
            records = records.len(),
            "Tier records shaped"
        );
        records
    }
}
