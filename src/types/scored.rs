//! Scored readings, anomaly alerts, and tiered persistence records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SensorReading;

/// Binary classification derived from the continuous anomaly score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Normal,
    Anomalous,
}

impl Verdict {
    /// Wire value for the `ml_prediction` column consumed by the dashboard.
    ///
    /// `-1` is the anomaly sentinel (isolation-forest convention carried
    /// over from the training pipeline); `0` is normal.
    pub fn ml_prediction(self) -> i32 {
        match self {
            Verdict::Anomalous => -1,
            Verdict::Normal => 0,
        }
    }

    pub fn is_anomalous(self) -> bool {
        matches!(self, Verdict::Anomalous)
    }
}

/// A reading plus the model's verdict on it.
///
/// Invariant: verdict is a deterministic function of the score given a fixed
/// threshold - re-scoring the same reading with the same model version yields
/// the same verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredReading {
    #[serde(flatten)]
    pub reading: SensorReading,
    /// Normalized anomaly magnitude (0 = dead center of the training
    /// distribution, larger = more anomalous)
    pub score: f64,
    pub verdict: Verdict,
    /// Version of the model artifact that produced this verdict (audit trail)
    pub model_version: String,
}

/// Alert severity, tiered by score magnitude against configured bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Uppercase wire form used by the `anomaly_alerts.severity` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived from a [`ScoredReading`] only when the verdict is anomalous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub score: f64,
    pub severity: Severity,
    pub model_version: String,
    /// Alert provenance tag (`ML_DETECTED` for model-flagged anomalies)
    pub alert_type: String,
}

impl AnomalyAlert {
    pub const ML_DETECTED: &'static str = "ML_DETECTED";
}

/// Persistence tier in the bronze/silver/gold convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Raw readings, unconditional lineage copy
    Bronze,
    /// Cleaned/normal scored readings
    Silver,
    /// Analytics-ready anomaly alerts
    Gold,
}

impl Tier {
    /// Object-store key prefix for this tier.
    pub fn key_prefix(self) -> &'static str {
        match self {
            Tier::Bronze => "bronze/",
            Tier::Silver => "silver/",
            Tier::Gold => "gold/",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier payload variants. One record holds one batch's worth of data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TierPayload {
    Raw(Vec<SensorReading>),
    Normal(Vec<ScoredReading>),
    Alerts(Vec<AnomalyAlert>),
}

impl TierPayload {
    pub fn len(&self) -> usize {
        match self {
            TierPayload::Raw(v) => v.len(),
            TierPayload::Normal(v) => v.len(),
            TierPayload::Alerts(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write-once artifact keyed by `(tier, batch sequence number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRecord {
    pub tier: Tier,
    pub sequence_no: u64,
    /// Model version that scored the batch (reproducibility/audit)
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub payload: TierPayload,
}

impl TierRecord {
    /// Object-store key: one object per batch per tier, named by sequence
    /// number. The same key doubles as the local fallback filename.
    pub fn object_key(&self) -> String {
        format!("{}batch_{:08}.json", self.tier.key_prefix(), self.sequence_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ml_prediction_sentinel() {
        assert_eq!(Verdict::Anomalous.ml_prediction(), -1);
        assert_eq!(Verdict::Normal.ml_prediction(), 0);
    }

    #[test]
    fn test_severity_wire_form() {
        assert_eq!(Severity::Low.as_str(), "LOW");
        assert_eq!(Severity::Medium.as_str(), "MEDIUM");
        assert_eq!(Severity::High.as_str(), "HIGH");
        assert!(Severity::Low < Severity::High);
    }

    #[test]
    fn test_object_key_layout() {
        let record = TierRecord {
            tier: Tier::Gold,
            sequence_no: 42,
            model_version: "v1".to_string(),
            created_at: Utc::now(),
            payload: TierPayload::Alerts(Vec::new()),
        };
        assert_eq!(record.object_key(), "gold/batch_00000042.json");
    }
}
