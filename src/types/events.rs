//! Operational metrics and the system event audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sample of an append-only operational time series.
///
/// Never mutated after emission; persisted to the `pipeline_metrics` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetric {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl PipelineMetric {
    pub fn now(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle and failure event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PipelineStart,
    PipelineStop,
    /// Per-reading feature extraction failure, recovered locally
    FeatureError,
    /// A sink exhausted its retry budget and was demoted to local fallback
    SinkDegraded,
    /// Permanent sink failure class (schema/permission) - never retried
    FatalWriteError,
    ModelLoad,
}

impl EventType {
    /// Snake-case wire form used by the `system_events.event_type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::PipelineStart => "pipeline_start",
            EventType::PipelineStop => "pipeline_stop",
            EventType::FeatureError => "feature_error",
            EventType::SinkDegraded => "sink_degraded",
            EventType::FatalWriteError => "fatal_write_error",
            EventType::ModelLoad => "model_load",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Info,
    Warning,
    Error,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Info => "INFO",
            EventStatus::Warning => "WARNING",
            EventStatus::Error => "ERROR",
        }
    }
}

/// A lifecycle or failure event, persisted so degraded write paths always
/// leave an auditable trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub event_type: EventType,
    pub status: EventStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SystemEvent {
    pub fn now(event_type: EventType, status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            event_type,
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
