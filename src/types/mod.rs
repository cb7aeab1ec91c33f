//! Core data model for the tiered telemetry pipeline.
//!
//! Lifecycle: a [`SensorReading`] is consumed into exactly one [`Batch`];
//! a closed batch is scored into one [`ScoredReading`] per reading; each
//! scored reading is routed to exactly one of Silver/Gold, with an
//! unconditional Bronze copy of the raw batch preserving lineage.

mod reading;
mod scored;
mod events;

pub use reading::{Batch, FeatureVector, SensorReading};
pub use scored::{
    AnomalyAlert, ScoredReading, Severity, Tier, TierPayload, TierRecord, Verdict,
};
pub use events::{EventStatus, EventType, PipelineMetric, SystemEvent};
