//! tierflow - streaming sensor telemetry batching, anomaly scoring, and
//! tiered durable routing.
//!
//! Readings flow through a dual-trigger batch aggregator, a z-score anomaly
//! model, and a bronze/silver/gold router, then fan out concurrently to the
//! configured durable sinks with retry and local-fallback demotion.

pub mod batching;
pub mod config;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod routing;
pub mod scoring;
pub mod sinks;
pub mod types;
