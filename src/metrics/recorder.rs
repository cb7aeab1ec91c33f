//! Recorder trait - pluggable backend for metrics and system events.
//!
//! Implementations must be thread-safe (Send + Sync) for shared access
//! across async tasks, and must never propagate backend failures: the
//! audit trail is best-effort, the batch that produced it is not.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::types::{PipelineMetric, SystemEvent};

/// Backend for the operational audit trail.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Persist one metric sample. Must not fail the caller.
    fn record_metric(&self, metric: PipelineMetric);

    /// Persist one system event. Must not fail the caller.
    fn record_event(&self, event: SystemEvent);

    /// Wait for writes the backend deferred. The controller calls this
    /// after the final stop event so nothing is lost to process exit.
    async fn flush(&self) {}

    /// Backend name for logging.
    fn recorder_name(&self) -> &'static str;
}

// ============================================================================
// Postgres recorder (production)
// ============================================================================

/// Writes metrics and events to the dashboard-facing Postgres tables.
///
/// Inserts are spawned so the batch cycle never waits on the audit trail,
/// and insert failures degrade to a `warn!` log line. The tracker keeps
/// every spawned insert joinable: `flush` waits them out at drain, so the
/// final stop event and last batch's metrics land before the runtime goes
/// away.
pub struct PgRecorder {
    pool: PgPool,
    tracker: TaskTracker,
}

impl PgRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tracker: TaskTracker::new(),
        }
    }
}

#[async_trait]
impl Recorder for PgRecorder {
    fn record_metric(&self, metric: PipelineMetric) {
        let pool = self.pool.clone();
        self.tracker.spawn(async move {
            let result = sqlx::query(
                "INSERT INTO pipeline_metrics (metric_name, metric_value, timestamp) \
                 VALUES ($1, $2, $3)",
            )
            .bind(&metric.name)
            .bind(metric.value)
            .bind(metric.timestamp)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                warn!(metric = %metric.name, error = %e, "Metric emission failed (ignored)");
            }
        });
    }

    fn record_event(&self, event: SystemEvent) {
        let pool = self.pool.clone();
        self.tracker.spawn(async move {
            let result = sqlx::query(
                "INSERT INTO system_events (event_type, event_status, message, timestamp) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(event.event_type.as_str())
            .bind(event.status.as_str())
            .bind(&event.message)
            .bind(event.timestamp)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                warn!(event_type = %event.event_type, error = %e, "Event emission failed (ignored)");
            }
        });
    }

    async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    fn recorder_name(&self) -> &'static str {
        "postgres"
    }
}

// ============================================================================
// In-memory recorder (tests, offline deployments)
// ============================================================================

/// Thread-safe in-memory recorder. Not durable - contents lost on restart.
#[derive(Default)]
pub struct MemoryRecorder {
    metrics: Mutex<Vec<PipelineMetric>>,
    events: Mutex<Vec<SystemEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> Vec<PipelineMetric> {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    pub fn events(&self) -> Vec<SystemEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    /// Events of a given type, in emission order.
    pub fn events_of_type(&self, event_type: crate::types::EventType) -> Vec<SystemEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    fn record_metric(&self, metric: PipelineMetric) {
        debug!(name = %metric.name, value = metric.value, "metric");
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.push(metric);
        }
    }

    fn record_event(&self, event: SystemEvent) {
        debug!(event_type = %event.event_type, message = %event.message, "system event");
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn recorder_name(&self) -> &'static str {
        "memory"
    }
}
