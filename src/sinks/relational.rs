//! Relational sink - PostgreSQL tables consumed by the external dashboard.
//!
//! The schema is a wire contract: the dashboard issues read-only queries
//! against `sensor_readings`, `anomaly_alerts`, `pipeline_metrics`, and
//! `system_events`, so column names and the `ml_prediction = -1` anomaly
//! sentinel must not change.
//!
//! Row mapping per tier record: Silver inserts one `sensor_readings` row per
//! normal reading; Gold inserts `sensor_readings` rows plus one
//! `anomaly_alerts` row per alert; Bronze is declined outright (raw lineage
//! lives in the object store and fallback files).

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

use super::{Sink, SinkError, WriteAck};
use crate::types::{TierPayload, TierRecord};

pub struct RelationalSink {
    pool: PgPool,
}

impl RelationalSink {
    /// Connect and ensure the dashboard schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(classify_sqlx_error)?;

        info!("Connected to PostgreSQL");
        let sink = Self { pool };
        sink.ensure_schema().await?;
        Ok(sink)
    }

    /// Create the dashboard tables if they do not exist.
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        const DDL: [&str; 4] = [
            "CREATE TABLE IF NOT EXISTS sensor_readings (
                id SERIAL PRIMARY KEY,
                sensor_id VARCHAR(50),
                temperature DOUBLE PRECISION,
                humidity DOUBLE PRECISION,
                ml_prediction INTEGER,
                timestamp TIMESTAMPTZ,
                created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS anomaly_alerts (
                id SERIAL PRIMARY KEY,
                sensor_id VARCHAR(50),
                temperature DOUBLE PRECISION,
                humidity DOUBLE PRECISION,
                severity VARCHAR(20),
                timestamp TIMESTAMPTZ,
                created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS pipeline_metrics (
                id SERIAL PRIMARY KEY,
                metric_name VARCHAR(100),
                metric_value DOUBLE PRECISION,
                timestamp TIMESTAMPTZ
            )",
            "CREATE TABLE IF NOT EXISTS system_events (
                id SERIAL PRIMARY KEY,
                event_type VARCHAR(50),
                event_status VARCHAR(20),
                message TEXT,
                timestamp TIMESTAMPTZ
            )",
        ];

        for ddl in DDL {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;
        }
        info!("Dashboard schema ready");
        Ok(())
    }

    /// Shared pool handle (used by the Postgres recorder).
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}

#[async_trait]
impl Sink for RelationalSink {
    async fn write(&self, key: &str, record: &TierRecord) -> Result<WriteAck, SinkError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;

        match &record.payload {
            // Declined via `accepts`; a direct call commits no rows
            TierPayload::Raw(_) => {}
            TierPayload::Normal(scored) => {
                for s in scored {
                    sqlx::query(
                        "INSERT INTO sensor_readings \
                         (sensor_id, temperature, humidity, ml_prediction, timestamp) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(&s.reading.sensor_id)
                    .bind(s.reading.temperature)
                    .bind(s.reading.humidity)
                    .bind(s.verdict.ml_prediction())
                    .bind(s.reading.timestamp)
                    .execute(&mut *tx)
                    .await
                    .map_err(classify_sqlx_error)?;
                }
            }
            TierPayload::Alerts(alerts) => {
                for a in alerts {
                    sqlx::query(
                        "INSERT INTO sensor_readings \
                         (sensor_id, temperature, humidity, ml_prediction, timestamp) \
                         VALUES ($1, $2, $3, -1, $4)",
                    )
                    .bind(&a.sensor_id)
                    .bind(a.temperature)
                    .bind(a.humidity)
                    .bind(a.timestamp)
                    .execute(&mut *tx)
                    .await
                    .map_err(classify_sqlx_error)?;

                    sqlx::query(
                        "INSERT INTO anomaly_alerts \
                         (sensor_id, temperature, humidity, severity, timestamp) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(&a.sensor_id)
                    .bind(a.temperature)
                    .bind(a.humidity)
                    .bind(a.severity.as_str())
                    .bind(a.timestamp)
                    .execute(&mut *tx)
                    .await
                    .map_err(classify_sqlx_error)?;
                }
            }
        }

        tx.commit().await.map_err(classify_sqlx_error)?;
        Ok(WriteAck {
            sink: "relational",
            key: key.to_string(),
        })
    }

    // Raw lineage is the object store's concern; accepting it here would
    // count one phantom relational success per batch.
    fn accepts(&self, record: &TierRecord) -> bool {
        !matches!(record.payload, TierPayload::Raw(_))
    }

    fn sink_name(&self) -> &'static str {
        "relational"
    }
}

/// Map sqlx errors onto the transient/permanent taxonomy.
///
/// Connection-level faults retry; schema and integrity faults never do -
/// they would fail identically on every attempt and must not consume the
/// transient retry budget.
fn classify_sqlx_error(e: sqlx::Error) -> SinkError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Tls(_) => SinkError::Transient(e.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) if is_permanent_db_code(code) => SinkError::Permanent(e.to_string()),
            _ => SinkError::Transient(e.to_string()),
        },
        _ => SinkError::Permanent(e.to_string()),
    }
}

/// SQLSTATE classes that no retry can fix: 42 (syntax/access - malformed
/// schema), 23 (integrity constraint), 22 (data exception), 28/42501
/// (authorization).
fn is_permanent_db_code(code: &str) -> bool {
    code.starts_with("42") || code.starts_with("23") || code.starts_with("22") || code.starts_with("28")
}
