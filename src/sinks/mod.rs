//! Durable sinks and the per-batch fan-out machinery.
//!
//! Every closed batch produces a set of tier records, and every (sink,
//! record) pair becomes an independent write task: one sink failing must
//! never block another sink's progress. Transient failures are retried with
//! bounded exponential backoff; on exhaustion (or any permanent failure)
//! the record is demoted to the local fallback sink so no acknowledged
//! reading is ever lost.

mod fallback;
mod object_store;
mod relational;

pub use fallback::LocalFallbackSink;
pub use object_store::ObjectStoreSink;
pub use relational::RelationalSink;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::config::RetryConfig;
use crate::metrics::Recorder;
use crate::types::{EventStatus, EventType, SystemEvent, TierRecord};

/// Whether a write failure is worth retrying.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Infrastructure fault that a later attempt may not hit (connection
    /// refused, timeout, 5xx, pool exhaustion).
    #[error("transient sink failure: {0}")]
    Transient(String),
    /// Fault that would recur on every attempt (schema mismatch, auth,
    /// serialization). Retrying wastes the budget; demote immediately.
    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// Acknowledgement of one durable write.
#[derive(Debug, Clone)]
pub struct WriteAck {
    pub sink: &'static str,
    pub key: String,
}

/// A durable destination for tier records. Implementations must be
/// idempotent per key: re-writing an already-durable key acks without
/// duplicating data.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, key: &str, record: &TierRecord) -> Result<WriteAck, SinkError>;

    /// Whether this sink persists the record's tier at all. The fan-out
    /// skips declined pairs, so per-sink success counts only ever cover
    /// real writes.
    fn accepts(&self, _record: &TierRecord) -> bool {
        true
    }

    fn sink_name(&self) -> &'static str;
}

/// Outcome of one (sink, record) write after retries and demotion.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// The primary sink acknowledged the write.
    Delivered(WriteAck),
    /// The primary sink failed for good; the record landed in the local
    /// fallback instead.
    Demoted { sink: &'static str, key: String },
    /// Both the primary sink and the fallback failed. The record is lost
    /// from this process; the event log carries the details.
    Lost { sink: &'static str, key: String },
}

/// Aggregated result of a full batch fan-out.
#[derive(Debug, Clone, Default)]
pub struct FanoutReport {
    /// Primary-sink acks, keyed by sink name.
    successes: BTreeMap<&'static str, usize>,
    /// Primary-sink definitive failures (demoted or lost), keyed by sink name.
    failures: BTreeMap<&'static str, usize>,
    /// Records that landed in the local fallback after demotion.
    pub fallback_writes: usize,
    /// Records neither the primary sink nor the fallback could hold.
    pub lost: usize,
}

impl FanoutReport {
    pub fn record(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Delivered(ack) => {
                *self.successes.entry(ack.sink).or_insert(0) += 1;
            }
            WriteOutcome::Demoted { sink, .. } => {
                *self.failures.entry(*sink).or_insert(0) += 1;
                self.fallback_writes += 1;
            }
            WriteOutcome::Lost { sink, .. } => {
                *self.failures.entry(*sink).or_insert(0) += 1;
                self.lost += 1;
            }
        }
    }

    pub fn successes_by_sink(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.successes.iter().map(|(s, n)| (*s, *n))
    }

    pub fn failures_by_sink(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.failures.iter().map(|(s, n)| (*s, *n))
    }

    pub fn total_successes(&self) -> usize {
        self.successes.values().sum()
    }

    pub fn total_failures(&self) -> usize {
        self.failures.values().sum()
    }
}

/// Write one record to one sink with bounded retries, demoting to the
/// fallback on exhaustion or permanent failure.
///
/// Permanent failures skip the retry loop entirely. Transient failures
/// retry up to `retry.max_attempts` total attempts with exponential
/// backoff between them.
pub async fn write_with_retry(
    sink: &dyn Sink,
    fallback: &LocalFallbackSink,
    retry: &RetryConfig,
    key: &str,
    record: &TierRecord,
    recorder: &dyn Recorder,
) -> WriteOutcome {
    let name = sink.sink_name();
    let mut attempt: u32 = 0;
    loop {
        match sink.write(key, record).await {
            Ok(ack) => return WriteOutcome::Delivered(ack),
            Err(e) if e.is_transient() && attempt + 1 < retry.max_attempts => {
                let delay = retry.backoff_delay(attempt);
                warn!(
                    sink = name,
                    key,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient sink failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                let (event_type, status) = if e.is_transient() {
                    (EventType::SinkDegraded, EventStatus::Warning)
                } else {
                    (EventType::FatalWriteError, EventStatus::Error)
                };
                recorder.record_event(SystemEvent::now(
                    event_type,
                    status,
                    format!("{name} write {key} failed after {} attempt(s): {e}", attempt + 1),
                ));
                return demote(fallback, name, key, record, recorder);
            }
        }
    }
}

fn demote(
    fallback: &LocalFallbackSink,
    origin: &'static str,
    key: &str,
    record: &TierRecord,
    recorder: &dyn Recorder,
) -> WriteOutcome {
    match fallback.demote(origin, key, record) {
        Ok(_) => {
            warn!(sink = origin, key, "Record demoted to local fallback");
            WriteOutcome::Demoted {
                sink: origin,
                key: key.to_string(),
            }
        }
        Err(e) => {
            error!(sink = origin, key, error = %e, "Fallback write failed, record lost");
            recorder.record_event(SystemEvent::now(
                EventType::FatalWriteError,
                EventStatus::Error,
                format!("fallback demotion of {key} from {origin} failed: {e}"),
            ));
            WriteOutcome::Lost {
                sink: origin,
                key: key.to_string(),
            }
        }
    }
}

/// The configured sink set plus the shared fallback, owned by the pipeline
/// controller for the life of the run.
pub struct SinkSet {
    pub sinks: Vec<Arc<dyn Sink>>,
    pub fallback: Arc<LocalFallbackSink>,
    pub retry: RetryConfig,
}

impl SinkSet {
    /// Spawn one write task per (sink, record) pair and wait for all of
    /// them. The join barrier is per batch: the caller gets a complete
    /// report, and no task outlives the fan-out.
    pub async fn fan_out(
        &self,
        records: Arc<Vec<TierRecord>>,
        recorder: Arc<dyn Recorder>,
    ) -> FanoutReport {
        let mut tasks = JoinSet::new();
        for sink in &self.sinks {
            for index in 0..records.len() {
                if !sink.accepts(&records[index]) {
                    continue;
                }
                let sink = Arc::clone(sink);
                let fallback = Arc::clone(&self.fallback);
                let retry = self.retry.clone();
                let records = Arc::clone(&records);
                let recorder = Arc::clone(&recorder);
                tasks.spawn(async move {
                    let record = &records[index];
                    let key = record.object_key();
                    write_with_retry(
                        sink.as_ref(),
                        &fallback,
                        &retry,
                        &key,
                        record,
                        recorder.as_ref(),
                    )
                    .await
                });
            }
        }

        let mut report = FanoutReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    // A panicked write task counts as a loss; the record's
                    // fate is unknown.
                    error!(error = %e, "Sink write task panicked");
                    report.lost += 1;
                }
            }
        }
        report
    }
}
