//! Pipeline controller - owns the run loop and the lifecycle.
//!
//! The source runs in its own task and hands readings over an mpsc channel;
//! `next_reading` may sleep between readings, so it must not share a select
//! with the flush ticker, which would drop the in-flight future and restart
//! its sleep on every tick. Flush decisions, scoring, and routing run
//! serialized on the controller loop so batch sequence order is never
//! ambiguous. Sink fan-out is spawned per batch, letting the write tail of
//! batch N overlap ingestion of batch N+1; the drain path waits for every
//! outstanding fan-out before stopping, so cancellation never aborts a
//! write mid-flight.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::source::{ReadingSource, SourceEvent};
use super::state::PipelineState;
use crate::batching::BatchAggregator;
use crate::config::BatchingConfig;
use crate::metrics::{BatchCycle, MetricsRecorder, PipelineStats, Recorder};
use crate::routing::TieredRouter;
use crate::scoring::AnomalyScorer;
use crate::sinks::SinkSet;
use crate::types::{Batch, EventStatus, EventType, SensorReading, SystemEvent, Verdict};

const INGEST_CHANNEL_CAPACITY: usize = 100;

pub struct PipelineController {
    aggregator: BatchAggregator,
    scorer: AnomalyScorer,
    router: TieredRouter,
    sinks: Arc<SinkSet>,
    metrics: Arc<MetricsRecorder>,
    recorder: Arc<dyn Recorder>,
    cancel: CancellationToken,
    flush_check_interval: Duration,
    state: PipelineState,
    inflight: JoinSet<()>,
}

impl PipelineController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batching: &BatchingConfig,
        scorer: AnomalyScorer,
        router: TieredRouter,
        sinks: Arc<SinkSet>,
        metrics: Arc<MetricsRecorder>,
        recorder: Arc<dyn Recorder>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            aggregator: BatchAggregator::new(batching.max_batch_size, batching.max_batch_age()),
            scorer,
            router,
            sinks,
            metrics,
            recorder,
            cancel,
            flush_check_interval: Duration::from_millis(batching.flush_check_interval_ms),
            state: PipelineState::Stopped,
            inflight: JoinSet::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run until the source is exhausted or cancellation is requested, then
    /// drain. Returns the cumulative run statistics.
    pub async fn run(&mut self, source: Box<dyn ReadingSource>) -> PipelineStats {
        self.transition(PipelineState::Starting);
        self.recorder.record_event(SystemEvent::now(
            EventType::PipelineStart,
            EventStatus::Info,
            format!("pipeline starting, model {}", self.scorer.model_version()),
        ));
        self.transition(PipelineState::Running);

        // The ingest task owns the source. `rx.recv()` below is cancel-safe;
        // a raw `next_reading()` in the select! is not (a ticker wakeup would
        // drop it mid-sleep and the source would never advance).
        let (tx, mut rx) = mpsc::channel::<SensorReading>(INGEST_CHANNEL_CAPACITY);
        let ingest_cancel = self.cancel.clone();
        let ingest = tokio::spawn(async move {
            let mut source = source;
            loop {
                tokio::select! {
                    _ = ingest_cancel.cancelled() => break,
                    event = source.next_reading() => match event {
                        SourceEvent::Reading(reading) => {
                            if tx.send(reading).await.is_err() {
                                break;
                            }
                        }
                        SourceEvent::Eof => break,
                    },
                }
            }
        });

        let mut ticker = tokio::time::interval(self.flush_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                maybe = rx.recv() => match maybe {
                    Some(reading) => {
                        self.aggregator.offer(reading);
                        if let Some(batch) = self.aggregator.try_flush(Instant::now()) {
                            self.dispatch(batch);
                        }
                    }
                    None => {
                        info!("Reading source exhausted");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if let Some(batch) = self.aggregator.try_flush(Instant::now()) {
                        self.dispatch(batch);
                    }
                }
                // Reap finished fan-outs so the set stays small
                Some(joined) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Batch cycle task panicked");
                    }
                }
            }
        }

        if let Err(e) = ingest.await {
            error!(error = %e, "Ingest task panicked");
        }
        self.drain(&mut rx).await;

        let stats = self.metrics.stats();
        self.recorder.record_event(SystemEvent::now(
            EventType::PipelineStop,
            EventStatus::Info,
            format!(
                "pipeline stopped: {} readings in {} batches, {} anomalies",
                stats.readings_processed, stats.batches_processed, stats.anomalies_detected
            ),
        ));
        // The stop event above is the last write; settle the audit trail
        // before the runtime can drop its backend tasks.
        self.recorder.flush().await;
        self.transition(PipelineState::Stopped);
        stats
    }

    /// Score, route, and hand the batch to the sink fan-out. Scoring stays
    /// on the controller loop; only the durable writes run concurrently.
    fn dispatch(&mut self, batch: Batch) {
        let cycle_started = Instant::now();
        let scored = self.scorer.score_batch(&batch);
        let anomalies = scored
            .scored
            .iter()
            .filter(|s| s.verdict == Verdict::Anomalous)
            .count();
        let records = Arc::new(self.router.build_tier_records(
            &batch,
            &scored.scored,
            self.scorer.model_version(),
        ));

        info!(
            sequence_no = batch.sequence_no,
            readings = batch.len(),
            anomalies,
            tier_records = records.len(),
            "Batch closed"
        );

        let sequence_no = batch.sequence_no;
        let readings = batch.len();
        let feature_errors = scored.feature_errors;
        let sinks = Arc::clone(&self.sinks);
        let metrics = Arc::clone(&self.metrics);
        let recorder = Arc::clone(&self.recorder);

        self.inflight.spawn(async move {
            let fanout = sinks.fan_out(records, recorder).await;
            metrics.record_batch_cycle(&BatchCycle {
                sequence_no,
                readings,
                anomalies,
                feature_errors,
                latency: cycle_started.elapsed(),
                fanout,
            });
        });
    }

    /// Flush the partial batch and wait for every outstanding fan-out.
    async fn drain(&mut self, rx: &mut mpsc::Receiver<SensorReading>) {
        self.transition(PipelineState::Draining);
        // Readings the ingest task handed over before it saw shutdown are
        // acknowledged input; pull them into the aggregator so none drop.
        while let Ok(reading) = rx.try_recv() {
            self.aggregator.offer(reading);
            if let Some(batch) = self.aggregator.try_flush(Instant::now()) {
                self.dispatch(batch);
            }
        }
        if let Some(batch) = self.aggregator.force_flush() {
            info!(
                sequence_no = batch.sequence_no,
                readings = batch.len(),
                "Flushing partial batch on drain"
            );
            self.dispatch(batch);
        }
        while let Some(joined) = self.inflight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Batch cycle task panicked during drain");
            }
        }
        info!("Drain complete, all writes settled");
    }

    fn transition(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Illegal state transition ignored");
            return;
        }
        info!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }
}
