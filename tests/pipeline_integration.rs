//! End-to-end pipeline tests.
//!
//! Drives the controller with scripted reading sources and in-process sinks,
//! asserting on tier routing, flush triggers, drain behavior, and the
//! retry/demotion path. No external services are required.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use tierflow::config::{BatchingConfig, RetryConfig, SeverityBandsConfig};
use tierflow::metrics::{MemoryRecorder, MetricsRecorder, PipelineStats, Recorder};
use tierflow::model::{ModelArtifact, ScalerParams, ScoringModel};
use tierflow::pipeline::{PipelineController, ReadingSource, SourceEvent};
use tierflow::routing::TieredRouter;
use tierflow::scoring::AnomalyScorer;
use tierflow::sinks::{
    LocalFallbackSink, Sink, SinkError, SinkSet, WriteAck,
};
use tierflow::types::{
    EventType, PipelineMetric, SensorReading, SystemEvent, Tier, TierPayload, TierRecord, Verdict,
};

fn test_model() -> Arc<ScoringModel> {
    let artifact = ModelArtifact {
        version: "test-v1".to_string(),
        trained_at: Utc::now(),
        scaler: ScalerParams {
            means: [23.0, 55.0, 0.42],
            stds: [3.0, 10.0, 0.1],
        },
        threshold: 3.0,
        contamination: 0.1,
        training_samples: 1000,
    };
    Arc::new(ScoringModel::from_artifact(artifact).expect("valid test artifact"))
}

fn normal_reading(sensor: &str) -> SensorReading {
    SensorReading {
        sensor_id: sensor.to_string(),
        timestamp: Utc::now(),
        temperature: 23.0,
        humidity: 55.0,
    }
}

fn anomalous_reading(sensor: &str) -> SensorReading {
    SensorReading {
        sensor_id: sensor.to_string(),
        timestamp: Utc::now(),
        temperature: 100.0,
        humidity: 10.0,
    }
}

/// Yields scripted readings, optionally sleeping between them or lingering
/// before EOF so time-based behavior can fire while the source is "open".
struct ScriptedSource {
    readings: VecDeque<SensorReading>,
    gap: Duration,
    tail_delay: Duration,
}

impl ScriptedSource {
    fn new(readings: Vec<SensorReading>) -> Self {
        Self {
            readings: readings.into(),
            gap: Duration::ZERO,
            tail_delay: Duration::ZERO,
        }
    }

    /// Sleep this long before yielding each reading.
    fn with_gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    fn with_tail_delay(mut self, delay: Duration) -> Self {
        self.tail_delay = delay;
        self
    }
}

#[async_trait]
impl ReadingSource for ScriptedSource {
    async fn next_reading(&mut self) -> SourceEvent {
        match self.readings.pop_front() {
            Some(r) => {
                tokio::time::sleep(self.gap).await;
                SourceEvent::Reading(r)
            }
            None => {
                tokio::time::sleep(self.tail_delay).await;
                SourceEvent::Eof
            }
        }
    }
}

/// Records every write in memory and always acks.
#[derive(Default)]
struct CapturingSink {
    writes: Mutex<Vec<(String, TierRecord)>>,
}

impl CapturingSink {
    fn writes(&self) -> Vec<(String, TierRecord)> {
        self.writes.lock().expect("writes lock").clone()
    }
}

#[async_trait]
impl Sink for CapturingSink {
    async fn write(&self, key: &str, record: &TierRecord) -> Result<WriteAck, SinkError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push((key.to_string(), record.clone()));
        Ok(WriteAck {
            sink: "capturing",
            key: key.to_string(),
        })
    }

    fn sink_name(&self) -> &'static str {
        "capturing"
    }
}

/// Captures like [`MemoryRecorder`] but counts flush calls, standing in for
/// a backend that defers writes and must be settled before shutdown.
#[derive(Default)]
struct FlushCountingRecorder {
    inner: MemoryRecorder,
    flushes: AtomicUsize,
}

#[async_trait]
impl Recorder for FlushCountingRecorder {
    fn record_metric(&self, metric: PipelineMetric) {
        self.inner.record_metric(metric);
    }

    fn record_event(&self, event: SystemEvent) {
        self.inner.record_event(event);
    }

    async fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn recorder_name(&self) -> &'static str {
        "flush_counting"
    }
}

/// Fails every write with a transient error.
struct AlwaysDownSink;

#[async_trait]
impl Sink for AlwaysDownSink {
    async fn write(&self, _key: &str, _record: &TierRecord) -> Result<WriteAck, SinkError> {
        Err(SinkError::Transient("connection refused".to_string()))
    }

    fn sink_name(&self) -> &'static str {
        "down"
    }
}

struct Harness {
    controller: PipelineController,
    recorder: Arc<MemoryRecorder>,
}

fn build_harness(
    batching: BatchingConfig,
    sinks: Vec<Arc<dyn Sink>>,
    fallback: Arc<LocalFallbackSink>,
) -> Harness {
    let recorder = Arc::new(MemoryRecorder::new());
    let shared: Arc<dyn Recorder> = recorder.clone();
    let metrics = Arc::new(MetricsRecorder::new(shared.clone(), batching.anomaly_rate_window));
    let scorer = AnomalyScorer::new(test_model(), shared.clone());
    let router = TieredRouter::new(SeverityBandsConfig::default());
    let sink_set = Arc::new(SinkSet {
        sinks,
        fallback,
        retry: RetryConfig {
            max_attempts: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        },
    });
    let controller = PipelineController::new(
        &batching,
        scorer,
        router,
        sink_set,
        metrics,
        shared,
        CancellationToken::new(),
    );
    Harness {
        controller,
        recorder,
    }
}

fn batching(max_batch_size: usize, max_batch_age_ms: u64) -> BatchingConfig {
    BatchingConfig {
        max_batch_size,
        max_batch_age_ms,
        flush_check_interval_ms: 10,
        anomaly_rate_window: 5,
    }
}

async fn run(harness: &mut Harness, source: ScriptedSource) -> PipelineStats {
    harness.controller.run(Box::new(source)).await
}

#[tokio::test]
async fn test_mixed_batch_routes_all_three_tiers() {
    let tmp = tempfile::tempdir().unwrap();
    let fallback = Arc::new(LocalFallbackSink::open(tmp.path()).unwrap());
    let capturing = Arc::new(CapturingSink::default());
    let mut harness = build_harness(batching(4, 60_000), vec![capturing.clone()], fallback);

    let stats = run(
        &mut harness,
        ScriptedSource::new(vec![
            normal_reading("sensor_001"),
            normal_reading("sensor_002"),
            anomalous_reading("sensor_003"),
            normal_reading("sensor_004"),
        ]),
    )
    .await;

    assert_eq!(stats.batches_processed, 1);
    assert_eq!(stats.readings_processed, 4);
    assert_eq!(stats.anomalies_detected, 1);

    let writes = capturing.writes();
    assert_eq!(writes.len(), 3, "bronze + silver + gold");

    let bronze = writes
        .iter()
        .find(|(_, r)| r.tier == Tier::Bronze)
        .expect("bronze record");
    assert!(bronze.0.starts_with("bronze/batch_"));
    match &bronze.1.payload {
        TierPayload::Raw(readings) => assert_eq!(readings.len(), 4),
        other => panic!("bronze payload should be raw readings, got {other:?}"),
    }

    let silver = writes
        .iter()
        .find(|(_, r)| r.tier == Tier::Silver)
        .expect("silver record");
    match &silver.1.payload {
        TierPayload::Normal(scored) => {
            assert_eq!(scored.len(), 3);
            assert!(scored.iter().all(|s| s.verdict == Verdict::Normal));
            assert!(scored.iter().all(|s| s.model_version == "test-v1"));
        }
        other => panic!("silver payload should be scored readings, got {other:?}"),
    }

    let gold = writes
        .iter()
        .find(|(_, r)| r.tier == Tier::Gold)
        .expect("gold record");
    match &gold.1.payload {
        TierPayload::Alerts(alerts) => {
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].sensor_id, "sensor_003");
            assert_eq!(alerts[0].alert_type, "ML_DETECTED");
        }
        other => panic!("gold payload should be alerts, got {other:?}"),
    }

    // Every input reading appears exactly once across silver + gold
    let silver_count = match &silver.1.payload {
        TierPayload::Normal(s) => s.len(),
        _ => 0,
    };
    let gold_count = match &gold.1.payload {
        TierPayload::Alerts(a) => a.len(),
        _ => 0,
    };
    assert_eq!(silver_count + gold_count, 4);
}

#[tokio::test]
async fn test_age_trigger_flushes_undersized_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let fallback = Arc::new(LocalFallbackSink::open(tmp.path()).unwrap());
    let capturing = Arc::new(CapturingSink::default());
    // Size trigger far away; age trigger at 50ms with the source held open
    let mut harness = build_harness(batching(100, 50), vec![capturing.clone()], fallback);

    let source = ScriptedSource::new(vec![
        normal_reading("sensor_001"),
        normal_reading("sensor_002"),
        normal_reading("sensor_003"),
    ])
    .with_tail_delay(Duration::from_millis(300));

    let stats = run(&mut harness, source).await;

    // The batch closed on age while the source was still open, not on drain
    assert_eq!(stats.batches_processed, 1);
    let bronze: Vec<_> = capturing
        .writes()
        .into_iter()
        .filter(|(_, r)| r.tier == Tier::Bronze)
        .collect();
    assert_eq!(bronze.len(), 1);
    assert_eq!(bronze[0].1.sequence_no, 1);
    match &bronze[0].1.payload {
        TierPayload::Raw(readings) => assert_eq!(readings.len(), 3),
        other => panic!("expected raw payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_source_is_not_starved_by_flush_ticker() {
    let tmp = tempfile::tempdir().unwrap();
    let fallback = Arc::new(LocalFallbackSink::open(tmp.path()).unwrap());
    let capturing = Arc::new(CapturingSink::default());
    // Flush checks run every 10ms while the source sleeps 100ms between
    // readings. A pull that loses its in-flight sleep to each ticker
    // wakeup never yields a second reading, and this run never finishes.
    let mut harness = build_harness(batching(100, 60_000), vec![capturing.clone()], fallback);

    let source = ScriptedSource::new(vec![
        normal_reading("sensor_001"),
        normal_reading("sensor_002"),
        normal_reading("sensor_003"),
        normal_reading("sensor_004"),
        normal_reading("sensor_005"),
    ])
    .with_gap(Duration::from_millis(100));

    let stats = tokio::time::timeout(Duration::from_secs(5), run(&mut harness, source))
        .await
        .expect("slow source should finish in well under the timeout");

    assert_eq!(stats.readings_processed, 5);
    assert_eq!(stats.batches_processed, 1);
}

#[tokio::test]
async fn test_drain_flushes_partial_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let fallback = Arc::new(LocalFallbackSink::open(tmp.path()).unwrap());
    let capturing = Arc::new(CapturingSink::default());
    // Neither trigger can fire: size 100, age 60s
    let mut harness = build_harness(batching(100, 60_000), vec![capturing.clone()], fallback);

    let stats = run(
        &mut harness,
        ScriptedSource::new(vec![
            normal_reading("sensor_001"),
            normal_reading("sensor_002"),
            normal_reading("sensor_003"),
            normal_reading("sensor_004"),
            normal_reading("sensor_005"),
        ]),
    )
    .await;

    // No acknowledged reading is dropped at shutdown
    assert_eq!(stats.readings_processed, 5);
    assert_eq!(stats.batches_processed, 1);
    assert!(capturing
        .writes()
        .iter()
        .any(|(_, r)| r.tier == Tier::Bronze));
}

#[tokio::test]
async fn test_sink_outage_demotes_every_record_to_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    let fallback = Arc::new(LocalFallbackSink::open(tmp.path().join("fb")).unwrap());
    let mut harness = build_harness(batching(2, 60_000), vec![Arc::new(AlwaysDownSink)], fallback.clone());

    let stats = run(
        &mut harness,
        ScriptedSource::new(vec![
            normal_reading("sensor_001"),
            anomalous_reading("sensor_002"),
        ]),
    )
    .await;

    // bronze + silver + gold all demoted
    assert_eq!(stats.fallback_writes, 3);
    assert_eq!(stats.sink_failures, 3);
    assert_eq!(fallback.file_count(), 3);
    assert_eq!(
        harness.recorder.events_of_type(EventType::SinkDegraded).len(),
        3
    );
}

#[tokio::test]
async fn test_lifecycle_events_are_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let fallback = Arc::new(LocalFallbackSink::open(tmp.path()).unwrap());
    let capturing = Arc::new(CapturingSink::default());
    let mut harness = build_harness(batching(10, 60_000), vec![capturing], fallback);

    run(&mut harness, ScriptedSource::new(vec![normal_reading("sensor_001")])).await;

    assert_eq!(
        harness
            .recorder
            .events_of_type(EventType::PipelineStart)
            .len(),
        1
    );
    assert_eq!(
        harness
            .recorder
            .events_of_type(EventType::PipelineStop)
            .len(),
        1
    );
}

#[tokio::test]
async fn test_run_settles_deferred_audit_writes() {
    let tmp = tempfile::tempdir().unwrap();
    let fallback = Arc::new(LocalFallbackSink::open(tmp.path()).unwrap());
    let recorder = Arc::new(FlushCountingRecorder::default());
    let shared: Arc<dyn Recorder> = recorder.clone();
    let config = batching(10, 60_000);
    let metrics = Arc::new(MetricsRecorder::new(shared.clone(), config.anomaly_rate_window));
    let scorer = AnomalyScorer::new(test_model(), shared.clone());
    let router = TieredRouter::new(SeverityBandsConfig::default());
    let sink_set = Arc::new(SinkSet {
        sinks: vec![Arc::new(CapturingSink::default())],
        fallback,
        retry: RetryConfig {
            max_attempts: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        },
    });
    let mut controller = PipelineController::new(
        &config,
        scorer,
        router,
        sink_set,
        metrics,
        shared,
        CancellationToken::new(),
    );

    controller
        .run(Box::new(ScriptedSource::new(vec![normal_reading(
            "sensor_001",
        )])))
        .await;

    // The audit backend is settled exactly once, after the stop event
    assert_eq!(recorder.flushes.load(Ordering::SeqCst), 1);
    assert_eq!(
        recorder.inner.events_of_type(EventType::PipelineStop).len(),
        1
    );
}
