//! Pipeline health metrics and the system event audit trail.
//!
//! Everything operational flows through the [`Recorder`] trait so backends
//! can be swapped without touching pipeline code: Postgres for production
//! (the dashboard reads `pipeline_metrics` / `system_events`), in-memory
//! for tests. Emission is best-effort by contract - a metrics failure is
//! logged and never fails the batch that produced it.

mod recorder;

pub use recorder::{MemoryRecorder, PgRecorder, Recorder};

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

use crate::sinks::FanoutReport;
use crate::types::PipelineMetric;

/// Per-batch sample kept for the rolling anomaly rate.
#[derive(Debug, Clone, Copy)]
struct BatchSample {
    readings: usize,
    anomalies: usize,
}

/// Everything known about one completed batch cycle.
#[derive(Debug)]
pub struct BatchCycle {
    pub sequence_no: u64,
    pub readings: usize,
    pub anomalies: usize,
    pub feature_errors: usize,
    /// Start of scoring to completion of all sink writes
    pub latency: Duration,
    pub fanout: FanoutReport,
}

/// Derives and emits operational metrics alongside each batch cycle.
pub struct MetricsRecorder {
    recorder: std::sync::Arc<dyn Recorder>,
    /// Trailing per-batch window for the rolling anomaly rate
    window: Mutex<VecDeque<BatchSample>>,
    window_size: usize,
    totals: Mutex<PipelineStats>,
}

impl MetricsRecorder {
    pub fn new(recorder: std::sync::Arc<dyn Recorder>, window_size: usize) -> Self {
        Self {
            recorder,
            window: Mutex::new(VecDeque::with_capacity(window_size)),
            window_size: window_size.max(1),
            totals: Mutex::new(PipelineStats::default()),
        }
    }

    /// Emit the metric set for a completed batch cycle.
    ///
    /// Never fails: backend errors are the recorder's problem, not the
    /// pipeline's.
    pub fn record_batch_cycle(&self, cycle: &BatchCycle) {
        let anomaly_rate = self.update_window(cycle);

        self.recorder.record_metric(PipelineMetric::now(
            "batch_latency_ms",
            cycle.latency.as_secs_f64() * 1_000.0,
        ));
        self.recorder
            .record_metric(PipelineMetric::now("batch_size", cycle.readings as f64));
        self.recorder
            .record_metric(PipelineMetric::now("anomaly_rate", anomaly_rate));

        for (sink, successes) in cycle.fanout.successes_by_sink() {
            self.recorder.record_metric(PipelineMetric::now(
                format!("sink_{sink}_success"),
                successes as f64,
            ));
        }
        for (sink, failures) in cycle.fanout.failures_by_sink() {
            self.recorder.record_metric(PipelineMetric::now(
                format!("sink_{sink}_failure"),
                failures as f64,
            ));
        }
        if cycle.fanout.fallback_writes > 0 {
            self.recorder.record_metric(PipelineMetric::now(
                "fallback_writes",
                cycle.fanout.fallback_writes as f64,
            ));
        }
        if cycle.feature_errors > 0 {
            self.recorder.record_metric(PipelineMetric::now(
                "feature_errors",
                cycle.feature_errors as f64,
            ));
        }

        if let Ok(mut totals) = self.totals.lock() {
            totals.batches_processed += 1;
            totals.readings_processed += cycle.readings as u64;
            totals.anomalies_detected += cycle.anomalies as u64;
            totals.feature_errors += cycle.feature_errors as u64;
            totals.fallback_writes += cycle.fanout.fallback_writes as u64;
            totals.sink_failures += cycle.fanout.total_failures() as u64;
        }

        info!(
            sequence_no = cycle.sequence_no,
            readings = cycle.readings,
            anomalies = cycle.anomalies,
            latency_ms = cycle.latency.as_millis(),
            anomaly_rate = %format!("{anomaly_rate:.3}"),
            fallback_writes = cycle.fanout.fallback_writes,
            "Batch cycle complete"
        );
    }

    /// Push the sample and return the rolling anomaly rate over the window.
    fn update_window(&self, cycle: &BatchCycle) -> f64 {
        let mut window = match self.window.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        if window.len() >= self.window_size {
            window.pop_front();
        }
        window.push_back(BatchSample {
            readings: cycle.readings,
            anomalies: cycle.anomalies,
        });

        let (readings, anomalies) = window
            .iter()
            .fold((0usize, 0usize), |(r, a), s| (r + s.readings, a + s.anomalies));
        if readings == 0 {
            0.0
        } else {
            anomalies as f64 / readings as f64
        }
    }

    /// Snapshot of running totals.
    pub fn stats(&self) -> PipelineStats {
        self.totals
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// Running pipeline totals, printed at shutdown.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub batches_processed: u64,
    pub readings_processed: u64,
    pub anomalies_detected: u64,
    pub feature_errors: u64,
    pub fallback_writes: u64,
    pub sink_failures: u64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline: {} batches, {} readings ({} anomalies), {} feature errors, {} sink failures ({} demoted to fallback)",
            self.batches_processed,
            self.readings_processed,
            self.anomalies_detected,
            self.feature_errors,
            self.sink_failures,
            self.fallback_writes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::FanoutReport;
    use std::sync::Arc;

    fn cycle(seq: u64, readings: usize, anomalies: usize) -> BatchCycle {
        BatchCycle {
            sequence_no: seq,
            readings,
            anomalies,
            feature_errors: 0,
            latency: Duration::from_millis(12),
            fanout: FanoutReport::default(),
        }
    }

    #[test]
    fn test_rolling_anomaly_rate() {
        let recorder = Arc::new(MemoryRecorder::new());
        let metrics = MetricsRecorder::new(recorder.clone(), 2);

        metrics.record_batch_cycle(&cycle(1, 10, 0));
        metrics.record_batch_cycle(&cycle(2, 10, 5));
        // Window = batches 1+2: 5/20
        let rate = recorder
            .metrics()
            .iter()
            .rev()
            .find(|m| m.name == "anomaly_rate")
            .map(|m| m.value)
            .unwrap();
        assert!((rate - 0.25).abs() < 1e-9);

        // Batch 3 evicts batch 1 from the window: (5+10)/20
        metrics.record_batch_cycle(&cycle(3, 10, 10));
        let rate = recorder
            .metrics()
            .iter()
            .rev()
            .find(|m| m.name == "anomaly_rate")
            .map(|m| m.value)
            .unwrap();
        assert!((rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_totals_accumulate() {
        let metrics = MetricsRecorder::new(Arc::new(MemoryRecorder::new()), 8);
        metrics.record_batch_cycle(&cycle(1, 10, 2));
        metrics.record_batch_cycle(&cycle(2, 4, 1));

        let stats = metrics.stats();
        assert_eq!(stats.batches_processed, 2);
        assert_eq!(stats.readings_processed, 14);
        assert_eq!(stats.anomalies_detected, 3);
    }
}
