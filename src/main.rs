//! tierflow - streaming sensor telemetry pipeline
//!
//! Batches incoming IoT sensor readings, scores them against a versioned
//! anomaly model, routes the results into bronze/silver/gold tiers, and
//! fans the tier records out to the configured durable sinks.
//!
//! # Usage
//!
//! ```bash
//! # Train the anomaly model first
//! cargo run --release --bin train-model
//!
//! # Run against live readings piped in as JSON lines
//! sensor-sim | tierflow --stdin
//!
//! # Run with the built-in simulator
//! tierflow --simulate --speed 10 --readings 200
//! ```
//!
//! # Environment Variables
//!
//! - `TIERFLOW_CONFIG`: path to the TOML config (default: ./tierflow.toml)
//! - `DATABASE_URL`: PostgreSQL connection string for the relational sink
//! - `TIERFLOW_OBJECT_TOKEN`: bearer token for the object store endpoint
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tierflow::config::{self, PipelineConfig};
use tierflow::metrics::{MemoryRecorder, MetricsRecorder, PgRecorder, Recorder};
use tierflow::model::ScoringModel;
use tierflow::pipeline::{PipelineController, ReadingSource, SimulatedSource, StdinSource};
use tierflow::routing::TieredRouter;
use tierflow::scoring::AnomalyScorer;
use tierflow::sinks::{
    LocalFallbackSink, ObjectStoreSink, RelationalSink, Sink, SinkSet,
};
use tierflow::types::{EventStatus, EventType, SystemEvent};

#[derive(Parser, Debug)]
#[command(name = "tierflow")]
#[command(about = "Streaming sensor telemetry batching, scoring, and tiered routing")]
#[command(version)]
struct CliArgs {
    /// Read JSON-line sensor readings from stdin
    #[arg(long)]
    stdin: bool,

    /// Generate readings with the built-in sensor simulator
    #[arg(long)]
    simulate: bool,

    /// Simulator speed multiplier (1 = realtime, 10 = 10x faster, 0 = no delay)
    #[arg(long, default_value = "1")]
    speed: u64,

    /// Stop after this many simulated readings (unbounded if omitted)
    #[arg(long)]
    readings: Option<u64>,

    /// Path to the TOML config file (overrides TIERFLOW_CONFIG)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    if let Some(path) = &args.config {
        // load() reads this variable as its first choice
        std::env::set_var("TIERFLOW_CONFIG", path);
    }
    let loaded = PipelineConfig::load();
    loaded.validate().context("invalid configuration")?;
    config::init(loaded);
    let config = config::get();

    info!("tierflow - streaming telemetry pipeline");

    // A missing or corrupt model artifact is fatal: scoring with a made-up
    // threshold would silently misclassify everything.
    let model = Arc::new(
        ScoringModel::load(&config.model.path).with_context(|| {
            format!(
                "failed to load model artifact {} (run `train-model` first)",
                config.model.path.display()
            )
        })?,
    );
    info!(
        version = model.version(),
        threshold = model.threshold(),
        "Model loaded"
    );

    let fallback = Arc::new(
        LocalFallbackSink::open(&config.sinks.fallback.dir)
            .map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    let mut recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());

    if config.sinks.relational.enabled {
        let relational = RelationalSink::connect(&config.sinks.relational.database_url())
            .await
            .map_err(|e| anyhow::anyhow!("relational sink: {e}"))?;
        // Metrics and events land in the same database the dashboard reads
        recorder = Arc::new(PgRecorder::new(relational.pool()));
        sinks.push(Arc::new(relational));
    } else {
        warn!("Relational sink disabled; metrics and events stay in memory");
    }

    if config.sinks.object_store.enabled {
        let object_store = ObjectStoreSink::new(&config.sinks.object_store)
            .map_err(|e| anyhow::anyhow!("object store sink: {e}"))?;
        sinks.push(Arc::new(object_store));
    }

    // With every remote sink disabled the fallback is the primary sink
    // rather than just the demotion target.
    if sinks.is_empty() {
        warn!("No remote sinks enabled, writing all tiers to the local fallback");
        sinks.push(Arc::clone(&fallback) as Arc<dyn Sink>);
    }

    let sink_set = Arc::new(SinkSet {
        sinks,
        fallback,
        retry: config.retry.clone(),
    });

    info!(backend = recorder.recorder_name(), "Audit trail ready");
    recorder.record_event(SystemEvent::now(
        EventType::ModelLoad,
        EventStatus::Info,
        format!(
            "model {} loaded, threshold {:.4}",
            model.version(),
            model.threshold()
        ),
    ));

    let metrics = Arc::new(MetricsRecorder::new(
        Arc::clone(&recorder),
        config.batching.anomaly_rate_window,
    ));
    let scorer = AnomalyScorer::new(model, Arc::clone(&recorder));
    let router = TieredRouter::new(config.severity_bands.clone());

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, draining pipeline");
            ctrl_c_cancel.cancel();
        }
    });

    let mut controller = PipelineController::new(
        &config.batching,
        scorer,
        router,
        sink_set,
        metrics,
        recorder,
        cancel,
    );

    let source: Box<dyn ReadingSource> = if args.stdin {
        info!("Reading JSON sensor readings from stdin");
        Box::new(StdinSource::new())
    } else if args.simulate {
        let mut sim_config = config.simulator.clone();
        if args.speed > 0 {
            sim_config.reading_interval_ms /= args.speed;
        } else {
            sim_config.reading_interval_ms = 0;
        }
        info!(
            sensors = sim_config.sensor_count,
            interval_ms = sim_config.reading_interval_ms,
            "Running built-in sensor simulator"
        );
        Box::new(SimulatedSource::new(sim_config, args.readings))
    } else {
        bail!("select an input: --stdin or --simulate");
    };

    let stats = controller.run(source).await;
    info!("{stats}");
    Ok(())
}
