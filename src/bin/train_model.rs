//! Offline model trainer.
//!
//! Generates a synthetic two-regime training set (mostly normal readings
//! with a contamination-sized anomalous slice), fits the scaler and
//! decision threshold, and writes the versioned artifact the pipeline
//! loads at startup.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tracing::info;

use tierflow::config::defaults;
use tierflow::model::{fit_artifact, save_artifact, FEATURE_COUNT};

#[derive(Parser, Debug)]
#[command(name = "train-model")]
#[command(about = "Fit and save the tierflow anomaly model artifact")]
#[command(version)]
struct CliArgs {
    /// Output path for the model artifact
    #[arg(long, default_value = defaults::MODEL_ARTIFACT_PATH)]
    output: PathBuf,

    /// Number of synthetic training samples
    #[arg(long, default_value = "1000")]
    samples: usize,

    /// Expected anomaly fraction, also the threshold quantile
    #[arg(long, default_value_t = defaults::MODEL_CONTAMINATION)]
    contamination: f64,

    /// RNG seed for reproducible artifacts
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!(
        samples = args.samples,
        contamination = args.contamination,
        "Generating synthetic training regimes"
    );
    let samples = generate_training_set(&mut rng, args.samples, args.contamination);

    let version = format!("tierflow-{}", Utc::now().format("%Y%m%d%H%M%S"));
    let artifact = fit_artifact(&version, &samples, args.contamination)
        .context("failed to fit model artifact")?;

    info!(
        version = %artifact.version,
        threshold = artifact.threshold,
        "Model fitted"
    );
    save_artifact(&artifact, &args.output)
        .with_context(|| format!("failed to save artifact to {}", args.output.display()))?;
    Ok(())
}

/// Two disjoint regimes: normal readings dominate, anomalous readings fill
/// the contamination fraction. Feature layout matches the online scorer:
/// temperature, humidity, temperature/humidity ratio.
fn generate_training_set(
    rng: &mut StdRng,
    count: usize,
    contamination: f64,
) -> Vec<[f64; FEATURE_COUNT]> {
    (0..count)
        .map(|_| {
            let anomalous = rng.gen_bool(contamination.clamp(0.0, 1.0));
            let (temp_range, humidity_range) = if anomalous {
                (defaults::ANOMALY_TEMP_RANGE, defaults::ANOMALY_HUMIDITY_RANGE)
            } else {
                (defaults::NORMAL_TEMP_RANGE, defaults::NORMAL_HUMIDITY_RANGE)
            };
            let temperature = rng.gen_range(temp_range.0..temp_range.1);
            let humidity = rng.gen_range(humidity_range.0..humidity_range.1);
            let ratio = if humidity > 0.0 {
                temperature / humidity
            } else {
                0.0
            };
            [temperature, humidity, ratio]
        })
        .collect()
}
