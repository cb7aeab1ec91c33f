//! Standalone sensor fleet simulator.
//!
//! Emits JSON sensor readings on stdout, one per line, for piping into
//! `tierflow --stdin`. Uses the same two-regime generator as the in-process
//! simulator.

use anyhow::Result;
use clap::Parser;
use std::io::Write;

use tierflow::config::{defaults, SimulatorConfig};
use tierflow::pipeline::{ReadingSource, SimulatedSource, SourceEvent};

#[derive(Parser, Debug)]
#[command(name = "sensor-sim")]
#[command(about = "Emit simulated JSON sensor readings on stdout")]
#[command(version)]
struct CliArgs {
    /// Number of simulated sensors
    #[arg(long, default_value_t = defaults::SIMULATOR_SENSOR_COUNT)]
    sensors: usize,

    /// Probability that a reading is anomalous
    #[arg(long, default_value_t = defaults::SIMULATOR_ANOMALY_PROBABILITY)]
    anomaly_probability: f64,

    /// Delay between readings in milliseconds
    #[arg(long, default_value_t = defaults::SIMULATOR_READING_INTERVAL_MS)]
    interval_ms: u64,

    /// Stop after this many readings (unbounded if omitted)
    #[arg(long)]
    readings: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let mut source = SimulatedSource::new(
        SimulatorConfig {
            sensor_count: args.sensors,
            anomaly_probability: args.anomaly_probability,
            reading_interval_ms: args.interval_ms,
        },
        args.readings,
    );

    let stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = source.next_reading() => match event {
                SourceEvent::Reading(reading) => {
                    let line = serde_json::to_string(&reading)?;
                    let mut out = stdout.lock();
                    // A closed pipe means the consumer is gone; stop quietly
                    if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
                        break;
                    }
                }
                SourceEvent::Eof => break,
            },
        }
    }
    Ok(())
}
