//! Config loading and validation against real TOML files on disk.

use std::io::Write;

use tierflow::config::{ConfigError, PipelineConfig};

fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("tierflow.toml");
    let mut f = std::fs::File::create(&path).expect("create config file");
    f.write_all(contents.as_bytes()).expect("write config file");
    path
}

#[test]
fn load_full_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[batching]
max_batch_size = 50
max_batch_age_ms = 5000
flush_check_interval_ms = 100

[model]
path = "models/custom.json"

[severity_bands]
medium_score = 5.0
high_score = 8.0

[retry]
max_attempts = 4
backoff_base_ms = 100
backoff_max_ms = 2000

[sinks.relational]
enabled = false

[sinks.object_store]
enabled = true
endpoint = "http://minio:9000"
bucket = "telemetry"

[sinks.fallback]
dir = "/var/lib/tierflow/fallback"

[simulator]
sensor_count = 12
anomaly_probability = 0.1
"#,
    );

    let config = PipelineConfig::load_from_file(&path).expect("valid config");
    assert_eq!(config.batching.max_batch_size, 50);
    assert_eq!(config.model.path.to_str(), Some("models/custom.json"));
    assert!(!config.sinks.relational.enabled);
    assert_eq!(config.sinks.object_store.bucket, "telemetry");
    assert_eq!(config.simulator.sensor_count, 12);
}

#[test]
fn unparseable_toml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[batching\nmax_batch_size = ");
    let err = PipelineConfig::load_from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_, _)));
}

#[test]
fn out_of_range_values_fail_validation_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[batching]
max_batch_size = 0

[simulator]
anomaly_probability = 1.5
"#,
    );
    let err = PipelineConfig::load_from_file(&path).unwrap_err();
    match err {
        ConfigError::Validation(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().any(|e| e.contains("max_batch_size")));
            assert!(errors.iter().any(|e| e.contains("anomaly_probability")));
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PipelineConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_, _)));
}
