//! Pipeline configuration - every recognized option enumerated and defaulted.
//!
//! Replaces the loosely-typed dictionaries of the original deployment with
//! one explicit structure validated at startup. Each section implements
//! `Default`, so a missing file or missing section falls back to built-in
//! values with zero behavior change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a pipeline instance.
///
/// Load with `PipelineConfig::load()` which searches:
/// 1. `$TIERFLOW_CONFIG` env var
/// 2. `./tierflow.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Batching triggers and metric windows
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Scoring model artifact
    #[serde(default)]
    pub model: ModelConfig,

    /// Alert severity score bands
    #[serde(default)]
    pub severity_bands: SeverityBandsConfig,

    /// Sink retry/backoff budget
    #[serde(default)]
    pub retry: RetryConfig,

    /// Durable sink endpoints and credentials
    #[serde(default)]
    pub sinks: SinksConfig,

    /// Built-in simulated reading source
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TIERFLOW_CONFIG` environment variable
    /// 2. `./tierflow.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("TIERFLOW_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded pipeline config from TIERFLOW_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from TIERFLOW_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "TIERFLOW_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("tierflow.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded pipeline config from ./tierflow.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./tierflow.toml, using defaults");
                }
            }
        }

        info!("No tierflow.toml found - using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all options for internal consistency.
    ///
    /// Rules:
    /// - Batch triggers must be positive
    /// - Severity bands must escalate (high >= medium > 0)
    /// - Retry budget and backoff must be positive
    /// - Enabled sinks must have non-empty endpoints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.batching.max_batch_size == 0 {
            errors.push("batching.max_batch_size must be > 0".to_string());
        }
        if self.batching.max_batch_age_ms == 0 {
            errors.push("batching.max_batch_age_ms must be > 0".to_string());
        }
        if self.batching.anomaly_rate_window == 0 {
            errors.push("batching.anomaly_rate_window must be > 0".to_string());
        }

        if self.severity_bands.medium_score <= 0.0 {
            errors.push("severity_bands.medium_score must be > 0".to_string());
        }
        if self.severity_bands.high_score < self.severity_bands.medium_score {
            errors.push(format!(
                "severity_bands.high_score ({}) must be >= medium_score ({})",
                self.severity_bands.high_score, self.severity_bands.medium_score
            ));
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be > 0".to_string());
        }
        if self.retry.backoff_base_ms == 0 {
            errors.push("retry.backoff_base_ms must be > 0".to_string());
        }

        if self.sinks.relational.enabled && self.sinks.relational.database_url().is_empty() {
            errors.push(
                "sinks.relational.database_url (or DATABASE_URL) required when relational sink is enabled"
                    .to_string(),
            );
        }
        if self.sinks.object_store.enabled && self.sinks.object_store.endpoint.is_empty() {
            errors.push(
                "sinks.object_store.endpoint required when object-store sink is enabled"
                    .to_string(),
            );
        }
        if self.sinks.fallback.dir.as_os_str().is_empty() {
            errors.push("sinks.fallback.dir must not be empty".to_string());
        }

        if !(0.0..=1.0).contains(&self.simulator.anomaly_probability) {
            errors.push(format!(
                "simulator.anomaly_probability ({}) must be within [0, 1]",
                self.simulator.anomaly_probability
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Dual flush trigger (count or age) and metric windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Count trigger: flush when this many readings are buffered
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Age trigger: flush when the open batch is at least this old
    #[serde(default = "default_max_batch_age_ms")]
    pub max_batch_age_ms: u64,

    /// How often the controller re-checks the age trigger
    #[serde(default = "default_flush_check_interval_ms")]
    pub flush_check_interval_ms: u64,

    /// Trailing window (in batches) for the rolling anomaly rate metric
    #[serde(default = "default_anomaly_rate_window")]
    pub anomaly_rate_window: usize,
}

impl BatchingConfig {
    pub fn max_batch_age(&self) -> Duration {
        Duration::from_millis(self.max_batch_age_ms)
    }

    pub fn flush_check_interval(&self) -> Duration {
        Duration::from_millis(self.flush_check_interval_ms)
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_age_ms: default_max_batch_age_ms(),
            flush_check_interval_ms: default_flush_check_interval_ms(),
            anomaly_rate_window: default_anomaly_rate_window(),
        }
    }
}

fn default_max_batch_size() -> usize {
    defaults::MAX_BATCH_SIZE
}
fn default_max_batch_age_ms() -> u64 {
    defaults::MAX_BATCH_AGE_MS
}
fn default_flush_check_interval_ms() -> u64 {
    defaults::FLUSH_CHECK_INTERVAL_MS
}
fn default_anomaly_rate_window() -> usize {
    defaults::ANOMALY_RATE_WINDOW_BATCHES
}

/// Scoring model artifact location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the versioned model artifact JSON
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from(defaults::MODEL_ARTIFACT_PATH)
}

/// Score-band boundaries for alert severity.
///
/// Configurable rather than hard-coded: model score distributions drift
/// between artifact versions, so operators retune the bands alongside a
/// model rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityBandsConfig {
    /// Scores at or above this are at least MEDIUM
    #[serde(default = "default_medium_score")]
    pub medium_score: f64,

    /// Scores at or above this are HIGH
    #[serde(default = "default_high_score")]
    pub high_score: f64,
}

impl SeverityBandsConfig {
    /// Map an anomaly score onto a severity tier.
    pub fn severity_for(&self, score: f64) -> crate::types::Severity {
        if score >= self.high_score {
            crate::types::Severity::High
        } else if score >= self.medium_score {
            crate::types::Severity::Medium
        } else {
            crate::types::Severity::Low
        }
    }
}

impl Default for SeverityBandsConfig {
    fn default() -> Self {
        Self {
            medium_score: default_medium_score(),
            high_score: default_high_score(),
        }
    }
}

fn default_medium_score() -> f64 {
    defaults::SEVERITY_MEDIUM_SCORE
}
fn default_high_score() -> f64 {
    defaults::SEVERITY_HIGH_SCORE
}

/// Bounded retry with exponential backoff, applied per sink write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total write attempts per sink write, initial attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base; attempt N sleeps base * 2^N, capped
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff sleep
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl RetryConfig {
    /// Backoff delay before retry attempt `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(defaults::BACKOFF_MAX_EXPONENT);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    defaults::RETRY_MAX_ATTEMPTS
}
fn default_backoff_base_ms() -> u64 {
    defaults::BACKOFF_BASE_MS
}
fn default_backoff_max_ms() -> u64 {
    defaults::BACKOFF_MAX_MS
}

/// Durable sink set. Sinks are independent; disabling one never affects
/// the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinksConfig {
    #[serde(default)]
    pub relational: RelationalSinkConfig,

    #[serde(default)]
    pub object_store: ObjectStoreSinkConfig,

    #[serde(default)]
    pub fallback: FallbackSinkConfig,
}

/// PostgreSQL sink feeding the external dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalSinkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Connection string. `DATABASE_URL` env takes precedence (secrets stay
    /// out of the TOML file).
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl RelationalSinkConfig {
    /// Effective connection string: `DATABASE_URL` env > TOML value.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database_url.clone())
    }
}

impl Default for RelationalSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    defaults::DATABASE_URL.to_string()
}

/// S3-compatible object store holding one object per batch per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreSinkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Gateway base URL, e.g. `http://localhost:9000`
    #[serde(default = "default_object_store_endpoint")]
    pub endpoint: String,

    /// Bucket name; tier prefixes (`bronze/` etc.) nest under it
    #[serde(default = "default_object_store_bucket")]
    pub bucket: String,

    /// Per-request timeout
    #[serde(default = "default_object_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl ObjectStoreSinkConfig {
    /// Bearer token from env; empty means anonymous access.
    pub fn access_token(&self) -> String {
        std::env::var("TIERFLOW_OBJECT_TOKEN").unwrap_or_default()
    }
}

impl Default for ObjectStoreSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_object_store_endpoint(),
            bucket: default_object_store_bucket(),
            timeout_secs: default_object_store_timeout_secs(),
        }
    }
}

fn default_object_store_endpoint() -> String {
    defaults::OBJECT_STORE_ENDPOINT.to_string()
}
fn default_object_store_bucket() -> String {
    defaults::OBJECT_STORE_BUCKET.to_string()
}
fn default_object_store_timeout_secs() -> u64 {
    defaults::OBJECT_STORE_TIMEOUT_SECS
}

/// Append-only local fallback: the demotion target when a sink exhausts
/// its retry budget, and a standalone sink for offline deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSinkConfig {
    #[serde(default = "default_fallback_dir")]
    pub dir: PathBuf,
}

impl Default for FallbackSinkConfig {
    fn default() -> Self {
        Self {
            dir: default_fallback_dir(),
        }
    }
}

fn default_fallback_dir() -> PathBuf {
    PathBuf::from(defaults::FALLBACK_DIR)
}

/// Synthetic reading source (development and demos).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Number of simulated sensors (`sensor_001` .. `sensor_NNN`)
    #[serde(default = "default_sensor_count")]
    pub sensor_count: usize,

    /// Probability that a generated reading is drawn from the anomalous regime
    #[serde(default = "default_anomaly_probability")]
    pub anomaly_probability: f64,

    /// Delay between consecutive readings
    #[serde(default = "default_reading_interval_ms")]
    pub reading_interval_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sensor_count: default_sensor_count(),
            anomaly_probability: default_anomaly_probability(),
            reading_interval_ms: default_reading_interval_ms(),
        }
    }
}

fn default_sensor_count() -> usize {
    defaults::SIMULATOR_SENSOR_COUNT
}
fn default_anomaly_probability() -> f64 {
    defaults::SIMULATOR_ANOMALY_PROBABILITY
}
fn default_reading_interval_ms() -> u64 {
    defaults::SIMULATOR_READING_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration loading/validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error ({0}): {1}")]
    Io(PathBuf, std::io::Error),
    #[error("config parse error ({0}): {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batching.max_batch_size, 10);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_severity_band_mapping() {
        let bands = SeverityBandsConfig {
            medium_score: 4.5,
            high_score: 6.0,
        };
        assert_eq!(bands.severity_for(3.2), crate::types::Severity::Low);
        assert_eq!(bands.severity_for(4.5), crate::types::Severity::Medium);
        assert_eq!(bands.severity_for(7.1), crate::types::Severity::High);
    }

    #[test]
    fn test_inverted_bands_rejected() {
        let mut config = PipelineConfig::default();
        config.severity_bands.medium_score = 8.0;
        config.severity_bands.high_score = 4.0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = PipelineConfig::default();
        config.batching.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let retry = RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 200,
            backoff_max_ms: 1_000,
        };
        assert_eq!(retry.backoff_delay(0), Duration::from_millis(200));
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(400));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(800));
        // Capped by backoff_max_ms
        assert_eq!(retry.backoff_delay(3), Duration::from_millis(1_000));
        assert_eq!(retry.backoff_delay(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [batching]
            max_batch_size = 25

            [severity_bands]
            high_score = 9.0
        "#;
        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.batching.max_batch_size, 25);
        assert_eq!(config.severity_bands.high_score, 9.0);
        // Untouched sections keep defaults
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.sinks.relational.enabled);
    }
}
