//! Pipeline Configuration Module
//!
//! Provides the pipeline configuration loaded from TOML, replacing scattered
//! hardcoded thresholds with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `TIERFLOW_CONFIG` environment variable (path to TOML file)
//! 2. `tierflow.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(PipelineConfig::load());
//!
//! // Anywhere in the codebase:
//! let budget = config::get().retry.max_attempts;
//! ```

mod pipeline_config;
pub mod defaults;

pub use pipeline_config::*;

use std::sync::OnceLock;

/// Global pipeline configuration, initialized once at startup.
static PIPELINE_CONFIG: OnceLock<PipelineConfig> = OnceLock::new();

/// Initialize the global pipeline configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: PipelineConfig) {
    if PIPELINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global pipeline configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static PipelineConfig {
    #[allow(clippy::expect_used)]
    PIPELINE_CONFIG
        .get()
        .expect("config::get() called before config::init(); this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    PIPELINE_CONFIG.get().is_some()
}
