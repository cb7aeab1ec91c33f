//! Scoring model artifact - load, validate, score.
//!
//! The model is a process-wide immutable artifact: the offline trainer
//! (`train-model`) fits it once and writes a versioned JSON file; the
//! pipeline loads it at startup into an explicit handle passed to the
//! scorer by reference. The version identifier travels with every scored
//! reading for reproducibility.
//!
//! Scoring contract: features are standardized with the stored scaler and
//! the anomaly score is the maximum absolute z-score across features. The
//! raw label is `-1` (the anomaly sentinel, isolation-forest convention)
//! iff the score exceeds the fitted decision threshold, else `0`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tracing::info;

use crate::types::FeatureVector;

/// Number of model input features: temperature, humidity, ratio.
pub const FEATURE_COUNT: usize = 3;

/// Standardization parameters fitted on the training set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub means: [f64; FEATURE_COUNT],
    pub stds: [f64; FEATURE_COUNT],
}

impl ScalerParams {
    /// Standardize a feature vector (z-scores).
    pub fn transform(&self, features: &FeatureVector) -> [f64; FEATURE_COUNT] {
        let raw = features.as_array();
        let mut z = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            z[i] = (raw[i] - self.means[i]) / self.stds[i];
        }
        z
    }
}

/// Serialized model artifact. Immutable once written; a retrain produces a
/// new version rather than mutating an existing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Version identifier stamped on every scored reading
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub scaler: ScalerParams,
    /// Decision threshold on the anomaly score
    pub threshold: f64,
    /// Expected anomaly fraction the threshold was fitted at
    pub contamination: f64,
    /// Training set size (provenance only)
    pub training_samples: usize,
}

/// Output of one model invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutput {
    /// Anomaly magnitude: max |z| across standardized features
    pub score: f64,
    /// `-1` anomalous, `0` normal
    pub raw_label: i32,
}

/// Immutable handle over a validated artifact.
#[derive(Debug, Clone)]
pub struct ScoringModel {
    artifact: ModelArtifact,
}

impl ScoringModel {
    /// Load and validate an artifact from disk.
    ///
    /// A missing or corrupt artifact is pipeline-fatal: no model, no pipeline.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ModelError::ArtifactMissing(path.to_path_buf())
            } else {
                ModelError::Io(path.to_path_buf(), e)
            }
        })?;
        let artifact: ModelArtifact = serde_json::from_str(&contents)
            .map_err(|e| ModelError::Corrupt(path.to_path_buf(), e.to_string()))?;
        let model = Self::from_artifact(artifact)?;
        info!(
            version = %model.version(),
            threshold = model.artifact.threshold,
            trained_at = %model.artifact.trained_at,
            "Scoring model loaded (anomaly sentinel: -1)"
        );
        Ok(model)
    }

    /// Validate an in-memory artifact and wrap it in a handle.
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        if artifact.version.trim().is_empty() {
            return Err(ModelError::Invalid("empty version string".to_string()));
        }
        if !(artifact.threshold.is_finite() && artifact.threshold > 0.0) {
            return Err(ModelError::Invalid(format!(
                "threshold must be finite and positive, got {}",
                artifact.threshold
            )));
        }
        for (i, (&mean, &std)) in artifact
            .scaler
            .means
            .iter()
            .zip(artifact.scaler.stds.iter())
            .enumerate()
        {
            if !mean.is_finite() {
                return Err(ModelError::Invalid(format!(
                    "scaler mean[{i}] is not finite"
                )));
            }
            if !(std.is_finite() && std > 0.0) {
                return Err(ModelError::Invalid(format!(
                    "scaler std[{i}] must be finite and positive, got {std}"
                )));
            }
        }
        Ok(Self { artifact })
    }

    /// Apply the model to a feature vector.
    ///
    /// Pure and deterministic: the same features against the same artifact
    /// always produce the same score and label.
    pub fn score(&self, features: &FeatureVector) -> ScoreOutput {
        let z = self.artifact.scaler.transform(features);
        let score = z.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let raw_label = if score > self.artifact.threshold { -1 } else { 0 };
        ScoreOutput { score, raw_label }
    }

    pub fn version(&self) -> &str {
        &self.artifact.version
    }

    pub fn threshold(&self) -> f64 {
        self.artifact.threshold
    }
}

/// Fit an artifact from raw training features.
///
/// Standardizes with per-feature mean/std, then sets the decision threshold
/// at the `(1 - contamination)` quantile of the training scores so the
/// expected anomaly fraction matches the contamination the operator chose.
pub fn fit_artifact(
    version: &str,
    samples: &[[f64; FEATURE_COUNT]],
    contamination: f64,
) -> Result<ModelArtifact, ModelError> {
    use statrs::statistics::{Data, OrderStatistics};

    if samples.len() < 2 {
        return Err(ModelError::Invalid(format!(
            "need at least 2 training samples, got {}",
            samples.len()
        )));
    }
    if !(0.0..0.5).contains(&contamination) {
        return Err(ModelError::Invalid(format!(
            "contamination must be within [0, 0.5), got {contamination}"
        )));
    }

    let n = samples.len() as f64;
    let mut means = [0.0; FEATURE_COUNT];
    let mut stds = [0.0; FEATURE_COUNT];
    for i in 0..FEATURE_COUNT {
        let mean = samples.iter().map(|s| s[i]).sum::<f64>() / n;
        let var = samples.iter().map(|s| (s[i] - mean).powi(2)).sum::<f64>() / (n - 1.0);
        means[i] = mean;
        // Degenerate (constant) features get unit scale rather than a
        // divide-by-zero at inference time
        stds[i] = if var > f64::EPSILON { var.sqrt() } else { 1.0 };
    }

    let scaler = ScalerParams { means, stds };

    // Score the training set with the fitted scaler, then take the
    // contamination quantile as the decision boundary.
    let scores: Vec<f64> = samples
        .iter()
        .map(|s| {
            let fv = FeatureVector {
                temperature: s[0],
                humidity: s[1],
                temp_humidity_ratio: s[2],
            };
            scaler
                .transform(&fv)
                .iter()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        })
        .collect();

    let mut data = Data::new(scores);
    let threshold = data.quantile(1.0 - contamination);
    let threshold = if threshold.is_finite() && threshold > 0.0 {
        threshold
    } else {
        crate::config::defaults::MODEL_FALLBACK_THRESHOLD
    };

    Ok(ModelArtifact {
        version: version.to_string(),
        trained_at: Utc::now(),
        scaler,
        threshold,
        contamination,
        training_samples: samples.len(),
    })
}

/// Save an artifact to disk atomically (write temp file, then rename).
pub fn save_artifact(artifact: &ModelArtifact, path: &Path) -> Result<(), ModelError> {
    let json = serde_json::to_vec_pretty(artifact)
        .map_err(|e| ModelError::Corrupt(path.to_path_buf(), e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ModelError::Io(path.to_path_buf(), e))?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json).map_err(|e| ModelError::Io(tmp_path.clone(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| ModelError::Io(path.to_path_buf(), e))?;
    info!(path = %path.display(), version = %artifact.version, "Model artifact saved");
    Ok(())
}

/// Model artifact errors. `ArtifactMissing`/`Corrupt`/`Invalid` are all
/// fatal at pipeline startup.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model artifact not found at {0}")]
    ArtifactMissing(std::path::PathBuf),
    #[error("model I/O error ({0}): {1}")]
    Io(std::path::PathBuf, io::Error),
    #[error("model artifact corrupt ({0}): {1}")]
    Corrupt(std::path::PathBuf, String),
    #[error("model artifact invalid: {0}")]
    Invalid(String),
}
