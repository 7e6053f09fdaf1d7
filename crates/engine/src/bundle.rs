//! Artifact bundle: the single versioned blob that ties a fitted pipeline,
//! its models and the ensemble configuration together.
//!
//! On disk a bundle is one header line followed by a JSON payload:
//!
//! ```text
//! cxguard-bundle v1 sha256=<hex digest of payload>
//! {"bundle_id": ...}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::calibration::ScoreStats;
use crate::ensemble::{EnsembleConfig, EnsembleSettings};
use crate::error::{EngineError, Result};
use crate::models::{Algorithm, ModelParams, TrainedModel};
use crate::pipeline::FeaturePipeline;

const BUNDLE_MAGIC: &str = "cxguard-bundle";
const BUNDLE_VERSION: &str = "v1";

/// Descriptive, non-executable part of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub algorithm: Algorithm,
    pub threshold: f64,
    pub threshold_percentile: f64,
    pub trained_at: DateTime<Utc>,
    pub n_samples: usize,
    pub n_features: usize,
    pub score_stats: ScoreStats,
    pub params: ModelParams,
}

/// A trained model plus its metadata. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub metadata: ModelMetadata,
    pub model: TrainedModel,
}

/// What the training run saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub records: usize,
    pub rejected: usize,
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub bundle_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub pipeline: FeaturePipeline,
    /// Keyed by model id.
    pub models: BTreeMap<String, ModelArtifact>,
    pub ensemble: EnsembleSettings,
    /// Combined threshold calibrated over training-set ensemble scores.
    pub ensemble_threshold: f64,
    pub training: TrainingSummary,
}

impl ArtifactBundle {
    /// Check internal consistency and compile the ensemble settings.
    ///
    /// Returns `InvalidStrategy` for an unknown strategy and `InvalidConfig`
    /// for any other inconsistency.
    pub fn validate(&self) -> Result<EnsembleConfig> {
        if self.models.is_empty() {
            return Err(EngineError::config("bundle contains no models"));
        }

        let width = self.pipeline.width();
        for (id, artifact) in &self.models {
            if *id != artifact.metadata.model_id {
                return Err(EngineError::config(format!(
                    "model key '{}' does not match metadata id '{}'",
                    id, artifact.metadata.model_id
                )));
            }
            if artifact.model.algorithm() != artifact.metadata.algorithm {
                return Err(EngineError::config(format!(
                    "model '{}' is a {} but metadata says {}",
                    id,
                    artifact.model.algorithm(),
                    artifact.metadata.algorithm
                )));
            }
            let n_features = artifact.model.n_features();
            if n_features != width || artifact.metadata.n_features != width {
                return Err(EngineError::config(format!(
                    "model '{}' expects {} features but the pipeline produces {}",
                    id, n_features, width
                )));
            }
            if !artifact.metadata.threshold.is_finite() {
                return Err(EngineError::config(format!("model '{}' has a non-finite threshold", id)));
            }
        }

        if !self.ensemble_threshold.is_finite() {
            return Err(EngineError::config("ensemble threshold is not finite"));
        }

        self.ensemble.compile(self.models.keys().map(String::as_str))
    }

    /// Write the bundle atomically: serialize to a dot-tmp sibling, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_vec(self)?;
        let header = format!(
            "{} {} sha256={}\n",
            BUNDLE_MAGIC,
            BUNDLE_VERSION,
            checksum(&payload)
        );

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut bytes = Vec::with_capacity(header.len() + payload.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&payload);

        let tmp_path = tmp_path_for(path);
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, path)?;

        info!(
            bundle_id = %self.bundle_id,
            models = self.models.len(),
            bytes = bytes.len(),
            path = %path.display(),
            "saved artifact bundle"
        );
        Ok(())
    }

    /// Read, verify and validate a bundle file.
    ///
    /// Every failure except an unknown ensemble strategy is reported as
    /// `ArtifactLoad` naming the path.
    pub fn load(path: &Path) -> Result<(ArtifactBundle, EnsembleConfig)> {
        let bytes = fs::read(path).map_err(|e| EngineError::artifact(path, e.to_string()))?;
        let payload = verify_header(&bytes).map_err(|reason| EngineError::artifact(path, reason))?;

        let bundle: ArtifactBundle = serde_json::from_slice(payload)
            .map_err(|e| EngineError::artifact(path, format!("malformed payload: {}", e)))?;

        let ensemble = bundle.validate().map_err(|e| match e {
            EngineError::InvalidStrategy(_) => e,
            other => EngineError::artifact(path, other.to_string()),
        })?;

        info!(
            bundle_id = %bundle.bundle_id,
            models = bundle.models.len(),
            strategy = %ensemble.strategy,
            path = %path.display(),
            "loaded artifact bundle"
        );
        Ok((bundle, ensemble))
    }
}

/// Split off and check the header line, returning the payload.
fn verify_header(bytes: &[u8]) -> std::result::Result<&[u8], String> {
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| "missing bundle header".to_string())?;
    let header = std::str::from_utf8(&bytes[..newline]).map_err(|_| "bundle header is not UTF-8".to_string())?;
    let payload = &bytes[newline + 1..];

    let mut parts = header.split_whitespace();
    if parts.next() != Some(BUNDLE_MAGIC) {
        return Err("not a cxguard bundle".to_string());
    }
    match parts.next() {
        Some(BUNDLE_VERSION) => {}
        Some(other) => return Err(format!("unsupported bundle version '{}'", other)),
        None => return Err("bundle header has no version".to_string()),
    }
    let expected = parts
        .next()
        .and_then(|p| p.strip_prefix("sha256="))
        .ok_or_else(|| "bundle header has no checksum".to_string())?;

    let actual = checksum(payload);
    if actual != expected {
        return Err(format!("checksum mismatch (header {}, payload {})", expected, actual));
    }
    Ok(payload)
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}
