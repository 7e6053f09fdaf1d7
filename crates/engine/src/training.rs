//! Training driver: fits the pipeline and every configured model, calibrates
//! thresholds and assembles an [`ArtifactBundle`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use cxguard_core::{InteractionRecord, RawRecord};

use crate::bundle::{ArtifactBundle, ModelArtifact, ModelMetadata, TrainingSummary};
use crate::calibration::{calibrate, check_percentile, DEFAULT_THRESHOLD_PERCENTILE};
use crate::ensemble::{EnsembleSettings, ModelVote};
use crate::error::{EngineError, Result};
use crate::models::{anomaly_flag, Algorithm, ModelParams, TrainedModel};
use crate::pipeline::{FeaturePipeline, FeatureSpec};

/// Selector tokens that cannot double as model ids.
const RESERVED_MODEL_IDS: [&str; 3] = ["all", "both", "ensemble"];

/// One model to train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model id used by selectors and in results.
    pub name: String,
    pub algorithm: Algorithm,
    #[serde(default = "default_percentile")]
    pub threshold_percentile: f64,
    /// Family-specific hyper-parameters; omitted keys take defaults.
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_percentile() -> f64 { DEFAULT_THRESHOLD_PERCENTILE }

/// Full training configuration (YAML).
///
/// ```yaml
/// features:
///   numeric: [csat, ies, complaints, aht_seconds, hold_time_seconds, transfers]
///   categorical: [channel, language, queue]
/// models:
///   - name: iforest
///     algorithm: isolation_forest
///     params: { n_estimators: 100, max_samples: 256, seed: 42 }
///   - name: lof
///     algorithm: local_outlier_factor
///     params: { n_neighbors: 20 }
/// ensemble:
///   strategy: average
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub features: FeatureSpec,
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub ensemble: EnsembleSettings,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            features: FeatureSpec::default(),
            models: vec![
                ModelConfig {
                    name: "iforest".to_string(),
                    algorithm: Algorithm::IsolationForest,
                    threshold_percentile: DEFAULT_THRESHOLD_PERCENTILE,
                    params: serde_json::Value::Null,
                },
                ModelConfig {
                    name: "lof".to_string(),
                    algorithm: Algorithm::LocalOutlierFactor,
                    threshold_percentile: DEFAULT_THRESHOLD_PERCENTILE,
                    params: serde_json::Value::Null,
                },
            ],
            ensemble: EnsembleSettings::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Check everything that can be checked before fitting. Returns the
    /// normalized model ids with their decoded parameters.
    pub fn validate(&self) -> Result<Vec<(String, f64, ModelParams)>> {
        if self.models.is_empty() {
            return Err(EngineError::config("training config lists no models"));
        }

        let mut seen = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let id = model.name.trim().to_lowercase();
            if id.is_empty() {
                return Err(EngineError::config("model name must not be empty"));
            }
            if RESERVED_MODEL_IDS.contains(&id.as_str()) {
                return Err(EngineError::config(format!("model name '{}' is reserved", id)));
            }
            if seen.iter().any(|(existing, _, _)| existing == &id) {
                return Err(EngineError::config(format!("model name '{}' is used twice", id)));
            }
            check_percentile(model.threshold_percentile)?;
            let params = ModelParams::from_value(model.algorithm, &model.params)?;
            seen.push((id, model.threshold_percentile, params));
        }

        // Unknown strategy or bad weights should fail before any fitting.
        self.ensemble.compile(seen.iter().map(|(id, _, _)| id.as_str()))?;
        self.features.resolve()?;
        Ok(seen)
    }
}

/// Train a complete bundle from raw records.
///
/// Records that fail schema validation are skipped and counted in the
/// bundle's training summary.
pub fn train_bundle(records: &[RawRecord], config: &TrainingConfig) -> Result<ArtifactBundle> {
    let started = Instant::now();
    let models = config.validate()?;

    let mut valid: Vec<InteractionRecord> = Vec::with_capacity(records.len());
    let mut rejected = 0usize;
    for (index, raw) in records.iter().enumerate() {
        match raw.validate() {
            Ok(record) => valid.push(record),
            Err(e) => {
                rejected += 1;
                warn!(index, error = %e, "skipping training record");
            }
        }
    }
    if valid.is_empty() {
        return Err(EngineError::config("no valid training records"));
    }

    let pipeline = FeaturePipeline::fit(&valid, &config.features)?;
    let points = pipeline
        .transform_batch(&valid)
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut artifacts = BTreeMap::new();
    let mut training_scores: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (model_id, percentile, params) in models {
        let fit_started = Instant::now();
        let model = TrainedModel::fit(&points, &params)?;
        let scores = model.training_scores(&points);
        let calibration = calibrate(&scores, percentile)?;

        info!(
            model = %model_id,
            algorithm = %model.algorithm(),
            threshold = calibration.threshold,
            min = calibration.stats.min,
            max = calibration.stats.max,
            elapsed_ms = fit_started.elapsed().as_millis() as u64,
            "model trained"
        );

        let metadata = ModelMetadata {
            model_id: model_id.clone(),
            algorithm: model.algorithm(),
            threshold: calibration.threshold,
            threshold_percentile: calibration.percentile,
            trained_at: Utc::now(),
            n_samples: points.len(),
            n_features: model.n_features(),
            score_stats: calibration.stats,
            params,
        };
        training_scores.insert(model_id.clone(), scores);
        artifacts.insert(model_id, ModelArtifact { metadata, model });
    }

    let ensemble_config = config.ensemble.compile(artifacts.keys().map(String::as_str))?;
    let ensemble_scores: Vec<f64> = (0..points.len())
        .map(|i| {
            let votes: Vec<ModelVote<'_>> = artifacts
                .iter()
                .map(|(id, artifact)| {
                    let score = training_scores[id][i];
                    ModelVote {
                        model_id: id.as_str(),
                        score,
                        flag: anomaly_flag(score, artifact.metadata.threshold),
                        threshold: artifact.metadata.threshold,
                        stats: artifact.metadata.score_stats,
                    }
                })
                .collect();
            ensemble_config.score(&votes)
        })
        .collect();
    let combined = calibrate(&ensemble_scores, ensemble_config.threshold_percentile)?;
    let ensemble_threshold = ensemble_config.decision_threshold(combined.threshold);

    let bundle = ArtifactBundle {
        bundle_id: Uuid::new_v4(),
        created_at: Utc::now(),
        training: TrainingSummary {
            records: valid.len(),
            rejected,
            feature_names: pipeline.feature_names(),
        },
        pipeline,
        models: artifacts,
        ensemble: config.ensemble.clone(),
        ensemble_threshold,
    };

    info!(
        bundle_id = %bundle.bundle_id,
        records = valid.len(),
        rejected,
        models = bundle.models.len(),
        strategy = %ensemble_config.strategy,
        ensemble_threshold,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "training complete"
    );
    Ok(bundle)
}
