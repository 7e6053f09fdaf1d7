//! Scoring orchestrator: validate → transform → per-model score/flag →
//! ensemble, in input order. Shared by synchronous callers and the offline
//! batch driver.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cxguard_core::{RawRecord, SchemaError};

use crate::bundle::ModelMetadata;
use crate::ensemble::ModelVote;
use crate::error::{EngineError, Result};
use crate::models::anomaly_flag;
use crate::registry::{ArtifactRegistry, LoadedBundle};

// ── Selector ──────────────────────────────────────────────────

/// Which models a scoring call runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelector {
    /// Every model in the bundle, combined by the ensemble.
    All,
    /// A single model; the ensemble is skipped.
    Named(String),
}

impl ModelSelector {
    /// Case-insensitive. `all`, `both` and `ensemble` select every model.
    pub fn parse(raw: &str) -> Result<Self> {
        let token = raw.trim().to_lowercase();
        match token.as_str() {
            "" => Err(EngineError::InvalidSelector("model selector is empty".to_string())),
            "all" | "both" | "ensemble" => Ok(ModelSelector::All),
            _ => Ok(ModelSelector::Named(token)),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ModelSelector::All)
    }

    /// Model ids this selector runs against `loaded`, sorted.
    fn resolve<'b>(&self, loaded: &'b LoadedBundle) -> Result<Vec<&'b str>> {
        match self {
            ModelSelector::All => Ok(loaded.model_ids()),
            ModelSelector::Named(name) => match loaded.bundle.models.get_key_value(name.as_str()) {
                Some((id, _)) => Ok(vec![id.as_str()]),
                None => Err(EngineError::UnknownModel {
                    requested: name.clone(),
                    available: loaded.model_ids().join(", "),
                }),
            },
        }
    }
}

impl FromStr for ModelSelector {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        ModelSelector::parse(s)
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSelector::All => f.write_str("all"),
            ModelSelector::Named(name) => f.write_str(name),
        }
    }
}

// ── Results ───────────────────────────────────────────────────

/// Outcome for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub interaction_id: String,
    /// Native score per model; higher = more anomalous.
    pub scores: BTreeMap<String, f64>,
    /// 0/1 per model.
    pub flags: BTreeMap<String, u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensemble_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensemble_flag: Option<u8>,
}

/// A record that failed schema validation and was left out of `results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Position in the submitted batch.
    pub index: usize,
    pub interaction_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchScores {
    /// Accepted records, in input order.
    pub results: Vec<ScoreResult>,
    pub rejected: Vec<RejectedRecord>,
    pub total_records: usize,
    /// Ensemble flags under `all`, otherwise the selected model's flags.
    pub anomalies_detected: usize,
    pub elapsed_ms: u64,
    /// Generation of the bundle the batch was scored with.
    pub generation: u64,
}

// ── Engine ────────────────────────────────────────────────────

/// Entry point for scoring. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct ScoringEngine {
    registry: Arc<ArtifactRegistry>,
}

impl ScoringEngine {
    pub fn new(registry: Arc<ArtifactRegistry>) -> Self {
        Self { registry }
    }

    /// Engine over a registry with the bundle at `path` installed.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(ArtifactRegistry::open(path)?)))
    }

    pub fn registry(&self) -> &Arc<ArtifactRegistry> {
        &self.registry
    }

    /// Score a batch of raw records.
    ///
    /// Records failing schema validation are reported in `rejected`; the
    /// rest are scored. An unknown model or missing bundle fails the whole
    /// call before any record is processed.
    pub fn score_batch(&self, records: &[RawRecord], selector: &ModelSelector) -> Result<BatchScores> {
        let started = Instant::now();
        let loaded = self.registry.current()?;
        let selected = selector.resolve(&loaded)?;

        let outcomes: Vec<std::result::Result<ScoreResult, SchemaError>> = records
            .par_iter()
            .map(|raw| score_record(&loaded, &selected, selector, raw))
            .collect();

        let mut results = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        for (index, (outcome, raw)) in outcomes.into_iter().zip(records).enumerate() {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    debug!(index, error = %e, "record rejected");
                    rejected.push(RejectedRecord {
                        index,
                        interaction_id: raw.id_hint(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let anomalies_detected = results
            .iter()
            .filter(|r| match selector {
                ModelSelector::All => r.ensemble_flag == Some(1),
                ModelSelector::Named(_) => r.flags.values().any(|&f| f == 1),
            })
            .count();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            records = records.len(),
            rejected = rejected.len(),
            anomalies = anomalies_detected,
            elapsed_ms,
            generation = loaded.generation,
            selector = %selector,
            "scored batch"
        );

        Ok(BatchScores {
            results,
            rejected,
            total_records: records.len(),
            anomalies_detected,
            elapsed_ms,
            generation: loaded.generation,
        })
    }

    /// Score a single record; a schema problem is returned as an error.
    pub fn score_one(&self, record: &RawRecord, selector: &ModelSelector) -> Result<ScoreResult> {
        let loaded = self.registry.current()?;
        let selected = selector.resolve(&loaded)?;
        Ok(score_record(&loaded, &selected, selector, record)?)
    }

    pub fn list_models(&self) -> Result<Vec<ModelMetadata>> {
        self.registry.list_models()
    }

    pub fn reload(&self, path: &Path) -> Result<u64> {
        self.registry.reload(path)
    }
}

fn score_record(
    loaded: &LoadedBundle,
    selected: &[&str],
    selector: &ModelSelector,
    raw: &RawRecord,
) -> std::result::Result<ScoreResult, SchemaError> {
    let record = raw.validate()?;
    let features = loaded.bundle.pipeline.transform(&record)?;

    let mut scores = BTreeMap::new();
    let mut flags = BTreeMap::new();
    let mut votes = Vec::with_capacity(selected.len());

    for &model_id in selected {
        // `selected` was resolved against this bundle.
        let Some(artifact) = loaded.bundle.models.get(model_id) else {
            continue;
        };
        let score = artifact.model.score(&features)?;
        let flag = anomaly_flag(score, artifact.metadata.threshold);
        scores.insert(model_id.to_string(), score);
        flags.insert(model_id.to_string(), flag);
        votes.push(ModelVote {
            model_id,
            score,
            flag,
            threshold: artifact.metadata.threshold,
            stats: artifact.metadata.score_stats,
        });
    }

    let (ensemble_score, ensemble_flag) = if selector.is_all() {
        let (score, flag) = loaded.ensemble.combine(&votes, loaded.bundle.ensemble_threshold);
        (Some(score), Some(flag))
    } else {
        (None, None)
    };

    Ok(ScoreResult {
        interaction_id: record.interaction_id,
        scores,
        flags,
        ensemble_score,
        ensemble_flag,
    })
}
