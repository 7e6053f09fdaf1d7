//! Ensemble combination.
//!
//! Reconciles per-model scores that live on different native scales into one
//! ensemble score and flag. Two layers, mirroring how rule files are handled
//! elsewhere: [`EnsembleSettings`] is the loosely typed form stored in YAML
//! and bundles; [`EnsembleConfig`] is the validated form used on the hot path.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::calibration::{check_percentile, ScoreStats, DEFAULT_THRESHOLD_PERCENTILE};
use crate::error::{EngineError, Result};

/// Added to the min-max denominator so a degenerate range cannot divide by zero.
const RANGE_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Weighted mean of normalized scores.
    Average,
    /// Largest normalized score.
    Max,
    /// Weighted fraction of models that flag the record.
    Voting,
}

impl Strategy {
    /// Case-insensitive parse; anything unrecognized is an invalid strategy.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "average" | "mean" => Ok(Strategy::Average),
            "max" => Ok(Strategy::Max),
            "voting" | "vote" => Ok(Strategy::Voting),
            _ => Err(EngineError::InvalidStrategy(name.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Average => "average",
            Strategy::Max => "max",
            Strategy::Voting => "voting",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How native scores are brought onto a common scale before combining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// (s - min) / (max - min) over training scores, clipped to [0, 1].
    #[default]
    MinMax,
    /// s / threshold, so 1.0 sits exactly on the model's threshold.
    ThresholdRatio,
}

// ── Stored form ───────────────────────────────────────────────

/// Ensemble options as written in the training YAML under `ensemble:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSettings {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Per-model weights; models not listed weigh 1.0.
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub normalization: Normalization,
    /// Fraction of (weighted) votes that must be exceeded under `voting`.
    #[serde(default = "default_quorum")]
    pub quorum: f64,
    /// Percentile for the combined threshold under `average` / `max`.
    #[serde(default = "default_percentile")]
    pub threshold_percentile: f64,
}

fn default_strategy() -> String { "average".to_string() }
fn default_quorum() -> f64 { 0.5 }
fn default_percentile() -> f64 { DEFAULT_THRESHOLD_PERCENTILE }

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            weights: BTreeMap::new(),
            normalization: Normalization::default(),
            quorum: default_quorum(),
            threshold_percentile: default_percentile(),
        }
    }
}

impl EnsembleSettings {
    /// Validate against the models actually present and resolve weights.
    pub fn compile<'a>(&self, model_ids: impl IntoIterator<Item = &'a str>) -> Result<EnsembleConfig> {
        let strategy = Strategy::parse(&self.strategy)?;

        for (model, &w) in &self.weights {
            if !w.is_finite() || w < 0.0 {
                return Err(EngineError::config(format!(
                    "weight for model '{}' must be a non-negative number, got {}",
                    model, w
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.quorum) {
            return Err(EngineError::config(format!("quorum must be within [0, 1], got {}", self.quorum)));
        }
        check_percentile(self.threshold_percentile)?;

        let mut weights = BTreeMap::new();
        for id in model_ids {
            let w = self.weights.get(id).copied().unwrap_or(1.0);
            weights.insert(id.to_string(), w);
        }
        for model in self.weights.keys() {
            if !weights.contains_key(model) {
                warn!(model = %model, "ensemble weight names a model that is not in the bundle, ignoring");
            }
        }

        Ok(EnsembleConfig {
            strategy,
            weights,
            normalization: self.normalization,
            quorum: self.quorum,
            threshold_percentile: self.threshold_percentile,
        })
    }
}

// ── Compiled form ─────────────────────────────────────────────

/// Validated ensemble configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleConfig {
    pub strategy: Strategy,
    /// One entry per model in the bundle.
    pub weights: BTreeMap<String, f64>,
    pub normalization: Normalization,
    pub quorum: f64,
    pub threshold_percentile: f64,
}

/// One model's contribution to an ensemble decision.
#[derive(Debug, Clone, Copy)]
pub struct ModelVote<'a> {
    pub model_id: &'a str,
    pub score: f64,
    pub flag: u8,
    pub threshold: f64,
    pub stats: ScoreStats,
}

impl EnsembleConfig {
    fn weight(&self, model_id: &str) -> f64 {
        self.weights.get(model_id).copied().unwrap_or(1.0)
    }

    /// Bring a native score onto the common scale.
    pub fn normalize(&self, vote: &ModelVote<'_>) -> f64 {
        match self.normalization {
            Normalization::ThresholdRatio if vote.threshold > 0.0 => vote.score / vote.threshold,
            _ => {
                let range = vote.stats.max - vote.stats.min;
                ((vote.score - vote.stats.min) / (range + RANGE_EPSILON)).clamp(0.0, 1.0)
            }
        }
    }

    /// Ensemble score before the flag decision.
    pub fn score(&self, votes: &[ModelVote<'_>]) -> f64 {
        if votes.is_empty() {
            return 0.0;
        }
        match self.strategy {
            Strategy::Average => {
                let values: Vec<f64> = votes.iter().map(|v| self.normalize(v)).collect();
                self.weighted_mean(votes, &values)
            }
            Strategy::Max => votes
                .iter()
                .map(|v| self.normalize(v))
                .fold(f64::NEG_INFINITY, f64::max),
            Strategy::Voting => {
                let values: Vec<f64> = votes.iter().map(|v| f64::from(v.flag)).collect();
                self.weighted_mean(votes, &values)
            }
        }
    }

    /// Weighted mean; all-zero weights fall back to the plain mean.
    fn weighted_mean(&self, votes: &[ModelVote<'_>], values: &[f64]) -> f64 {
        let total_weight: f64 = votes.iter().map(|v| self.weight(v.model_id)).sum();
        if total_weight <= 0.0 {
            return values.iter().sum::<f64>() / values.len() as f64;
        }
        votes
            .iter()
            .zip(values)
            .map(|(v, x)| self.weight(v.model_id) * x)
            .sum::<f64>()
            / total_weight
    }

    /// Threshold the ensemble score is compared against. Voting compares the
    /// vote fraction to the quorum; the other strategies use the threshold
    /// calibrated on training data.
    pub fn decision_threshold(&self, calibrated: f64) -> f64 {
        match self.strategy {
            Strategy::Voting => self.quorum,
            Strategy::Average | Strategy::Max => calibrated,
        }
    }

    /// Combine votes into `(ensemble_score, ensemble_flag)`.
    ///
    /// The flag is raised when any model flags, or when the ensemble score is
    /// strictly above the decision threshold.
    pub fn combine(&self, votes: &[ModelVote<'_>], calibrated_threshold: f64) -> (f64, u8) {
        let score = self.score(votes);
        let any_flag = votes.iter().any(|v| v.flag == 1);
        let above = score > self.decision_threshold(calibrated_threshold);
        (score, u8::from(any_flag || above))
    }
}
