//! Model adapters.
//!
//! Each adapter wraps one outlier-detection family from [`crate::algorithms`]
//! and owns its sign convention: algorithms report "higher = more normal",
//! adapters report "higher = more anomalous". Scores stay on the family's
//! native scale; normalization is the ensemble's job.

pub mod density;
pub mod isolation;

use std::fmt;

use serde::{Deserialize, Serialize};

use cxguard_core::SchemaError;

use crate::algorithms::isolation_forest::IsolationForestParams;
use crate::algorithms::lof::LofParams;
use crate::error::{EngineError, Result};

pub use self::density::LofModel;
pub use self::isolation::IsolationForestModel;

// ── Algorithm family ──────────────────────────────────────────

/// Supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Algorithm {
    IsolationForest,
    LocalOutlierFactor,
}

impl Algorithm {
    /// Parse a family name, case-insensitively, accepting common aliases.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "isolation_forest" | "iforest" | "rcf" => Ok(Algorithm::IsolationForest),
            "local_outlier_factor" | "lof" => Ok(Algorithm::LocalOutlierFactor),
            other => Err(EngineError::config(format!(
                "unknown algorithm '{}' (expected isolation_forest or local_outlier_factor)",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::IsolationForest => "isolation_forest",
            Algorithm::LocalOutlierFactor => "local_outlier_factor",
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        Algorithm::parse(&value)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Hyper-parameters ──────────────────────────────────────────

/// Family-specific hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ModelParams {
    IsolationForest(IsolationForestParams),
    LocalOutlierFactor(LofParams),
}

impl ModelParams {
    /// Decode a loosely typed parameter map for `algorithm`. `null` means
    /// all defaults; unknown keys are rejected.
    pub fn from_value(algorithm: Algorithm, value: &serde_json::Value) -> Result<Self> {
        let value = match value {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        let bad = |e: serde_json::Error| EngineError::config(format!("{} params: {}", algorithm, e));
        Ok(match algorithm {
            Algorithm::IsolationForest => ModelParams::IsolationForest(serde_json::from_value(value).map_err(bad)?),
            Algorithm::LocalOutlierFactor => {
                ModelParams::LocalOutlierFactor(serde_json::from_value(value).map_err(bad)?)
            }
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            ModelParams::IsolationForest(_) => Algorithm::IsolationForest,
            ModelParams::LocalOutlierFactor(_) => Algorithm::LocalOutlierFactor,
        }
    }
}

// ── Adapter capability ────────────────────────────────────────

/// Common capability of every model family.
pub trait OutlierModel: Send + Sync {
    type Params;

    /// Fit a fresh model. Never mutates an existing one.
    fn fit(points: &[Vec<f64>], params: &Self::Params) -> Result<Self>
    where
        Self: Sized;

    /// Dimensionality the model was fitted on.
    fn n_features(&self) -> usize;

    /// Native anomaly score of one vector; higher = more anomalous.
    fn raw_score(&self, x: &[f64]) -> f64;

    /// Scores of the training set, used for threshold calibration.
    fn training_scores(&self, points: &[Vec<f64>]) -> Vec<f64>;
}

/// `1` iff `score` is strictly above `threshold`.
#[inline]
pub fn anomaly_flag(score: f64, threshold: f64) -> u8 {
    u8::from(score > threshold)
}

/// Reject empty, ragged or non-finite training matrices. Returns the width.
pub(crate) fn check_training_points(points: &[Vec<f64>], min_points: usize) -> Result<usize> {
    if points.len() < min_points {
        return Err(EngineError::config(format!(
            "need at least {} training vectors, got {}",
            min_points,
            points.len()
        )));
    }
    let width = points[0].len();
    if width == 0 {
        return Err(EngineError::config("training vectors have zero width"));
    }
    for (i, p) in points.iter().enumerate() {
        if p.len() != width {
            return Err(EngineError::config(format!(
                "training vector {} has width {}, expected {}",
                i,
                p.len(),
                width
            )));
        }
        if p.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::config(format!("training vector {} contains a non-finite value", i)));
        }
    }
    Ok(width)
}

// ── Trained state ─────────────────────────────────────────────

/// Fitted state of one model, tagged by family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum TrainedModel {
    IsolationForest(IsolationForestModel),
    LocalOutlierFactor(LofModel),
}

impl TrainedModel {
    pub fn fit(points: &[Vec<f64>], params: &ModelParams) -> Result<Self> {
        Ok(match params {
            ModelParams::IsolationForest(p) => TrainedModel::IsolationForest(IsolationForestModel::fit(points, p)?),
            ModelParams::LocalOutlierFactor(p) => TrainedModel::LocalOutlierFactor(LofModel::fit(points, p)?),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            TrainedModel::IsolationForest(_) => Algorithm::IsolationForest,
            TrainedModel::LocalOutlierFactor(_) => Algorithm::LocalOutlierFactor,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            TrainedModel::IsolationForest(m) => m.n_features(),
            TrainedModel::LocalOutlierFactor(m) => m.n_features(),
        }
    }

    /// Score one vector, checking it against the fitted width.
    pub fn score(&self, x: &[f64]) -> std::result::Result<f64, SchemaError> {
        let expected = self.n_features();
        if x.len() != expected {
            return Err(SchemaError::new(
                "features",
                format!("expected {} dimensions, got {}", expected, x.len()),
            ));
        }
        Ok(match self {
            TrainedModel::IsolationForest(m) => m.raw_score(x),
            TrainedModel::LocalOutlierFactor(m) => m.raw_score(x),
        })
    }

    pub fn training_scores(&self, points: &[Vec<f64>]) -> Vec<f64> {
        match self {
            TrainedModel::IsolationForest(m) => m.training_scores(points),
            TrainedModel::LocalOutlierFactor(m) => m.training_scores(points),
        }
    }
}
