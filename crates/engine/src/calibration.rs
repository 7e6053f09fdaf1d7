//! Threshold calibration.
//!
//! A model's threshold is a percentile of its own scores over the training
//! set. It is fixed at training time and stored with the artifact; changing
//! it means retraining.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::pipeline::stats::{percentile, ColumnSummary};

/// Percentile used when a model does not configure one.
pub const DEFAULT_THRESHOLD_PERCENTILE: f64 = 90.0;

/// Training-score statistics. `min`/`max` are the min-max normalization basis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

/// Outcome of calibrating one score distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub threshold: f64,
    pub percentile: f64,
    pub stats: ScoreStats,
}

/// Take the `q`-th percentile of `scores` as the threshold.
///
/// # Arguments
/// * `scores` - Training-set scores, higher = more anomalous.
/// * `q` - Percentile in [0, 100].
pub fn calibrate(scores: &[f64], q: f64) -> Result<Calibration> {
    check_percentile(q)?;
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(EngineError::config("cannot calibrate on non-finite scores"));
    }
    let summary = ColumnSummary::of(scores)
        .ok_or_else(|| EngineError::config("cannot calibrate on an empty score set"))?;
    let threshold = percentile(scores, q).ok_or_else(|| EngineError::config("percentile out of range"))?;

    Ok(Calibration {
        threshold,
        percentile: q,
        stats: ScoreStats {
            min: summary.min,
            max: summary.max,
            mean: summary.mean,
            std: summary.std,
        },
    })
}

pub(crate) fn check_percentile(q: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&q) {
        return Err(EngineError::config(format!(
            "threshold percentile must be within [0, 100], got {}",
            q
        )));
    }
    Ok(())
}
