use serde::{Deserialize, Serialize};

use crate::algorithms::lof::{LocalOutlierFactor, LofParams};
use crate::error::Result;

use super::{check_training_points, OutlierModel};

/// Local-density adapter. Scores are the local outlier factor itself:
/// about 1 for inliers, unbounded above for outliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LofModel {
    pub params: LofParams,
    lof: LocalOutlierFactor,
}

impl OutlierModel for LofModel {
    type Params = LofParams;

    fn fit(points: &[Vec<f64>], params: &LofParams) -> Result<Self> {
        check_training_points(points, 2)?;
        Ok(Self {
            params: *params,
            lof: LocalOutlierFactor::fit(points, params),
        })
    }

    fn n_features(&self) -> usize {
        self.lof.n_features()
    }

    fn raw_score(&self, x: &[f64]) -> f64 {
        -self.lof.score_samples(x)
    }

    /// Training points are scored against their neighbors excluding
    /// themselves, so the fitted points are not all trivially inliers.
    fn training_scores(&self, _points: &[Vec<f64>]) -> Vec<f64> {
        self.lof.negative_outlier_factors().iter().map(|v| -v).collect()
    }
}
