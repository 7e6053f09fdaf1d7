use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithms::isolation_forest::{IsolationForest, IsolationForestParams};
use crate::error::Result;

use super::{check_training_points, OutlierModel};

/// Isolation-partitioning adapter. Scores lie in (0, 1]; values above ~0.5
/// are easier than average to isolate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForestModel {
    pub params: IsolationForestParams,
    forest: IsolationForest,
}

impl OutlierModel for IsolationForestModel {
    type Params = IsolationForestParams;

    fn fit(points: &[Vec<f64>], params: &IsolationForestParams) -> Result<Self> {
        check_training_points(points, 1)?;
        Ok(Self {
            params: *params,
            forest: IsolationForest::fit(points, params),
        })
    }

    fn n_features(&self) -> usize {
        self.forest.n_features()
    }

    fn raw_score(&self, x: &[f64]) -> f64 {
        -self.forest.score_samples(x)
    }

    fn training_scores(&self, points: &[Vec<f64>]) -> Vec<f64> {
        points.par_iter().map(|p| self.raw_score(p)).collect()
    }
}
