//! Local Outlier Factor in novelty mode.
//!
//! A point's local reachability density is compared against the densities of
//! its k nearest training neighbors. Inliers sit near 1; outliers well above.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Guards the reachability density against identical points.
const DENSITY_EPSILON: f64 = 1e-10;

/// Hyper-parameters for [`LocalOutlierFactor::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LofParams {
    /// Neighborhood size k (capped at n - 1).
    #[serde(default = "default_n_neighbors")]
    pub n_neighbors: usize,
}

fn default_n_neighbors() -> usize { 20 }

impl Default for LofParams {
    fn default() -> Self {
        Self {
            n_neighbors: default_n_neighbors(),
        }
    }
}

/// A fitted LOF model. Keeps the training points, since novelty scoring needs
/// neighbors from the training set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOutlierFactor {
    points: Vec<Vec<f64>>,
    k: usize,
    k_distances: Vec<f64>,
    lrd: Vec<f64>,
    /// -LOF of each training point, computed without the point itself.
    negative_outlier_factor: Vec<f64>,
}

impl LocalOutlierFactor {
    /// Fit on dense feature vectors.
    ///
    /// # Panics
    /// Panics if fewer than two points are supplied.
    pub fn fit(points: &[Vec<f64>], params: &LofParams) -> Self {
        assert!(points.len() >= 2, "lof: need at least two points");

        let n = points.len();
        let k = params.n_neighbors.clamp(1, n - 1);

        let neighborhoods: Vec<Vec<(usize, f64)>> = (0..n)
            .into_par_iter()
            .map(|i| k_nearest(points, &points[i], k, Some(i)))
            .collect();

        let k_distances: Vec<f64> = neighborhoods
            .iter()
            .map(|nb| nb.last().map(|&(_, d)| d).unwrap_or(0.0))
            .collect();

        let lrd: Vec<f64> = neighborhoods
            .iter()
            .map(|nb| reachability_density(nb, &k_distances))
            .collect();

        let negative_outlier_factor: Vec<f64> = neighborhoods
            .iter()
            .enumerate()
            .map(|(i, nb)| -outlier_factor(nb, &lrd, lrd[i]))
            .collect();

        Self {
            points: points.to_vec(),
            k,
            k_distances,
            lrd,
            negative_outlier_factor,
        }
    }

    /// Opposite of the LOF of `x` against the training set. Higher means more
    /// normal; inliers are close to -1.
    pub fn score_samples(&self, x: &[f64]) -> f64 {
        let neighbors = k_nearest(&self.points, x, self.k, None);
        let lrd_x = reachability_density(&neighbors, &self.k_distances);
        -outlier_factor(&neighbors, &self.lrd, lrd_x)
    }

    /// -LOF of each training point, in training order.
    pub fn negative_outlier_factors(&self) -> &[f64] {
        &self.negative_outlier_factor
    }

    pub fn n_neighbors(&self) -> usize {
        self.k
    }

    pub fn n_features(&self) -> usize {
        self.points.first().map(Vec::len).unwrap_or(0)
    }

    pub fn n_samples(&self) -> usize {
        self.points.len()
    }
}

/// k nearest training points to `query`, sorted by distance then index.
fn k_nearest(points: &[Vec<f64>], query: &[f64], k: usize, exclude: Option<usize>) -> Vec<(usize, f64)> {
    let mut dists: Vec<(usize, f64)> = points
        .iter()
        .enumerate()
        .filter(|(j, _)| Some(*j) != exclude)
        .map(|(j, p)| (j, euclidean(query, p)))
        .collect();

    dists.sort_by(|a, b| match a.1.total_cmp(&b.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    dists.truncate(k);
    dists
}

/// lrd(p) = 1 / mean over neighbors o of max(k_dist(o), d(p, o)).
fn reachability_density(neighbors: &[(usize, f64)], k_distances: &[f64]) -> f64 {
    if neighbors.is_empty() {
        return 0.0;
    }
    let total: f64 = neighbors
        .iter()
        .map(|&(o, d)| k_distances[o].max(d))
        .sum();
    1.0 / (total / neighbors.len() as f64 + DENSITY_EPSILON)
}

/// LOF(p) = mean neighbor lrd / lrd(p).
///
/// A point with no measurable density (infinitely far from its neighbors)
/// gets `f64::MAX`, never the inlier value.
fn outlier_factor(neighbors: &[(usize, f64)], lrd: &[f64], lrd_p: f64) -> f64 {
    if neighbors.is_empty() {
        return 1.0;
    }
    if lrd_p.is_nan() || lrd_p <= 0.0 {
        return f64::MAX;
    }
    let mean: f64 = neighbors.iter().map(|&(o, _)| lrd[o]).sum::<f64>() / neighbors.len() as f64;
    // f64::min drops NaN and caps +inf.
    (mean / lrd_p).min(f64::MAX)
}

#[inline]
fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    let squared: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();
    if squared.is_finite() {
        squared.sqrt()
    } else {
        scaled_euclidean(a, b)
    }
}

/// Slow path for components whose squares overflow: divide by the largest
/// |difference| before squaring.
fn scaled_euclidean(a: &[f64], b: &[f64]) -> f64 {
    let mut scale = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = (x - y).abs();
        if !d.is_finite() {
            return f64::INFINITY;
        }
        scale = scale.max(d);
    }
    if scale == 0.0 {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let r = (x - y) / scale;
            r * r
        })
        .sum();
    scale * sum.sqrt()
}
