//! Isolation Forest.
//!
//! Anomalies are easier to isolate by random axis-aligned splits, so they end
//! up with shorter average path lengths across the forest.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Euler–Mascheroni constant, used by the harmonic number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Hyper-parameters for [`IsolationForest::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsolationForestParams {
    /// Number of trees in the forest.
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    /// Sub-sample size per tree (capped at the training set size).
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Base seed; tree `t` uses a seed derived from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_estimators() -> usize { 100 }
fn default_max_samples() -> usize { 256 }
fn default_seed() -> u64 { 42 }

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            seed: default_seed(),
        }
    }
}

/// A fitted isolation forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Actual sub-sample size ψ used per tree.
    sample_size: usize,
    n_features: usize,
}

impl IsolationForest {
    /// Build the forest from dense feature vectors.
    ///
    /// Each tree is grown on ψ points drawn without replacement, to a height
    /// limit of ⌈log2 ψ⌉. Trees are built in parallel; the result depends only
    /// on `points` and `params.seed`.
    ///
    /// # Panics
    /// Panics if `points` is empty.
    pub fn fit(points: &[Vec<f64>], params: &IsolationForestParams) -> Self {
        assert!(!points.is_empty(), "isolation forest: points must not be empty");

        let n = points.len();
        let sample_size = params.max_samples.clamp(1, n);
        let n_features = points[0].len();
        let max_depth = (sample_size as f64).log2().ceil().max(0.0) as usize;
        let n_trees = params.n_estimators.max(1);

        let trees: Vec<IsolationTree> = (0..n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, t));
                let rows: Vec<&[f64]> = rand::seq::index::sample(&mut rng, n, sample_size)
                    .iter()
                    .map(|i| points[i].as_slice())
                    .collect();
                IsolationTree::build(rows, max_depth, &mut rng)
            })
            .collect();

        Self {
            trees,
            sample_size,
            n_features,
        }
    }

    /// Opposite of the anomaly score: values near -1 are anomalies, values
    /// near -0.5 or above are inliers. Higher means more normal.
    pub fn score_samples(&self, x: &[f64]) -> f64 {
        -self.anomaly_score(x)
    }

    /// s(x, ψ) = 2^(-E[h(x)] / c(ψ)), in (0, 1].
    fn anomaly_score(&self, x: &[f64]) -> f64 {
        let c = average_path_length(self.sample_size);
        if self.trees.is_empty() || c <= 0.0 {
            return 0.5;
        }

        let total: f64 = self.trees.iter().map(|tree| tree.path_length(x)).sum();
        let mean_depth = total / self.trees.len() as f64;
        2.0_f64.powf(-mean_depth / c)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }
}

/// Average path length of an unsuccessful BST search over `n` points, c(n).
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Spread per-tree seeds so neighbouring trees do not share RNG streams.
fn tree_seed(base: u64, tree: usize) -> u64 {
    base.wrapping_add((tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// A single isolation tree stored as a flat node arena (root at index 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<IsolationNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsolationNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationTree {
    fn build<R: Rng>(rows: Vec<&[f64]>, max_depth: usize, rng: &mut R) -> Self {
        let mut nodes = Vec::new();
        grow(&mut nodes, rows, 0, max_depth, rng);
        Self { nodes }
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes.get(idx) {
                None => return depth,
                Some(IsolationNode::Leaf { size }) => {
                    // Unbuilt subtree below a leaf holding several points.
                    return depth + average_path_length(*size);
                }
                Some(IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = x.get(*feature).copied().unwrap_or(0.0);
                    idx = if value < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Recursively grow a subtree and return the index of its root node.
fn grow<'a, R: Rng>(
    nodes: &mut Vec<IsolationNode>,
    rows: Vec<&'a [f64]>,
    depth: usize,
    max_depth: usize,
    rng: &mut R,
) -> usize {
    let id = nodes.len();
    if depth >= max_depth || rows.len() <= 1 {
        nodes.push(IsolationNode::Leaf { size: rows.len() });
        return id;
    }

    // Only split on dimensions that still vary within this node.
    let dims = rows[0].len();
    let candidates: Vec<(usize, f64, f64)> = (0..dims)
        .filter_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                (lo.min(r[f]), hi.max(r[f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();

    if candidates.is_empty() {
        nodes.push(IsolationNode::Leaf { size: rows.len() });
        return id;
    }

    let (feature, lo, hi) = candidates[rng.random_range(0..candidates.len())];
    let threshold = rng.random_range(lo..hi);

    // Reserve the slot; children are appended after it.
    nodes.push(IsolationNode::Leaf { size: 0 });

    let (left_rows, right_rows): (Vec<&[f64]>, Vec<&[f64]>) =
        rows.into_iter().partition(|r| r[feature] < threshold);

    let left = grow(nodes, left_rows, depth + 1, max_depth, rng);
    let right = grow(nodes, right_rows, depth + 1, max_depth, rng);

    nodes[id] = IsolationNode::Split {
        feature,
        threshold,
        left,
        right,
    };
    id
}
