//! Epsilon-greedy bandit over scalar rewards.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::prelude::*;
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};

/// Reward statistics for one arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmStats {
    pub pulls: u64,
    pub total_reward: f64,
}

impl ArmStats {
    /// Mean observed reward; 0.0 for an unpulled arm.
    pub fn avg_reward(&self) -> f64 {
        if self.pulls > 0 {
            self.total_reward / self.pulls as f64
        } else {
            0.0
        }
    }
}

struct EpsilonState {
    arms: HashMap<String, ArmStats>,
    /// Seeded generator for deterministic runs; `None` uses the
    /// per-thread generator.
    rng: Option<Mcg128Xsl64>,
}

/// Epsilon-greedy action selector.
///
/// Explores uniformly with probability ε, otherwise exploits the arm with
/// the highest average reward. Arms that have never been pulled score an
/// optimistic 1.0, so new actions get tried before the exploit path can
/// starve them.
pub struct EpsilonGreedy {
    epsilon: f64,
    state: Mutex<EpsilonState>,
}

impl EpsilonGreedy {
    /// Create a selector with the given exploration rate, clamped to
    /// [0, 1].
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon: epsilon.clamp(0.0, 1.0),
            state: Mutex::new(EpsilonState {
                arms: HashMap::new(),
                rng: None,
            }),
        }
    }

    /// Create a selector with deterministic exploration, for tests and
    /// simulations.
    pub fn with_seed(epsilon: f64, seed: u64) -> Self {
        let selector = Self::new(epsilon);
        selector.state.lock().rng = Some(Mcg128Xsl64::seed_from_u64(seed));
        selector
    }

    /// Pick an index into `candidates`, or `None` for an empty slate.
    pub fn select(&self, candidates: &[String]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let mut state = self.state.lock();

        let roll: f64 = match state.rng.as_mut() {
            Some(rng) => rng.gen(),
            None => thread_rng().gen(),
        };
        if roll < self.epsilon {
            let idx = match state.rng.as_mut() {
                Some(rng) => rng.gen_range(0..candidates.len()),
                None => thread_rng().gen_range(0..candidates.len()),
            };
            return Some(idx);
        }

        let mut best = 0;
        let mut best_avg = f64::NEG_INFINITY;
        for (idx, id) in candidates.iter().enumerate() {
            let avg = match state.arms.get(id) {
                Some(arm) if arm.pulls > 0 => arm.avg_reward(),
                // Optimistic initialization: untested actions score 1.0.
                _ => 1.0,
            };
            if avg > best_avg {
                best_avg = avg;
                best = idx;
            }
        }
        Some(best)
    }

    /// Record a reward observation for an action.
    pub fn update(&self, action_id: &str, reward: f64) {
        let mut state = self.state.lock();
        let arm = state.arms.entry(action_id.to_string()).or_default();
        arm.pulls += 1;
        arm.total_reward += reward;
    }

    /// Snapshot of all arm statistics.
    pub fn stats(&self) -> HashMap<String, ArmStats> {
        self.state.lock().arms.clone()
    }

    /// Replace all arm statistics, e.g. when restoring persisted state.
    pub fn load_stats(&self, stats: HashMap<String, ArmStats>) {
        self.state.lock().arms = stats;
    }
}
