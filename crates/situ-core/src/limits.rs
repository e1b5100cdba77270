//! Cooldown and rate limiting.
//!
//! Three independent gates are consulted for every candidate rule before
//! its conditions are matched: the per-rule cooldown (tracked by the
//! engine), a per-category sliding-window cooldown, and a global hourly
//! cap. The sliding windows are trimmed lazily on each consult, so no
//! background maintenance is needed.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Global rate-limit window: one hour.
const GLOBAL_WINDOW_MS: i64 = 3_600_000;

/// Rate-limit configuration, installed via `RuleEngine::set_limits`.
///
/// Changing limits affects future evaluations only; recorded firings are
/// kept and re-judged under the new thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    /// Firings of one action category tolerated inside the category window.
    #[serde(default = "default_category_count")]
    pub category_cooldown_count: usize,
    /// Width of the category window in milliseconds.
    #[serde(default = "default_category_window_ms")]
    pub category_cooldown_window_ms: i64,
    /// Total firings tolerated per hour across all categories.
    #[serde(default = "default_global_max_per_hour")]
    pub global_max_per_hour: usize,
}

fn default_category_count() -> usize {
    3
}

fn default_category_window_ms() -> i64 {
    600_000
}

fn default_global_max_per_hour() -> usize {
    10
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            category_cooldown_count: default_category_count(),
            category_cooldown_window_ms: default_category_window_ms(),
            global_max_per_hour: default_global_max_per_hour(),
        }
    }
}

/// Sliding-window record of recent firings, per category and global.
#[derive(Debug, Default)]
pub(crate) struct FiringTracker {
    category: HashMap<String, VecDeque<i64>>,
    global: VecDeque<i64>,
}

impl FiringTracker {
    /// Whether an action of this category is currently suppressed.
    /// Trims both windows as a side effect.
    pub(crate) fn is_rate_limited(&mut self, kind: &str, now: i64, limits: &RateLimits) -> bool {
        if let Some(timestamps) = self.category.get_mut(kind) {
            let cutoff = now - limits.category_cooldown_window_ms;
            while timestamps.front().is_some_and(|&t| t < cutoff) {
                timestamps.pop_front();
            }
            if timestamps.len() >= limits.category_cooldown_count {
                return true;
            }
        }

        let cutoff = now - GLOBAL_WINDOW_MS;
        while self.global.front().is_some_and(|&t| t < cutoff) {
            self.global.pop_front();
        }
        self.global.len() >= limits.global_max_per_hour
    }

    /// Record a firing of the given action category.
    pub(crate) fn record(&mut self, kind: &str, now: i64) {
        self.category
            .entry(kind.to_string())
            .or_default()
            .push_back(now);
        self.global.push_back(now);
    }
}
