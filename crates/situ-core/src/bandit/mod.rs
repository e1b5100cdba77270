//! Learning layer: which actions earn reward.
//!
//! Two arm-selection strategies share the same reward-update interface:
//! [`EpsilonGreedy`] over scalar rewards and [`LinUcb`] over context
//! feature vectors. Snapshots of both are exported together so the host
//! can persist learning across sessions; the format is opaque to callers.

pub mod epsilon;
pub mod linucb;

pub use epsilon::{ArmStats, EpsilonGreedy};
pub use linucb::{features, LinUcb, LinUcbArmState, LinUcbState, FEATURE_DIM};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Combined snapshot of both bandits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditSnapshot {
    pub epsilon_arms: HashMap<String, ArmStats>,
    pub linucb: LinUcbState,
}
