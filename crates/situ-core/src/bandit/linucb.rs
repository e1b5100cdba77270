//! Contextual LinUCB bandit.
//!
//! Each arm keeps a ridge-regression design matrix `A` (d by d, initially
//! identity) and a reward vector `b` (initially zero), with d = 8.
//! Selection scores every candidate with `θᵀx + α·√(xᵀA⁻¹x)` where
//! `θ = A⁻¹b`; both solves go through a Cholesky factorization instead of
//! an explicit inverse, keeping the arithmetic numerically stable.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::{truthy, ContextMap};
use crate::error::{EngineError, Result};

/// Dimension of the context feature vector.
pub const FEATURE_DIM: usize = 8;

type Vector = [f64; FEATURE_DIM];
type Matrix = [[f64; FEATURE_DIM]; FEATURE_DIM];

/// Extract the fixed-order feature vector from a context snapshot:
///
/// `[sin(2πh/24), cos(2πh/24), battery/100, charging, weekend,
///   stationary, active, vehicle]`
///
/// Missing or unparsable keys contribute 0.0, so an absent `hour` yields
/// no phase signal rather than midnight's.
pub fn features(ctx: &ContextMap) -> Vector {
    let mut x = [0.0; FEATURE_DIM];
    if let Some(hour) = ctx.get("hour").and_then(|v| v.trim().parse::<f64>().ok()) {
        let phase = 2.0 * std::f64::consts::PI * hour / 24.0;
        x[0] = phase.sin();
        x[1] = phase.cos();
    }
    if let Some(battery) = ctx
        .get("batteryLevel")
        .and_then(|v| v.trim().parse::<f64>().ok())
    {
        x[2] = battery / 100.0;
    }
    if ctx.get("isCharging").is_some_and(|v| truthy(v)) {
        x[3] = 1.0;
    }
    if ctx.get("isWeekend").is_some_and(|v| truthy(v)) {
        x[4] = 1.0;
    }
    match ctx.get("motionState").map(String::as_str) {
        Some("stationary") => x[5] = 1.0,
        Some("active") => x[6] = 1.0,
        Some("vehicle") => x[7] = 1.0,
        _ => {}
    }
    x
}

/// Per-arm ridge-regression state.
#[derive(Debug, Clone)]
struct Arm {
    a: Matrix,
    b: Vector,
}

impl Default for Arm {
    fn default() -> Self {
        Self {
            a: identity(),
            b: [0.0; FEATURE_DIM],
        }
    }
}

fn identity() -> Matrix {
    let mut m = [[0.0; FEATURE_DIM]; FEATURE_DIM];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

/// Serializable per-arm state: `A` row-major, `b` in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinUcbArmState {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
}

/// Serializable LinUCB state: every arm's id, A and b.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinUcbState {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub arms: HashMap<String, LinUcbArmState>,
}

fn default_alpha() -> f64 {
    1.0
}

/// Contextual action selector with per-arm linear reward models.
pub struct LinUcb {
    alpha: f64,
    arms: Mutex<HashMap<String, Arm>>,
}

impl LinUcb {
    /// Create a selector with the given exploration weight.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            arms: Mutex::new(HashMap::new()),
        }
    }

    /// Pick the candidate with the highest upper confidence bound under
    /// the current context, or `None` for an empty slate.
    ///
    /// Unseen arms carry identity/zero state, scoring `α·‖x‖`.
    pub fn select(&self, candidates: &[String], ctx: &ContextMap) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let x = features(ctx);
        let arms = self.arms.lock();
        let fresh = Arm::default();

        let mut best: Option<(usize, f64)> = None;
        for (idx, id) in candidates.iter().enumerate() {
            let arm = arms.get(id).unwrap_or(&fresh);
            let Some(factor) = cholesky(&arm.a) else {
                // Only reachable through a corrupted import.
                warn!(arm = %id, "design matrix not positive definite, skipping arm");
                continue;
            };
            let theta = solve(&factor, &arm.b);
            let a_inv_x = solve(&factor, &x);
            let score = dot(&theta, &x) + self.alpha * dot(&x, &a_inv_x).max(0.0).sqrt();
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| idx).or(Some(0))
    }

    /// Fold a reward observation into an arm's model:
    /// `A ← A + xxᵀ`, `b ← b + r·x`.
    pub fn update(&self, action_id: &str, reward: f64, ctx: &ContextMap) {
        let x = features(ctx);
        let mut arms = self.arms.lock();
        let arm = arms.entry(action_id.to_string()).or_default();
        for i in 0..FEATURE_DIM {
            for j in 0..FEATURE_DIM {
                arm.a[i][j] += x[i] * x[j];
            }
            arm.b[i] += reward * x[i];
        }
    }

    /// Export every arm's state.
    pub fn export(&self) -> LinUcbState {
        let arms = self.arms.lock();
        LinUcbState {
            alpha: self.alpha,
            arms: arms
                .iter()
                .map(|(id, arm)| {
                    let state = LinUcbArmState {
                        a: arm.a.iter().flatten().copied().collect(),
                        b: arm.b.to_vec(),
                    };
                    (id.clone(), state)
                })
                .collect(),
        }
    }

    /// Restore arms from an exported state. Dimensions are validated; the
    /// stored alpha is ignored in favor of the configured one.
    pub fn import(&self, state: LinUcbState) -> Result<()> {
        let mut restored = HashMap::with_capacity(state.arms.len());
        for (id, arm_state) in state.arms {
            if arm_state.a.len() != FEATURE_DIM * FEATURE_DIM || arm_state.b.len() != FEATURE_DIM {
                return Err(EngineError::InvalidSnapshot(format!(
                    "arm {id}: expected {FEATURE_DIM}x{FEATURE_DIM} matrix and {FEATURE_DIM}-vector"
                )));
            }
            let mut arm = Arm::default();
            for i in 0..FEATURE_DIM {
                arm.a[i].copy_from_slice(&arm_state.a[i * FEATURE_DIM..(i + 1) * FEATURE_DIM]);
            }
            arm.b.copy_from_slice(&arm_state.b);
            restored.insert(id, arm);
        }
        *self.arms.lock() = restored;
        Ok(())
    }
}

/// Cholesky factorization of a symmetric positive-definite matrix.
/// Returns the lower-triangular factor, or `None` when the matrix is not
/// positive definite.
fn cholesky(a: &Matrix) -> Option<Matrix> {
    let mut l = [[0.0; FEATURE_DIM]; FEATURE_DIM];
    for i in 0..FEATURE_DIM {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }
    Some(l)
}

/// Solve `A·x = rhs` given the lower Cholesky factor of `A`.
fn solve(l: &Matrix, rhs: &Vector) -> Vector {
    // Forward substitution: L·y = rhs.
    let mut y = [0.0; FEATURE_DIM];
    for i in 0..FEATURE_DIM {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= l[i][k] * y[k];
        }
        y[i] = sum / l[i][i];
    }
    // Back substitution: Lᵀ·x = y.
    let mut x = [0.0; FEATURE_DIM];
    for i in (0..FEATURE_DIM).rev() {
        let mut sum = y[i];
        for k in (i + 1)..FEATURE_DIM {
            sum -= l[k][i] * x[k];
        }
        x[i] = sum / l[i][i];
    }
    x
}

fn dot(a: &Vector, b: &Vector) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
