//! Actions recommended when a rule fires.

use serde::{Deserialize, Serialize};

/// Payload surfaced to the host when a rule fires.
///
/// `kind` is an open set; `suggestion`, `automation` and `notification`
/// are the conventional values and also the buckets used by the
/// per-category rate limiter. `payload` is opaque to the engine,
/// typically a JSON document the host interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique action id, also the bandit arm id.
    pub id: String,
    /// Action category.
    #[serde(rename = "type")]
    pub kind: String,
    /// Application payload.
    #[serde(default)]
    pub payload: String,
}

impl Action {
    /// Build an action.
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// A `suggestion` action with an empty payload, for brevity in tests
    /// and rule builders.
    pub fn suggestion(id: impl Into<String>) -> Self {
        Self::new(id, "suggestion", "")
    }
}
