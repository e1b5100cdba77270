//! Flat rule definition and evaluation results.

use serde::{Deserialize, Serialize};

use super::{Action, Condition, ConditionOp};

/// A declarative rule: all conditions soft-matched against the context,
/// their product gating the action.
///
/// Rule ids are unique across the loaded rule base; adding a rule whose id
/// already exists replaces the previous definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub action: Action,
    /// Ranking weight, multiplied into the confidence when sorting matches.
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// Minimum interval between two firings of this rule.
    #[serde(default)]
    pub cooldown_ms: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Build an enabled rule with default priority and no cooldown.
    pub fn new(id: impl Into<String>, action: Action) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            conditions: Vec::new(),
            action,
            priority: default_priority(),
            cooldown_ms: 0,
            enabled: default_enabled(),
        }
    }

    /// Append a condition.
    pub fn with_condition(
        mut self,
        key: impl Into<String>,
        op: ConditionOp,
        value: impl Into<String>,
    ) -> Self {
        self.conditions.push(Condition::new(key, op, value));
        self
    }

    /// Set the ranking priority.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-rule cooldown.
    pub fn with_cooldown_ms(mut self, cooldown_ms: i64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Enable or disable the rule.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A rule that matched during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub rule_id: String,
    /// Product of all condition scores, in (0.1, 1].
    pub confidence: f64,
    pub action: Action,
}
