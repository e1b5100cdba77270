//! Rule conditions: key / operator / value triples.

use serde::{Deserialize, Serialize};

/// Comparison operator of a condition.
///
/// Operators outside the known set deserialize to [`ConditionOp::Other`]
/// with the original text preserved, and always score 0.0 during matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOp {
    /// Exact string equality.
    Eq,
    /// String inequality.
    Neq,
    /// Numeric greater-than with soft decay below the threshold.
    Gt,
    /// Numeric greater-or-equal with soft decay.
    Gte,
    /// Numeric less-than with soft decay.
    Lt,
    /// Numeric less-or-equal with soft decay.
    Lte,
    /// Membership in a comma-separated list.
    In,
    /// Numeric interval `"lo,hi"` with soft decay outside it.
    Range,
    /// An event of the named type occurred within the window.
    /// `key` must be `event:<type>`; `value` is the window in milliseconds.
    Recent,
    /// Two events occurred in order within the window.
    /// `key` must be `sequence:<a>,<b>`; `value` is the window in milliseconds.
    Within,
    /// Unrecognized operator, kept verbatim for re-export.
    Other(String),
}

impl From<String> for ConditionOp {
    fn from(s: String) -> Self {
        match s.as_str() {
            "eq" => ConditionOp::Eq,
            "neq" => ConditionOp::Neq,
            "gt" => ConditionOp::Gt,
            "gte" => ConditionOp::Gte,
            "lt" => ConditionOp::Lt,
            "lte" => ConditionOp::Lte,
            "in" => ConditionOp::In,
            "range" => ConditionOp::Range,
            "recent" => ConditionOp::Recent,
            "within" => ConditionOp::Within,
            _ => ConditionOp::Other(s),
        }
    }
}

impl From<ConditionOp> for String {
    fn from(op: ConditionOp) -> Self {
        op.as_str().to_string()
    }
}

impl ConditionOp {
    /// Wire name of the operator.
    pub fn as_str(&self) -> &str {
        match self {
            ConditionOp::Eq => "eq",
            ConditionOp::Neq => "neq",
            ConditionOp::Gt => "gt",
            ConditionOp::Gte => "gte",
            ConditionOp::Lt => "lt",
            ConditionOp::Lte => "lte",
            ConditionOp::In => "in",
            ConditionOp::Range => "range",
            ConditionOp::Recent => "recent",
            ConditionOp::Within => "within",
            ConditionOp::Other(s) => s,
        }
    }
}

/// A single condition in a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Context key, or `event:<type>` / `sequence:<a>,<b>` for temporal ops.
    pub key: String,
    /// Comparison operator.
    pub op: ConditionOp,
    /// Operand; interpretation depends on `op`.
    #[serde(default)]
    pub value: String,
}

impl Condition {
    /// Build a condition.
    pub fn new(key: impl Into<String>, op: ConditionOp, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// Event type of a `recent` condition (`event:<type>` key).
    pub(crate) fn event_type(&self) -> Option<&str> {
        self.key.strip_prefix("event:").filter(|t| !t.is_empty())
    }

    /// Event pair of a `within` condition (`sequence:<a>,<b>` key).
    pub(crate) fn sequence_pair(&self) -> Option<(&str, &str)> {
        let body = self.key.strip_prefix("sequence:")?;
        let (first, second) = body.split_once(',')?;
        if first.is_empty() || second.is_empty() {
            return None;
        }
        Some((first, second))
    }

    /// Time window in milliseconds for temporal conditions.
    pub(crate) fn window_ms(&self) -> Option<i64> {
        self.value.trim().parse().ok()
    }
}
