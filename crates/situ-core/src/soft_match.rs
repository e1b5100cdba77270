//! Fuzzy condition scoring.
//!
//! Every condition scores to a confidence in [0, 1] instead of a boolean.
//! Numeric comparisons decay linearly over a margin of 10% of the
//! threshold (at least 1.0), so a battery at 22% still partially matches
//! `batteryLevel lt 20`. A key missing from the context scores 0.5:
//! uncertain, not penalized.
//!
//! Parse failures never raise. A non-numeric operand under a numeric
//! operator degrades to string equality; a malformed `range` operand
//! scores 0.0.

use crate::context::ContextMap;
use crate::rules::{Condition, ConditionOp};

/// Score one condition against a context snapshot.
///
/// Total over all inputs; temporal operators (`recent` / `within`) are not
/// resolvable from a snapshot and score 0.0 here, as does any unknown
/// operator.
pub fn soft_match(cond: &Condition, ctx: &ContextMap) -> f64 {
    let Some(actual) = ctx.get(&cond.key) else {
        return 0.5;
    };

    match &cond.op {
        ConditionOp::Eq => {
            if actual == &cond.value {
                1.0
            } else {
                0.0
            }
        }
        ConditionOp::Neq => {
            if actual != &cond.value {
                1.0
            } else {
                0.0
            }
        }
        ConditionOp::In => {
            if split_csv(&cond.value).iter().any(|opt| *opt == actual.as_str()) {
                1.0
            } else {
                0.0
            }
        }
        ConditionOp::Gt => ordered_match(actual, &cond.value, |a, v| a > v),
        ConditionOp::Gte => ordered_match(actual, &cond.value, |a, v| a >= v),
        ConditionOp::Lt => ordered_match(actual, &cond.value, |a, v| a < v),
        ConditionOp::Lte => ordered_match(actual, &cond.value, |a, v| a <= v),
        ConditionOp::Range => range_match(actual, &cond.value),
        ConditionOp::Recent | ConditionOp::Within | ConditionOp::Other(_) => 0.0,
    }
}

/// Numeric comparison with linear decay over a 10% neighborhood of the
/// threshold. Falls back to string equality when either side fails to
/// parse.
fn ordered_match(actual: &str, value: &str, satisfied: fn(f64, f64) -> bool) -> f64 {
    let (Some(a), Some(v)) = (parse_number(actual), parse_number(value)) else {
        return if actual == value { 1.0 } else { 0.0 };
    };
    if satisfied(a, v) {
        return 1.0;
    }
    let margin = (v.abs() * 0.1).max(1.0);
    let diff = (a - v).abs();
    (1.0 - diff / margin).max(0.0)
}

/// Interval containment with linear decay outside `[lo, hi]`.
fn range_match(actual: &str, value: &str) -> f64 {
    let bounds = split_csv(value);
    if bounds.len() != 2 {
        return 0.0;
    }
    let (Some(lo), Some(hi)) = (parse_number(&bounds[0]), parse_number(&bounds[1])) else {
        return 0.0;
    };
    let Some(a) = parse_number(actual) else {
        return 0.0;
    };
    if a >= lo && a <= hi {
        return 1.0;
    }
    let dist = if a < lo { lo - a } else { a - hi };
    let margin = ((hi - lo) * 0.1).max(1.0);
    (1.0 - dist / margin).max(0.0)
}

fn parse_number(s: &str) -> Option<f64> {
    let parsed: f64 = s.trim().parse().ok()?;
    parsed.is_finite().then_some(parsed)
}

/// Split a comma-separated operand, trimming whitespace and dropping
/// empty entries.
fn split_csv(s: &str) -> Vec<&str> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}
