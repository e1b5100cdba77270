//! Declarative rule model: conditions, actions, and the rules tying them
//! together.
//!
//! Rules arrive from the host as JSON (see the crate docs for the schema),
//! are held in a flat table, and are indexed by the compiled decision tree.

pub mod action;
pub mod condition;
pub mod rule;

pub use action::Action;
pub use condition::{Condition, ConditionOp};
pub use rule::{MatchResult, Rule};
