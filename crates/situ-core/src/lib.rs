//! # situ-core
//!
//! On-device context-aware recommendation engine. Given a snapshot of
//! sensor-derived context (time, motion, battery, network, location), it
//! evaluates a user-configurable rule base and returns a ranked set of
//! action recommendations, each tagged with a confidence score. A bandit
//! layer learns which actions users reward and biases future selection.
//!
//! The crate is an in-process library: no CLI, no files, no environment
//! variables. The host bridge moves JSON in and out; sensor sampling and
//! persistence live outside.
//!
//! ## Architecture
//!
//! - **Rule compiler**: flattens the declarative rule list into a decision
//!   tree keyed on cheap-to-evaluate features first
//! - **Evaluator**: traverses the tree, soft-matches conditions in [0, 1],
//!   enforces cooldowns and rate limits, and ranks matches
//! - **Event buffer**: a bounded temporal log behind the `recent` and
//!   `within` predicates
//! - **Bandit layer**: an ε-greedy arm and a contextual LinUCB arm sharing
//!   one reward-update interface
//!
//! ## Key components
//!
//! - [`RuleEngine`]: the facade tying everything together
//! - [`Clock`]: the injected monotonic time source; the engine takes no
//!   wall-clock dependency
//! - [`Rule`] / [`Condition`] / [`Action`]: the declarative rule model
//! - [`EpsilonGreedy`] / [`LinUcb`]: the learning layer
//!
//! ## Rule JSON schema
//!
//! ```json
//! [{"id": "low-battery", "name": "Low battery saver", "enabled": true,
//!   "priority": 1.0, "cooldownMs": 600000,
//!   "conditions": [{"key": "batteryLevel", "op": "lt", "value": "20"}],
//!   "action": {"id": "power-save", "type": "automation", "payload": "{}"}}]
//! ```

pub mod bandit;
pub mod clock;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod limits;
pub mod rules;
pub mod soft_match;
pub mod tree;

pub use bandit::{features, ArmStats, BanditSnapshot, EpsilonGreedy, LinUcb, LinUcbArmState, LinUcbState, FEATURE_DIM};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use context::ContextMap;
pub use engine::{EngineConfig, RuleEngine};
pub use error::{EngineError, Result};
pub use events::{ContextEvent, EventBuffer, DEFAULT_EVENT_CAPACITY, MAX_EVENT_AGE_MS};
pub use limits::RateLimits;
pub use rules::{Action, Condition, ConditionOp, MatchResult, Rule};
pub use soft_match::soft_match;
pub use tree::TreeNode;
