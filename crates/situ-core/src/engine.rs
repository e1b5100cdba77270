//! Rule engine facade.
//!
//! Owns the rule table, the compiled decision tree, cooldown and
//! rate-limit bookkeeping, the event buffer, and both bandits. All
//! operations are safe under concurrent calls from sensor, consumer and
//! control threads.
//!
//! Locking: one mutex guards the rule/tree/firing state, the event buffer
//! and each bandit carry their own. The engine lock is acquired before the
//! event-buffer lock during evaluation and never the other way around.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bandit::{BanditSnapshot, EpsilonGreedy, LinUcb};
use crate::clock::{Clock, MonotonicClock};
use crate::context::{self, ContextMap};
use crate::error::Result;
use crate::events::{ContextEvent, EventBuffer, DEFAULT_EVENT_CAPACITY};
use crate::limits::{FiringTracker, RateLimits};
use crate::rules::{Condition, ConditionOp, MatchResult, Rule};
use crate::soft_match::soft_match;
use crate::tree::{self, TreeNode};

/// Running confidence below this aborts condition matching for a rule.
const CONFIDENCE_FLOOR: f64 = 0.01;

/// Minimum combined confidence for a rule to be reported.
const MATCH_THRESHOLD: f64 = 0.1;

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Exploration rate of the ε-greedy bandit.
    pub epsilon: f64,
    /// Exploration weight of the LinUCB bandit.
    pub linucb_alpha: f64,
    /// Event-buffer capacity.
    pub event_capacity: usize,
    /// Result cap used when `evaluate_json` is called without one.
    pub max_results: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            linucb_alpha: 1.0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_results: 5,
        }
    }
}

/// State guarded by the engine mutex.
struct EngineState {
    rules: Vec<Rule>,
    tree: Vec<TreeNode>,
    last_fired: HashMap<String, i64>,
    firings: FiringTracker,
    limits: RateLimits,
}

impl EngineState {
    /// Run one rule through the cooldown and rate-limit gates, then match
    /// its conditions, appending a result when the combined confidence
    /// clears the threshold.
    fn consider_rule(
        &mut self,
        rule_idx: usize,
        ctx: &ContextMap,
        now: i64,
        events: &EventBuffer,
        results: &mut Vec<MatchResult>,
    ) {
        let Some(rule) = self.rules.get(rule_idx) else {
            return;
        };
        if !rule.enabled {
            return;
        }
        if rule.cooldown_ms > 0 {
            if let Some(&last) = self.last_fired.get(&rule.id) {
                if now - last < rule.cooldown_ms {
                    return;
                }
            }
        }
        if self.firings.is_rate_limited(&rule.action.kind, now, &self.limits) {
            return;
        }

        let mut confidence = 1.0;
        for cond in &rule.conditions {
            confidence *= match_condition(cond, ctx, events);
            if confidence < CONFIDENCE_FLOOR {
                break;
            }
        }
        if confidence > MATCH_THRESHOLD {
            results.push(MatchResult {
                rule_id: rule.id.clone(),
                confidence,
                action: rule.action.clone(),
            });
        }
    }
}

/// Score one condition, routing temporal operators to the event buffer
/// and everything else to the soft matcher.
fn match_condition(cond: &Condition, ctx: &ContextMap, events: &EventBuffer) -> f64 {
    match &cond.op {
        ConditionOp::Recent => {
            let (Some(event_type), Some(window)) = (cond.event_type(), cond.window_ms()) else {
                return 0.0;
            };
            if events.has_recent(event_type, window) {
                1.0
            } else {
                0.0
            }
        }
        ConditionOp::Within => {
            let (Some((first, second)), Some(window)) = (cond.sequence_pair(), cond.window_ms())
            else {
                return 0.0;
            };
            if events.has_sequence(first, second, window) {
                1.0
            } else {
                0.0
            }
        }
        _ => soft_match(cond, ctx),
    }
}

/// Context-aware recommendation engine.
///
/// One instance per host process is the deployment convention; the engine
/// itself is an ordinary explicitly-constructed object.
pub struct RuleEngine {
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    events: EventBuffer,
    bandit: EpsilonGreedy,
    contextual: LinUcb,
}

impl RuleEngine {
    /// Create an engine on the process monotonic clock with default
    /// configuration.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    /// Create an engine on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, EngineConfig::default())
    }

    /// Create an engine on an injected clock with explicit tunables.
    pub fn with_config(clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            events: EventBuffer::new(clock.clone(), config.event_capacity),
            bandit: EpsilonGreedy::new(config.epsilon),
            contextual: LinUcb::new(config.linucb_alpha),
            state: Mutex::new(EngineState {
                rules: Vec::new(),
                tree: Vec::new(),
                last_fired: HashMap::new(),
                firings: FiringTracker::default(),
                limits: RateLimits::default(),
            }),
            clock,
            config,
        }
    }

    /// Replace the whole rule base and recompile the tree. Bandit state,
    /// firing history and cooldown bookkeeping survive the reload.
    pub fn load_rules(&self, rules: Vec<Rule>) {
        let mut state = self.state.lock();
        debug!(count = rules.len(), "loading rules");
        state.rules = rules;
        state.tree = tree::compile(&state.rules);
    }

    /// Insert a rule, replacing any existing rule with the same id.
    pub fn add_rule(&self, rule: Rule) {
        let mut state = self.state.lock();
        match state.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => state.rules.push(rule),
        }
        state.tree = tree::compile(&state.rules);
    }

    /// Remove a rule by id; returns whether it was present.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.rules.len();
        state.rules.retain(|r| r.id != rule_id);
        if state.rules.len() == before {
            return false;
        }
        state.tree = tree::compile(&state.rules);
        true
    }

    /// Number of loaded rules, enabled or not.
    pub fn rule_count(&self) -> usize {
        self.state.lock().rules.len()
    }

    /// Install new rate limits; affects future evaluations only.
    pub fn set_limits(&self, limits: RateLimits) {
        self.state.lock().limits = limits;
    }

    /// Append a context event to the temporal log.
    pub fn push_event(&self, event: ContextEvent) {
        self.events.push(event);
    }

    /// Evaluate the rule base against a context snapshot.
    ///
    /// Returns up to `max_results` matches sorted by confidence times
    /// priority, descending. When the result list is non-empty, the
    /// top-ranked rule is recorded as fired: its cooldown starts and the
    /// category/global windows gain an entry. Lower-ranked candidates are
    /// surfaced but not charged; the caller is expected to act on at most
    /// the top one.
    pub fn evaluate(&self, ctx: &ContextMap, max_results: usize) -> Vec<MatchResult> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = self.clock.now_ms();

        let mut results: Vec<MatchResult> = Vec::new();
        if state.tree.is_empty() {
            // No compiled tree: scan the whole table.
            for rule_idx in 0..state.rules.len() {
                state.consider_rule(rule_idx, ctx, now, &self.events, &mut results);
            }
        } else {
            let mut node_idx = Some(0);
            while let Some(idx) = node_idx {
                let Some(node) = state.tree.get(idx) else {
                    break;
                };
                let Some(split_key) = node.split_key.clone() else {
                    let candidates = node.rule_indices.clone();
                    for rule_idx in candidates {
                        state.consider_rule(rule_idx, ctx, now, &self.events, &mut results);
                    }
                    break;
                };
                node_idx = match ctx.get(&split_key).and_then(|v| node.branches.get(v)) {
                    Some(&child) => Some(child),
                    None => node.default_child,
                };
            }
        }

        // Deduplicate by rule id, keeping the highest confidence.
        let mut deduped: Vec<MatchResult> = Vec::with_capacity(results.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        for result in results {
            match seen.get(&result.rule_id) {
                Some(&pos) => {
                    if result.confidence > deduped[pos].confidence {
                        deduped[pos] = result;
                    }
                }
                None => {
                    seen.insert(result.rule_id.clone(), deduped.len());
                    deduped.push(result);
                }
            }
        }
        let mut results = deduped;

        // Rank by confidence times priority; the stable sort keeps rule
        // order on ties.
        let priorities: HashMap<&str, f64> = state
            .rules
            .iter()
            .map(|r| (r.id.as_str(), r.priority))
            .collect();
        let score = |r: &MatchResult| {
            r.confidence * priorities.get(r.rule_id.as_str()).copied().unwrap_or(1.0)
        };
        results.sort_by(|a, b| {
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(max_results);

        // Only the top result counts as a firing.
        if let Some(top) = results.first() {
            state.last_fired.insert(top.rule_id.clone(), now);
            state.firings.record(&top.action.kind, now);
        }

        results
    }

    /// ε-greedy arm selection over a candidate slate.
    pub fn select_action(&self, candidates: &[String]) -> Option<usize> {
        self.bandit.select(candidates)
    }

    /// Record a scalar reward for an action.
    pub fn update_reward(&self, action_id: &str, reward: f64) {
        self.bandit.update(action_id, reward);
    }

    /// Contextual arm selection over a candidate slate.
    pub fn select_action_contextual(
        &self,
        candidates: &[String],
        ctx: &ContextMap,
    ) -> Option<usize> {
        self.contextual.select(candidates, ctx)
    }

    /// Record a reward for an action under the context it fired in.
    pub fn update_reward_contextual(&self, action_id: &str, reward: f64, ctx: &ContextMap) {
        self.contextual.update(action_id, reward, ctx);
    }

    /// Replace the rule base from a JSON array in the wire schema.
    /// Returns the number of rules loaded.
    pub fn load_rules_json(&self, json: &str) -> Result<usize> {
        let rules: Vec<Rule> = serde_json::from_str(json)?;
        let count = rules.len();
        self.load_rules(rules);
        Ok(count)
    }

    /// Upsert a single rule from a JSON object in the wire schema.
    pub fn add_rule_json(&self, json: &str) -> Result<()> {
        let rule: Rule = serde_json::from_str(json)?;
        self.add_rule(rule);
        Ok(())
    }

    /// Export the rule base as a JSON array in the wire schema.
    pub fn export_rules_json(&self) -> Result<String> {
        let state = self.state.lock();
        Ok(serde_json::to_string(&state.rules)?)
    }

    /// Evaluate a JSON context object, returning the ranked matches as a
    /// JSON array. `max_results` falls back to the configured default.
    pub fn evaluate_json(&self, context_json: &str, max_results: Option<usize>) -> Result<String> {
        let ctx = context::from_json(context_json)?;
        let results = self.evaluate(&ctx, max_results.unwrap_or(self.config.max_results));
        Ok(serde_json::to_string(&results)?)
    }

    /// ε-greedy arm statistics as JSON, keyed by action id.
    pub fn bandit_stats_json(&self) -> Result<String> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ArmStatsOut {
            pulls: u64,
            total_reward: f64,
            avg_reward: f64,
        }
        let stats: HashMap<String, ArmStatsOut> = self
            .bandit
            .stats()
            .into_iter()
            .map(|(id, arm)| {
                let out = ArmStatsOut {
                    pulls: arm.pulls,
                    total_reward: arm.total_reward,
                    avg_reward: arm.avg_reward(),
                };
                (id, out)
            })
            .collect();
        Ok(serde_json::to_string(&stats)?)
    }

    /// Export both bandits as an opaque snapshot for the host to persist.
    pub fn export_bandit(&self) -> Result<Vec<u8>> {
        let snapshot = BanditSnapshot {
            epsilon_arms: self.bandit.stats(),
            linucb: self.contextual.export(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Restore both bandits from a previously exported snapshot.
    pub fn import_bandit(&self, bytes: &[u8]) -> Result<()> {
        let snapshot: BanditSnapshot = serde_json::from_slice(bytes)?;
        debug!(arms = snapshot.epsilon_arms.len(), "restoring bandit snapshot");
        self.bandit.load_stats(snapshot.epsilon_arms);
        self.contextual.import(snapshot.linucb)?;
        Ok(())
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rules::Action;

    fn ctx(pairs: &[(&str, &str)]) -> ContextMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn engine_at(start_ms: i64) -> (Arc<ManualClock>, RuleEngine) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let engine = RuleEngine::with_clock(clock.clone());
        (clock, engine)
    }

    #[test]
    fn test_exact_match_fires_with_full_confidence() {
        let (_, engine) = engine_at(0);
        engine.load_rules(vec![Rule::new("r1", Action::suggestion("a1")).with_condition(
            "motionState",
            ConditionOp::Eq,
            "walking",
        )]);

        let results = engine.evaluate(&ctx(&[("motionState", "walking")]), 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, "r1");
        assert_eq!(results[0].confidence, 1.0);
    }

    #[test]
    fn test_disabled_rules_never_match() {
        let (_, engine) = engine_at(0);
        engine.load_rules(vec![Rule::new("r1", Action::suggestion("a1"))
            .with_condition("motionState", ConditionOp::Eq, "walking")
            .with_enabled(false)]);
        assert!(engine.evaluate(&ctx(&[("motionState", "walking")]), 5).is_empty());
    }

    #[test]
    fn test_confidence_multiplies_across_conditions() {
        let (_, engine) = engine_at(0);
        engine.load_rules(vec![Rule::new("r1", Action::suggestion("a1"))
            .with_condition("motionState", ConditionOp::Eq, "walking")
            .with_condition("batteryLevel", ConditionOp::Lt, "20")]);

        // battery 20.5: second condition scores 0.75.
        let results = engine.evaluate(
            &ctx(&[("motionState", "walking"), ("batteryLevel", "20.5")]),
            5,
        );
        assert_eq!(results.len(), 1);
        assert!((results[0].confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_matches_are_dropped() {
        let (_, engine) = engine_at(0);
        engine.load_rules(vec![Rule::new("r1", Action::suggestion("a1")).with_condition(
            "batteryLevel",
            ConditionOp::Lt,
            "20",
        )]);
        // battery 22 scores exactly 0.0.
        assert!(engine.evaluate(&ctx(&[("batteryLevel", "22")]), 5).is_empty());
    }

    #[test]
    fn test_ranking_weighs_priority() {
        let (_, engine) = engine_at(0);
        engine.load_rules(vec![
            Rule::new("low", Action::suggestion("a1"))
                .with_condition("motionState", ConditionOp::Eq, "walking")
                .with_priority(1.0),
            Rule::new("high", Action::suggestion("a2"))
                .with_condition("motionState", ConditionOp::Eq, "walking")
                .with_priority(3.0),
        ]);
        let results = engine.evaluate(&ctx(&[("motionState", "walking")]), 5);
        assert_eq!(results[0].rule_id, "high");
        assert_eq!(results[1].rule_id, "low");
    }

    #[test]
    fn test_max_results_truncates() {
        let (_, engine) = engine_at(0);
        let rules: Vec<Rule> = (0..6)
            .map(|i| {
                Rule::new(format!("r{i}"), Action::suggestion(format!("a{i}"))).with_condition(
                    "motionState",
                    ConditionOp::Eq,
                    "walking",
                )
            })
            .collect();
        engine.load_rules(rules);
        let results = engine.evaluate(&ctx(&[("motionState", "walking")]), 3);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_add_rule_upserts_by_id() {
        let (_, engine) = engine_at(0);
        engine.add_rule(Rule::new("r1", Action::suggestion("a1")).with_condition(
            "motionState",
            ConditionOp::Eq,
            "walking",
        ));
        assert_eq!(engine.rule_count(), 1);

        // Same id, new condition: replaces rather than duplicates.
        engine.add_rule(Rule::new("r1", Action::suggestion("a1")).with_condition(
            "motionState",
            ConditionOp::Eq,
            "stationary",
        ));
        assert_eq!(engine.rule_count(), 1);
        assert!(engine.evaluate(&ctx(&[("motionState", "walking")]), 5).is_empty());
        assert_eq!(
            engine
                .evaluate(&ctx(&[("motionState", "stationary")]), 5)
                .len(),
            1
        );
    }

    #[test]
    fn test_remove_rule_reports_presence() {
        let (_, engine) = engine_at(0);
        engine.add_rule(Rule::new("r1", Action::suggestion("a1")));
        assert!(engine.remove_rule("r1"));
        assert!(!engine.remove_rule("r1"));
        assert_eq!(engine.rule_count(), 0);
    }

    #[test]
    fn test_temporal_condition_consults_event_buffer() {
        let (clock, engine) = engine_at(10_000);
        engine.load_rules(vec![Rule::new("r1", Action::suggestion("a1")).with_condition(
            "event:app_open",
            ConditionOp::Recent,
            "5000",
        )]);

        assert!(engine.evaluate(&ContextMap::new(), 5).is_empty());
        engine.push_event(ContextEvent::new("app_open", 10_000));
        let results = engine.evaluate(&ContextMap::new(), 5);
        assert_eq!(results.len(), 1);

        // Outside the window the condition scores zero again. The rule
        // fired above, so move past its (zero) cooldown but beyond the
        // event window.
        clock.set(16_000);
        assert!(engine.evaluate(&ContextMap::new(), 5).is_empty());
    }

    #[test]
    fn test_malformed_temporal_keys_score_zero() {
        let (_, engine) = engine_at(0);
        engine.load_rules(vec![
            Rule::new("r1", Action::suggestion("a1")).with_condition(
                "app_open",
                ConditionOp::Recent,
                "5000",
            ),
            Rule::new("r2", Action::suggestion("a2")).with_condition(
                "event:app_open",
                ConditionOp::Recent,
                "not-a-number",
            ),
        ]);
        engine.push_event(ContextEvent::new("app_open", 0));
        assert!(engine.evaluate(&ContextMap::new(), 5).is_empty());
    }

    #[test]
    fn test_evaluate_observes_mid_session_limit_change() {
        let (clock, engine) = engine_at(0);
        engine.load_rules(vec![
            Rule::new("r1", Action::suggestion("a1"))
                .with_condition("motionState", ConditionOp::Eq, "walking")
                .with_cooldown_ms(60_000),
            Rule::new("r2", Action::suggestion("a2"))
                .with_condition("motionState", ConditionOp::Eq, "walking")
                .with_cooldown_ms(60_000),
        ]);
        let walking = ctx(&[("motionState", "walking")]);

        assert!(!engine.evaluate(&walking, 5).is_empty());
        clock.advance(1);

        engine.set_limits(RateLimits {
            global_max_per_hour: 1,
            ..Default::default()
        });
        // The single recorded firing now saturates the global window.
        assert!(engine.evaluate(&walking, 5).is_empty());
    }

    #[test]
    fn test_rule_json_boundary_roundtrip() {
        let (_, engine) = engine_at(0);
        let loaded = engine
            .load_rules_json(
                r#"[{
                    "id": "quiet-hours",
                    "name": "Quiet hours",
                    "enabled": true,
                    "priority": 2.0,
                    "cooldownMs": 60000,
                    "conditions": [
                        {"key": "hour", "op": "range", "value": "22,23"}
                    ],
                    "action": {"id": "mute", "type": "automation", "payload": "{}"}
                }]"#,
            )
            .unwrap();
        assert_eq!(loaded, 1);

        let exported = engine.export_rules_json().unwrap();
        assert!(exported.contains(r#""cooldownMs":60000"#));
        assert!(exported.contains(r#""op":"range""#));

        let results_json = engine
            .evaluate_json(r#"{"hour": 22}"#, None)
            .unwrap();
        assert!(results_json.contains(r#""ruleId":"quiet-hours""#));
        assert!(results_json.contains(r#""confidence":1.0"#));
    }

    #[test]
    fn test_bandit_snapshot_roundtrip() {
        let (_, engine) = engine_at(0);
        engine.update_reward("a1", 0.75);
        engine.update_reward("a1", 0.25);
        engine.update_reward_contextual("a1", 1.0, &ctx(&[("batteryLevel", "40")]));

        let snapshot = engine.export_bandit().unwrap();

        let (_, fresh) = engine_at(0);
        fresh.import_bandit(&snapshot).unwrap();
        let stats = fresh.bandit_stats_json().unwrap();
        assert!(stats.contains(r#""pulls":2"#));
        assert!(stats.contains(r#""totalReward":1.0"#));
        assert!(stats.contains(r#""avgReward":0.5"#));
    }

    #[test]
    fn test_import_rejects_garbage() {
        let (_, engine) = engine_at(0);
        assert!(engine.import_bandit(b"not json").is_err());
    }
}
