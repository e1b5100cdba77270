//! Decision-tree compilation for rule indexing.
//!
//! Flat rules compile into a shallow tree that splits on cheap,
//! high-coverage context keys first, so evaluation only touches rules
//! whose `eq` conditions are compatible with the context. Only `eq`
//! conditions act as split candidates; numeric and temporal conditions
//! stay at the leaves and are scored by the soft matcher.
//!
//! Rules that do not reference a node's split key ride down every branch
//! of that node, including the default branch taken for unseen values.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use crate::rules::{ConditionOp, Rule};

/// Maximum number of split keys on any root-to-leaf path.
const MAX_DEPTH: usize = 5;

/// Rule sets at or below this size stay leaves.
const MIN_SPLIT_SIZE: usize = 2;

/// A node in the compiled decision tree.
///
/// Nodes live in a flat arena owned by the engine; children are arena
/// indices. Index 0 is the root.
#[derive(Debug, Clone, Default)]
pub struct TreeNode {
    /// Context key this node splits on; `None` marks a leaf.
    pub split_key: Option<String>,
    /// Branch table: context value to child node index.
    pub branches: IndexMap<String, usize>,
    /// Child taken when no branch value matches, if any rules reached this
    /// node without an `eq` condition on the split key.
    pub default_child: Option<usize>,
    /// Candidate rule indices, populated for leaves.
    pub rule_indices: Vec<usize>,
}

/// Evaluation cost of reading a context key (lower is cheaper).
///
/// Time-derived keys are pure computation; device state is already cached;
/// motion needs a low-power sensor; location may wake the GPS.
fn feature_cost(key: &str) -> u32 {
    match key {
        "timeOfDay" | "dayOfWeek" | "isWeekend" | "hour" | "minute" => 0,
        "batteryLevel" | "isCharging" | "networkType" => 1,
        "motionState" | "stepCount" => 2,
        "geofence" | "location" | "latitude" | "longitude" => 3,
        _ => 2,
    }
}

/// Pick the split key maximizing `coverage / (1 + cost)` over the rules in
/// `indices`, counting only `eq` conditions on keys not yet used on this
/// path. Ties keep the first key encountered in rule order.
fn pick_split_key(rules: &[Rule], indices: &[usize], used: &HashSet<String>) -> Option<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &idx in indices {
        let mut seen_in_rule: HashSet<&str> = HashSet::new();
        for cond in &rules[idx].conditions {
            if cond.op != ConditionOp::Eq || used.contains(&cond.key) {
                continue;
            }
            if !seen_in_rule.insert(&cond.key) {
                continue;
            }
            let count = counts.entry(&cond.key).or_insert_with(|| {
                order.push(&cond.key);
                0
            });
            *count += 1;
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for key in order {
        let score = counts[key] as f64 / (1.0 + f64::from(feature_cost(key)));
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((key, score));
        }
    }
    best.map(|(key, _)| key.to_string())
}

/// Compile the enabled rules into a decision tree.
///
/// Returns an empty arena when no rule is enabled; the engine falls back
/// to a linear scan in that case.
pub fn compile(rules: &[Rule]) -> Vec<TreeNode> {
    let enabled: Vec<usize> = rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.enabled)
        .map(|(idx, _)| idx)
        .collect();
    if enabled.is_empty() {
        return Vec::new();
    }

    struct BuildTask {
        node: usize,
        indices: Vec<usize>,
        used: HashSet<String>,
    }

    let mut tree = vec![TreeNode::default()];
    let mut stack = vec![BuildTask {
        node: 0,
        indices: enabled,
        used: HashSet::new(),
    }];

    while let Some(task) = stack.pop() {
        let split = if task.indices.len() <= MIN_SPLIT_SIZE || task.used.len() >= MAX_DEPTH {
            None
        } else {
            pick_split_key(rules, &task.indices, &task.used)
        };

        let Some(split_key) = split else {
            tree[task.node].rule_indices = task.indices;
            continue;
        };

        // Partition: rules with an eq condition on the key group by its
        // value; the rest go to the default branch and also ride along
        // every value branch.
        let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
        let mut unkeyed: Vec<usize> = Vec::new();
        for &idx in &task.indices {
            let branch_value = rules[idx]
                .conditions
                .iter()
                .find(|c| c.op == ConditionOp::Eq && c.key == split_key)
                .map(|c| c.value.clone());
            match branch_value {
                Some(value) => groups.entry(value).or_default().push(idx),
                None => unkeyed.push(idx),
            }
        }

        let mut used = task.used;
        used.insert(split_key.clone());
        tree[task.node].split_key = Some(split_key);

        for (value, mut indices) in groups {
            indices.extend_from_slice(&unkeyed);
            let child = tree.len();
            tree.push(TreeNode::default());
            tree[task.node].branches.insert(value, child);
            stack.push(BuildTask {
                node: child,
                indices,
                used: used.clone(),
            });
        }

        if !unkeyed.is_empty() {
            let child = tree.len();
            tree.push(TreeNode::default());
            tree[task.node].default_child = Some(child);
            stack.push(BuildTask {
                node: child,
                indices: unkeyed,
                used,
            });
        }
    }

    debug!(nodes = tree.len(), "compiled decision tree");
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Action, Rule};

    fn eq_rule(id: &str, pairs: &[(&str, &str)]) -> Rule {
        let mut rule = Rule::new(id, Action::suggestion(format!("act_{id}")));
        for (key, value) in pairs {
            rule = rule.with_condition(*key, ConditionOp::Eq, *value);
        }
        rule
    }

    fn leaf_rules<'a>(tree: &'a [TreeNode], node: usize) -> &'a [usize] {
        &tree[node].rule_indices
    }

    #[test]
    fn test_empty_and_disabled_rules_compile_to_nothing() {
        assert!(compile(&[]).is_empty());
        let disabled = eq_rule("r1", &[("hour", "9")]).with_enabled(false);
        assert!(compile(&[disabled]).is_empty());
    }

    #[test]
    fn test_small_rule_sets_stay_leaves() {
        let rules = vec![
            eq_rule("r1", &[("hour", "9")]),
            eq_rule("r2", &[("hour", "10")]),
        ];
        let tree = compile(&rules);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].split_key.is_none());
        assert_eq!(leaf_rules(&tree, 0), &[0, 1]);
    }

    #[test]
    fn test_splits_on_highest_coverage_key() {
        let rules = vec![
            eq_rule("r1", &[("motionState", "walking")]),
            eq_rule("r2", &[("motionState", "stationary")]),
            eq_rule("r3", &[("motionState", "vehicle")]),
            eq_rule("r4", &[("geofence", "home")]),
        ];
        let tree = compile(&rules);
        assert_eq!(tree[0].split_key.as_deref(), Some("motionState"));
        assert_eq!(tree[0].branches.len(), 3);
        // r4 has no motionState condition: it rides the default branch and
        // every value branch.
        let default = tree[0].default_child.expect("default branch");
        assert_eq!(leaf_rules(&tree, default), &[3]);
        for (_, &child) in &tree[0].branches {
            assert!(leaf_rules(&tree, child).contains(&3));
        }
    }

    #[test]
    fn test_cheaper_key_wins_at_equal_coverage() {
        let rules = vec![
            eq_rule("r1", &[("geofence", "home"), ("hour", "9")]),
            eq_rule("r2", &[("geofence", "office"), ("hour", "10")]),
            eq_rule("r3", &[("geofence", "gym"), ("hour", "18")]),
        ];
        // Both keys cover all three rules; hour costs 0, geofence costs 3.
        let tree = compile(&rules);
        assert_eq!(tree[0].split_key.as_deref(), Some("hour"));
    }

    #[test]
    fn test_non_eq_conditions_never_split() {
        let rules = vec![
            Rule::new("r1", Action::suggestion("a1")).with_condition(
                "batteryLevel",
                ConditionOp::Lt,
                "20",
            ),
            Rule::new("r2", Action::suggestion("a2")).with_condition(
                "batteryLevel",
                ConditionOp::Gt,
                "80",
            ),
            Rule::new("r3", Action::suggestion("a3")).with_condition(
                "stepCount",
                ConditionOp::Gte,
                "1000",
            ),
        ];
        let tree = compile(&rules);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].split_key.is_none());
        assert_eq!(leaf_rules(&tree, 0).len(), 3);
    }

    #[test]
    fn test_branch_indices_point_at_own_children() {
        let rules = vec![
            eq_rule("r1", &[("timeOfDay", "morning"), ("motionState", "walking")]),
            eq_rule("r2", &[("timeOfDay", "morning"), ("motionState", "stationary")]),
            eq_rule("r3", &[("timeOfDay", "evening")]),
            eq_rule("r4", &[("timeOfDay", "night")]),
            eq_rule("r5", &[("networkType", "wifi")]),
        ];
        let tree = compile(&rules);
        assert_eq!(tree[0].split_key.as_deref(), Some("timeOfDay"));
        // Every branch child must exist and describe the rules routed to it.
        for (value, &child) in &tree[0].branches {
            assert!(child < tree.len());
            let reachable: Vec<usize> = collect_rules(&tree, child);
            match value.as_str() {
                "morning" => {
                    assert!(reachable.contains(&0) && reachable.contains(&1));
                    assert!(!reachable.contains(&2));
                }
                "evening" => assert!(reachable.contains(&2)),
                "night" => assert!(reachable.contains(&3)),
                other => panic!("unexpected branch {other}"),
            }
            // r5 rides every branch.
            assert!(reachable.contains(&4), "branch {value} lost the unkeyed rule");
        }
    }

    fn collect_rules(tree: &[TreeNode], node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut pending = vec![node];
        while let Some(idx) = pending.pop() {
            let node = &tree[idx];
            out.extend_from_slice(&node.rule_indices);
            pending.extend(node.branches.values().copied());
            if let Some(default) = node.default_child {
                pending.push(default);
            }
        }
        out
    }

    #[test]
    fn test_depth_limit_forces_leaf() {
        // Four rules sharing eq conditions on six keys with a common value:
        // every split routes all rules down one branch, so only the depth
        // cap can terminate the chain.
        let keys = ["k1", "k2", "k3", "k4", "k5", "k6"];
        let rules: Vec<Rule> = (0..4)
            .map(|i| {
                let mut rule = Rule::new(format!("r{i}"), Action::suggestion(format!("a{i}")));
                for key in keys {
                    rule = rule.with_condition(key, ConditionOp::Eq, "shared");
                }
                rule
            })
            .collect();
        let tree = compile(&rules);
        // One chain of internal nodes, capped at MAX_DEPTH splits.
        let internal = tree.iter().filter(|n| n.split_key.is_some()).count();
        assert_eq!(internal, MAX_DEPTH);
        let leaf = tree
            .iter()
            .find(|n| n.split_key.is_none())
            .expect("terminal leaf");
        assert_eq!(leaf.rule_indices.len(), 4);
    }
}
