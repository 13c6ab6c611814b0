//! Conflict discovery and policy application.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canonical::round_metric;
use crate::types::node::ids;
use crate::types::{
    conflict_id, ConflictResolution, EdgeType, GraphEdge, GraphNode, NodeType, OpenConflict,
    PolicyType, Snapshot,
};

use super::merge::merge_policies;

/// Meta key marking edges added by a policy.
pub const META_ORIGIN: &str = "origin";
/// `origin` value of policy edges.
pub const ORIGIN_POLICY: &str = "policy";
/// Impact of a suppressed lesson before suppression.
pub const META_BASE_IMPACT: &str = "baseImpactScore";
/// Record id of the lesson that suppressed this one.
pub const META_SUPPRESSED_BY: &str = "suppressedBy";
/// Applicability written by a scope split.
pub const META_APPLIES_TO: &str = "appliesTo";

/// Snapshot with policies applied, plus every discovered conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    /// Snapshot with policy effects.
    pub snapshot: Snapshot,
    /// All conflicts, sorted by conflict id.
    pub conflicts: Vec<OpenConflict>,
}

impl ResolutionOutcome {
    /// Conflicts still unresolved.
    pub fn open(&self) -> impl Iterator<Item = &OpenConflict> {
        self.conflicts.iter().filter(|c| c.is_open())
    }

    /// Conflict by id.
    pub fn conflict(&self, conflict_id: &str) -> Option<&OpenConflict> {
        self.conflicts.iter().find(|c| c.conflict_id == conflict_id)
    }
}

/// Applies conflict policies to snapshots. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

fn record_id(node: &GraphNode) -> String {
    node.meta_str("recordId")
        .map(str::to_string)
        .unwrap_or_else(|| node.id.strip_prefix("lesson:").unwrap_or(&node.id).to_string())
}

impl ConflictResolver {
    /// Create a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Every `conflicts` edge between two lesson nodes, without policies.
    pub fn discover(&self, snapshot: &Snapshot) -> Vec<OpenConflict> {
        let index = snapshot.index();
        let mut found: BTreeMap<String, OpenConflict> = BTreeMap::new();
        for edge in snapshot.edges_of_type(EdgeType::Conflicts) {
            let (Some(a), Some(b)) = (index.node(&edge.source), index.node(&edge.target)) else {
                continue;
            };
            if a.node_type != NodeType::Lesson || b.node_type != NodeType::Lesson {
                continue;
            }
            let (a_id, b_id) = (record_id(a), record_id(b));
            if a_id == b_id {
                continue;
            }
            let (lesson_a_id, lesson_b_id) = if a_id <= b_id { (a_id, b_id) } else { (b_id, a_id) };
            let confidence = edge
                .confidence
                .unwrap_or_else(|| round_metric((a.confidence + b.confidence) / 2.0));
            let reason = edge
                .meta
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("explicit_contradiction")
                .to_string();
            let id = conflict_id(&lesson_a_id, &lesson_b_id);
            found.entry(id.clone()).or_insert(OpenConflict {
                conflict_id: id,
                lesson_a_id,
                lesson_b_id,
                confidence,
                reason,
                policy: None,
            });
        }
        found.into_values().collect()
    }

    /// Apply policies to a snapshot.
    ///
    /// Pure and idempotent: effects of any previous application are
    /// stripped first, so `apply(apply(s, p).snapshot, p) == apply(s, p)`.
    ///
    /// A precedence loser's contribution is removed through its own
    /// `impactScore`, which is what routes sum and diffs compare. Aggregates
    /// of its ancestors (pattern confidence, sample sizes) are build-time
    /// values and stay as built.
    pub fn apply(&self, snapshot: &Snapshot, policies: &[ConflictResolution]) -> ResolutionOutcome {
        let mut snapshot = snapshot.clone();
        strip_policy_effects(&mut snapshot);

        let merged = merge_policies(policies.iter().cloned());
        let mut conflicts = self.discover(&snapshot);

        let node_pos: BTreeMap<String, usize> = snapshot
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        let mut policy_edges: Vec<GraphEdge> = Vec::new();
        let mut contradicted: HashSet<String> = HashSet::new();

        for conflict in &mut conflicts {
            let policy = merged.get(&conflict.conflict_id).cloned();
            let policy_type = policy.as_ref().map_or(PolicyType::Unresolved, |p| p.policy_type);
            let a_node = ids::lesson(&conflict.lesson_a_id);
            let b_node = ids::lesson(&conflict.lesson_b_id);
            let conflict_node = ids::conflict(&conflict.conflict_id);

            match &policy {
                Some(p) if p.policy_type == PolicyType::Precedence => {
                    let winner = p.precedence.clone().unwrap_or_default();
                    let loser = if winner == conflict.lesson_a_id {
                        conflict.lesson_b_id.clone()
                    } else {
                        conflict.lesson_a_id.clone()
                    };
                    if let Some(&i) = node_pos.get(&ids::lesson(&loser)) {
                        let node = &mut snapshot.nodes[i];
                        if !node.meta.contains_key(META_BASE_IMPACT) {
                            node.meta.insert(META_BASE_IMPACT.into(), json!(node.impact_score));
                            node.meta.insert(META_SUPPRESSED_BY.into(), json!(winner));
                        }
                        node.impact_score = 0.0;
                    }
                    policy_edges.push(
                        policy_edge(&ids::lesson(&winner), &ids::lesson(&loser), p)
                            .with_confidence(conflict.confidence),
                    );
                }
                Some(p) if p.policy_type == PolicyType::ConditionalOverride => {
                    let mut edge = policy_edge(&ids::lesson(&p.lesson_a_id), &ids::lesson(&p.lesson_b_id), p)
                        .with_confidence(conflict.confidence);
                    edge.meta.insert(
                        "condition".into(),
                        json!(p.condition.as_deref().unwrap_or_default().trim()),
                    );
                    policy_edges.push(edge);
                }
                Some(p) if p.policy_type == PolicyType::ScopeSplit => {
                    if let Some(split) = &p.scope_split {
                        for (lesson, scope) in [(&p.lesson_a_id, &split.lesson_a), (&p.lesson_b_id, &split.lesson_b)] {
                            if let Some(&i) = node_pos.get(&ids::lesson(lesson)) {
                                snapshot.nodes[i].meta.insert(META_APPLIES_TO.into(), json!(scope));
                            }
                        }
                    }
                }
                _ => {
                    contradicted.insert(a_node.clone());
                    contradicted.insert(b_node.clone());
                    contradicted.insert(conflict_node.clone());
                }
            }

            let policy_name = json!(policy_type.as_str());
            if let Some(&i) = node_pos.get(&conflict_node) {
                snapshot.nodes[i].meta.insert("policy".into(), policy_name.clone());
            }
            let edge_id = crate::types::edge::edge_id(EdgeType::Conflicts, &a_node, &b_node);
            if let Some(edge) = snapshot.edges.iter_mut().find(|e| e.id == edge_id) {
                edge.meta.insert("policy".into(), policy_name);
            }

            conflict.policy = policy;
        }

        for node in &mut snapshot.nodes {
            if matches!(node.node_type, NodeType::Lesson | NodeType::Conflict) {
                node.contradicted = contradicted.contains(&node.id);
            }
        }

        let present: HashSet<&str> = snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
        policy_edges.retain(|e| present.contains(e.source.as_str()) && present.contains(e.target.as_str()));
        snapshot.edges.extend(policy_edges);
        crate::types::edge::sort_edges(&mut snapshot.edges);
        snapshot.edges.dedup_by(|a, b| a.id == b.id);
        snapshot.refresh_stats();

        tracing::debug!(
            scope_key = %snapshot.scope_key,
            conflicts = conflicts.len(),
            open = snapshot.stats.conflict_count,
            policies = merged.len(),
            "Conflict policies applied"
        );

        ResolutionOutcome { snapshot, conflicts }
    }
}

fn policy_edge(source: &str, target: &str, policy: &ConflictResolution) -> GraphEdge {
    let mut edge = GraphEdge::new(source, target, EdgeType::OverridesWhen);
    edge.meta.insert(META_ORIGIN.into(), json!(ORIGIN_POLICY));
    edge.meta.insert("conflictId".into(), json!(policy.conflict_id));
    edge.meta.insert("policyType".into(), json!(policy.policy_type.as_str()));
    edge
}

/// Remove every effect a previous policy application left on a snapshot.
fn strip_policy_effects(snapshot: &mut Snapshot) {
    snapshot
        .edges
        .retain(|e| e.meta.get(META_ORIGIN).and_then(Value::as_str) != Some(ORIGIN_POLICY));
    for node in &mut snapshot.nodes {
        if let Some(base) = node.meta.remove(META_BASE_IMPACT).and_then(|v| v.as_f64()) {
            node.impact_score = base;
        }
        node.meta.remove(META_SUPPRESSED_BY);
        node.meta.remove(META_APPLIES_TO);
    }
}
