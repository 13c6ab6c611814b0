//! Conflict detection and cross-link edges.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::json;

use crate::canonical::round_metric;
use crate::types::node::ids;
use crate::types::{conflict_id, EdgeType, GraphEdge, GraphNode, Lens, NodeType, PolicyType, Stance};

use super::forest::{self, Forest, LessonEntry, Normalized, PatternKey};
use super::metrics::recency_weight;
use super::params::BuildParams;

/// Conflict reason for an explicit `contradicts` reference.
pub const REASON_EXPLICIT: &str = "explicit_contradiction";

/// Conflict reason for opposite stances on the same scope.
pub const REASON_STANCE: &str = "opposite_stance";

/// A lesson pair in tension, in sorted record-id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DetectedConflict {
    pub conflict_id: String,
    pub lesson_a: String,
    pub lesson_b: String,
    pub reason: &'static str,
}

fn sorted_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Find conflicting lesson pairs among the lessons still present.
///
/// An explicit reference in either direction is enough. Stance conflicts
/// need the same agent, symbol, pattern and timeframe.
pub(crate) fn detect_conflicts(
    normalized: &Normalized<'_>,
    nodes: &BTreeMap<String, GraphNode>,
) -> Vec<DetectedConflict> {
    let live: BTreeMap<&str, &LessonEntry<'_>> = normalized
        .lessons
        .iter()
        .filter(|l| nodes.contains_key(&l.node_id))
        .map(|l| (l.id.as_str(), l))
        .collect();

    let mut pairs: BTreeMap<(String, String), &'static str> = BTreeMap::new();
    for lesson in live.values() {
        for other in &lesson.record.contradicts {
            let other = other.trim();
            if other == lesson.id || !live.contains_key(other) {
                continue;
            }
            pairs.insert(sorted_pair(&lesson.id, other), REASON_EXPLICIT);
        }
    }

    type StanceScope<'s> = (&'s str, &'s str, Option<&'s str>, Option<&'s str>);
    let mut by_scope: BTreeMap<StanceScope<'_>, Vec<(&str, Stance)>> = BTreeMap::new();
    for lesson in live.values() {
        if let Some(stance) = lesson.record.stance {
            let scope = (
                lesson.placement.agent.as_str(),
                lesson.placement.symbol.as_str(),
                lesson.placement.pattern.as_deref(),
                lesson.timeframe.as_deref(),
            );
            by_scope.entry(scope).or_default().push((lesson.id.as_str(), stance));
        }
    }
    for group in by_scope.values() {
        for (i, (a, stance_a)) in group.iter().enumerate() {
            for (b, stance_b) in &group[i + 1..] {
                if stance_a.opposes(*stance_b) {
                    pairs.entry(sorted_pair(a, b)).or_insert(REASON_STANCE);
                }
            }
        }
    }

    pairs
        .into_iter()
        .map(|((lesson_a, lesson_b), reason)| DetectedConflict {
            conflict_id: conflict_id(&lesson_a, &lesson_b),
            lesson_a,
            lesson_b,
            reason,
        })
        .collect()
}

fn ancestor_chain(nodes: &BTreeMap<String, GraphNode>, id: &str) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    let mut current = nodes.get(id).and_then(|n| n.parent_id.clone());
    while let Some(parent) = current {
        if chain.contains(&parent) {
            break;
        }
        current = nodes.get(&parent).and_then(|n| n.parent_id.clone());
        chain.push(parent);
    }
    chain
}

/// Lowest common ancestor of two nodes, if they share a tree.
pub(crate) fn lowest_common_ancestor(
    nodes: &BTreeMap<String, GraphNode>,
    a: &str,
    b: &str,
) -> Option<String> {
    let chain_b: HashSet<String> = ancestor_chain(nodes, b).into_iter().collect();
    ancestor_chain(nodes, a).into_iter().find(|p| chain_b.contains(p))
}

/// Metadata shared by a conflict node and its `conflicts` edge.
pub(crate) fn conflict_meta(conflict: &DetectedConflict) -> crate::types::Meta {
    let mut meta = crate::types::Meta::new();
    meta.insert("conflictId".into(), json!(conflict.conflict_id));
    meta.insert("lessonAId".into(), json!(conflict.lesson_a));
    meta.insert("lessonBId".into(), json!(conflict.lesson_b));
    meta.insert("reason".into(), json!(conflict.reason));
    meta.insert("policy".into(), json!(PolicyType::Unresolved.as_str()));
    meta
}

/// Mark both lessons contradicted, add a conflict node under their lowest
/// common ancestor and return the `conflicts` edges.
pub(crate) fn apply_conflicts(
    nodes: &mut BTreeMap<String, GraphNode>,
    conflicts: &[DetectedConflict],
    params: &BuildParams,
) -> Vec<GraphEdge> {
    let mut edges = Vec::with_capacity(conflicts.len());
    for conflict in conflicts {
        let a_id = ids::lesson(&conflict.lesson_a);
        let b_id = ids::lesson(&conflict.lesson_b);
        let (Some(a), Some(b)) = (nodes.get(&a_id).cloned(), nodes.get(&b_id).cloned()) else {
            continue;
        };

        let confidence = round_metric((a.confidence + b.confidence) / 2.0);
        let meta = conflict_meta(conflict);

        let mut node = GraphNode::new(
            ids::conflict(&conflict.conflict_id),
            NodeType::Conflict,
            format!("{} vs {}", a.label, b.label),
        );
        node.parent_id = lowest_common_ancestor(nodes, &a_id, &b_id);
        if a.agent_key == b.agent_key {
            node.agent_key = a.agent_key.clone();
        }
        node.confidence = confidence;
        node.impact_score = round_metric((a.impact_score + b.impact_score) / 2.0);
        node.sample_size = a.sample_size + b.sample_size;
        node.last_seen_at_ms = a.last_seen_at_ms.max(b.last_seen_at_ms);
        node.hot = a.hot || b.hot;
        node.contradicted = true;
        let mut evidence: BTreeSet<String> = a.evidence_case_ids.iter().cloned().collect();
        evidence.extend(b.evidence_case_ids.iter().cloned());
        node.evidence_case_ids = evidence.into_iter().take(params.max_evidence_ids).collect();
        node.meta = meta.clone();

        let mut edge = GraphEdge::conflict(a_id.clone(), b_id.clone()).with_confidence(confidence);
        edge.meta = meta;
        edges.push(edge);

        for lesson_id in [&a_id, &b_id] {
            if let Some(lesson) = nodes.get_mut(lesson_id) {
                lesson.contradicted = true;
            }
        }
        nodes.insert(node.id.clone(), node);
    }
    edges
}

/// `contains` edges mirroring the forest, weighted by the lens.
pub(crate) fn contains_edges(
    nodes: &BTreeMap<String, GraphNode>,
    lens: Lens,
    reference_ms: i64,
    params: &BuildParams,
) -> Vec<GraphEdge> {
    nodes
        .values()
        .filter_map(|node| {
            let parent = node.parent_id.as_ref()?;
            let weight = match lens {
                Lens::Performance => node.impact_score,
                Lens::Recency => round_metric(recency_weight(
                    node.last_seen_at_ms,
                    reference_ms,
                    params.hot_half_life_ms,
                )),
                Lens::Hierarchy | Lens::FailureMode | Lens::StrategyBroker => node.sample_size as f64,
            };
            Some(GraphEdge::contains(parent.clone(), node.id.clone()).with_weight(weight))
        })
        .collect()
}

/// `supports` edges from the deepest surviving group of each evidence case
/// to the lesson citing it.
pub(crate) fn supports_edges(
    normalized: &Normalized<'_>,
    nodes: &BTreeMap<String, GraphNode>,
) -> Vec<GraphEdge> {
    let cases = normalized.case_index();
    let mut edges = Vec::new();
    for lesson in &normalized.lessons {
        let Some(lesson_node) = nodes.get(&lesson.node_id) else {
            continue;
        };
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for case_id in &lesson.resolved {
            let Some(case) = cases.get(case_id.as_str()) else {
                continue;
            };
            if let Some(group) = case.path.iter().rev().find(|s| nodes.contains_key(&s.id)) {
                *counts.entry(group.id.as_str()).or_default() += 1;
            }
        }
        for (source, count) in counts {
            edges.push(
                GraphEdge::new(source, lesson.node_id.clone(), EdgeType::Supports)
                    .with_weight(count as f64)
                    .with_support(count)
                    .with_confidence(lesson_node.confidence),
            );
        }
    }
    edges
}

/// `learns_from` edges from each goal to the active lessons of its agent
/// and symbol.
pub(crate) fn learns_from_edges(
    normalized: &Normalized<'_>,
    forest: &Forest,
) -> Vec<GraphEdge> {
    let mut edges = Vec::new();
    for (goal_id, (agent, symbol)) in &forest.goal_scopes {
        if !forest.nodes.contains_key(goal_id) {
            continue;
        }
        for lesson in &normalized.lessons {
            if lesson.placement.agent != *agent
                || lesson.placement.symbol != *symbol
                || !forest::is_active(lesson.record)
            {
                continue;
            }
            let Some(node) = forest.nodes.get(&lesson.node_id) else {
                continue;
            };
            edges.push(
                GraphEdge::new(goal_id.clone(), lesson.node_id.clone(), EdgeType::LearnsFrom)
                    .with_weight(node.confidence)
                    .with_confidence(node.confidence),
            );
        }
    }
    edges
}

/// `co_occurs` edges between pattern nodes sharing a pattern key across
/// symbols of one agent.
pub(crate) fn co_occurs_edges(forest: &Forest) -> Vec<GraphEdge> {
    let mut by_key: BTreeMap<&PatternKey, Vec<&GraphNode>> = BTreeMap::new();
    for (id, key) in &forest.pattern_keys {
        if let Some(node) = forest.nodes.get(id) {
            by_key.entry(key).or_default().push(node);
        }
    }

    let mut edges = Vec::new();
    for group in by_key.values() {
        for (i, a) in group.iter().enumerate() {
            for b in &group[i + 1..] {
                let support = a.sample_size.min(b.sample_size);
                edges.push(
                    GraphEdge::new(a.id.clone(), b.id.clone(), EdgeType::CoOccurs)
                        .with_weight(support as f64)
                        .with_support(support)
                        .with_confidence(a.confidence.min(b.confidence)),
                );
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: Option<&str>) -> (String, GraphNode) {
        let mut n = GraphNode::new(id, NodeType::Pattern, id);
        n.parent_id = parent.map(str::to_string);
        (id.to_string(), n)
    }

    #[test]
    fn test_lowest_common_ancestor() {
        let nodes: BTreeMap<String, GraphNode> = [
            node("agent", None),
            node("sym", Some("agent")),
            node("p1", Some("sym")),
            node("p2", Some("sym")),
            node("l1", Some("p1")),
            node("l2", Some("p2")),
            node("other", None),
        ]
        .into_iter()
        .collect();

        assert_eq!(lowest_common_ancestor(&nodes, "l1", "l2").as_deref(), Some("sym"));
        assert_eq!(lowest_common_ancestor(&nodes, "l1", "p1").as_deref(), Some("sym"));
        assert_eq!(lowest_common_ancestor(&nodes, "l1", "other"), None);
    }
}
