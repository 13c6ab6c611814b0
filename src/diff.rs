//! Snapshot diffing.
//!
//! Compares two snapshots by node and edge id. Deltas are always
//! `compare - base`; a side without the entry counts as zero.
//!
//! Snapshots built with different lenses can be diffed. Nothing checks that
//! the two share a lens; ids that exist in only one of them show up as
//! added or removed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::canonical::round_metric;
use crate::types::{EdgeType, GraphEdge, GraphNode, NodeType, Snapshot};

/// Differences below this are treated as equal.
pub const DIFF_EPSILON: f64 = 1e-6;

/// Per-entry diff status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    /// Only in the compare snapshot.
    Added,
    /// Only in the base snapshot.
    Removed,
    /// In both, with a tracked field beyond epsilon.
    Changed,
    /// In both, all tracked fields within epsilon.
    Stable,
}

/// Diff of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDiff {
    /// Node id.
    pub id: String,
    /// Node type (from compare when present).
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Label (from compare when present).
    pub label: String,
    /// Status.
    pub status: DiffStatus,
    /// Impact delta.
    pub impact_delta: f64,
    /// Confidence delta.
    pub confidence_delta: f64,
    /// Sample size delta.
    pub sample_delta: i64,
    /// Win rate delta, when either side has a win rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_rate_delta: Option<f64>,
    /// Hot flag differs.
    pub hot_changed: bool,
    /// Contradicted flag differs.
    pub contradicted_changed: bool,
}

/// Diff of one edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDiff {
    /// Edge id.
    pub id: String,
    /// Edge type.
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Status.
    pub status: DiffStatus,
    /// Weight delta.
    pub weight_delta: f64,
    /// Support count delta.
    pub support_delta: i64,
    /// Confidence delta.
    pub confidence_delta: f64,
}

/// Aggregate counts and shifts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffSummary {
    /// Nodes only in compare.
    pub added: usize,
    /// Nodes only in base.
    pub removed: usize,
    /// Nodes in both that changed.
    pub changed: usize,
    /// Nodes in both that did not change.
    pub stable: usize,
    /// Edges only in compare.
    pub edges_added: usize,
    /// Edges only in base.
    pub edges_removed: usize,
    /// Edges in both that changed.
    pub edges_changed: usize,
    /// Edges in both that did not change.
    pub edges_stable: usize,
    /// Sum of node impact deltas.
    pub net_impact_delta: f64,
    /// Mean confidence delta over nodes present in both snapshots.
    pub mean_confidence_shift: f64,
}

/// Result of diffing two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSnapshot {
    /// Scope key of the base snapshot.
    pub base_scope_key: String,
    /// Scope key of the compare snapshot.
    pub compare_scope_key: String,
    /// Node diffs sorted by id.
    pub node_diffs: Vec<NodeDiff>,
    /// Edge diffs sorted by id.
    pub edge_diffs: Vec<EdgeDiff>,
    /// Summary.
    pub summary: DiffSummary,
    /// Wall-clock diff time. Not part of equality.
    pub build_ms: u64,
}

impl PartialEq for DiffSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.base_scope_key == other.base_scope_key
            && self.compare_scope_key == other.compare_scope_key
            && self.node_diffs == other.node_diffs
            && self.edge_diffs == other.edge_diffs
            && self.summary == other.summary
    }
}

impl DiffSnapshot {
    /// Status of a node, if it appears in either snapshot.
    pub fn node_status(&self, id: &str) -> Option<DiffStatus> {
        self.node_diffs
            .binary_search_by(|d| d.id.as_str().cmp(id))
            .ok()
            .map(|i| self.node_diffs[i].status)
    }

    /// Status of an edge, if it appears in either snapshot.
    pub fn edge_status(&self, id: &str) -> Option<DiffStatus> {
        self.edge_diffs
            .binary_search_by(|d| d.id.as_str().cmp(id))
            .ok()
            .map(|i| self.edge_diffs[i].status)
    }

    /// Node diffs with a given status.
    pub fn nodes_with_status(&self, status: DiffStatus) -> impl Iterator<Item = &NodeDiff> {
        self.node_diffs.iter().filter(move |d| d.status == status)
    }

    /// Whether nothing was added, removed or changed.
    pub fn is_unchanged(&self) -> bool {
        let s = &self.summary;
        s.added + s.removed + s.changed + s.edges_added + s.edges_removed + s.edges_changed == 0
    }
}

/// Snapshot diff engine.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    epsilon: f64,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self {
            epsilon: DIFF_EPSILON,
        }
    }
}

impl DiffEngine {
    /// Create an engine with a custom epsilon.
    pub fn with_epsilon(epsilon: f64) -> Self {
        Self {
            epsilon: epsilon.abs(),
        }
    }

    fn differs(&self, a: f64, b: f64) -> bool {
        (a - b).abs() > self.epsilon
    }

    /// Diff `compare` against `base`.
    pub fn diff(&self, base: &Snapshot, compare: &Snapshot) -> DiffSnapshot {
        let start = Instant::now();

        let base_nodes: BTreeMap<&str, &GraphNode> =
            base.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let compare_nodes: BTreeMap<&str, &GraphNode> =
            compare.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut node_ids: Vec<&str> = base_nodes.keys().chain(compare_nodes.keys()).copied().collect();
        node_ids.sort_unstable();
        node_ids.dedup();

        let mut summary = DiffSummary::default();
        let mut impact_total = 0.0;
        let mut shift_total = 0.0;
        let mut matched = 0usize;

        let node_diffs: Vec<NodeDiff> = node_ids
            .into_iter()
            .map(|id| {
                let diff = self.diff_node(id, base_nodes.get(id).copied(), compare_nodes.get(id).copied());
                match diff.status {
                    DiffStatus::Added => summary.added += 1,
                    DiffStatus::Removed => summary.removed += 1,
                    DiffStatus::Changed => summary.changed += 1,
                    DiffStatus::Stable => summary.stable += 1,
                }
                if matches!(diff.status, DiffStatus::Changed | DiffStatus::Stable) {
                    shift_total += diff.confidence_delta;
                    matched += 1;
                }
                impact_total += diff.impact_delta;
                diff
            })
            .collect();

        let base_edges: BTreeMap<&str, &GraphEdge> =
            base.edges.iter().map(|e| (e.id.as_str(), e)).collect();
        let compare_edges: BTreeMap<&str, &GraphEdge> =
            compare.edges.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut edge_ids: Vec<&str> = base_edges.keys().chain(compare_edges.keys()).copied().collect();
        edge_ids.sort_unstable();
        edge_ids.dedup();

        let edge_diffs: Vec<EdgeDiff> = edge_ids
            .into_iter()
            .filter_map(|id| {
                let diff = self.diff_edge(base_edges.get(id).copied(), compare_edges.get(id).copied())?;
                match diff.status {
                    DiffStatus::Added => summary.edges_added += 1,
                    DiffStatus::Removed => summary.edges_removed += 1,
                    DiffStatus::Changed => summary.edges_changed += 1,
                    DiffStatus::Stable => summary.edges_stable += 1,
                }
                Some(diff)
            })
            .collect();

        summary.net_impact_delta = round_metric(impact_total);
        summary.mean_confidence_shift = if matched == 0 {
            0.0
        } else {
            round_metric(shift_total / matched as f64)
        };

        let build_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            base = %base.scope_key,
            compare = %compare.scope_key,
            added = summary.added,
            removed = summary.removed,
            changed = summary.changed,
            build_ms,
            "Diff built"
        );

        DiffSnapshot {
            base_scope_key: base.scope_key.clone(),
            compare_scope_key: compare.scope_key.clone(),
            node_diffs,
            edge_diffs,
            summary,
            build_ms,
        }
    }

    fn diff_node(&self, id: &str, base: Option<&GraphNode>, compare: Option<&GraphNode>) -> NodeDiff {
        let reference = compare.or(base);
        let impact = |n: Option<&GraphNode>| n.map_or(0.0, |n| n.impact_score);
        let confidence = |n: Option<&GraphNode>| n.map_or(0.0, |n| n.confidence);
        let sample = |n: Option<&GraphNode>| n.map_or(0, |n| n.sample_size as i64);
        let hot = |n: Option<&GraphNode>| n.is_some_and(|n| n.hot);
        let contradicted = |n: Option<&GraphNode>| n.is_some_and(|n| n.contradicted);

        let base_rate = base.and_then(GraphNode::win_rate);
        let compare_rate = compare.and_then(GraphNode::win_rate);
        let win_rate_delta = match (base_rate, compare_rate) {
            (None, None) => None,
            (b, c) => Some(round_metric(c.unwrap_or(0.0) - b.unwrap_or(0.0))),
        };

        let hot_changed = hot(base) != hot(compare);
        let contradicted_changed = contradicted(base) != contradicted(compare);

        let status = match (base, compare) {
            (None, _) => DiffStatus::Added,
            (_, None) => DiffStatus::Removed,
            (Some(b), Some(c)) => {
                let rate_changed = match (base_rate, compare_rate) {
                    (Some(x), Some(y)) => self.differs(x, y),
                    (None, None) => false,
                    _ => true,
                };
                if self.differs(b.impact_score, c.impact_score)
                    || self.differs(b.confidence, c.confidence)
                    || b.sample_size != c.sample_size
                    || rate_changed
                    || hot_changed
                    || contradicted_changed
                {
                    DiffStatus::Changed
                } else {
                    DiffStatus::Stable
                }
            }
        };

        NodeDiff {
            id: id.to_string(),
            node_type: reference.map_or(NodeType::Agent, |n| n.node_type),
            label: reference.map(|n| n.label.clone()).unwrap_or_default(),
            status,
            impact_delta: round_metric(impact(compare) - impact(base)),
            confidence_delta: round_metric(confidence(compare) - confidence(base)),
            sample_delta: sample(compare) - sample(base),
            win_rate_delta,
            hot_changed,
            contradicted_changed,
        }
    }

    fn diff_edge(&self, base: Option<&GraphEdge>, compare: Option<&GraphEdge>) -> Option<EdgeDiff> {
        let reference = compare.or(base)?;
        let weight = |e: Option<&GraphEdge>| e.and_then(|e| e.weight).unwrap_or(0.0);
        let support = |e: Option<&GraphEdge>| e.and_then(|e| e.support_count).unwrap_or(0) as i64;
        let confidence = |e: Option<&GraphEdge>| e.and_then(|e| e.confidence).unwrap_or(0.0);

        let status = match (base, compare) {
            (None, _) => DiffStatus::Added,
            (_, None) => DiffStatus::Removed,
            (Some(b), Some(c)) => {
                let changed = self.differs(weight(base), weight(compare))
                    || b.support_count != c.support_count
                    || self.differs(confidence(base), confidence(compare))
                    || b.weight.is_some() != c.weight.is_some()
                    || b.confidence.is_some() != c.confidence.is_some();
                if changed {
                    DiffStatus::Changed
                } else {
                    DiffStatus::Stable
                }
            }
        };

        Some(EdgeDiff {
            id: reference.id.clone(),
            edge_type: reference.edge_type,
            source: reference.source.clone(),
            target: reference.target.clone(),
            status,
            weight_delta: round_metric(weight(compare) - weight(base)),
            support_delta: support(compare) - support(base),
            confidence_delta: round_metric(confidence(compare) - confidence(base)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Filters;

    fn node(id: &str, impact: f64, confidence: f64, sample: u64) -> GraphNode {
        let mut n = GraphNode::new(id, NodeType::Symbol, id);
        n.impact_score = impact;
        n.confidence = confidence;
        n.sample_size = sample;
        n
    }

    fn snapshot(scope: &str, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Snapshot {
        let mut s = Snapshot::empty(scope, Filters::default());
        s.nodes = nodes;
        s.edges = edges;
        s.refresh_stats();
        s
    }

    #[test]
    fn test_reflexive_diff_is_stable() {
        let s = snapshot(
            "s",
            vec![node("a", 1.0, 0.5, 3), node("b", 2.0, 0.7, 4)],
            vec![GraphEdge::contains("a", "b").with_weight(4.0)],
        );
        let diff = DiffEngine::default().diff(&s, &s);
        assert!(diff.is_unchanged());
        assert_eq!(diff.summary.stable, 2);
        assert_eq!(diff.summary.edges_stable, 1);
        assert_eq!(diff.summary.net_impact_delta, 0.0);
        assert!(diff.node_diffs.iter().all(|d| d.status == DiffStatus::Stable));
    }

    #[test]
    fn test_added_removed_changed() {
        let base = snapshot("base", vec![node("a", 1.0, 0.5, 3), node("gone", 0.5, 0.2, 1)], vec![]);
        let compare = snapshot(
            "compare",
            vec![node("a", 1.5, 0.6, 5), node("new", 0.25, 0.9, 2)],
            vec![GraphEdge::contains("a", "new")],
        );

        let diff = DiffEngine::default().diff(&base, &compare);
        assert_eq!(diff.node_status("a"), Some(DiffStatus::Changed));
        assert_eq!(diff.node_status("gone"), Some(DiffStatus::Removed));
        assert_eq!(diff.node_status("new"), Some(DiffStatus::Added));
        assert_eq!(diff.node_status("missing"), None);
        assert_eq!(diff.summary.edges_added, 1);

        let a = &diff.node_diffs[0];
        assert_eq!(a.id, "a");
        assert_eq!(a.impact_delta, 0.5);
        assert_eq!(a.sample_delta, 2);
        // 0.5 + 0.25 - 0.5
        assert_eq!(diff.summary.net_impact_delta, 0.25);
        assert_eq!(diff.summary.mean_confidence_shift, 0.1);
    }

    #[test]
    fn test_epsilon_absorbs_float_noise() {
        let base = snapshot("s", vec![node("a", 0.3, 0.5, 3)], vec![]);
        let compare = snapshot("s", vec![node("a", 0.1 + 0.2, 0.5, 3)], vec![]);
        let diff = DiffEngine::default().diff(&base, &compare);
        assert_eq!(diff.node_status("a"), Some(DiffStatus::Stable));
    }

    #[test]
    fn test_flag_change_is_a_change() {
        let base = snapshot("s", vec![node("a", 1.0, 0.5, 3)], vec![]);
        let mut flagged = node("a", 1.0, 0.5, 3);
        flagged.contradicted = true;
        let compare = snapshot("s", vec![flagged], vec![]);
        let diff = DiffEngine::default().diff(&base, &compare);
        assert_eq!(diff.node_status("a"), Some(DiffStatus::Changed));
        assert!(diff.node_diffs[0].contradicted_changed);
    }

    #[test]
    fn test_diff_equality_ignores_build_time() {
        let s = snapshot("s", vec![node("a", 1.0, 0.5, 3)], vec![]);
        let engine = DiffEngine::default();
        let mut a = engine.diff(&s, &s);
        let mut b = engine.diff(&s, &s);
        a.build_ms = 1;
        b.build_ms = 9;
        assert_eq!(a, b);
    }
}
