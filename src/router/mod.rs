//! Goal-directed path routing.
//!
//! ## Algorithm
//!
//! 1. Tokenize the goal text; empty goal → no route
//! 2. Score every node; the best node at or above the relevance floor seeds
//!    the path
//! 3. Greedily follow outgoing `supports`, `learns_from` and `contains`
//!    edges to unvisited nodes that pass the confidence floors
//! 4. Stop when no hop qualifies or the step budget is spent
//!
//! Routing reads the full snapshot. Edge bundling does not affect it.

pub mod scoring;

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::builder::metrics::recency_weight;
use crate::builder::DEFAULT_HOT_HALF_LIFE_MS;
use crate::canonical::round_metric;
use crate::types::{EdgeType, Snapshot, SnapshotIndex};

use scoring::{hop_score, relevance, seed_score, tokenize, HopCandidate, SeedCandidate};

/// Default number of nodes on a route.
pub const DEFAULT_MAX_STEPS: usize = 6;

/// Default minimum seed relevance.
pub const DEFAULT_MIN_RELEVANCE: f64 = 0.15;

/// Router coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterParams {
    /// Maximum number of nodes on a route.
    pub max_steps: usize,
    /// Seeds below this relevance are ignored.
    pub min_relevance: f64,
    /// Hops over edges below this confidence are ignored.
    pub min_edge_confidence: f64,
    /// Half-life for the recency term of the seed score.
    pub recency_half_life_ms: i64,
}

impl Default for RouterParams {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            min_relevance: DEFAULT_MIN_RELEVANCE,
            min_edge_confidence: 0.0,
            recency_half_life_ms: DEFAULT_HOT_HALF_LIFE_MS,
        }
    }
}

/// Aggregate figures for a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSummary {
    /// Number of nodes on the route.
    pub step_count: usize,
    /// Weakest edge confidence (seed confidence for a single node).
    pub confidence: f64,
    /// Sum of node sample sizes.
    pub sample_size: u64,
    /// Sum of node impact scores.
    pub estimated_impact: f64,
}

/// A route with its highlight sets. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    /// Goal text as given.
    pub goal: String,
    /// Nodes in walk order.
    pub highlighted_node_ids: Vec<String>,
    /// Traversed edges in walk order.
    pub highlighted_edge_ids: Vec<String>,
    /// Summary.
    pub summary: PathSummary,
}

/// Deterministic greedy router.
#[derive(Debug, Clone, Default)]
pub struct PathRouter {
    params: RouterParams,
}

fn is_walkable(edge_type: EdgeType) -> bool {
    matches!(
        edge_type,
        EdgeType::Supports | EdgeType::LearnsFrom | EdgeType::Contains
    )
}

impl PathRouter {
    /// Create a router.
    pub fn new(params: RouterParams) -> Self {
        Self { params }
    }

    /// The router's parameters.
    pub fn params(&self) -> &RouterParams {
        &self.params
    }

    /// Route a goal through a snapshot.
    ///
    /// Returns `None` for an empty goal or when no node reaches the
    /// relevance floor; callers clear any active highlight in that case.
    pub fn route(&self, snapshot: &Snapshot, goal: &str) -> Option<RouteResult> {
        let goal_tokens = tokenize(goal);
        if goal_tokens.is_empty() || self.params.max_steps == 0 {
            return None;
        }
        let index = snapshot.index();
        let seed = self.pick_seed(snapshot, &goal_tokens)?;

        let filters = snapshot.filters.normalized();
        let edge_floor = filters.confidence_min.max(self.params.min_edge_confidence);

        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(seed.node.id.as_str());
        let mut nodes = vec![seed.node];
        let mut edge_ids: Vec<String> = Vec::new();
        let mut weakest: Option<f64> = None;

        let mut current = seed.node;
        while nodes.len() < self.params.max_steps {
            let next = self.best_hop(&index, current.id.as_str(), &visited, &goal_tokens, edge_floor, filters.confidence_min);
            let Some(hop) = next else {
                break;
            };
            visited.insert(hop.node.id.as_str());
            weakest = Some(weakest.map_or(hop.edge_confidence, |w: f64| w.min(hop.edge_confidence)));
            edge_ids.push(hop.edge_id.to_string());
            nodes.push(hop.node);
            current = hop.node;
        }

        let summary = PathSummary {
            step_count: nodes.len(),
            confidence: round_metric(weakest.unwrap_or(seed.node.confidence)),
            sample_size: nodes.iter().map(|n| n.sample_size).sum(),
            estimated_impact: round_metric(nodes.iter().map(|n| n.impact_score).sum()),
        };

        tracing::debug!(
            seed = %seed.node.id,
            steps = summary.step_count,
            confidence = summary.confidence,
            "Route computed"
        );

        Some(RouteResult {
            goal: goal.to_string(),
            highlighted_node_ids: nodes.iter().map(|n| n.id.clone()).collect(),
            highlighted_edge_ids: edge_ids,
            summary,
        })
    }

    fn pick_seed<'a>(&self, snapshot: &'a Snapshot, goal: &BTreeSet<String>) -> Option<SeedCandidate<'a>> {
        let agent = snapshot.filters.normalized().agent_id;
        snapshot
            .nodes
            .iter()
            .filter(|n| match &agent {
                Some(agent) => n.agent_key.as_deref() == Some(agent.as_str()),
                None => true,
            })
            .filter_map(|node| {
                let rel = relevance(goal, node);
                if rel < self.params.min_relevance || rel == 0.0 {
                    return None;
                }
                let recency = recency_weight(
                    node.last_seen_at_ms,
                    snapshot.built_at_ms,
                    self.params.recency_half_life_ms,
                );
                Some(SeedCandidate {
                    node,
                    score: seed_score(rel, node, recency),
                })
            })
            .max()
    }

    fn best_hop<'a>(
        &self,
        index: &SnapshotIndex<'a>,
        from: &str,
        visited: &HashSet<&str>,
        goal: &BTreeSet<String>,
        edge_floor: f64,
        node_floor: f64,
    ) -> Option<HopCandidate<'a>> {
        index
            .outgoing(from)
            .into_iter()
            .filter(|edge| is_walkable(edge.edge_type))
            .filter(|edge| !visited.contains(edge.target.as_str()))
            .filter_map(|edge| {
                let target = index.node(&edge.target)?;
                let edge_confidence = edge.confidence.unwrap_or(target.confidence);
                if edge_confidence < edge_floor || target.confidence < node_floor {
                    return None;
                }
                Some(HopCandidate {
                    node: target,
                    edge_id: edge.id.as_str(),
                    edge_confidence,
                    support_count: edge.support_count.unwrap_or(0),
                    score: hop_score(edge_confidence, relevance(goal, target)),
                })
            })
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Filters, GraphEdge, GraphNode, NodeType};

    fn pattern_and_lesson() -> Snapshot {
        let mut pattern = GraphNode::new("pattern:a1:XAUUSD:breakout", NodeType::Pattern, "breakout")
            .with_agent("a1");
        pattern.impact_score = 1.25;
        pattern.confidence = 0.7;
        pattern.sample_size = 10;
        let mut lesson = GraphNode::new("lesson:L1", NodeType::Lesson, "Wait for the retest")
            .with_parent(pattern.id.clone())
            .with_agent("a1");
        lesson.impact_score = 0.5;
        lesson.confidence = 0.9;
        lesson.sample_size = 4;

        let mut s = Snapshot::empty("scope", Filters::default());
        s.edges = vec![GraphEdge::new(pattern.id.clone(), lesson.id.clone(), EdgeType::Supports)
            .with_support(4)
            .with_confidence(0.9)];
        s.root_node_ids = vec![pattern.id.clone()];
        s.nodes = vec![pattern, lesson];
        s.refresh_stats();
        s
    }

    #[test]
    fn test_no_match_returns_none() {
        let router = PathRouter::default();
        assert!(router.route(&pattern_and_lesson(), "bitcoin funding").is_none());
        assert!(router.route(&pattern_and_lesson(), "").is_none());
        assert!(router.route(&pattern_and_lesson(), "the of and").is_none());
    }

    #[test]
    fn test_two_step_route() {
        let route = PathRouter::default()
            .route(&pattern_and_lesson(), "breakout")
            .unwrap();
        assert_eq!(route.highlighted_node_ids, vec!["pattern:a1:XAUUSD:breakout", "lesson:L1"]);
        assert_eq!(route.highlighted_edge_ids.len(), 1);
        assert_eq!(route.summary.step_count, 2);
        assert_eq!(route.summary.estimated_impact, 1.75);
        assert_eq!(route.summary.confidence, 0.9);
        assert_eq!(route.summary.sample_size, 14);
    }

    #[test]
    fn test_step_budget() {
        let router = PathRouter::new(RouterParams {
            max_steps: 1,
            ..RouterParams::default()
        });
        let route = router.route(&pattern_and_lesson(), "breakout").unwrap();
        assert_eq!(route.summary.step_count, 1);
        assert_eq!(route.summary.confidence, 0.7);
    }

    #[test]
    fn test_agent_filter_restricts_seeds() {
        let mut s = pattern_and_lesson();
        s.filters.agent_id = Some("a2".into());
        assert!(PathRouter::default().route(&s, "breakout").is_none());
    }

    #[test]
    fn test_edge_floor_blocks_hop() {
        let mut s = pattern_and_lesson();
        s.filters.confidence_min = 0.95;
        let route = PathRouter::default().route(&s, "breakout").unwrap();
        assert_eq!(route.summary.step_count, 1);
    }
}
