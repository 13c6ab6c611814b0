//! Relevance scoring for goal routing.
//!
//! Formula:
//! ```text
//! relevance = |goal tokens ∩ node tokens| / |goal tokens|
//! seed      = relevance * (1 + impact * confidence * recency)
//! hop       = edge_confidence * (1 + relevance(target))
//! ```

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::Value;

use crate::types::GraphNode;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "for", "from", "how", "i", "in", "into",
    "is", "it", "me", "my", "of", "on", "or", "should", "so", "the", "to", "what", "when", "which",
    "with", "want", "we", "you",
];

fn token_pattern() -> Option<&'static Regex> {
    static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"[a-z0-9]+").ok()).as_ref()
}

/// Lower-case alphanumeric tokens with stop words removed.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    let Some(re) = token_pattern() else {
        return BTreeSet::new();
    };
    re.find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Searchable tokens of a node: label, string metadata, evidence ids.
pub fn node_tokens(node: &GraphNode) -> BTreeSet<String> {
    let mut tokens = tokenize(&node.label);
    for value in node.meta.values() {
        if let Value::String(text) = value {
            tokens.extend(tokenize(text));
        }
    }
    for case_id in &node.evidence_case_ids {
        tokens.extend(tokenize(case_id));
    }
    tokens
}

/// Fraction of goal tokens present on the node.
pub fn relevance(goal: &BTreeSet<String>, node: &GraphNode) -> f64 {
    if goal.is_empty() {
        return 0.0;
    }
    let tokens = node_tokens(node);
    let hits = goal.iter().filter(|t| tokens.contains(*t)).count();
    hits as f64 / goal.len() as f64
}

/// Seed score. Monotonic in relevance, impact and confidence.
pub fn seed_score(relevance: f64, node: &GraphNode, recency: f64) -> f64 {
    relevance * (1.0 + node.impact_score.max(0.0) * node.confidence.max(0.0) * recency)
}

/// Hop score for moving to `target` over an edge.
pub fn hop_score(edge_confidence: f64, target_relevance: f64) -> f64 {
    edge_confidence * (1.0 + target_relevance)
}

/// A candidate seed node.
#[derive(Debug, Clone)]
pub struct SeedCandidate<'a> {
    /// Node.
    pub node: &'a GraphNode,
    /// Seed score.
    pub score: f64,
}

impl PartialEq for SeedCandidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SeedCandidate<'_> {}

impl PartialOrd for SeedCandidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeedCandidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Greater is better: higher score, then larger sample, then smaller id
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.node.sample_size.cmp(&other.node.sample_size))
            .then_with(|| other.node.id.cmp(&self.node.id))
    }
}

/// A candidate next hop.
#[derive(Debug, Clone)]
pub struct HopCandidate<'a> {
    /// Target node.
    pub node: &'a GraphNode,
    /// Edge id.
    pub edge_id: &'a str,
    /// Edge confidence used for the hop.
    pub edge_confidence: f64,
    /// Support count of the edge.
    pub support_count: u64,
    /// Hop score.
    pub score: f64,
}

impl PartialEq for HopCandidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HopCandidate<'_> {}

impl PartialOrd for HopCandidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HopCandidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Greater is better: higher score, then higher support, then smaller
        // node id, then smaller edge id
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.support_count.cmp(&other.support_count))
            .then_with(|| other.node.id.cmp(&self.node.id))
            .then_with(|| other.edge_id.cmp(self.edge_id))
    }
}
