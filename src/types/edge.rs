//! Edge types for the lesson graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::node::Meta;

/// Type of edge in the lesson graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Parent/child link mirroring the forest.
    Contains,
    /// Evidence group backing a lesson.
    Supports,
    /// Goal drawing on a lesson.
    LearnsFrom,
    /// Two lessons in tension (undirected, stored with sorted endpoints).
    Conflicts,
    /// Winner overriding loser under a resolution policy.
    OverridesWhen,
    /// Same pattern observed on two symbols.
    CoOccurs,
}

impl EdgeType {
    /// Parse edge type from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "contains" => Some(Self::Contains),
            "supports" => Some(Self::Supports),
            "learns_from" => Some(Self::LearnsFrom),
            "conflicts" => Some(Self::Conflicts),
            "overrides_when" => Some(Self::OverridesWhen),
            "co_occurs" => Some(Self::CoOccurs),
            _ => None,
        }
    }

    /// Whether the edge is a cross-link rather than part of the forest.
    pub fn is_cross_link(&self) -> bool {
        !matches!(self, Self::Contains)
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contains => write!(f, "contains"),
            Self::Supports => write!(f, "supports"),
            Self::LearnsFrom => write!(f, "learns_from"),
            Self::Conflicts => write!(f, "conflicts"),
            Self::OverridesWhen => write!(f, "overrides_when"),
            Self::CoOccurs => write!(f, "co_occurs"),
        }
    }
}

/// Edge in the lesson graph.
///
/// The id is derived from (type, source, target), so the same link always
/// gets the same id. Implements `Ord` by id for canonical edge ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Deterministic edge id.
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Edge type.
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Render/selection weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Number of supporting cases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_count: Option<u64>,
    /// Confidence in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Extra attributes (conflict reason, policy condition, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

impl GraphEdge {
    /// Create a new edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>, edge_type: EdgeType) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: edge_id(edge_type, &source, &target),
            source,
            target,
            edge_type,
            weight: None,
            support_count: None,
            confidence: None,
            meta: Meta::new(),
        }
    }

    /// Create a `contains` edge from parent to child.
    pub fn contains(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self::new(parent, child, EdgeType::Contains)
    }

    /// Create a `conflicts` edge with endpoints in canonical order.
    pub fn conflict(a: impl Into<String>, b: impl Into<String>) -> Self {
        let a = a.into();
        let b = b.into();
        if a <= b {
            Self::new(a, b, EdgeType::Conflicts)
        } else {
            Self::new(b, a, EdgeType::Conflicts)
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set the support count.
    pub fn with_support(mut self, support_count: u64) -> Self {
        self.support_count = Some(support_count);
        self
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Whether the edge touches a node.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }

    /// The endpoint opposite `node_id`, if the edge touches it.
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.source == node_id {
            Some(&self.target)
        } else if self.target == node_id {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// Deterministic edge id.
pub fn edge_id(edge_type: EdgeType, source: &str, target: &str) -> String {
    format!("{edge_type}:{source}->{target}")
}

/// Canonical edge order: by id, which embeds type, source and target.
///
/// Stable, so among edges sharing an id the earlier one stays first.
pub fn sort_edges(edges: &mut [GraphEdge]) {
    edges.sort_by(|a, b| a.id.cmp(&b.id));
}
