//! Node types for the lesson graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Free-form node/edge metadata. Ordered so it hashes and serializes stably.
pub type Meta = BTreeMap<String, Value>;

/// Type of node in the lesson graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Trading agent (forest root).
    Agent,
    /// Traded symbol.
    Symbol,
    /// Pattern or grouping bucket (failure tag, strategy, broker).
    Pattern,
    /// Learned lesson.
    Lesson,
    /// Goal declared in a symbol learning.
    Goal,
    /// A pair of lessons in tension.
    Conflict,
}

impl NodeType {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Symbol => "symbol",
            Self::Pattern => "pattern",
            Self::Lesson => "lesson",
            Self::Goal => "goal",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in a snapshot.
///
/// Derived fields (`impact_score`, `hot`, `contradicted`) are pure functions
/// of the records scoped to the node and are recomputed on every build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique id within the snapshot.
    pub id: String,
    /// Node type.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Display label.
    pub label: String,
    /// Parent in the forest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Agent the node belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_key: Option<String>,
    /// Confidence-weighted impact.
    pub impact_score: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Number of cases behind the node.
    pub sample_size: u64,
    /// Most recent activity (unix ms).
    pub last_seen_at_ms: i64,
    /// Recent activity over the hot threshold.
    pub hot: bool,
    /// Participates in an unresolved conflict.
    pub contradicted: bool,
    /// Supporting case ids (sorted).
    #[serde(default)]
    pub evidence_case_ids: Vec<String>,
    /// Extra attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

impl GraphNode {
    /// Create a node with zeroed metrics.
    pub fn new(id: impl Into<String>, node_type: NodeType, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: label.into(),
            parent_id: None,
            agent_key: None,
            impact_score: 0.0,
            confidence: 0.0,
            sample_size: 0,
            last_seen_at_ms: 0,
            hot: false,
            contradicted: false,
            evidence_case_ids: Vec::new(),
            meta: Meta::new(),
        }
    }

    /// Set the parent.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the agent key.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent_key = Some(agent.into());
        self
    }

    /// Read a string metadata entry.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    /// Read a numeric metadata entry.
    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.meta.get(key).and_then(Value::as_f64)
    }

    /// Win rate stored by the builder, if the node has decided cases.
    pub fn win_rate(&self) -> Option<f64> {
        self.meta_f64("winRate")
    }
}

/// Node id helpers. Ids never depend on the lens for nodes that represent
/// the same record set.
pub mod ids {
    /// Agent node id.
    pub fn agent(agent: &str) -> String {
        format!("agent:{agent}")
    }

    /// Symbol node id.
    pub fn symbol(agent: &str, symbol: &str) -> String {
        format!("symbol:{agent}:{symbol}")
    }

    /// Pattern node id (pattern within a symbol).
    pub fn pattern(agent: &str, symbol: &str, pattern: &str) -> String {
        format!("pattern:{agent}:{symbol}:{pattern}")
    }

    /// Failure-tag group id.
    pub fn failure(agent: &str, tag: &str) -> String {
        format!("failure:{agent}:{tag}")
    }

    /// Strategy group id.
    pub fn strategy(agent: &str, strategy: &str) -> String {
        format!("strategy:{agent}:{strategy}")
    }

    /// Broker group id (broker within a strategy).
    pub fn broker(agent: &str, strategy: &str, broker: &str) -> String {
        format!("broker:{agent}:{strategy}:{broker}")
    }

    /// Lesson node id.
    pub fn lesson(lesson_id: &str) -> String {
        format!("lesson:{lesson_id}")
    }

    /// Goal node id.
    pub fn goal(agent: &str, symbol: &str, goal: &str) -> String {
        format!("goal:{agent}:{symbol}:{}", slug(goal))
    }

    /// Conflict node id for a conflict id.
    pub fn conflict(conflict_id: &str) -> String {
        format!("node:{conflict_id}")
    }

    /// Lower-case, alphanumeric runs joined by `-`.
    pub fn slug(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut dash = false;
        for ch in text.chars() {
            if ch.is_alphanumeric() {
                out.extend(ch.to_lowercase());
                dash = false;
            } else if !dash && !out.is_empty() {
                out.push('-');
                dash = true;
            }
        }
        while out.ends_with('-') {
            out.pop();
        }
        out
    }
}
