//! Snapshot value type and its lookup index.
//!
//! A `Snapshot` is the unit every downstream consumer works on. It is a plain
//! value: rebuilt wholesale on any input change and never mutated in place.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::edge::{EdgeType, GraphEdge};
use super::filters::Filters;
use super::node::{GraphNode, NodeType};

/// Build counters. Observability only, never an input to behavior.
///
/// `build_ms` is wall-clock timing and is excluded from equality so that two
/// builds of the same scope compare equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotStats {
    /// Number of nodes.
    pub node_count: usize,
    /// Number of edges.
    pub edge_count: usize,
    /// Wall-clock build time.
    pub build_ms: u64,
    /// Number of unresolved conflicts.
    pub conflict_count: usize,
    /// Number of hot nodes.
    pub hot_node_count: usize,
    /// Number of contradicted nodes.
    pub contradicted_node_count: usize,
    /// Number of malformed records skipped.
    pub skipped_records: usize,
}

impl PartialEq for SnapshotStats {
    fn eq(&self, other: &Self) -> bool {
        self.node_count == other.node_count
            && self.edge_count == other.edge_count
            && self.conflict_count == other.conflict_count
            && self.hot_node_count == other.hot_node_count
            && self.contradicted_node_count == other.contradicted_node_count
            && self.skipped_records == other.skipped_records
    }
}

/// A built graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Reference time of the build: the data watermark (unix ms).
    pub built_at_ms: i64,
    /// Deterministic digest of filters, data cursor and build parameters.
    pub scope_key: String,
    /// Filters the snapshot was built with.
    pub filters: Filters,
    /// Nodes in lens order (depth-first, siblings ranked by the lens).
    pub nodes: Vec<GraphNode>,
    /// Edges sorted by id.
    pub edges: Vec<GraphEdge>,
    /// Nodes without a parent, in lens order.
    pub root_node_ids: Vec<String>,
    /// Counters.
    pub stats: SnapshotStats,
}

impl Snapshot {
    /// An empty snapshot for a scope.
    pub fn empty(scope_key: impl Into<String>, filters: Filters) -> Self {
        Self {
            built_at_ms: 0,
            scope_key: scope_key.into(),
            filters,
            nodes: Vec::new(),
            edges: Vec::new(),
            root_node_ids: Vec::new(),
            stats: SnapshotStats::default(),
        }
    }

    /// Whether the snapshot has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Linear lookup of a node by id. Use [`SnapshotIndex`] for repeated lookups.
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Linear lookup of an edge by id.
    pub fn edge(&self, id: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// All nodes of a type, in snapshot order.
    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    /// All edges of a type, in snapshot order.
    pub fn edges_of_type(&self, edge_type: EdgeType) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.edge_type == edge_type)
    }

    /// Recompute the structural counters from the current nodes and edges.
    ///
    /// `build_ms` and `skipped_records` are carried over.
    pub fn refresh_stats(&mut self) {
        self.stats.node_count = self.nodes.len();
        self.stats.edge_count = self.edges.len();
        self.stats.hot_node_count = self.nodes.iter().filter(|n| n.hot).count();
        self.stats.contradicted_node_count = self.nodes.iter().filter(|n| n.contradicted).count();
        self.stats.conflict_count = self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Conflict && n.contradicted)
            .count();
    }

    /// Build a lookup index over this snapshot.
    pub fn index(&self) -> SnapshotIndex<'_> {
        SnapshotIndex::new(self)
    }
}

/// Arena-style index over a snapshot: id → position, parent → children,
/// source → outgoing edges. Built on demand; never stored in nodes.
#[derive(Debug)]
pub struct SnapshotIndex<'a> {
    snapshot: &'a Snapshot,
    by_id: HashMap<&'a str, usize>,
    children: BTreeMap<&'a str, Vec<usize>>,
    outgoing: HashMap<&'a str, Vec<usize>>,
    edge_by_id: HashMap<&'a str, usize>,
}

impl<'a> SnapshotIndex<'a> {
    /// Index a snapshot.
    pub fn new(snapshot: &'a Snapshot) -> Self {
        let mut by_id = HashMap::with_capacity(snapshot.nodes.len());
        let mut children: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, node) in snapshot.nodes.iter().enumerate() {
            by_id.insert(node.id.as_str(), i);
            if let Some(parent) = node.parent_id.as_deref() {
                children.entry(parent).or_default().push(i);
            }
        }

        let mut outgoing: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut edge_by_id = HashMap::with_capacity(snapshot.edges.len());
        for (i, edge) in snapshot.edges.iter().enumerate() {
            outgoing.entry(edge.source.as_str()).or_default().push(i);
            edge_by_id.insert(edge.id.as_str(), i);
        }

        Self {
            snapshot,
            by_id,
            children,
            outgoing,
            edge_by_id,
        }
    }

    /// The indexed snapshot.
    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    /// Node by id.
    pub fn node(&self, id: &str) -> Option<&'a GraphNode> {
        self.by_id.get(id).map(|&i| &self.snapshot.nodes[i])
    }

    /// Edge by id.
    pub fn edge(&self, id: &str) -> Option<&'a GraphEdge> {
        self.edge_by_id.get(id).map(|&i| &self.snapshot.edges[i])
    }

    /// Whether a node exists.
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Children of a node, in snapshot order.
    pub fn children(&self, id: &str) -> Vec<&'a GraphNode> {
        self.children
            .get(id)
            .map(|idx| idx.iter().map(|&i| &self.snapshot.nodes[i]).collect())
            .unwrap_or_default()
    }

    /// Outgoing edges of a node, sorted by edge id.
    pub fn outgoing(&self, id: &str) -> Vec<&'a GraphEdge> {
        self.outgoing
            .get(id)
            .map(|idx| idx.iter().map(|&i| &self.snapshot.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Ancestors of a node, nearest first.
    pub fn ancestors(&self, id: &str) -> Vec<&'a GraphNode> {
        let mut out = Vec::new();
        let mut current = self.node(id).and_then(|n| n.parent_id.as_deref());
        while let Some(parent_id) = current {
            match self.node(parent_id) {
                Some(parent) => {
                    if out.len() > self.snapshot.nodes.len() {
                        break;
                    }
                    out.push(parent);
                    current = parent.parent_id.as_deref();
                }
                None => break,
            }
        }
        out
    }

    /// Depth of a node (roots are depth 0).
    pub fn depth(&self, id: &str) -> usize {
        self.ancestors(id).len()
    }

    /// Ancestor of `id` at `depth`, or the node itself when it is shallower.
    pub fn ancestor_at_depth(&self, id: &str, depth: usize) -> Option<&'a str> {
        let node = self.node(id)?;
        let chain = self.ancestors(id);
        let node_depth = chain.len();
        if node_depth <= depth {
            return Some(node.id.as_str());
        }
        // chain is nearest-first; the ancestor at `depth` sits at index node_depth - depth - 1
        chain.get(node_depth - depth - 1).map(|n| n.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::empty("scope", Filters::default());
        snapshot.nodes = vec![
            GraphNode::new("agent:a", NodeType::Agent, "a"),
            GraphNode::new("symbol:a:X", NodeType::Symbol, "X").with_parent("agent:a"),
            GraphNode::new("pattern:a:X:p", NodeType::Pattern, "p").with_parent("symbol:a:X"),
            GraphNode::new("lesson:1", NodeType::Lesson, "l1").with_parent("pattern:a:X:p"),
        ];
        snapshot.edges = vec![
            GraphEdge::contains("agent:a", "symbol:a:X"),
            GraphEdge::contains("pattern:a:X:p", "lesson:1"),
            GraphEdge::contains("symbol:a:X", "pattern:a:X:p"),
        ];
        snapshot.root_node_ids = vec!["agent:a".to_string()];
        snapshot.refresh_stats();
        snapshot
    }

    #[test]
    fn test_index_lookup() {
        let snapshot = make_snapshot();
        let index = snapshot.index();
        assert!(index.contains("lesson:1"));
        assert_eq!(index.children("symbol:a:X").len(), 1);
        assert_eq!(index.outgoing("agent:a").len(), 1);
        assert_eq!(index.depth("lesson:1"), 3);
        assert_eq!(index.depth("agent:a"), 0);
    }

    #[test]
    fn test_ancestor_at_depth() {
        let snapshot = make_snapshot();
        let index = snapshot.index();
        assert_eq!(index.ancestor_at_depth("lesson:1", 1), Some("symbol:a:X"));
        assert_eq!(index.ancestor_at_depth("lesson:1", 0), Some("agent:a"));
        assert_eq!(index.ancestor_at_depth("symbol:a:X", 2), Some("symbol:a:X"));
        assert_eq!(index.ancestor_at_depth("missing", 1), None);
    }

    #[test]
    fn test_stats_equality_ignores_build_time() {
        let mut a = make_snapshot();
        let mut b = make_snapshot();
        a.stats.build_ms = 3;
        b.stats.build_ms = 17;
        assert_eq!(a, b);
        assert_eq!(a.stats.node_count, 4);
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let snapshot = make_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
        assert!(json.contains("\"rootNodeIds\""));
    }
}
