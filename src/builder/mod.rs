//! Graph builder: records + filters → snapshot.
//!
//! ## Pipeline
//!
//! 1. Normalize records (trim keys, upper-case symbols), skip malformed ones
//! 2. Apply record filters (agent, strategy, broker, lesson lifecycle)
//! 3. Place records on lens paths and derive node metrics
//! 4. Prune nodes below `confidenceMin`, re-parenting their children
//! 5. Detect conflicts and add conflict nodes
//! 6. Apply focus mode
//! 7. Add `contains` and cross-link edges, drop dangling edges
//! 8. Order nodes depth-first with lens sibling order
//!
//! The build is a pure function of its input. The reference time for
//! recency is the data watermark, never the wall clock.

mod forest;
mod lens;
mod links;
pub mod metrics;
pub mod params;
pub mod scope;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::types::{
    CaseRecord, Filters, FocusMode, GraphNode, LessonRecord, Lens, NodeType, RecordSet, Snapshot,
    SnapshotStats, SymbolLearning,
};

pub use lens::{infer_failure_tag, UNASSIGNED, UNCLASSIFIED};
pub use links::{REASON_EXPLICIT, REASON_STANCE};
pub use params::{BuildParams, DEFAULT_HOT_HALF_LIFE_MS};
pub use scope::{scope_key, DataCursor};

/// Builder input contract: records already restricted to a timeline window,
/// plus filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildInput {
    /// Case records.
    pub cases: Vec<CaseRecord>,
    /// Lesson records.
    pub lessons: Vec<LessonRecord>,
    /// Per-symbol learning summaries.
    pub symbol_learnings: Vec<SymbolLearning>,
    /// Build filters.
    pub filters: Filters,
}

impl BuildInput {
    /// Combine a record set with filters.
    pub fn new(records: RecordSet, filters: Filters) -> Self {
        Self {
            cases: records.cases,
            lessons: records.lessons,
            symbol_learnings: records.symbol_learnings,
            filters,
        }
    }

    /// Same records, scoped to another agent. Used for agent-shifted diffs.
    pub fn for_agent(&self, agent_id: impl Into<String>) -> Self {
        let mut input = self.clone();
        input.filters.agent_id = Some(agent_id.into());
        input
    }

    /// Same records with different filters.
    pub fn with_filters(&self, filters: Filters) -> Self {
        let mut input = self.clone();
        input.filters = filters;
        input
    }

    /// Whether there are no records at all.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty() && self.lessons.is_empty() && self.symbol_learnings.is_empty()
    }

    /// Data cursor over the raw records.
    pub fn cursor(&self) -> DataCursor {
        DataCursor::compute(&self.cases, &self.lessons, &self.symbol_learnings)
    }
}

/// Deterministic snapshot builder.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    params: BuildParams,
}

impl GraphBuilder {
    /// Create a builder with the given parameters.
    pub fn new(params: BuildParams) -> Self {
        Self { params }
    }

    /// The builder's parameters.
    pub fn params(&self) -> &BuildParams {
        &self.params
    }

    /// Scope key the builder would assign to `input`.
    pub fn scope_key(&self, input: &BuildInput) -> String {
        scope_key(&input.filters, &input.cursor(), &self.params)
    }

    /// Build a snapshot.
    ///
    /// Never fails: malformed records are skipped and counted in
    /// `stats.skipped_records`, empty input yields an empty snapshot.
    pub fn build(&self, input: &BuildInput) -> Snapshot {
        let start = Instant::now();
        let filters = input.filters.normalized();
        let cursor = input.cursor();
        let scope_key = scope_key(&filters, &cursor, &self.params);

        if input.is_empty() {
            tracing::debug!(scope_key = %scope_key, "Empty input, returning empty snapshot");
            return Snapshot::empty(scope_key, filters);
        }

        let reference_ms = cursor.watermark_ms;
        let normalized = forest::normalize(input, &filters);
        let mut forest = forest::grow(&normalized, filters.lens, &self.params, reference_ms);

        prune(&mut forest.nodes, filters.confidence_min);

        let conflicts = links::detect_conflicts(&normalized, &forest.nodes);
        let mut edges = links::apply_conflicts(&mut forest.nodes, &conflicts, &self.params);

        apply_focus(&mut forest.nodes, filters.focus);

        edges.extend(links::contains_edges(
            &forest.nodes,
            filters.lens,
            reference_ms,
            &self.params,
        ));
        edges.extend(links::supports_edges(&normalized, &forest.nodes));
        edges.extend(links::learns_from_edges(&normalized, &forest));
        edges.extend(links::co_occurs_edges(&forest));

        // Endpoints must exist; pruning and focus may have removed some
        edges.retain(|e| forest.nodes.contains_key(&e.source) && forest.nodes.contains_key(&e.target));
        crate::types::edge::sort_edges(&mut edges);
        edges.dedup_by(|a, b| a.id == b.id);

        let skipped = normalized.skipped;
        let (nodes, root_node_ids) = order_nodes(forest.nodes, filters.lens);

        let mut snapshot = Snapshot {
            built_at_ms: reference_ms,
            scope_key,
            filters,
            nodes,
            edges,
            root_node_ids,
            stats: SnapshotStats {
                skipped_records: skipped,
                ..SnapshotStats::default()
            },
        };
        snapshot.refresh_stats();
        snapshot.stats.build_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            scope_key = %snapshot.scope_key,
            lens = %snapshot.filters.lens,
            nodes = snapshot.stats.node_count,
            edges = snapshot.stats.edge_count,
            conflicts = snapshot.stats.conflict_count,
            skipped = snapshot.stats.skipped_records,
            build_ms = snapshot.stats.build_ms,
            "Snapshot built"
        );
        snapshot
    }
}

fn is_prunable(node_type: NodeType) -> bool {
    matches!(
        node_type,
        NodeType::Symbol | NodeType::Pattern | NodeType::Lesson | NodeType::Goal
    )
}

/// Remove nodes below the confidence floor. Children move up to the nearest
/// surviving ancestor.
fn prune(nodes: &mut BTreeMap<String, GraphNode>, floor: f64) {
    if floor <= 0.0 {
        return;
    }
    let removed: HashSet<String> = nodes
        .values()
        .filter(|n| is_prunable(n.node_type) && n.confidence < floor)
        .map(|n| n.id.clone())
        .collect();
    if removed.is_empty() {
        return;
    }

    let parents: HashMap<String, Option<String>> = nodes
        .iter()
        .map(|(id, n)| (id.clone(), n.parent_id.clone()))
        .collect();
    nodes.retain(|id, _| !removed.contains(id));

    for node in nodes.values_mut() {
        let mut parent = node.parent_id.take();
        while let Some(p) = parent.as_ref().filter(|p| removed.contains(*p)) {
            parent = parents.get(p).cloned().flatten();
        }
        node.parent_id = parent;
    }
    tracing::debug!(pruned = removed.len(), floor, "Pruned nodes below confidence floor");
}

/// Keep only hot or contradicted nodes plus their ancestors.
fn apply_focus(nodes: &mut BTreeMap<String, GraphNode>, focus: FocusMode) {
    let seeds: Vec<String> = match focus {
        FocusMode::Off => return,
        FocusMode::Hot => nodes.values().filter(|n| n.hot).map(|n| n.id.clone()).collect(),
        FocusMode::Conflicts => nodes
            .values()
            .filter(|n| n.contradicted)
            .map(|n| n.id.clone())
            .collect(),
    };

    let mut keep: HashSet<String> = HashSet::new();
    for seed in seeds {
        let mut current = Some(seed);
        while let Some(id) = current {
            if !keep.insert(id.clone()) {
                break;
            }
            current = nodes.get(&id).and_then(|n| n.parent_id.clone());
        }
    }
    nodes.retain(|id, _| keep.contains(id));
}

/// Depth-first order with lens sibling order. Returns nodes and root ids.
fn order_nodes(nodes: BTreeMap<String, GraphNode>, lens: Lens) -> (Vec<GraphNode>, Vec<String>) {
    let total = nodes.len();
    let present: HashSet<String> = nodes.keys().cloned().collect();
    let mut roots: Vec<GraphNode> = Vec::new();
    let mut children: HashMap<String, Vec<GraphNode>> = HashMap::new();

    for mut node in nodes.into_values() {
        match node.parent_id.clone() {
            Some(parent) if present.contains(&parent) => {
                children.entry(parent).or_default().push(node);
            }
            _ => {
                node.parent_id = None;
                roots.push(node);
            }
        }
    }

    roots.sort_by(|a, b| lens::sibling_order(lens, a, b));
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| lens::sibling_order(lens, a, b));
    }
    let root_node_ids: Vec<String> = roots.iter().map(|n| n.id.clone()).collect();

    let mut ordered = Vec::with_capacity(total);
    let mut stack: Vec<GraphNode> = roots.into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        if let Some(kids) = children.remove(&node.id) {
            stack.extend(kids.into_iter().rev());
        }
        ordered.push(node);
    }
    (ordered, root_node_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeType, LessonState, Outcome, Stance};

    const HOUR: i64 = 60 * 60 * 1000;

    fn case(id: &str, symbol: &str, pattern: Option<&str>, outcome: Outcome, ts: i64) -> CaseRecord {
        CaseRecord {
            id: id.to_string(),
            agent_id: Some("a1".to_string()),
            symbol: Some(symbol.to_string()),
            pattern: pattern.map(str::to_string),
            outcome,
            opened_at_ms: ts,
            ..Default::default()
        }
    }

    fn lesson(id: &str, symbol: &str, pattern: Option<&str>, confidence: f64) -> LessonRecord {
        LessonRecord {
            id: id.to_string(),
            agent_id: Some("a1".to_string()),
            symbol: Some(symbol.to_string()),
            pattern: pattern.map(str::to_string),
            title: format!("Lesson {id}"),
            confidence,
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
            ..Default::default()
        }
    }

    fn sample_input() -> BuildInput {
        let mut cases = Vec::new();
        for i in 0..6 {
            let outcome = if i % 3 == 0 { Outcome::Loss } else { Outcome::Win };
            cases.push(case(&format!("c{i}"), "xauusd", Some("breakout"), outcome, i * HOUR));
        }
        cases.push(case("c9", "EURUSD", Some("breakout"), Outcome::Win, 10 * HOUR));

        let mut favor = lesson("L1", "XAUUSD", Some("breakout"), 0.8);
        favor.stance = Some(Stance::Favor);
        favor.evidence_case_ids = vec!["c1".into(), "c2".into(), "missing".into()];
        let mut avoid = lesson("L2", "XAUUSD", Some("breakout"), 0.6);
        avoid.stance = Some(Stance::Avoid);

        let learning = SymbolLearning {
            agent_id: Some("a1".into()),
            symbol: Some("XAUUSD".into()),
            confidence: 0.9,
            sample_size: 40,
            goals: vec!["Cut losers early".into()],
            updated_at_ms: 2_000,
            ..Default::default()
        };

        BuildInput {
            cases,
            lessons: vec![favor, avoid],
            symbol_learnings: vec![learning],
            filters: Filters::default(),
        }
    }

    fn assert_structural_invariants(snapshot: &Snapshot) {
        let ids: HashSet<&str> = snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), snapshot.nodes.len(), "node ids are unique");
        for edge in &snapshot.edges {
            assert!(ids.contains(edge.source.as_str()), "dangling source {}", edge.id);
            assert!(ids.contains(edge.target.as_str()), "dangling target {}", edge.id);
        }
        for root in &snapshot.root_node_ids {
            assert!(snapshot.node(root).is_some_and(|n| n.parent_id.is_none()));
        }
        for node in &snapshot.nodes {
            if let Some(parent) = &node.parent_id {
                assert!(ids.contains(parent.as_str()));
            }
        }
    }

    #[test]
    fn test_empty_input() {
        let snapshot = GraphBuilder::default().build(&BuildInput::default());
        assert!(snapshot.is_empty());
        assert!(snapshot.edges.is_empty());
        assert!(snapshot.scope_key.starts_with("scope:"));
    }

    #[test]
    fn test_hierarchy_build() {
        let snapshot = GraphBuilder::default().build(&sample_input());
        assert_structural_invariants(&snapshot);

        let symbol = snapshot.node("symbol:a1:XAUUSD").unwrap();
        assert_eq!(symbol.sample_size, 6);
        assert_eq!(symbol.confidence, 0.9);
        assert_eq!(symbol.parent_id.as_deref(), Some("agent:a1"));

        let pattern = snapshot.node("pattern:a1:XAUUSD:breakout").unwrap();
        assert_eq!(pattern.sample_size, 6);
        assert_eq!(pattern.win_rate(), Some(0.666667));

        let l1 = snapshot.node("lesson:L1").unwrap();
        assert_eq!(l1.parent_id.as_deref(), Some("pattern:a1:XAUUSD:breakout"));
        assert_eq!(l1.sample_size, 2);
        assert!(l1.contradicted);

        assert_eq!(snapshot.root_node_ids, vec!["agent:a1".to_string()]);
        assert_eq!(snapshot.nodes[0].id, "agent:a1");
        assert_eq!(snapshot.built_at_ms, 10 * HOUR);
    }

    #[test]
    fn test_cross_links() {
        let snapshot = GraphBuilder::default().build(&sample_input());

        let supports: Vec<_> = snapshot.edges_of_type(EdgeType::Supports).collect();
        assert_eq!(supports.len(), 1);
        assert_eq!(supports[0].source, "pattern:a1:XAUUSD:breakout");
        assert_eq!(supports[0].support_count, Some(2));

        assert_eq!(snapshot.edges_of_type(EdgeType::LearnsFrom).count(), 2);
        assert_eq!(snapshot.edges_of_type(EdgeType::CoOccurs).count(), 1);
        assert_eq!(snapshot.edges_of_type(EdgeType::Conflicts).count(), 1);

        let conflict = snapshot.nodes_of_type(NodeType::Conflict).next().unwrap();
        assert_eq!(conflict.parent_id.as_deref(), Some("pattern:a1:XAUUSD:breakout"));
        assert_eq!(conflict.meta_str("reason"), Some(REASON_STANCE));
        assert_eq!(snapshot.stats.conflict_count, 1);
    }

    #[test]
    fn test_edges_sorted_by_id() {
        let snapshot = GraphBuilder::default().build(&sample_input());
        let ids: Vec<&str> = snapshot.edges.iter().map(|e| e.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_determinism_and_input_order() {
        let builder = GraphBuilder::default();
        let input = sample_input();
        let mut shuffled = input.clone();
        shuffled.cases.reverse();
        shuffled.lessons.reverse();

        let a = builder.build(&input);
        let b = builder.build(&input);
        let c = builder.build(&shuffled);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_malformed_records_skipped() {
        let mut input = sample_input();
        input.cases.push(CaseRecord {
            id: "bad".into(),
            agent_id: Some("a1".into()),
            symbol: Some("  ".into()),
            ..Default::default()
        });
        input.cases.push(case("c1", "XAUUSD", None, Outcome::Win, 0));
        input.lessons.push(LessonRecord::default());

        let snapshot = GraphBuilder::default().build(&input);
        assert_eq!(snapshot.stats.skipped_records, 3);
        assert_eq!(snapshot.node("symbol:a1:XAUUSD").unwrap().sample_size, 6);
    }

    #[test]
    fn test_duplicate_ids_keep_latest_in_any_order() {
        let builder = GraphBuilder::default();
        let win = case("c1", "XAUUSD", Some("breakout"), Outcome::Win, HOUR);
        let loss = case("c1", "XAUUSD", Some("breakout"), Outcome::Loss, HOUR);
        let older = case("c2", "XAUUSD", Some("breakout"), Outcome::Win, 0);
        let newer = case("c2", "XAUUSD", Some("breakout"), Outcome::Loss, 2 * HOUR);

        let forward = BuildInput {
            cases: vec![win.clone(), loss.clone(), older.clone(), newer.clone()],
            ..BuildInput::default()
        };
        let backward = BuildInput {
            cases: vec![newer, older, loss, win],
            ..BuildInput::default()
        };

        let a = builder.build(&forward);
        let b = builder.build(&backward);
        assert_eq!(builder.scope_key(&forward), builder.scope_key(&backward));
        assert_eq!(a, b);
        assert_eq!(a.stats.skipped_records, 2);

        let symbol = a.node("symbol:a1:XAUUSD").unwrap();
        assert_eq!(symbol.sample_size, 2);
        // c2 keeps its later record, so at most one win survives
        assert!(symbol.win_rate().unwrap() <= 0.5);
    }

    #[test]
    fn test_lens_keeps_ids() {
        let builder = GraphBuilder::default();
        let input = sample_input();
        let hierarchy = builder.build(&input);
        let failure = builder.build(&input.with_filters(Filters::with_lens(Lens::FailureMode)));

        for id in ["agent:a1", "lesson:L1", "lesson:L2"] {
            assert!(hierarchy.node(id).is_some());
            assert!(failure.node(id).is_some());
        }
        assert!(failure.node("symbol:a1:XAUUSD").is_none());
        assert_eq!(
            failure.node("lesson:L1").unwrap().parent_id.as_deref(),
            Some("failure:a1:unclassified")
        );
    }

    #[test]
    fn test_strategy_filter() {
        let mut input = sample_input();
        input.cases[0].strategy = Some("swing".into());
        input.filters.strategy = Some("swing".into());

        let snapshot = GraphBuilder::default().build(&input);
        assert_eq!(snapshot.node("agent:a1").unwrap().sample_size, 1);
        assert!(snapshot.nodes_of_type(NodeType::Lesson).next().is_none());
    }

    #[test]
    fn test_lifecycle_filter() {
        let mut input = sample_input();
        input.lessons[1].state = LessonState::Deprecated;
        input.filters.lesson_lifecycle = Some(LessonState::Active);

        let snapshot = GraphBuilder::default().build(&input);
        assert!(snapshot.node("lesson:L1").is_some());
        assert!(snapshot.node("lesson:L2").is_none());
        assert_eq!(snapshot.stats.conflict_count, 0);
    }

    #[test]
    fn test_confidence_floor_reparents() {
        let mut input = sample_input();
        input.lessons.push(lesson("L3", "XAUUSD", Some("scalp"), 0.95));
        input.filters.confidence_min = 0.7;

        let snapshot = GraphBuilder::default().build(&input);
        assert_structural_invariants(&snapshot);
        // scalp has no cases, so its confidence is its lesson's
        assert!(snapshot.node("pattern:a1:XAUUSD:scalp").is_some());
        assert!(snapshot.node("lesson:L2").is_none());
        // breakout: min(6 / 11, 0.7) falls below the floor
        assert!(snapshot.node("pattern:a1:XAUUSD:breakout").is_none());
        assert_eq!(
            snapshot.node("lesson:L1").unwrap().parent_id.as_deref(),
            Some("symbol:a1:XAUUSD")
        );
    }

    #[test]
    fn test_focus_conflicts() {
        let mut input = sample_input();
        input.filters.focus = FocusMode::Conflicts;
        let snapshot = GraphBuilder::default().build(&input);
        assert_structural_invariants(&snapshot);
        assert!(snapshot.node("lesson:L1").is_some());
        assert!(snapshot.node("agent:a1").is_some());
        assert!(snapshot.node("symbol:a1:EURUSD").is_none());
        assert!(snapshot.nodes_of_type(NodeType::Goal).next().is_none());
    }

    #[test]
    fn test_performance_orders_by_impact() {
        let mut input = sample_input();
        input.filters.lens = Lens::Performance;
        let snapshot = GraphBuilder::default().build(&input);
        let index = snapshot.index();
        let symbols = index.children("agent:a1");
        for pair in symbols.windows(2) {
            assert!(pair[0].impact_score >= pair[1].impact_score);
        }
    }
}
