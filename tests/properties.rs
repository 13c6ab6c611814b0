//! Property tests over randomly generated record sets and policies.

use std::collections::HashSet;

use proptest::prelude::*;

use lesson_graph_kernel::conflict::merge_policies;
use lesson_graph_kernel::{
    conflict_id, BuildInput, CaseRecord, ConflictResolution, ConflictResolver, DiffEngine,
    EdgeBundler, Filters, FocusMode, GraphBuilder, LessonRecord, Lens, Outcome, Snapshot, Stance, ZoomBand,
};

const AGENTS: [&str; 3] = ["a1", "a2", "a3"];
const SYMBOLS: [&str; 4] = ["XAUUSD", "EURUSD", "GBPJPY", "us30"];
const PATTERNS: [&str; 3] = ["breakout", "pullback", "range_fade"];
const LESSON_IDS: [&str; 5] = ["L1", "L2", "L3", "L4", "L5"];

fn arb_outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![Just(Outcome::Win), Just(Outcome::Loss), Just(Outcome::Breakeven)]
}

fn arb_case() -> impl Strategy<Value = CaseRecord> {
    (0usize..40, 0usize..3, 0usize..4, 0usize..3, arb_outcome(), 0i64..1_000_000).prop_map(
        |(n, agent, symbol, pattern, outcome, ts)| CaseRecord {
            id: format!("c{n}"),
            agent_id: Some(AGENTS[agent].to_string()),
            symbol: Some(SYMBOLS[symbol].to_string()),
            pattern: Some(PATTERNS[pattern].to_string()),
            timeframe: Some("M15".to_string()),
            outcome,
            opened_at_ms: ts,
            closed_at_ms: Some(ts + 60_000),
            ..CaseRecord::default()
        },
    )
}

fn arb_lesson() -> impl Strategy<Value = LessonRecord> {
    (0usize..5, 0usize..3, 0usize..4, 0.0f64..1.0, any::<bool>()).prop_map(
        |(n, agent, symbol, confidence, favor)| LessonRecord {
            id: LESSON_IDS[n].to_string(),
            agent_id: Some(AGENTS[agent].to_string()),
            symbol: Some(SYMBOLS[symbol].to_string()),
            pattern: Some("breakout".to_string()),
            timeframe: Some("M15".to_string()),
            title: format!("Lesson {n}"),
            text: "Wait for confirmation".to_string(),
            confidence,
            stance: Some(if favor { Stance::Favor } else { Stance::Avoid }),
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
            ..LessonRecord::default()
        },
    )
}

fn arb_lens() -> impl Strategy<Value = Lens> {
    prop_oneof![
        Just(Lens::Hierarchy),
        Just(Lens::Performance),
        Just(Lens::Recency),
        Just(Lens::FailureMode),
        Just(Lens::StrategyBroker),
    ]
}

fn arb_focus() -> impl Strategy<Value = FocusMode> {
    prop_oneof![Just(FocusMode::Off), Just(FocusMode::Hot), Just(FocusMode::Conflicts)]
}

fn arb_filters() -> impl Strategy<Value = Filters> {
    (arb_lens(), prop_oneof![Just(0.0), 0.0f64..0.9], arb_focus()).prop_map(
        |(lens, confidence_min, focus)| Filters {
            lens,
            confidence_min,
            focus,
            ..Filters::default()
        },
    )
}

fn arb_input() -> impl Strategy<Value = BuildInput> {
    (
        prop::collection::vec(arb_case(), 0..30),
        prop::collection::vec(arb_lesson(), 0..6),
        arb_lens(),
    )
        .prop_map(|(cases, lessons, lens)| BuildInput {
            cases,
            lessons,
            symbol_learnings: Vec::new(),
            filters: Filters::with_lens(lens),
        })
}

fn arb_policy() -> impl Strategy<Value = ConflictResolution> {
    (0usize..5, 1usize..5, 0i64..5, 0usize..3, any::<bool>()).prop_map(
        |(a, offset, updated, source, precedence)| {
            let (a, b) = (LESSON_IDS[a], LESSON_IDS[(a + offset) % LESSON_IDS.len()]);
            let policy = ConflictResolution::new(a, b, 100, ["user", "cache", "import"][source]);
            let policy = if precedence { policy.with_precedence(a) } else { policy };
            policy.updated_at(100 + updated)
        },
    )
}

fn stable_json(snapshot: &Snapshot) -> String {
    let mut snapshot = snapshot.clone();
    snapshot.stats.build_ms = 0;
    serde_json::to_string(&snapshot).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_conflict_id_is_symmetric(a in "[a-z0-9]{1,12}", b in "[a-z0-9]{1,12}") {
        prop_assert_eq!(conflict_id(&a, &b), conflict_id(&b, &a));
    }

    #[test]
    fn prop_record_order_is_irrelevant(input in arb_input()) {
        let builder = GraphBuilder::default();
        let mut reversed = input.clone();
        reversed.cases.reverse();
        reversed.lessons.reverse();

        prop_assert_eq!(builder.scope_key(&input), builder.scope_key(&reversed));
        prop_assert_eq!(stable_json(&builder.build(&input)), stable_json(&builder.build(&reversed)));
    }

    #[test]
    fn prop_snapshots_are_well_formed(input in arb_input(), filters in arb_filters()) {
        let snapshot = GraphBuilder::default().build(&input.with_filters(filters));

        let ids: HashSet<&str> = snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
        prop_assert_eq!(ids.len(), snapshot.nodes.len(), "duplicate node ids");

        let edge_ids: HashSet<&str> = snapshot.edges.iter().map(|e| e.id.as_str()).collect();
        prop_assert_eq!(edge_ids.len(), snapshot.edges.len(), "duplicate edge ids");
        for edge in &snapshot.edges {
            prop_assert!(ids.contains(edge.source.as_str()), "dangling source on {}", edge.id);
            prop_assert!(ids.contains(edge.target.as_str()), "dangling target on {}", edge.id);
        }

        for node in &snapshot.nodes {
            match &node.parent_id {
                Some(parent) => prop_assert!(ids.contains(parent.as_str()), "{} has missing parent", node.id),
                None => prop_assert!(snapshot.root_node_ids.contains(&node.id), "{} is an unlisted root", node.id),
            }
        }
        for root in &snapshot.root_node_ids {
            prop_assert!(snapshot.node(root).is_some_and(|n| n.parent_id.is_none()), "{} is not parentless", root);
        }
    }

    #[test]
    fn prop_self_diff_is_unchanged(input in arb_input()) {
        let snapshot = GraphBuilder::default().build(&input);
        let diff = DiffEngine::default().diff(&snapshot, &snapshot);
        prop_assert!(diff.is_unchanged());
        prop_assert_eq!(diff.summary.stable, snapshot.nodes.len());
    }

    #[test]
    fn prop_bundles_grow_with_zoom(input in arb_input()) {
        let snapshot = GraphBuilder::default().build(&input);
        let bundler = EdgeBundler::new();
        let far = bundler.bundle(&snapshot, ZoomBand::Far);
        let mid = bundler.bundle(&snapshot, ZoomBand::Mid);
        let near = bundler.bundle(&snapshot, ZoomBand::Near);

        prop_assert_eq!(near.hidden_count, 0);
        for id in &far.visible_edge_ids {
            prop_assert!(mid.is_visible(id), "{} visible far but not mid", id);
        }
        for id in &mid.visible_edge_ids {
            prop_assert!(near.is_visible(id), "{} visible mid but not near", id);
        }
        for bundle in [&far, &mid, &near] {
            prop_assert_eq!(bundle.visible_edge_ids.len() + bundle.hidden_count, snapshot.edges.len());
        }
    }

    #[test]
    fn prop_policy_merge_ignores_arrival_order(policies in prop::collection::vec(arb_policy(), 0..12)) {
        let mut reversed = policies.clone();
        reversed.reverse();
        prop_assert_eq!(merge_policies(policies), merge_policies(reversed));
    }

    #[test]
    fn prop_resolver_is_idempotent(
        input in arb_input(),
        policies in prop::collection::vec(arb_policy(), 0..6),
    ) {
        let snapshot = GraphBuilder::default().build(&input);
        let resolver = ConflictResolver::new();
        let once = resolver.apply(&snapshot, &policies);
        let twice = resolver.apply(&once.snapshot, &policies);

        prop_assert_eq!(stable_json(&once.snapshot), stable_json(&twice.snapshot));
        prop_assert_eq!(once.conflicts, twice.conflicts);
    }
}
