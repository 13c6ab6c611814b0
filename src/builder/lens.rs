//! Lens placement: where a record lands in the node forest, and how
//! siblings are ordered.
//!
//! | Lens              | Case path                          | Lesson parent path               |
//! |-------------------|------------------------------------|----------------------------------|
//! | hierarchy         | agent / symbol / pattern?          | agent / symbol / pattern?        |
//! | performance       | same as hierarchy                  | same as hierarchy                |
//! | recency           | same as hierarchy                  | same as hierarchy                |
//! | failure_mode      | agent / failure tag?               | agent / failure tag              |
//! | strategy_broker   | agent / strategy / broker          | agent / strategy / broker        |

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::types::node::ids;
use crate::types::{GraphNode, Lens, NodeType, Outcome};

/// Fallback group for records without a strategy or broker.
pub const UNASSIGNED: &str = "unassigned";

/// Failure group for lessons whose text matches no rule.
pub const UNCLASSIFIED: &str = "unclassified";

/// One level of a placement path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Node id.
    pub id: String,
    /// Node type.
    pub node_type: NodeType,
    /// Display label.
    pub label: String,
    /// Grouping key the segment stands for ("symbol", "pattern", ...).
    pub kind: &'static str,
}

impl Segment {
    fn new(id: String, node_type: NodeType, label: &str, kind: &'static str) -> Self {
        Self {
            id,
            node_type,
            label: label.to_string(),
            kind,
        }
    }
}

/// Normalized grouping keys shared by cases and lessons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Agent id.
    pub agent: String,
    /// Upper-cased symbol.
    pub symbol: String,
    /// Pattern key.
    pub pattern: Option<String>,
    /// Strategy key.
    pub strategy: Option<String>,
    /// Broker key.
    pub broker: Option<String>,
    /// Failure tag (explicit or inferred).
    pub failure_tag: Option<String>,
}

/// Path of group nodes a case contributes to, outermost first.
pub fn case_path(lens: Lens, placement: &Placement) -> Vec<Segment> {
    let agent = &placement.agent;
    let mut path = vec![Segment::new(ids::agent(agent), NodeType::Agent, agent, "agent")];
    match lens {
        Lens::Hierarchy | Lens::Performance | Lens::Recency => {
            let symbol = &placement.symbol;
            path.push(Segment::new(
                ids::symbol(agent, symbol),
                NodeType::Symbol,
                symbol,
                "symbol",
            ));
            if let Some(pattern) = &placement.pattern {
                path.push(Segment::new(
                    ids::pattern(agent, symbol, pattern),
                    NodeType::Pattern,
                    pattern,
                    "pattern",
                ));
            }
        }
        Lens::FailureMode => {
            if let Some(tag) = &placement.failure_tag {
                path.push(Segment::new(
                    ids::failure(agent, tag),
                    NodeType::Pattern,
                    tag,
                    "failure",
                ));
            }
        }
        Lens::StrategyBroker => {
            let strategy = placement.strategy.as_deref().unwrap_or(UNASSIGNED);
            let broker = placement.broker.as_deref().unwrap_or(UNASSIGNED);
            path.push(Segment::new(
                ids::strategy(agent, strategy),
                NodeType::Pattern,
                strategy,
                "strategy",
            ));
            path.push(Segment::new(
                ids::broker(agent, strategy, broker),
                NodeType::Pattern,
                broker,
                "broker",
            ));
        }
    }
    path
}

/// Path of group nodes above a lesson, outermost first.
///
/// Identical to [`case_path`] except that the failure lens always files a
/// lesson under some tag.
pub fn lesson_path(lens: Lens, placement: &Placement) -> Vec<Segment> {
    if lens == Lens::FailureMode && placement.failure_tag.is_none() {
        let mut placed = placement.clone();
        placed.failure_tag = Some(UNCLASSIFIED.to_string());
        return case_path(lens, &placed);
    }
    case_path(lens, placement)
}

/// Path of group nodes above a goal, outermost first.
pub fn goal_path(lens: Lens, agent: &str, symbol: &str) -> Vec<Segment> {
    let mut path = vec![Segment::new(ids::agent(agent), NodeType::Agent, agent, "agent")];
    if lens.is_symbol_forest() {
        path.push(Segment::new(
            ids::symbol(agent, symbol),
            NodeType::Symbol,
            symbol,
            "symbol",
        ));
    }
    path
}

struct FailureRule {
    tag: &'static str,
    pattern: &'static str,
}

const FAILURE_RULES: &[FailureRule] = &[
    FailureRule {
        tag: "stop_placement",
        pattern: r"\b(stop[ -]?loss|stops?|sl)\b.*\b(tight|wide|hit|placement|moved?)\b|\bstopped out\b",
    },
    FailureRule {
        tag: "news_risk",
        pattern: r"\b(news|nfp|cpi|fomc|fed|earnings|announcement)\b",
    },
    FailureRule {
        tag: "entry_timing",
        pattern: r"\b(early|late|chas(e|ed|ing)|fomo|premature)\b.*\bentr(y|ies)\b|\bentr(y|ies)\b.*\b(early|late|timing)\b",
    },
    FailureRule {
        tag: "position_sizing",
        pattern: r"\b(lot size|position size|sizing|oversiz(e|ed)|overleverag(e|ed)|leverage)\b",
    },
    FailureRule {
        tag: "discipline",
        pattern: r"\b(revenge|overtrad(e|ed|ing)|ignored (the )?plan|broke (the )?rules?|tilt)\b",
    },
    FailureRule {
        tag: "trend_misread",
        pattern: r"\b(counter[ -]?trend|against the trend|trend (reversal|misread)|fad(e|ed|ing) the (move|trend))\b",
    },
];

fn compiled_rules() -> &'static [(&'static str, Regex)] {
    static RULES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        FAILURE_RULES
            .iter()
            .filter_map(|rule| Regex::new(rule.pattern).ok().map(|re| (rule.tag, re)))
            .collect()
    })
}

/// Infer a failure tag from free text. First matching rule wins.
pub fn infer_failure_tag(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    compiled_rules()
        .iter()
        .find(|(_, re)| re.is_match(&lowered))
        .map(|(tag, _)| *tag)
}

/// Normalize an explicit failure tag to `snake_case`.
pub fn normalize_failure_tag(tag: &str) -> Option<String> {
    let slug = ids::slug(tag).replace('-', "_");
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

/// Failure tag of a case: explicit tag, or inferred from the notes of a
/// losing case.
pub fn case_failure_tag(explicit: Option<&str>, notes: Option<&str>, outcome: Outcome) -> Option<String> {
    if let Some(tag) = explicit.and_then(normalize_failure_tag) {
        return Some(tag);
    }
    if outcome != Outcome::Loss {
        return None;
    }
    notes.and_then(infer_failure_tag).map(str::to_string)
}

/// Failure tag of a lesson: explicit mode, or inferred from title and text.
pub fn lesson_failure_tag(explicit: Option<&str>, title: &str, text: &str) -> Option<String> {
    if let Some(tag) = explicit.and_then(normalize_failure_tag) {
        return Some(tag);
    }
    infer_failure_tag(&format!("{title} {text}")).map(str::to_string)
}

fn type_rank(node_type: NodeType) -> u8 {
    match node_type {
        NodeType::Agent => 0,
        NodeType::Symbol => 1,
        NodeType::Pattern => 2,
        NodeType::Lesson => 3,
        NodeType::Goal => 4,
        NodeType::Conflict => 5,
    }
}

/// Sibling order for a lens. Total: every comparator ends on the node id.
pub fn sibling_order(lens: Lens, a: &GraphNode, b: &GraphNode) -> Ordering {
    match lens {
        Lens::Performance => b
            .impact_score
            .total_cmp(&a.impact_score)
            .then_with(|| a.id.cmp(&b.id)),
        Lens::Recency => b
            .last_seen_at_ms
            .cmp(&a.last_seen_at_ms)
            .then_with(|| a.id.cmp(&b.id)),
        Lens::Hierarchy | Lens::FailureMode | Lens::StrategyBroker => type_rank(a.node_type)
            .cmp(&type_rank(b.node_type))
            .then_with(|| a.id.cmp(&b.id)),
    }
}
