//! Record normalization and node derivation.
//!
//! Every case feeds each group on its lens path, so a group's sample is the
//! number of cases in its subtree. Lessons and goals hang below the deepest
//! group of their own path.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use serde_json::json;

use crate::canonical::{round_metric, to_canonical_bytes};
use crate::types::node::ids;
use crate::types::record::{normalize_key, normalize_symbol};
use crate::types::{
    CaseRecord, Filters, GraphNode, LessonRecord, LessonState, Lens, NodeType, SymbolLearning,
};

use super::lens::{self, Placement, Segment};
use super::metrics::{
    clamp_unit, impact_score, is_hot, mean, sample_confidence, Tally,
};
use super::params::BuildParams;
use super::BuildInput;

/// A case that survived normalization and filtering.
#[derive(Debug)]
pub(crate) struct CaseEntry<'a> {
    pub id: String,
    pub agent: String,
    pub record: &'a CaseRecord,
    pub path: Vec<Segment>,
}

/// A lesson that survived normalization and filtering.
#[derive(Debug)]
pub(crate) struct LessonEntry<'a> {
    pub id: String,
    pub node_id: String,
    pub record: &'a LessonRecord,
    pub placement: Placement,
    pub timeframe: Option<String>,
    pub path: Vec<Segment>,
    /// Evidence ids that resolve to kept cases, sorted.
    pub resolved: Vec<String>,
}

/// A symbol learning that survived normalization and filtering.
#[derive(Debug)]
pub(crate) struct LearningEntry<'a> {
    pub agent: String,
    pub symbol: String,
    pub record: &'a SymbolLearning,
}

/// Records ready for placement.
#[derive(Debug, Default)]
pub(crate) struct Normalized<'a> {
    pub cases: Vec<CaseEntry<'a>>,
    pub lessons: Vec<LessonEntry<'a>>,
    pub learnings: Vec<LearningEntry<'a>>,
    pub skipped: usize,
}

impl<'a> Normalized<'a> {
    /// Kept cases by id.
    pub fn case_index(&self) -> HashMap<&str, &CaseEntry<'a>> {
        self.cases.iter().map(|c| (c.id.as_str(), c)).collect()
    }
}

fn matches_filter(value: &Option<String>, filter: &Option<String>) -> bool {
    match filter {
        Some(wanted) => value.as_deref() == Some(wanted.as_str()),
        None => true,
    }
}

fn has_keys(id: &str, agent: Option<&str>, symbol: Option<&str>) -> bool {
    !id.trim().is_empty() && normalize_key(agent).is_some() && normalize_symbol(symbol).is_some()
}

/// The record kept for each repeated id: the latest by `ts`, ties broken by
/// canonical bytes, so the choice does not depend on arrival order.
fn latest_by_id<'a, T: Serialize + 'a>(
    records: impl IntoIterator<Item = &'a T>,
    id: impl Fn(&'a T) -> &'a str,
    ts: impl Fn(&T) -> i64,
) -> HashMap<&'a str, &'a T> {
    let mut kept: HashMap<&'a str, &'a T> = HashMap::new();
    for record in records {
        let key = id(record).trim();
        let newer = match kept.get(key) {
            Some(current) => ts(record)
                .cmp(&ts(current))
                .then_with(|| to_canonical_bytes(record).cmp(&to_canonical_bytes(*current)))
                .is_gt(),
            None => true,
        };
        if newer {
            kept.insert(key, record);
        }
    }
    kept
}

fn is_kept<T>(kept: &HashMap<&str, &T>, id: &str, record: &T) -> bool {
    kept.get(id.trim()).is_some_and(|k| std::ptr::eq(*k, record))
}

fn required_keys(
    id: &str,
    agent: Option<&str>,
    symbol: Option<&str>,
    kept: bool,
    kind: &'static str,
) -> Option<(String, String, String)> {
    let id = id.trim();
    let (agent, symbol) = match (normalize_key(agent), normalize_symbol(symbol)) {
        (Some(agent), Some(symbol)) if !id.is_empty() => (agent, symbol),
        _ => {
            tracing::warn!(kind, id, "Skipping record without id, agent or symbol");
            return None;
        }
    };
    if !kept {
        tracing::warn!(kind, id, "Skipping superseded duplicate record id");
        return None;
    }
    Some((id.to_string(), agent, symbol))
}

/// Normalize grouping keys, drop malformed records and apply record filters.
///
/// Malformed records are counted in `skipped`; filtered-out records are not.
/// Of several records sharing an id, the latest one is kept and the others
/// count as skipped.
pub(crate) fn normalize<'a>(input: &'a BuildInput, filters: &Filters) -> Normalized<'a> {
    let lens = filters.lens;
    let mut out = Normalized::default();

    let kept_cases = latest_by_id(
        input
            .cases
            .iter()
            .filter(|r| has_keys(&r.id, r.agent_id.as_deref(), r.symbol.as_deref())),
        |r| r.id.as_str(),
        CaseRecord::last_activity_ms,
    );
    for record in &input.cases {
        let Some((id, agent, symbol)) = required_keys(
            &record.id,
            record.agent_id.as_deref(),
            record.symbol.as_deref(),
            is_kept(&kept_cases, &record.id, record),
            "case",
        ) else {
            out.skipped += 1;
            continue;
        };
        let placement = Placement {
            agent,
            symbol,
            pattern: normalize_key(record.pattern.as_deref()),
            strategy: normalize_key(record.strategy.as_deref()),
            broker: normalize_key(record.broker.as_deref()),
            failure_tag: lens::case_failure_tag(
                record.failure_tag.as_deref(),
                record.notes.as_deref(),
                record.outcome,
            ),
        };
        if !record_passes(&placement, filters) {
            continue;
        }
        out.cases.push(CaseEntry {
            id,
            path: lens::case_path(lens, &placement),
            agent: placement.agent,
            record,
        });
    }

    let case_ids: HashSet<&str> = out.cases.iter().map(|c| c.id.as_str()).collect();
    let kept_lessons = latest_by_id(
        input
            .lessons
            .iter()
            .filter(|r| has_keys(&r.id, r.agent_id.as_deref(), r.symbol.as_deref())),
        |r| r.id.as_str(),
        |r| r.updated_at_ms,
    );
    let mut lessons = Vec::new();
    for record in &input.lessons {
        let Some((id, agent, symbol)) = required_keys(
            &record.id,
            record.agent_id.as_deref(),
            record.symbol.as_deref(),
            is_kept(&kept_lessons, &record.id, record),
            "lesson",
        ) else {
            out.skipped += 1;
            continue;
        };
        let placement = Placement {
            agent,
            symbol,
            pattern: normalize_key(record.pattern.as_deref()),
            strategy: normalize_key(record.strategy.as_deref()),
            broker: normalize_key(record.broker.as_deref()),
            failure_tag: lens::lesson_failure_tag(
                record.failure_mode.as_deref(),
                &record.title,
                &record.text,
            ),
        };
        if !record_passes(&placement, filters) {
            continue;
        }
        if let Some(state) = filters.lesson_lifecycle {
            if record.state != state {
                continue;
            }
        }
        let resolved: BTreeSet<String> = record
            .evidence_case_ids
            .iter()
            .map(|e| e.trim())
            .filter(|e| case_ids.contains(e))
            .map(str::to_string)
            .collect();
        lessons.push(LessonEntry {
            node_id: ids::lesson(&id),
            id,
            record,
            timeframe: normalize_key(record.timeframe.as_deref()),
            path: lens::lesson_path(lens, &placement),
            placement,
            resolved: resolved.into_iter().collect(),
        });
    }
    out.lessons = lessons;

    for record in &input.symbol_learnings {
        let (agent, symbol) = match (
            normalize_key(record.agent_id.as_deref()),
            normalize_symbol(record.symbol.as_deref()),
        ) {
            (Some(agent), Some(symbol)) => (agent, symbol),
            _ => {
                tracing::warn!(kind = "symbol_learning", "Skipping record without agent or symbol");
                out.skipped += 1;
                continue;
            }
        };
        if !agent_passes(&agent, filters) {
            continue;
        }
        out.learnings.push(LearningEntry { agent, symbol, record });
    }

    out
}

fn agent_passes(agent: &str, filters: &Filters) -> bool {
    filters.agent_id.as_deref().map_or(true, |wanted| wanted == agent)
}

fn record_passes(placement: &Placement, filters: &Filters) -> bool {
    agent_passes(&placement.agent, filters)
        && matches_filter(&placement.strategy, &filters.strategy)
        && matches_filter(&placement.broker, &filters.broker)
}

/// Running aggregate for one group node.
#[derive(Debug)]
struct GroupAcc {
    segment: Segment,
    parent: Option<String>,
    agent: String,
    tally: Tally,
    case_ids: BTreeSet<String>,
    activity: Vec<i64>,
    last_seen: i64,
    direct_lessons: Vec<f64>,
    subtree_lessons: Vec<f64>,
}

impl GroupAcc {
    fn new(segment: Segment, parent: Option<String>, agent: &str) -> Self {
        Self {
            segment,
            parent,
            agent: agent.to_string(),
            tally: Tally::default(),
            case_ids: BTreeSet::new(),
            activity: Vec::new(),
            last_seen: 0,
            direct_lessons: Vec::new(),
            subtree_lessons: Vec::new(),
        }
    }
}

fn touch_path(groups: &mut BTreeMap<String, GroupAcc>, path: &[Segment], agent: &str) {
    for (i, segment) in path.iter().enumerate() {
        if !groups.contains_key(&segment.id) {
            let parent = i.checked_sub(1).map(|p| path[p].id.clone());
            groups.insert(segment.id.clone(), GroupAcc::new(segment.clone(), parent, agent));
        }
    }
}

/// Grouping key of a pattern node: (agent, pattern).
pub(crate) type PatternKey = (String, String);

/// Nodes derived from normalized records, before pruning and linking.
#[derive(Debug, Default)]
pub(crate) struct Forest {
    pub nodes: BTreeMap<String, GraphNode>,
    /// Symbol-forest pattern nodes by (agent, pattern).
    pub pattern_keys: BTreeMap<String, PatternKey>,
    /// Goal node id → (agent, symbol).
    pub goal_scopes: BTreeMap<String, (String, String)>,
}

/// Derive every node for the lens.
pub(crate) fn grow(
    normalized: &Normalized<'_>,
    lens: Lens,
    params: &BuildParams,
    reference_ms: i64,
) -> Forest {
    let mut forest = Forest::default();
    let mut groups: BTreeMap<String, GroupAcc> = BTreeMap::new();

    // Cases feed every group on their path
    for case in &normalized.cases {
        let ts = case.record.last_activity_ms();
        touch_path(&mut groups, &case.path, &case.agent);
        for segment in &case.path {
            if let Some(acc) = groups.get_mut(&segment.id) {
                acc.tally.record(case.record.outcome);
                acc.case_ids.insert(case.id.clone());
                acc.activity.push(ts);
                acc.last_seen = acc.last_seen.max(ts);
            }
        }
    }

    let cases = normalized.case_index();

    // Lessons
    for lesson in &normalized.lessons {
        let record = lesson.record;
        let confidence = clamp_unit(record.confidence);
        let lesson_ts = record.updated_at_ms.max(record.created_at_ms);
        let parent_id = lesson.path.last().map(|s| s.id.clone());
        touch_path(&mut groups, &lesson.path, &lesson.placement.agent);
        for segment in &lesson.path {
            if let Some(acc) = groups.get_mut(&segment.id) {
                acc.subtree_lessons.push(confidence);
                acc.last_seen = acc.last_seen.max(lesson_ts);
                if Some(&segment.id) == parent_id.as_ref() {
                    acc.direct_lessons.push(confidence);
                }
            }
        }

        let mut tally = Tally::default();
        let mut activity = vec![lesson_ts];
        for case_id in &lesson.resolved {
            if let Some(case) = cases.get(case_id.as_str()) {
                tally.record(case.record.outcome);
                activity.push(case.record.last_activity_ms());
            }
        }
        let sample = if lesson.resolved.is_empty() {
            record
                .sample_size
                .unwrap_or(record.evidence_case_ids.len() as u64)
        } else {
            lesson.resolved.len() as u64
        };

        let label = match record.title.trim() {
            "" => lesson.id.as_str(),
            title => title,
        };
        let mut node = GraphNode::new(lesson.node_id.clone(), NodeType::Lesson, label)
            .with_agent(lesson.placement.agent.clone());
        node.parent_id = parent_id;
        node.confidence = confidence;
        node.sample_size = sample;
        node.impact_score = impact_score(confidence, sample, tally.skew());
        node.last_seen_at_ms = activity.iter().copied().max().unwrap_or(lesson_ts);
        node.hot = is_hot(&activity, reference_ms, params);
        let mut evidence: Vec<String> = record
            .evidence_case_ids
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        evidence.truncate(params.max_evidence_ids);
        node.evidence_case_ids = evidence;

        node.meta.insert("recordId".into(), json!(lesson.id));
        node.meta.insert("state".into(), json!(record.state.as_str()));
        node.meta.insert("symbol".into(), json!(lesson.placement.symbol));
        if let Some(pattern) = &lesson.placement.pattern {
            node.meta.insert("pattern".into(), json!(pattern));
        }
        if let Some(timeframe) = &lesson.timeframe {
            node.meta.insert("timeframe".into(), json!(timeframe));
        }
        if let Some(stance) = record.stance {
            node.meta.insert("stance".into(), json!(stance));
        }
        if let Some(tag) = &lesson.placement.failure_tag {
            node.meta.insert("failureTag".into(), json!(tag));
        }
        if !record.text.trim().is_empty() {
            node.meta.insert("text".into(), json!(record.text.trim()));
        }
        if let Some(win_rate) = tally.win_rate() {
            node.meta.insert("winRate".into(), json!(win_rate));
        }
        forest.nodes.insert(node.id.clone(), node);
    }

    // Symbol learnings: latest per (agent, symbol) wins, goals are unioned
    let mut learnings: BTreeMap<(String, String), Vec<&LearningEntry<'_>>> = BTreeMap::new();
    for entry in &normalized.learnings {
        learnings
            .entry((entry.agent.clone(), entry.symbol.clone()))
            .or_default()
            .push(entry);
    }
    let mut symbol_learning: HashMap<String, &SymbolLearning> = HashMap::new();
    for ((agent, symbol), mut entries) in learnings {
        entries.sort_by(|a, b| {
            a.record
                .updated_at_ms
                .cmp(&b.record.updated_at_ms)
                .then_with(|| to_canonical_bytes(a.record).cmp(&to_canonical_bytes(b.record)))
        });
        let Some(latest) = entries.last().map(|e| e.record) else {
            continue;
        };

        let path = lens::goal_path(lens, &agent, &symbol);
        touch_path(&mut groups, &path, &agent);
        if lens.is_symbol_forest() {
            symbol_learning.insert(ids::symbol(&agent, &symbol), latest);
        }

        let mut goals: BTreeMap<String, String> = BTreeMap::new();
        for entry in &entries {
            for goal in &entry.record.goals {
                let text = goal.trim();
                if ids::slug(text).is_empty() {
                    continue;
                }
                goals.insert(ids::goal(&agent, &symbol, text), text.to_string());
            }
        }

        let confidence = clamp_unit(latest.confidence);
        let skew = latest.win_rate.map_or(0.0, |w| clamp_unit(w) * 2.0 - 1.0);
        for (goal_id, text) in goals {
            let mut node = GraphNode::new(goal_id.clone(), NodeType::Goal, text)
                .with_agent(agent.clone());
            node.parent_id = path.last().map(|s| s.id.clone());
            node.confidence = confidence;
            node.sample_size = latest.sample_size;
            node.impact_score = impact_score(confidence, latest.sample_size, skew);
            node.last_seen_at_ms = latest.updated_at_ms;
            node.hot = is_hot(&[latest.updated_at_ms], reference_ms, params);
            node.meta.insert("symbol".into(), json!(symbol));
            if let Some(win_rate) = latest.win_rate {
                node.meta.insert("winRate".into(), json!(round_metric(clamp_unit(win_rate))));
            }
            forest
                .goal_scopes
                .insert(goal_id.clone(), (agent.clone(), symbol.clone()));
            forest.nodes.insert(goal_id, node);
        }
    }

    // Group nodes
    for (id, acc) in groups {
        let n = acc.tally.total();
        let learning = symbol_learning.get(&id).copied();
        let mut node = GraphNode::new(id.clone(), acc.segment.node_type, acc.segment.label.clone())
            .with_agent(acc.agent.clone());
        node.parent_id = acc.parent.clone();

        let (confidence, sample, skew) = match (acc.segment.node_type, learning) {
            (NodeType::Symbol, Some(learning)) => {
                let sample = if n > 0 { n } else { learning.sample_size };
                let skew = if n > 0 {
                    acc.tally.skew()
                } else {
                    learning.win_rate.map_or(0.0, |w| clamp_unit(w) * 2.0 - 1.0)
                };
                (clamp_unit(learning.confidence), sample, skew)
            }
            (NodeType::Agent | NodeType::Symbol, None) => {
                let confidence = if n > 0 {
                    sample_confidence(n, params)
                } else {
                    mean(&acc.subtree_lessons).unwrap_or(0.0)
                };
                (confidence, n, acc.tally.skew())
            }
            _ => {
                let direct = mean(&acc.direct_lessons);
                let confidence = match (n > 0, direct) {
                    (true, Some(lessons)) => sample_confidence(n, params).min(lessons),
                    (true, None) => sample_confidence(n, params),
                    (false, Some(lessons)) => lessons,
                    (false, None) => 0.0,
                };
                (confidence, n, acc.tally.skew())
            }
        };

        node.confidence = confidence;
        node.sample_size = sample;
        node.impact_score = impact_score(confidence, sample, skew);
        node.last_seen_at_ms = acc
            .last_seen
            .max(learning.map_or(0, |l| l.updated_at_ms));
        node.hot = is_hot(&acc.activity, reference_ms, params);
        node.evidence_case_ids = acc
            .case_ids
            .iter()
            .take(params.max_evidence_ids)
            .cloned()
            .collect();

        node.meta.insert("kind".into(), json!(acc.segment.kind));
        node.meta.insert("wins".into(), json!(acc.tally.wins));
        node.meta.insert("losses".into(), json!(acc.tally.losses));
        let win_rate = acc
            .tally
            .win_rate()
            .or_else(|| learning.and_then(|l| l.win_rate).map(|w| round_metric(clamp_unit(w))));
        if let Some(win_rate) = win_rate {
            node.meta.insert("winRate".into(), json!(win_rate));
        }
        if let Some(summary) = learning.and_then(|l| normalize_key(l.summary.as_deref())) {
            node.meta.insert("summary".into(), json!(summary));
        }

        if acc.segment.kind == "pattern" {
            forest
                .pattern_keys
                .insert(id.clone(), (acc.agent.clone(), acc.segment.label.clone()));
        }
        forest.nodes.insert(id, node);
    }

    forest
}

/// Whether a lesson feeds goal `learns_from` links.
pub(crate) fn is_active(record: &LessonRecord) -> bool {
    record.state == LessonState::Active
}
