//! Input records supplied by the data source.
//!
//! Records are immutable facts. The engine reads them, normalizes a copy of
//! the grouping keys, and never writes them back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a closed trading case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Profitable case.
    Win,
    /// Losing case.
    Loss,
    /// Closed flat.
    Breakeven,
    /// Still open or outcome unknown.
    Open,
}

impl Outcome {
    /// Parse outcome from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "win" | "won" | "tp" => Some(Self::Win),
            "loss" | "lose" | "lost" | "sl" => Some(Self::Loss),
            "breakeven" | "be" | "flat" => Some(Self::Breakeven),
            "open" | "" => Some(Self::Open),
            _ => None,
        }
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self::Open
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Win => write!(f, "win"),
            Self::Loss => write!(f, "loss"),
            Self::Breakeven => write!(f, "breakeven"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Lifecycle state of a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonState {
    /// Proposed, not yet confirmed by enough evidence.
    Candidate,
    /// Confirmed and in use.
    Active,
    /// Superseded or disproven; kept for history.
    Deprecated,
}

impl LessonState {
    /// Stable string form used in metadata and scope keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        }
    }
}

impl Default for LessonState {
    fn default() -> Self {
        Self::Active
    }
}

/// Directional stance a lesson takes toward its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    /// The lesson recommends taking the setup.
    Favor,
    /// The lesson recommends avoiding the setup.
    Avoid,
}

impl Stance {
    /// Whether two stances pull in opposite directions.
    pub fn opposes(&self, other: Stance) -> bool {
        *self != other
    }
}

/// A single trading case (one trade and its outcome).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaseRecord {
    /// Case identifier.
    pub id: String,
    /// Agent that produced the case.
    pub agent_id: Option<String>,
    /// Traded symbol.
    pub symbol: Option<String>,
    /// Chart timeframe (e.g. "M15").
    pub timeframe: Option<String>,
    /// Setup or pattern name.
    pub pattern: Option<String>,
    /// Strategy name.
    pub strategy: Option<String>,
    /// Broker the case was executed on.
    pub broker: Option<String>,
    /// Outcome of the case.
    pub outcome: Outcome,
    /// Model confidence when the case was opened.
    pub confidence: Option<f64>,
    /// Realized profit and loss.
    pub pnl: Option<f64>,
    /// Explicit failure tag.
    pub failure_tag: Option<String>,
    /// Free-text notes (used for failure-tag inference).
    pub notes: Option<String>,
    /// When the case was opened (unix ms).
    pub opened_at_ms: i64,
    /// When the case was closed (unix ms), if closed.
    pub closed_at_ms: Option<i64>,
}

impl CaseRecord {
    /// The most recent timestamp carried by this case.
    pub fn last_activity_ms(&self) -> i64 {
        self.closed_at_ms.unwrap_or(self.opened_at_ms).max(self.opened_at_ms)
    }
}

/// A lesson distilled from one or more cases.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LessonRecord {
    /// Lesson identifier.
    pub id: String,
    /// Agent that learned the lesson.
    pub agent_id: Option<String>,
    /// Symbol the lesson applies to.
    pub symbol: Option<String>,
    /// Timeframe the lesson applies to.
    pub timeframe: Option<String>,
    /// Pattern the lesson refines.
    pub pattern: Option<String>,
    /// Strategy the lesson belongs to.
    pub strategy: Option<String>,
    /// Broker the lesson was observed on.
    pub broker: Option<String>,
    /// Short title.
    pub title: String,
    /// Lesson body.
    pub text: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Lifecycle state.
    pub state: LessonState,
    /// Stance toward the pattern, if directional.
    pub stance: Option<Stance>,
    /// Explicit failure mode.
    pub failure_mode: Option<String>,
    /// Case ids cited as evidence.
    pub evidence_case_ids: Vec<String>,
    /// Lesson ids this lesson explicitly contradicts.
    pub contradicts: Vec<String>,
    /// Sample size reported by the producer when no evidence resolves.
    pub sample_size: Option<u64>,
    /// Creation time (unix ms).
    pub created_at_ms: i64,
    /// Last update time (unix ms).
    pub updated_at_ms: i64,
}

/// Per-symbol learning summary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SymbolLearning {
    /// Agent the summary belongs to.
    pub agent_id: Option<String>,
    /// Symbol summarized.
    pub symbol: Option<String>,
    /// Optional timeframe qualifier.
    pub timeframe: Option<String>,
    /// Observed win rate in [0, 1].
    pub win_rate: Option<f64>,
    /// Number of cases behind the summary.
    pub sample_size: u64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Narrative summary.
    pub summary: Option<String>,
    /// Goals the agent is pursuing on this symbol.
    pub goals: Vec<String>,
    /// Last update time (unix ms).
    pub updated_at_ms: i64,
}

/// Inclusive-exclusive timeline window `[start_ms, end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineWindow {
    /// Window start (unix ms, inclusive).
    pub start_ms: i64,
    /// Window end (unix ms, exclusive).
    pub end_ms: i64,
}

impl TimelineWindow {
    /// Create a new window.
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Whether a timestamp falls inside the window.
    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms < self.end_ms
    }

    /// The window of the same length immediately before this one.
    pub fn previous(&self) -> Self {
        let len = self.end_ms - self.start_ms;
        Self::new(self.start_ms - len, self.start_ms)
    }
}

/// The three record collections handed over by the data source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordSet {
    /// Trading cases.
    pub cases: Vec<CaseRecord>,
    /// Lessons.
    pub lessons: Vec<LessonRecord>,
    /// Symbol learning summaries.
    pub symbol_learnings: Vec<SymbolLearning>,
}

impl RecordSet {
    /// Whether there are no records at all.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty() && self.lessons.is_empty() && self.symbol_learnings.is_empty()
    }

    /// Restrict every collection to a timeline window.
    ///
    /// Cases are kept by open time, lessons and learnings by update time.
    pub fn within(&self, window: TimelineWindow) -> Self {
        Self {
            cases: self
                .cases
                .iter()
                .filter(|c| window.contains(c.opened_at_ms))
                .cloned()
                .collect(),
            lessons: self
                .lessons
                .iter()
                .filter(|l| window.contains(l.updated_at_ms))
                .cloned()
                .collect(),
            symbol_learnings: self
                .symbol_learnings
                .iter()
                .filter(|s| window.contains(s.updated_at_ms))
                .cloned()
                .collect(),
        }
    }
}

/// Normalize a symbol: trimmed and upper-cased. Blank symbols are `None`.
pub fn normalize_symbol(symbol: Option<&str>) -> Option<String> {
    normalize_key(symbol).map(|s| s.to_uppercase())
}

/// Normalize a free-form grouping key: trimmed, blank is `None`.
pub fn normalize_key(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parse() {
        assert_eq!(Outcome::from_str("WIN"), Some(Outcome::Win));
        assert_eq!(Outcome::from_str(" sl "), Some(Outcome::Loss));
        assert_eq!(Outcome::from_str("maybe"), None);
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(Some(" xauusd ")), Some("XAUUSD".to_string()));
        assert_eq!(normalize_symbol(Some("   ")), None);
        assert_eq!(normalize_symbol(None), None);
    }

    #[test]
    fn test_record_set_within_window() {
        let records = RecordSet {
            cases: vec![
                CaseRecord { id: "c1".into(), opened_at_ms: 100, ..Default::default() },
                CaseRecord { id: "c2".into(), opened_at_ms: 250, ..Default::default() },
            ],
            lessons: vec![LessonRecord { id: "l1".into(), updated_at_ms: 150, ..Default::default() }],
            symbol_learnings: vec![],
        };

        let window = TimelineWindow::new(100, 200);
        let restricted = records.within(window);
        assert_eq!(restricted.cases.len(), 1);
        assert_eq!(restricted.cases[0].id, "c1");
        assert_eq!(restricted.lessons.len(), 1);
        assert_eq!(window.previous(), TimelineWindow::new(0, 100));
    }

    #[test]
    fn test_case_deserializes_with_missing_fields() {
        let case: CaseRecord =
            serde_json::from_str(r#"{"id":"c1","outcome":"win","openedAtMs":5}"#).unwrap();
        assert_eq!(case.outcome, Outcome::Win);
        assert!(case.symbol.is_none());
        assert_eq!(case.last_activity_ms(), 5);
    }
}
