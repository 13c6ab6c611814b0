//! Build filters and the lens that shapes the node forest.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::record::{normalize_key, LessonState};

/// Grouping/weighting strategy that maps records onto the node forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lens {
    /// agent → symbol → pattern → lesson.
    Hierarchy,
    /// Hierarchy forest, siblings ranked by impact.
    Performance,
    /// Hierarchy forest, siblings ranked by last activity.
    Recency,
    /// agent → failure tag → lesson.
    FailureMode,
    /// agent → strategy → broker → lesson.
    StrategyBroker,
}

impl Lens {
    /// Parse lens from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "hierarchy" | "" => Some(Self::Hierarchy),
            "performance" => Some(Self::Performance),
            "recency" => Some(Self::Recency),
            "failure_mode" | "failure-mode" => Some(Self::FailureMode),
            "strategy_broker" | "strategy-broker" => Some(Self::StrategyBroker),
            _ => None,
        }
    }

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hierarchy => "hierarchy",
            Self::Performance => "performance",
            Self::Recency => "recency",
            Self::FailureMode => "failure_mode",
            Self::StrategyBroker => "strategy_broker",
        }
    }

    /// Whether the lens uses the agent → symbol → pattern forest.
    pub fn is_symbol_forest(&self) -> bool {
        matches!(self, Self::Hierarchy | Self::Performance | Self::Recency)
    }
}

impl Default for Lens {
    fn default() -> Self {
        Self::Hierarchy
    }
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Focus mode narrows the snapshot to nodes that need attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    /// Keep everything.
    Off,
    /// Keep hot nodes and their ancestors.
    Hot,
    /// Keep contradicted nodes and their ancestors.
    Conflicts,
}

impl FocusMode {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Hot => "hot",
            Self::Conflicts => "conflicts",
        }
    }
}

impl Default for FocusMode {
    fn default() -> Self {
        Self::Off
    }
}

/// User-selected build filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    /// Grouping lens.
    pub lens: Lens,
    /// Restrict to one agent's subtree.
    pub agent_id: Option<String>,
    /// Restrict to records of one strategy.
    pub strategy: Option<String>,
    /// Restrict to records of one broker.
    pub broker: Option<String>,
    /// Restrict lesson nodes to one lifecycle state.
    pub lesson_lifecycle: Option<LessonState>,
    /// Confidence floor in [0, 1].
    pub confidence_min: f64,
    /// Focus mode.
    pub focus: FocusMode,
}

impl Filters {
    /// Filters with a given lens and everything else default.
    pub fn with_lens(lens: Lens) -> Self {
        Self { lens, ..Self::default() }
    }

    /// Return a copy with blank keys removed and the floor clamped to [0, 1].
    pub fn normalized(&self) -> Self {
        let confidence_min = if self.confidence_min.is_finite() {
            self.confidence_min.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            lens: self.lens,
            agent_id: normalize_key(self.agent_id.as_deref()),
            strategy: normalize_key(self.strategy.as_deref()),
            broker: normalize_key(self.broker.as_deref()),
            lesson_lifecycle: self.lesson_lifecycle,
            confidence_min,
            focus: self.focus,
        }
    }
}
