//! Conflict identity and user-authored resolution policies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::canonical::sha256_hex;

/// Number of hex characters kept from the SHA-256 digest.
const CONFLICT_ID_HEX_LEN: usize = 24;

/// Canonical conflict id for a lesson pair.
///
/// The pair is sorted before hashing, so `conflict_id(a, b) == conflict_id(b, a)`.
pub fn conflict_id(lesson_a_id: &str, lesson_b_id: &str) -> String {
    let (lo, hi) = if lesson_a_id <= lesson_b_id {
        (lesson_a_id, lesson_b_id)
    } else {
        (lesson_b_id, lesson_a_id)
    };
    let mut bytes = Vec::with_capacity(lo.len() + hi.len() + 1);
    bytes.extend_from_slice(lo.as_bytes());
    bytes.push(0);
    bytes.extend_from_slice(hi.as_bytes());
    let digest = sha256_hex(&bytes);
    format!("conflict:{}", &digest[..CONFLICT_ID_HEX_LEN])
}

/// How a conflict has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    /// Both lessons stay contradicted.
    Unresolved,
    /// Lesson A overrides lesson B when a condition holds.
    ConditionalOverride,
    /// One lesson takes precedence; the other is suppressed.
    Precedence,
    /// Each lesson applies to its own symbols/timeframes.
    ScopeSplit,
}

impl PolicyType {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::ConditionalOverride => "conditional_override",
            Self::Precedence => "precedence",
            Self::ScopeSplit => "scope_split",
        }
    }
}

impl Default for PolicyType {
    fn default() -> Self {
        Self::Unresolved
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applicability of one side of a scope split.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicabilityScope {
    /// Symbols the lesson applies to (empty = any).
    pub symbols: BTreeSet<String>,
    /// Timeframes the lesson applies to (empty = any).
    pub timeframes: BTreeSet<String>,
}

impl ApplicabilityScope {
    /// Whether the scope restricts nothing.
    pub fn is_unbounded(&self) -> bool {
        self.symbols.is_empty() && self.timeframes.is_empty()
    }
}

/// Applicability sets for both lessons of a split conflict.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeSplit {
    /// Where lesson A applies.
    pub lesson_a: ApplicabilityScope,
    /// Where lesson B applies.
    pub lesson_b: ApplicabilityScope,
}

/// A persisted resolution policy for one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    /// Canonical conflict id of the lesson pair.
    pub conflict_id: String,
    /// First lesson (record id).
    pub lesson_a_id: String,
    /// Second lesson (record id).
    pub lesson_b_id: String,
    /// Policy type.
    pub policy_type: PolicyType,
    /// Trigger condition for `conditional_override`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Winning lesson id for `precedence`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precedence: Option<String>,
    /// Applicability sets for `scope_split`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_split: Option<ScopeSplit>,
    /// Free-text note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Creation time (unix ms).
    pub created_at_ms: i64,
    /// Last update time (unix ms).
    pub updated_at_ms: i64,
    /// Origin of the policy (e.g. "user", "cache").
    #[serde(default)]
    pub source: String,
}

impl ConflictResolution {
    /// Create an `unresolved` policy for a lesson pair at `now_ms`.
    pub fn new(
        lesson_a_id: impl Into<String>,
        lesson_b_id: impl Into<String>,
        now_ms: i64,
        source: impl Into<String>,
    ) -> Self {
        let lesson_a_id = lesson_a_id.into();
        let lesson_b_id = lesson_b_id.into();
        Self {
            conflict_id: conflict_id(&lesson_a_id, &lesson_b_id),
            lesson_a_id,
            lesson_b_id,
            policy_type: PolicyType::Unresolved,
            condition: None,
            precedence: None,
            scope_split: None,
            note: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            source: source.into(),
        }
    }

    /// Turn into a precedence policy won by `winner`.
    pub fn with_precedence(mut self, winner: impl Into<String>) -> Self {
        self.policy_type = PolicyType::Precedence;
        self.precedence = Some(winner.into());
        self
    }

    /// Turn into a conditional override (A overrides B when `condition`).
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.policy_type = PolicyType::ConditionalOverride;
        self.condition = Some(condition.into());
        self
    }

    /// Turn into a scope split.
    pub fn with_scope_split(mut self, split: ScopeSplit) -> Self {
        self.policy_type = PolicyType::ScopeSplit;
        self.scope_split = Some(split);
        self
    }

    /// Set the update time.
    pub fn updated_at(mut self, updated_at_ms: i64) -> Self {
        self.updated_at_ms = updated_at_ms;
        self
    }

    /// Check structural validity. Returns the defect, if any.
    pub fn defect(&self) -> Option<PolicyDefect> {
        if self.lesson_a_id.is_empty() || self.lesson_b_id.is_empty() {
            return Some(PolicyDefect::MissingLesson);
        }
        if self.lesson_a_id == self.lesson_b_id {
            return Some(PolicyDefect::SelfConflict);
        }
        if self.conflict_id != conflict_id(&self.lesson_a_id, &self.lesson_b_id) {
            return Some(PolicyDefect::IdMismatch);
        }
        match self.policy_type {
            PolicyType::Unresolved => None,
            PolicyType::Precedence => match self.precedence.as_deref() {
                Some(w) if w == self.lesson_a_id || w == self.lesson_b_id => None,
                _ => Some(PolicyDefect::InvalidPrecedence),
            },
            PolicyType::ConditionalOverride => match self.condition.as_deref() {
                Some(c) if !c.trim().is_empty() => None,
                _ => Some(PolicyDefect::MissingCondition),
            },
            PolicyType::ScopeSplit => match &self.scope_split {
                Some(split) if !(split.lesson_a.is_unbounded() && split.lesson_b.is_unbounded()) => {
                    None
                }
                _ => Some(PolicyDefect::MissingScopeSplit),
            },
        }
    }

    /// Whether this policy leaves the conflict open.
    pub fn is_unresolved(&self) -> bool {
        self.policy_type == PolicyType::Unresolved
    }
}

/// Structural defects that cause a policy to be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PolicyDefect {
    /// A lesson id is empty.
    #[error("policy is missing a lesson id")]
    MissingLesson,
    /// Both lesson ids are the same.
    #[error("policy pairs a lesson with itself")]
    SelfConflict,
    /// The conflict id does not match the lesson pair.
    #[error("conflict id does not match the lesson pair")]
    IdMismatch,
    /// Precedence names neither lesson.
    #[error("precedence must name one of the two lessons")]
    InvalidPrecedence,
    /// Conditional override without a condition.
    #[error("conditional override requires a condition")]
    MissingCondition,
    /// Scope split without applicability sets.
    #[error("scope split requires applicability sets")]
    MissingScopeSplit,
}

/// A conflict discovered in a snapshot, with its effective policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenConflict {
    /// Canonical conflict id.
    pub conflict_id: String,
    /// First lesson (record id, sorted pair order).
    pub lesson_a_id: String,
    /// Second lesson (record id, sorted pair order).
    pub lesson_b_id: String,
    /// Strength of the tension (mean lesson confidence).
    pub confidence: f64,
    /// Why the lessons conflict.
    pub reason: String,
    /// Effective policy after merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ConflictResolution>,
}

impl OpenConflict {
    /// Whether the conflict is still unresolved.
    pub fn is_open(&self) -> bool {
        self.policy.as_ref().map_or(true, ConflictResolution::is_unresolved)
    }
}
