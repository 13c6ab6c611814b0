//! Scope keys: the deterministic fingerprint of (filters, data cursor, params).
//!
//! Two builds with equal scope keys produce value-equal snapshots, so the
//! scope key is the caching and single-flight unit.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_hash_hex, quantize};
use crate::types::{CaseRecord, Filters, LessonRecord, SymbolLearning};
use crate::GRAPH_SCHEMA_VERSION;

use super::params::BuildParams;

/// A fingerprint of the record collections a build reads.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCursor {
    /// Number of case records.
    pub case_count: u64,
    /// Number of lesson records.
    pub lesson_count: u64,
    /// Number of symbol learnings.
    pub learning_count: u64,
    /// Maximum timestamp across all records.
    pub watermark_ms: i64,
    /// Hash of sorted (kind, id, timestamp, content hash) tuples.
    pub digest: String,
}

impl DataCursor {
    /// Compute a cursor over raw records.
    ///
    /// Record order does not matter; any change to a record's content does.
    pub fn compute(
        cases: &[CaseRecord],
        lessons: &[LessonRecord],
        learnings: &[SymbolLearning],
    ) -> Self {
        let mut entries: Vec<(u8, String, i64, String)> =
            Vec::with_capacity(cases.len() + lessons.len() + learnings.len());
        let mut watermark_ms = 0i64;

        for case in cases {
            let ts = case.last_activity_ms();
            watermark_ms = watermark_ms.max(ts);
            entries.push((0, case.id.clone(), ts, canonical_hash_hex(case)));
        }
        for lesson in lessons {
            let ts = lesson.updated_at_ms.max(lesson.created_at_ms);
            watermark_ms = watermark_ms.max(ts);
            entries.push((1, lesson.id.clone(), ts, canonical_hash_hex(lesson)));
        }
        for learning in learnings {
            watermark_ms = watermark_ms.max(learning.updated_at_ms);
            let key = format!(
                "{}:{}:{}",
                learning.agent_id.as_deref().unwrap_or_default(),
                learning.symbol.as_deref().unwrap_or_default(),
                learning.timeframe.as_deref().unwrap_or_default(),
            );
            entries.push((2, key, learning.updated_at_ms, canonical_hash_hex(learning)));
        }
        entries.sort();

        Self {
            case_count: cases.len() as u64,
            lesson_count: lessons.len() as u64,
            learning_count: learnings.len() as u64,
            watermark_ms,
            digest: canonical_hash_hex(&entries),
        }
    }
}

/// Canonical filter representation for hashing. Fixed field order, floats
/// quantized, enums as strings.
#[derive(Serialize)]
struct CanonicalFilters<'a> {
    lens: &'static str,
    agent_id: Option<&'a str>,
    strategy: Option<&'a str>,
    broker: Option<&'a str>,
    lesson_lifecycle: Option<&'static str>,
    confidence_min: i64,
    focus: &'static str,
}

/// Internal struct for computing the scope key.
#[derive(Serialize)]
struct ScopeKeyInput<'a> {
    schema_version: &'static str,
    filters: CanonicalFilters<'a>,
    cursor: &'a DataCursor,
    params_hash: String,
}

/// Compute the scope key for (filters, cursor, params).
pub fn scope_key(filters: &Filters, cursor: &DataCursor, params: &BuildParams) -> String {
    let filters = filters.normalized();
    let input = ScopeKeyInput {
        schema_version: GRAPH_SCHEMA_VERSION,
        filters: CanonicalFilters {
            lens: filters.lens.as_str(),
            agent_id: filters.agent_id.as_deref(),
            strategy: filters.strategy.as_deref(),
            broker: filters.broker.as_deref(),
            lesson_lifecycle: filters.lesson_lifecycle.map(|s| s.as_str()),
            confidence_min: quantize(filters.confidence_min),
            focus: filters.focus.as_str(),
        },
        cursor,
        params_hash: params.params_hash(),
    };
    format!("scope:{}", canonical_hash_hex(&input))
}
