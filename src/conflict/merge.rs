//! Last-writer-wins policy merge.
//!
//! Policies for the same conflict are ordered by
//! `(updated_at_ms, created_at_ms, source, canonical bytes)` and the greatest
//! wins. The order is total, so the merge result does not depend on the
//! order policies arrive in.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::canonical::to_canonical_bytes;
use crate::types::ConflictResolution;

/// Total order used by the merge. Greater wins.
pub fn policy_order(a: &ConflictResolution, b: &ConflictResolution) -> Ordering {
    a.updated_at_ms
        .cmp(&b.updated_at_ms)
        .then_with(|| a.created_at_ms.cmp(&b.created_at_ms))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| to_canonical_bytes(a).cmp(&to_canonical_bytes(b)))
}

/// Merge policies into one effective policy per conflict id.
///
/// Structurally invalid policies are dropped before the merge, so an invalid
/// newer policy never hides a valid older one.
pub fn merge_policies<I>(policies: I) -> BTreeMap<String, ConflictResolution>
where
    I: IntoIterator<Item = ConflictResolution>,
{
    let mut merged: BTreeMap<String, ConflictResolution> = BTreeMap::new();
    for policy in policies {
        if let Some(defect) = policy.defect() {
            tracing::warn!(
                conflict_id = %policy.conflict_id,
                error = %defect,
                "Dropping invalid conflict policy"
            );
            continue;
        }
        match merged.get(&policy.conflict_id) {
            Some(current) if policy_order(&policy, current) != Ordering::Greater => {}
            _ => {
                merged.insert(policy.conflict_id.clone(), policy);
            }
        }
    }
    merged
}

/// Merge and return the effective policies sorted by conflict id.
pub fn merged_list<I>(policies: I) -> Vec<ConflictResolution>
where
    I: IntoIterator<Item = ConflictResolution>,
{
    merge_policies(policies).into_values().collect()
}
