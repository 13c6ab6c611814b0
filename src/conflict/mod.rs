//! Conflict resolution.
//!
//! Conflicts are discovered from `conflicts` edges between lesson nodes.
//! User policies are merged last-writer-wins per conflict id and applied as
//! a pure transform over a snapshot:
//!
//! | Policy                 | Effect                                                    |
//! |------------------------|-----------------------------------------------------------|
//! | `unresolved` / none    | both lessons and the conflict node stay contradicted      |
//! | `precedence`           | loser impact zeroed, `overrides_when` winner → loser      |
//! | `conditional_override` | `overrides_when` A → B carrying the condition             |
//! | `scope_split`          | applicability sets written onto both lessons              |

pub mod merge;
pub mod resolver;

pub use merge::{merge_policies, merged_list, policy_order};
pub use resolver::{
    ConflictResolver, ResolutionOutcome, META_APPLIES_TO, META_BASE_IMPACT, META_ORIGIN,
    META_SUPPRESSED_BY, ORIGIN_POLICY,
};
