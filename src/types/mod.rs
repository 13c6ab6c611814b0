//! Core types for the lesson graph kernel.

pub mod record;
pub mod filters;
pub mod node;
pub mod edge;
pub mod snapshot;
pub mod conflict;

pub use record::{
    CaseRecord, LessonRecord, SymbolLearning, RecordSet, TimelineWindow,
    Outcome, LessonState, Stance,
};
pub use filters::{Filters, Lens, FocusMode};
pub use node::{GraphNode, NodeType, Meta};
pub use edge::{GraphEdge, EdgeType};
pub use snapshot::{Snapshot, SnapshotStats, SnapshotIndex};
pub use conflict::{
    conflict_id, ConflictResolution, PolicyType, ScopeSplit, ApplicabilityScope,
    PolicyDefect, OpenConflict,
};
