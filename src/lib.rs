//! # lesson-graph-kernel
//!
//! Deterministic knowledge graph over trading cases, lessons and symbol
//! learnings.
//!
//! The kernel turns flat record streams into a navigable forest
//! (agent → symbol → pattern → lesson, plus goals and conflicts) and answers
//! four questions about it:
//!
//! 1. What changed between two scopes? ([`DiffEngine`])
//! 2. Which lessons contradict each other, and how were they resolved?
//!    ([`ConflictResolver`])
//! 3. Which path through the graph serves a goal? ([`PathRouter`])
//! 4. Which edges are worth drawing at a zoom level? ([`EdgeBundler`])
//!
//! ## Architecture
//!
//! ```text
//! records + filters → GraphBuilder → Snapshot → ConflictResolver → Snapshot
//!                                                      ↓
//!                                   DiffEngine / PathRouter / EdgeBundler
//!
//! BuildOrchestrator: scope key → cache → single-flight → worker/local → commit
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same records + same filters + same parameters → identical snapshot
//!   (wall-clock `buildMs` aside)
//! - Record order never affects output
//! - Edge ordering is canonical (by edge id)
//! - Node ordering is canonical (depth-first, siblings ranked by the lens)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod canonical;
pub mod builder;
pub mod diff;
pub mod conflict;
pub mod router;
pub mod bundler;
pub mod store;
pub mod config;
pub mod telemetry;
pub mod orchestrator;

// Re-exports
pub use types::{
    CaseRecord, LessonRecord, SymbolLearning, RecordSet, TimelineWindow, Outcome, LessonState,
    Stance, Filters, Lens, FocusMode, GraphNode, NodeType, GraphEdge, EdgeType, Snapshot,
    SnapshotStats, SnapshotIndex, conflict_id, ConflictResolution, PolicyType, ScopeSplit,
    ApplicabilityScope, OpenConflict,
};
pub use builder::{BuildInput, BuildParams, GraphBuilder, DataCursor};
pub use diff::{DiffEngine, DiffSnapshot, DiffStatus, DiffSummary, NodeDiff, EdgeDiff};
pub use conflict::{ConflictResolver, ResolutionOutcome, merge_policies};
pub use router::{PathRouter, RouterParams, RouteResult, PathSummary};
pub use bundler::{EdgeBundler, BundleResult, ZoomBand};
pub use store::{KeyValueStore, PolicyRepository, StoreError, InMemoryKeyValueStore};
pub use config::EngineConfig;
pub use telemetry::{EngineEvent, EventSink, NoOpSink, RecordingSink, TracingSink};
pub use orchestrator::{
    BuildOrchestrator, BuildPhase, CompareTarget, ComputeJob, ComputeOutput, Executor,
    ExecutorError, FallbackExecutor, ThreadWorkerHost, WorkerError, WorkerHost,
};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};

/// Schema version for snapshots and scope keys.
/// Increment on breaking changes to any snapshot type.
pub const GRAPH_SCHEMA_VERSION: &str = "1.0.0";

/// Build parameter set identifier, part of every scope key.
pub const BUILD_PARAMS_VERSION: &str = "lesson_graph_v1";

/// Store key holding the persisted `ConflictResolution[]`.
pub const POLICY_STORE_KEY: &str = "lesson_graph.conflict_policies";

/// Store key holding the persisted `Filters`.
pub const FILTERS_STORE_KEY: &str = "lesson_graph.filters";
