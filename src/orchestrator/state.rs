//! Orchestrator state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Filters, OpenConflict, RecordSet, Snapshot};

/// Build lifecycle of the current scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    /// Nothing requested yet.
    Idle,
    /// A build for the latest inputs is running.
    Building,
    /// The latest inputs have a committed snapshot.
    Ready,
}

impl BuildPhase {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed snapshot with its conflicts.
#[derive(Debug, Clone)]
pub(crate) struct Committed {
    pub generation: u64,
    pub snapshot: Arc<Snapshot>,
    pub conflicts: Vec<OpenConflict>,
}

/// Mutable inputs plus the last commit.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub records: RecordSet,
    pub filters: Filters,
    /// Bumped on every input mutation. A build commits only if the
    /// generation it started with is still current.
    pub generation: u64,
    pub phase: BuildPhase,
    /// Recomputes currently running.
    pub running: usize,
    pub committed: Option<Committed>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            records: RecordSet::default(),
            filters: Filters::default(),
            generation: 0,
            phase: BuildPhase::Idle,
            running: 0,
            committed: None,
        }
    }
}

impl EngineState {
    /// Record an input mutation.
    pub fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Enter a recompute.
    pub fn begin(&mut self) {
        self.running += 1;
        self.phase = BuildPhase::Building;
    }

    /// Leave a recompute, committed or discarded.
    pub fn finish(&mut self) {
        self.running = self.running.saturating_sub(1);
        self.phase = if self.running > 0 {
            BuildPhase::Building
        } else if self.committed.is_some() {
            BuildPhase::Ready
        } else {
            BuildPhase::Idle
        };
    }

    /// Generation of the committed snapshot.
    pub fn committed_generation(&self) -> Option<u64> {
        self.committed.as_ref().map(|c| c.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_follows_running_recomputes() {
        let mut state = EngineState::default();
        state.begin();
        state.begin();
        state.finish();
        assert_eq!(state.phase, BuildPhase::Building);
        state.finish();
        assert_eq!(state.phase, BuildPhase::Idle);

        state.committed = Some(Committed {
            generation: 3,
            snapshot: Arc::new(Snapshot::empty("scope", Filters::default())),
            conflicts: Vec::new(),
        });
        state.begin();
        state.finish();
        assert_eq!(state.phase, BuildPhase::Ready);
        assert_eq!(state.committed_generation(), Some(3));
    }
}
