//! Engine events.
//!
//! The orchestrator reports completed builds and lens changes through an
//! [`EventSink`]. Sinks must not block; the orchestrator calls them inline.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{Lens, Snapshot};

/// An observable engine event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A snapshot was committed.
    #[serde(rename_all = "camelCase")]
    BuildCompleted {
        /// Scope key of the committed snapshot.
        scope_key: String,
        /// Node count.
        node_count: usize,
        /// Edge count.
        edge_count: usize,
        /// Wall-clock build time.
        build_ms: u64,
        /// Conflict node count.
        conflict_count: usize,
        /// Hot node count.
        hot_node_count: usize,
    },
    /// The grouping lens changed.
    #[serde(rename_all = "camelCase")]
    LensChanged {
        /// New lens.
        lens: Lens,
        /// Scope key the new lens resolves to.
        scope_key: String,
    },
}

impl EngineEvent {
    /// Build-completed event for a committed snapshot.
    pub fn build_completed(snapshot: &Snapshot) -> Self {
        Self::BuildCompleted {
            scope_key: snapshot.scope_key.clone(),
            node_count: snapshot.stats.node_count,
            edge_count: snapshot.stats.edge_count,
            build_ms: snapshot.stats.build_ms,
            conflict_count: snapshot.stats.conflict_count,
            hot_node_count: snapshot.stats.hot_node_count,
        }
    }

    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BuildCompleted { .. } => "build_completed",
            Self::LensChanged { .. } => "lens_changed",
        }
    }
}

/// Event sink interface.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: &EngineEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: &EngineEvent) {}
}

/// Sink that logs events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::BuildCompleted {
                scope_key,
                node_count,
                edge_count,
                build_ms,
                conflict_count,
                hot_node_count,
            } => tracing::info!(
                event = event.name(),
                scope_key = %scope_key,
                node_count,
                edge_count,
                build_ms,
                conflict_count,
                hot_node_count,
                "Snapshot committed"
            ),
            EngineEvent::LensChanged { lens, scope_key } => tracing::info!(
                event = event.name(),
                lens = lens.as_str(),
                scope_key = %scope_key,
                "Lens changed"
            ),
        }
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Number of events with a given name.
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &EngineEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Filters;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        let snapshot = Snapshot::empty("scope:x", Filters::default());
        sink.emit(&EngineEvent::build_completed(&snapshot));
        sink.emit(&EngineEvent::LensChanged {
            lens: Lens::Recency,
            scope_key: "scope:y".into(),
        });
        assert_eq!(sink.count("build_completed"), 1);
        assert_eq!(sink.count("lens_changed"), 1);
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn test_event_json_shape() {
        let event = EngineEvent::LensChanged {
            lens: Lens::FailureMode,
            scope_key: "scope:z".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "lens_changed");
        assert_eq!(json["scopeKey"], "scope:z");
    }
}
