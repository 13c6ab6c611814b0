//! Integration tests for the build orchestrator.
//!
//! These exercise the worker boundary, single-flight, stale-build discard and
//! policy persistence through the public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use lesson_graph_kernel::conflict::META_BASE_IMPACT;
use lesson_graph_kernel::orchestrator::handle_message;
use lesson_graph_kernel::{
    conflict_id, BuildInput, BuildOrchestrator, BuildPhase, BundleResult, CaseRecord,
    ComputeOutput, ConflictResolution, EngineConfig, Filters, GraphBuilder, InMemoryKeyValueStore,
    LessonRecord, Lens, Outcome, RecordSet, RecordingSink, Snapshot, Stance, ThreadWorkerHost, WorkerError,
    WorkerHost, ZoomBand, POLICY_STORE_KEY,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test hosts
// ─────────────────────────────────────────────────────────────────────────────

enum Behavior {
    /// Answer through the real message handler.
    Answer,
    /// Always fail.
    Fail,
    /// Reply with a valid output of the wrong kind.
    WrongShape,
}

/// Worker host with a call counter and an optional delay.
struct TestHost {
    behavior: Behavior,
    delay: Duration,
    /// Only delay messages containing this marker. `None` delays all.
    slow_marker: Option<&'static str>,
    calls: AtomicUsize,
}

impl TestHost {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            slow_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn only_when(mut self, marker: &'static str) -> Self {
        self.slow_marker = Some(marker);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHost for TestHost {
    async fn call(&self, message: String) -> Result<String, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slow = self.slow_marker.map_or(true, |m| message.contains(m));
        if slow && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Answer => Ok(handle_message(&message)),
            Behavior::Fail => Err(WorkerError::Crashed("boom".to_string())),
            Behavior::WrongShape => {
                let output = ComputeOutput::Bundled {
                    bundle: BundleResult {
                        zoom_band: ZoomBand::Far,
                        visible_edge_ids: Vec::new(),
                        hidden_count: 0,
                        build_ms: 0,
                    },
                };
                Ok(serde_json::to_string(&output).unwrap())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

fn case(id: &str, symbol: &str, outcome: Outcome, ts: i64) -> CaseRecord {
    CaseRecord {
        id: id.to_string(),
        agent_id: Some("a1".to_string()),
        symbol: Some(symbol.to_string()),
        pattern: Some("breakout".to_string()),
        timeframe: Some("M15".to_string()),
        outcome,
        opened_at_ms: ts,
        closed_at_ms: Some(ts + 1_000),
        ..CaseRecord::default()
    }
}

fn lesson(id: &str, confidence: f64, stance: Stance) -> LessonRecord {
    LessonRecord {
        id: id.to_string(),
        agent_id: Some("a1".to_string()),
        symbol: Some("XAUUSD".to_string()),
        pattern: Some("breakout".to_string()),
        timeframe: Some("M15".to_string()),
        title: format!("Lesson {id}"),
        text: "Enter on the retest".to_string(),
        confidence,
        stance: Some(stance),
        created_at_ms: 1_000,
        updated_at_ms: 1_000,
        ..LessonRecord::default()
    }
}

fn records() -> RecordSet {
    RecordSet {
        cases: (0..6)
            .map(|i| {
                let outcome = if i % 3 == 0 { Outcome::Loss } else { Outcome::Win };
                case(&format!("c{i}"), "XAUUSD", outcome, i * 10_000)
            })
            .collect(),
        lessons: vec![lesson("L1", 0.8, Stance::Favor), lesson("L2", 0.6, Stance::Avoid)],
        symbol_learnings: Vec::new(),
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        worker_timeout_ms: 2_000,
        worker_retries: 1,
        ..EngineConfig::default()
    }
}

fn with_host(host: Arc<TestHost>, config: EngineConfig) -> BuildOrchestrator<InMemoryKeyValueStore> {
    BuildOrchestrator::new(config, Arc::new(InMemoryKeyValueStore::new())).with_worker_host(host)
}

async fn local_snapshot(records: RecordSet) -> Arc<Snapshot> {
    let orch = BuildOrchestrator::new(
        EngineConfig::default().without_worker(),
        Arc::new(InMemoryKeyValueStore::new()),
    );
    orch.set_records(records).await
}

fn stable(snapshot: &Snapshot) -> Snapshot {
    let mut snapshot = snapshot.clone();
    snapshot.stats.build_ms = 0;
    snapshot
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker boundary
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_thread_worker_matches_local() {
    let orch = BuildOrchestrator::new(config(), Arc::new(InMemoryKeyValueStore::new()))
        .with_worker_host(Arc::new(ThreadWorkerHost::new()));
    let remote = orch.set_records(records()).await;
    let local = local_snapshot(records()).await;

    assert_eq!(orch.fallback_count(), 0);
    assert_eq!(stable(&remote), stable(&local));
}

#[tokio::test]
async fn test_failing_worker_falls_back() {
    let host = Arc::new(TestHost::new(Behavior::Fail));
    let orch = with_host(Arc::clone(&host), config());
    let snapshot = orch.set_records(records()).await;

    // one attempt plus one retry
    assert_eq!(host.calls(), 2);
    assert_eq!(orch.fallback_count(), 1);
    assert_eq!(stable(&snapshot), stable(&*local_snapshot(records()).await));
}

#[tokio::test]
async fn test_worker_timeout_falls_back() {
    let host = Arc::new(TestHost::new(Behavior::Answer).delayed(Duration::from_millis(500)));
    let config = EngineConfig {
        worker_timeout_ms: 20,
        worker_retries: 0,
        ..EngineConfig::default()
    };
    let orch = with_host(Arc::clone(&host), config);
    let snapshot = orch.set_records(records()).await;

    assert_eq!(host.calls(), 1);
    assert_eq!(orch.fallback_count(), 1);
    assert!(snapshot.node("symbol:a1:XAUUSD").is_some());
}

#[tokio::test]
async fn test_wrong_reply_shape_falls_back() {
    let host = Arc::new(TestHost::new(Behavior::WrongShape));
    let orch = with_host(Arc::clone(&host), config());
    let snapshot = orch.set_records(records()).await;

    assert_eq!(orch.fallback_count(), 1);
    assert_eq!(stable(&snapshot), stable(&*local_snapshot(records()).await));
}

#[tokio::test]
async fn test_disabled_worker_is_never_called() {
    let host = Arc::new(TestHost::new(Behavior::Answer));
    let orch = with_host(Arc::clone(&host), config().without_worker());
    orch.set_records(records()).await;

    assert_eq!(host.calls(), 0);
    assert_eq!(orch.fallback_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_recomputes_share_one_build() {
    let host = Arc::new(TestHost::new(Behavior::Answer).delayed(Duration::from_millis(50)));
    let orch = with_host(Arc::clone(&host), config());

    let (a, b) = tokio::join!(orch.recompute(), orch.recompute());

    assert_eq!(host.calls(), 1);
    assert_eq!(orch.builds_executed(), 1);
    assert_eq!(a.scope_key, b.scope_key);
}

#[tokio::test]
async fn test_stale_build_is_discarded() {
    let host = Arc::new(
        TestHost::new(Behavior::Answer)
            .delayed(Duration::from_millis(300))
            .only_when("slow-case"),
    );
    let sink = Arc::new(RecordingSink::new());
    let orch = Arc::new(with_host(Arc::clone(&host), config()).with_sink(sink.clone()));

    let slow = RecordSet {
        cases: vec![case("slow-case", "XAUUSD", Outcome::Win, 1_000)],
        ..RecordSet::default()
    };
    let fast = RecordSet {
        cases: vec![case("fast-case", "EURUSD", Outcome::Loss, 2_000)],
        ..RecordSet::default()
    };

    let background = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.set_records(slow).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let committed = orch.set_records(fast.clone()).await;
    let returned_by_slow = background.await.unwrap();

    let expected = GraphBuilder::default().scope_key(&BuildInput::new(fast, Filters::default()));
    assert_eq!(committed.scope_key, expected);
    assert_eq!(returned_by_slow.scope_key, expected);
    assert_eq!(orch.snapshot().unwrap().scope_key, expected);
    assert_eq!(sink.count("build_completed"), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_resolution_is_persisted_and_reapplied() {
    let store = Arc::new(InMemoryKeyValueStore::new());
    let first = BuildOrchestrator::new(config().without_worker(), Arc::clone(&store));
    first.set_records(records()).await;
    assert_eq!(first.conflicts().iter().filter(|c| c.is_open()).count(), 1);

    let policy = ConflictResolution::new("L1", "L2", 5_000, "user").with_precedence("L1");
    let resolved = first.resolve_conflict(policy).await;
    assert_eq!(resolved.node("lesson:L2").unwrap().impact_score, 0.0);

    let raw = store.raw(POLICY_STORE_KEY).unwrap();
    assert!(raw.contains(&conflict_id("L1", "L2")));

    let second = BuildOrchestrator::new(config().without_worker(), store);
    let snapshot = second.set_records(records()).await;
    let loser = snapshot.node("lesson:L2").unwrap();
    assert_eq!(loser.impact_score, 0.0);
    assert!(loser.meta_f64(META_BASE_IMPACT).is_some());
    assert!(second.conflicts().iter().all(|c| !c.is_open()));
}

#[tokio::test]
async fn test_offline_store_keeps_session_policy() {
    let store = Arc::new(InMemoryKeyValueStore::new());
    let orch = BuildOrchestrator::new(config().without_worker(), Arc::clone(&store));
    orch.set_records(records()).await;
    store.set_offline(true);

    let policy = ConflictResolution::new("L1", "L2", 5_000, "user").with_precedence("L2");
    let snapshot = orch.resolve_conflict(policy).await;

    assert_eq!(snapshot.node("lesson:L1").unwrap().impact_score, 0.0);
    assert!(store.raw(POLICY_STORE_KEY).is_none());
}

#[tokio::test]
async fn test_policy_change_reuses_cached_build() {
    let orch = BuildOrchestrator::new(config().without_worker(), Arc::new(InMemoryKeyValueStore::new()));
    orch.set_records(records()).await;

    let policy = ConflictResolution::new("L1", "L2", 5_000, "user").with_precedence("L1");
    orch.resolve_conflict(policy).await;

    assert_eq!(orch.builds_executed(), 1);
}

#[tokio::test]
async fn test_restore_during_build_settles_ready() {
    let store = Arc::new(InMemoryKeyValueStore::new());
    BuildOrchestrator::new(config().without_worker(), Arc::clone(&store))
        .set_filters(Filters::with_lens(Lens::Recency))
        .await;

    let host = Arc::new(TestHost::new(Behavior::Answer).delayed(Duration::from_millis(200)));
    let orch = Arc::new(
        BuildOrchestrator::new(config(), Arc::clone(&store)).with_worker_host(Arc::clone(&host)),
    );

    let background = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.set_records(records()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orch.restore_filters().await);
    background.await.unwrap();

    assert_eq!(orch.phase(), BuildPhase::Ready);
    assert_eq!(orch.committed_generation(), Some(orch.generation()));
    assert_eq!(orch.snapshot().unwrap().filters.lens, Lens::Recency);
    assert!(orch.bundle(ZoomBand::Far).await.is_some());
}
