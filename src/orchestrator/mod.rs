//! Build orchestration.
//!
//! ## Recompute pass
//!
//! ```text
//! mutation ─→ generation += 1 ─→ recompute
//!                                   │
//!               scope key ──→ LRU cache ──hit──┐
//!                   │                          │
//!                   └─miss─→ single-flight ─→ executor (worker → local)
//!                                              │
//!                    load policies ─→ resolver.apply
//!                                              │
//!                  generation unchanged? ──no──→ discard
//!                                              │ yes
//!                                           commit ─→ BuildCompleted
//! ```
//!
//! The cache holds snapshots before the conflict pass, so a policy change
//! re-applies policies without rebuilding. No public operation returns an
//! error: worker failures fall back to local execution, store failures read
//! as "no policies" and failed writes are logged.

pub mod compute;
pub mod executor;
pub mod single_flight;
pub mod state;
pub mod worker;

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::builder::{BuildInput, GraphBuilder};
use crate::bundler::{BundleResult, EdgeBundler, ZoomBand};
use crate::config::EngineConfig;
use crate::conflict::{merged_list, ConflictResolver, ResolutionOutcome};
use crate::diff::{DiffEngine, DiffSnapshot};
use crate::router::{PathRouter, RouteResult};
use crate::store::{KeyValueStore, PolicyRepository};
use crate::telemetry::{EngineEvent, EventSink, TracingSink};
use crate::types::{ConflictResolution, Filters, OpenConflict, RecordSet, Snapshot, TimelineWindow};

pub use compute::{handle_message, ComputeJob, ComputeOutput};
pub use executor::{Executor, ExecutorError, FallbackExecutor, LocalExecutor, RemoteExecutor};
pub use single_flight::SingleFlight;
pub use state::BuildPhase;
pub use worker::{ThreadWorkerHost, WorkerError, WorkerHost};

use state::{Committed, EngineState};

/// What to diff the committed snapshot against.
#[derive(Debug, Clone, PartialEq)]
pub enum CompareTarget {
    /// The current records restricted to a timeline window.
    Window(TimelineWindow),
    /// The current records scoped to another agent.
    Agent(String),
}

/// Owns the engine inputs and the committed snapshot.
pub struct BuildOrchestrator<S: KeyValueStore> {
    config: EngineConfig,
    builder: GraphBuilder,
    resolver: ConflictResolver,
    router: PathRouter,
    executor: FallbackExecutor,
    repository: PolicyRepository<S>,
    sink: Arc<dyn EventSink>,
    cache: Mutex<LruCache<String, Arc<Snapshot>>>,
    flights: SingleFlight<Arc<Snapshot>>,
    state: RwLock<EngineState>,
    session_policies: Mutex<Vec<ConflictResolution>>,
    builds: AtomicU64,
}

impl<S: KeyValueStore> std::fmt::Debug for BuildOrchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .field("phase", &self.phase())
            .field("generation", &self.generation())
            .finish()
    }
}

impl<S: KeyValueStore> BuildOrchestrator<S> {
    /// Create an orchestrator. When the worker is enabled, builds run on a
    /// [`ThreadWorkerHost`] first.
    pub fn new(config: EngineConfig, store: Arc<S>) -> Self {
        let executor = if config.worker_enabled {
            primary_executor(Arc::new(ThreadWorkerHost::new()), &config)
        } else {
            FallbackExecutor::local()
        };
        let capacity = NonZeroUsize::new(config.cache_entries).unwrap_or(NonZeroUsize::MIN);

        Self {
            builder: GraphBuilder::new(config.build_params.clone()),
            resolver: ConflictResolver::new(),
            router: PathRouter::new(config.router_params.clone()),
            executor,
            repository: PolicyRepository::new(store),
            sink: Arc::new(TracingSink),
            cache: Mutex::new(LruCache::new(capacity)),
            flights: SingleFlight::new(),
            state: RwLock::new(EngineState::default()),
            session_policies: Mutex::new(Vec::new()),
            builds: AtomicU64::new(0),
            config,
        }
    }

    /// Use a different worker host. Ignored when the worker is disabled.
    pub fn with_worker_host<H: WorkerHost + 'static>(mut self, host: Arc<H>) -> Self {
        if self.config.worker_enabled {
            self.executor = primary_executor(host, &self.config);
        }
        self
    }

    /// Deliver events to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current build phase.
    pub fn phase(&self) -> BuildPhase {
        self.state.read().phase
    }

    /// Current input generation.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Current filters.
    pub fn filters(&self) -> Filters {
        self.state.read().filters.clone()
    }

    /// Jobs that fell back from the worker to local execution.
    pub fn fallback_count(&self) -> u64 {
        self.executor.fallback_count()
    }

    /// Builds actually executed (cache hits and joined flights excluded).
    pub fn builds_executed(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Latest committed snapshot.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.state
            .read()
            .committed
            .as_ref()
            .map(|c| Arc::clone(&c.snapshot))
    }

    /// Conflicts of the latest committed snapshot, sorted by id.
    pub fn conflicts(&self) -> Vec<OpenConflict> {
        self.state
            .read()
            .committed
            .as_ref()
            .map(|c| c.conflicts.clone())
            .unwrap_or_default()
    }

    /// Generation the committed snapshot was built from.
    pub fn committed_generation(&self) -> Option<u64> {
        self.state.read().committed_generation()
    }

    /// Restore persisted filters and recompute. Returns whether any were
    /// found.
    pub async fn restore_filters(&self) -> bool {
        let Some(filters) = self.repository.load_filters().await else {
            return false;
        };
        {
            let mut state = self.state.write();
            state.filters = filters.normalized();
            state.bump();
        }
        self.recompute().await;
        true
    }

    /// Replace the records and recompute.
    pub async fn set_records(&self, records: RecordSet) -> Arc<Snapshot> {
        {
            let mut state = self.state.write();
            state.records = records;
            state.bump();
        }
        self.recompute().await
    }

    /// Replace the filters, persist them and recompute.
    pub async fn set_filters(&self, filters: Filters) -> Arc<Snapshot> {
        let filters = filters.normalized();
        let lens_changed = {
            let mut state = self.state.write();
            let changed = state.filters.lens != filters.lens;
            state.filters = filters.clone();
            state.bump();
            changed
        };

        if let Err(e) = self.repository.save_filters(&filters).await {
            tracing::warn!(error = %e, "Failed to persist filters");
        }

        let snapshot = self.recompute().await;
        if lens_changed {
            self.sink.emit(&EngineEvent::LensChanged {
                lens: filters.lens,
                scope_key: snapshot.scope_key.clone(),
            });
        }
        snapshot
    }

    /// Record a resolution policy, persist it and recompute.
    ///
    /// The policy applies for the rest of the session even when persisting
    /// it fails. Structurally invalid policies are ignored.
    pub async fn resolve_conflict(&self, policy: ConflictResolution) -> Arc<Snapshot> {
        if let Some(defect) = policy.defect() {
            tracing::warn!(conflict_id = %policy.conflict_id, error = %defect, "Ignoring invalid policy");
            return self.recompute().await;
        }

        {
            let mut session = self.session_policies.lock();
            session.push(policy.clone());
            let merged = merged_list(std::mem::take(&mut *session));
            *session = merged;
        }

        if let Err(e) = self.repository.upsert(policy).await {
            tracing::warn!(error = %e, "Failed to persist conflict policy, keeping it for this session");
        }

        self.state.write().bump();
        self.recompute().await
    }

    /// Build (or fetch) the snapshot for the current inputs, apply policies
    /// and commit it unless newer inputs arrived meanwhile.
    ///
    /// Returns the committed snapshot. A discarded build returns the latest
    /// committed snapshot instead.
    pub async fn recompute(&self) -> Arc<Snapshot> {
        let (generation, input) = {
            let mut state = self.state.write();
            state.begin();
            (
                state.generation,
                BuildInput::new(state.records.clone(), state.filters.clone()),
            )
        };

        let outcome = self.resolve(input).await;
        let snapshot = Arc::new(outcome.snapshot);

        {
            let mut state = self.state.write();
            if state.generation != generation {
                state.finish();
                tracing::debug!(
                    generation,
                    current = state.generation,
                    scope_key = %snapshot.scope_key,
                    "Discarding stale build"
                );
                return state
                    .committed
                    .as_ref()
                    .map(|c| Arc::clone(&c.snapshot))
                    .unwrap_or(snapshot);
            }
            state.committed = Some(Committed {
                generation,
                snapshot: Arc::clone(&snapshot),
                conflicts: outcome.conflicts,
            });
            state.finish();
        }

        self.sink.emit(&EngineEvent::build_completed(&snapshot));
        snapshot
    }

    /// Diff the committed snapshot against `compare`.
    pub async fn diff_against(&self, compare: &Snapshot) -> Option<DiffSnapshot> {
        let base = self.snapshot()?;
        let job = ComputeJob::Diff {
            base: (*base).clone(),
            compare: compare.clone(),
        };
        match self.executor.execute(&job).await {
            Ok(ComputeOutput::Diffed { diff }) => Some(diff),
            _ => Some(DiffEngine::default().diff(&base, compare)),
        }
    }

    /// Diff the committed snapshot against a time- or agent-shifted build of
    /// the current records.
    pub async fn compare(&self, target: CompareTarget) -> Option<DiffSnapshot> {
        self.snapshot()?;
        let input = {
            let state = self.state.read();
            match &target {
                CompareTarget::Window(window) => {
                    BuildInput::new(state.records.within(*window), state.filters.clone())
                }
                CompareTarget::Agent(agent) => {
                    BuildInput::new(state.records.clone(), state.filters.clone()).for_agent(agent.as_str())
                }
            }
        };

        let compare = self.resolve(input).await;
        self.diff_against(&compare.snapshot).await
    }

    /// Visible edges of the committed snapshot at a zoom band.
    pub async fn bundle(&self, band: ZoomBand) -> Option<BundleResult> {
        let snapshot = self.snapshot()?;
        let job = ComputeJob::Bundle {
            snapshot: (*snapshot).clone(),
            zoom_band: band,
        };
        match self.executor.execute(&job).await {
            Ok(ComputeOutput::Bundled { bundle }) => Some(bundle),
            _ => Some(EdgeBundler::new().bundle(&snapshot, band)),
        }
    }

    /// Route a goal through the committed snapshot.
    pub fn route(&self, goal: &str) -> Option<RouteResult> {
        let snapshot = self.snapshot()?;
        self.router.route(&snapshot, goal)
    }

    async fn resolve(&self, input: BuildInput) -> ResolutionOutcome {
        let base = self.base_snapshot(input).await;
        let policies = self.effective_policies().await;
        self.resolver.apply(&base, &policies)
    }

    async fn effective_policies(&self) -> Vec<ConflictResolution> {
        let mut policies = self.repository.load_policies().await;
        let session: Vec<ConflictResolution> = self.session_policies.lock().clone();
        policies.extend(session);
        merged_list(policies)
    }

    async fn base_snapshot(&self, input: BuildInput) -> Arc<Snapshot> {
        let key = self.builder.scope_key(&input);
        let cached = self.cache.lock().get(&key).cloned();
        if let Some(hit) = cached {
            tracing::debug!(scope_key = %key, "Snapshot cache hit");
            return hit;
        }

        let cache_key = key.clone();
        self.flights
            .run(&key, move || async move {
                let snapshot = Arc::new(self.build(input).await);
                self.cache.lock().put(cache_key, Arc::clone(&snapshot));
                snapshot
            })
            .await
    }

    async fn build(&self, input: BuildInput) -> Snapshot {
        self.builds.fetch_add(1, Ordering::Relaxed);
        let job = ComputeJob::Build {
            input,
            params: self.builder.params().clone(),
        };
        match self.executor.execute(&job).await {
            Ok(ComputeOutput::Built { snapshot }) => snapshot,
            other => {
                tracing::warn!(
                    output = other.as_ref().map(ComputeOutput::kind).unwrap_or("error"),
                    "Executor returned no snapshot, building in place"
                );
                match job.build_input() {
                    Some(input) => self.builder.build(input),
                    None => Snapshot::empty(String::new(), Filters::default()),
                }
            }
        }
    }
}

fn primary_executor<H: WorkerHost + 'static>(host: Arc<H>, config: &EngineConfig) -> FallbackExecutor {
    let remote: Arc<dyn Executor> = Arc::new(RemoteExecutor::new(host));
    FallbackExecutor::with_primary(remote, config.worker_timeout(), config.worker_retries)
}
