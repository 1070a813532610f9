//! A fully wired engine for integration tests.

use crate::local::InMemoryLocal;
use crate::remote::InMemoryRemote;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use syncbridge_core::{
    Clock, Fields, Job, JobAction, JobId, JobStatus, LocalId, ManualClock, NewJob, RemoteId, Timestamp,
};
use syncbridge_engine::{
    ChangeCapture, DispatchReport, Dispatcher, EngineConfig, ModuleRegistry, SyncContext, SyncModule,
};
use syncbridge_store::{
    EntityMapStore, JobQueue, MemoryEntityMap, MemoryJobQueue, SqliteDatabase, SqliteEntityMap,
    SqliteJobQueue,
};
use tempfile::TempDir;

/// Initial time of the harness clock.
pub const EPOCH: Timestamp = 1_700_000_000_000;

/// Upper bound on runs in [`Harness::drain`].
const MAX_DRAIN_RUNS: usize = 1_000;

/// Builder for [`Harness`].
#[derive(Default)]
pub struct HarnessBuilder {
    modules: Vec<Arc<dyn SyncModule>>,
    config: EngineConfig,
    sqlite: bool,
    observe_local_writes: bool,
}

impl HarnessBuilder {
    /// Registers a module.
    pub fn module(self, module: impl SyncModule + 'static) -> Self {
        self.module_arc(Arc::new(module))
    }

    /// Registers a shared module.
    pub fn module_arc(mut self, module: Arc<dyn SyncModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Backs the queue and map with a SQLite file in a temporary directory.
    pub fn sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    /// Feeds every write to the local store back into change capture, for
    /// each registered module owning the entity type.
    pub fn observe_local_writes(mut self) -> Self {
        self.observe_local_writes = true;
        self
    }

    /// Wires everything together.
    ///
    /// # Panics
    ///
    /// Panics if a module is registered twice or the database cannot be
    /// created.
    pub fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::new(EPOCH));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let (queue, map, temp_dir): (Arc<dyn JobQueue>, Arc<dyn EntityMapStore>, _) = if self.sqlite {
            let dir = TempDir::new().expect("Failed to create temp directory");
            let db = SqliteDatabase::open(dir.path().join("sync.db")).expect("Failed to open sync database");
            (
                Arc::new(SqliteJobQueue::with_clock(db.clone(), Arc::clone(&dyn_clock))),
                Arc::new(SqliteEntityMap::with_clock(db, Arc::clone(&dyn_clock))),
                Some(dir),
            )
        } else {
            (
                Arc::new(MemoryJobQueue::with_clock(Arc::clone(&dyn_clock))),
                Arc::new(MemoryEntityMap::with_clock(Arc::clone(&dyn_clock))),
                None,
            )
        };

        let mut registry = ModuleRegistry::new();
        for module in self.modules {
            registry.register_arc(module).expect("Failed to register module");
        }

        let remote = InMemoryRemote::new();
        let local = InMemoryLocal::new();
        let ctx = Arc::new(
            SyncContext::new(
                Arc::new(registry),
                queue,
                map,
                Arc::new(remote.clone()),
                Arc::new(local.clone()),
            )
            .with_clock(dyn_clock)
            .with_config(self.config),
        );

        if self.observe_local_writes {
            // Weak: the context owns the store holding this observer.
            let weak = Arc::downgrade(&ctx);
            local.set_observer(Arc::new(move |entity_type, action, local_id| {
                let Some(ctx) = weak.upgrade() else {
                    return;
                };
                let capture = ChangeCapture::new(Arc::clone(&ctx));
                for module_id in ctx.registry().module_ids() {
                    let owns = ctx
                        .registry()
                        .get(&module_id)
                        .is_some_and(|m| m.registration().remote_model(entity_type).is_some());
                    if owns {
                        capture
                            .local_changed(&module_id, entity_type, action, local_id, Fields::new())
                            .expect("Failed to capture local change");
                    }
                }
            }));
        }

        Harness {
            clock,
            remote,
            local,
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&ctx))),
            capture: ChangeCapture::new(Arc::clone(&ctx)),
            ctx,
            _temp_dir: temp_dir,
        }
    }
}

/// An engine on a manual clock with in-memory collaborators.
pub struct Harness {
    /// The engine clock.
    pub clock: Arc<ManualClock>,
    /// The remote system.
    pub remote: InMemoryRemote,
    /// The local system.
    pub local: InMemoryLocal,
    /// The shared context.
    pub ctx: Arc<SyncContext>,
    /// The dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Change capture over the same context.
    pub capture: ChangeCapture,
    /// Kept alive for SQLite-backed harnesses.
    _temp_dir: Option<TempDir>,
}

impl Harness {
    /// Starts a builder.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// The job queue.
    pub fn queue(&self) -> &dyn JobQueue {
        self.ctx.queue()
    }

    /// The entity map.
    pub fn map(&self) -> &dyn EntityMapStore {
        self.ctx.map()
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Runs one dispatch batch.
    pub fn run_once(&self) -> DispatchReport {
        self.dispatcher.run_once().expect("Dispatch run failed")
    }

    /// Runs batches until nothing is claimable at the current time.
    ///
    /// Returns the summed report.
    pub fn drain(&self) -> DispatchReport {
        let mut total = DispatchReport::default();
        for _ in 0..MAX_DRAIN_RUNS {
            let report = self.run_once();
            if report.claimed == 0 {
                return total;
            }
            total.claimed += report.claimed;
            total.completed += report.completed;
            total.rescheduled += report.rescheduled;
            total.dead += report.dead;
            total.lost_claims += report.lost_claims;
            total.duration += report.duration;
        }
        panic!("queue did not drain after {} runs", MAX_DRAIN_RUNS);
    }

    /// Fetches a job that must exist.
    pub fn job(&self, job_id: JobId) -> Job {
        self.queue()
            .get(job_id)
            .expect("Failed to read job")
            .unwrap_or_else(|| panic!("job {} not found", job_id))
    }

    /// Jobs in a given status.
    pub fn jobs(&self, status: JobStatus) -> Vec<Job> {
        self.queue().list(Some(status), usize::MAX, 0).expect("Failed to list jobs")
    }

    /// Enqueues a push job through change capture's operator path.
    pub fn push(&self, module_id: &str, entity_type: &str, action: JobAction, local_id: LocalId) -> JobId {
        self.capture
            .enqueue(NewJob::push(module_id, entity_type, action, local_id))
            .expect("Failed to enqueue push")
            .job_id()
    }

    /// Enqueues a pull job through change capture's operator path.
    pub fn pull(&self, module_id: &str, entity_type: &str, action: JobAction, remote_id: RemoteId) -> JobId {
        self.capture
            .enqueue(NewJob::pull(module_id, entity_type, action, remote_id))
            .expect("Failed to enqueue pull")
            .job_id()
    }

    /// The remote id linked to a local entity.
    pub fn remote_id(&self, module_id: &str, entity_type: &str, local_id: LocalId) -> Option<RemoteId> {
        self.map()
            .get_remote_id(module_id, entity_type, local_id)
            .expect("Failed to read entity map")
    }

    /// Seeds a local record without triggering the observer.
    pub fn seed_local(&self, entity_type: &str, local_id: LocalId, values: Value) {
        self.local.put(entity_type, local_id, crate::fixtures::fields(values));
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("now", &self.clock.now())
            .field("sqlite", &self._temp_dir.is_some())
            .finish_non_exhaustive()
    }
}
