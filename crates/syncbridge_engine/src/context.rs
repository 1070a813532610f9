//! The context threaded through every sync operation.

use crate::classify::classify_store;
use crate::config::EngineConfig;
use crate::local::LocalStore;
use crate::registry::ModuleRegistry;
use crate::remote::RemoteClient;
use crate::resolver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use syncbridge_core::{Clock, EntityKey, LocalId, RemoteId, SyncFailure, SystemClock};
use syncbridge_store::{EntityMapStore, JobQueue, StoreError};
use tracing::warn;

/// Everything a module may touch while syncing.
pub struct SyncContext {
    registry: Arc<ModuleRegistry>,
    queue: Arc<dyn JobQueue>,
    map: Arc<dyn EntityMapStore>,
    remote: Arc<dyn RemoteClient>,
    local: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    import_guard: ImportGuard,
    config: EngineConfig,
}

impl SyncContext {
    /// Creates a context on the system clock with the default configuration.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        queue: Arc<dyn JobQueue>,
        map: Arc<dyn EntityMapStore>,
        remote: Arc<dyn RemoteClient>,
        local: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            registry,
            queue,
            map,
            remote,
            local,
            clock: Arc::new(SystemClock),
            import_guard: ImportGuard::new(),
            config: EngineConfig::default(),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registered modules.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Job queue.
    pub fn queue(&self) -> &dyn JobQueue {
        self.queue.as_ref()
    }

    /// Entity map.
    pub fn map(&self) -> &dyn EntityMapStore {
        self.map.as_ref()
    }

    /// Remote client.
    pub fn remote(&self) -> &dyn RemoteClient {
        self.remote.as_ref()
    }

    /// Local store.
    pub fn local(&self) -> &dyn LocalStore {
        self.local.as_ref()
    }

    /// Clock.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Import guard.
    pub fn import_guard(&self) -> &ImportGuard {
        &self.import_guard
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Remote id of an entity that must already be synced.
    ///
    /// Fails transiently when the entity is not mapped yet.
    pub fn remote_id_of(&self, module_id: &str, entity_type: &str, local_id: LocalId) -> Result<RemoteId, SyncFailure> {
        self.map
            .get_remote_id(module_id, entity_type, local_id)
            .map_err(|e| classify_store(&e))?
            .ok_or_else(|| {
                SyncFailure::transient(format!(
                    "{} is not synced yet",
                    EntityKey::new(module_id, entity_type, local_id)
                ))
            })
    }

    /// Local id linked to a remote record, if any.
    pub fn local_id_of(
        &self,
        module_id: &str,
        entity_type: &str,
        remote_id: RemoteId,
    ) -> Result<Option<LocalId>, SyncFailure> {
        self.map
            .get_local_id(module_id, entity_type, remote_id)
            .map_err(|e| classify_store(&e))
    }

    /// Returns the remote id of an entity, pushing it inline first if it is
    /// not mapped yet.
    pub fn ensure_synced(&self, module_id: &str, entity_type: &str, local_id: LocalId) -> Result<RemoteId, SyncFailure> {
        resolver::ensure_synced(self, module_id, entity_type, local_id)
    }

    /// Records a link. Saving an existing identical link succeeds.
    ///
    /// A conflicting link means another worker linked one of the two sides
    /// concurrently; the caller retries.
    pub fn record_mapping(
        &self,
        module_id: &str,
        entity_type: &str,
        local_id: LocalId,
        remote_id: RemoteId,
        remote_model: &str,
    ) -> Result<(), SyncFailure> {
        match self.map.save(module_id, entity_type, local_id, remote_id, remote_model) {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict { existing, .. }) => {
                warn!(
                    module_id,
                    entity_type,
                    local_id,
                    remote_id,
                    existing_local_id = existing.local_id,
                    existing_remote_id = existing.remote_id,
                    "identity race while recording mapping"
                );
                Err(SyncFailure::transient(format!(
                    "identity race: {} is linked to {} #{}",
                    EntityKey::new(module_id, entity_type, existing.local_id),
                    existing.remote_model,
                    existing.remote_id
                )))
            }
            Err(e) => Err(classify_store(&e)),
        }
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("registry", &self.registry)
            .field("clock", &self.clock)
            .field("import_guard", &self.import_guard)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Suppresses change capture while the engine itself writes local records.
///
/// Without it, saving a pulled record would enqueue a push of the same
/// record straight back to the remote. An import only silences the thread
/// performing it; local edits made concurrently on other threads are still
/// captured.
#[derive(Debug, Default)]
pub struct ImportGuard {
    active: Mutex<HashMap<GuardKey, usize>>,
}

type GuardKey = (ThreadId, String, String);

impl ImportGuard {
    /// Creates an inactive guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `(module_id, entity_type)` as importing on the current thread
    /// until the token drops.
    pub fn enter(&self, module_id: &str, entity_type: &str) -> ImportToken<'_> {
        let key = (thread::current().id(), module_id.to_string(), entity_type.to_string());
        *self.active.lock().entry(key.clone()).or_insert(0) += 1;
        ImportToken {
            guard: self,
            key,
            _thread_bound: PhantomData,
        }
    }

    /// Returns true while the current thread imports `(module_id, entity_type)`.
    pub fn is_active(&self, module_id: &str, entity_type: &str) -> bool {
        let key = (thread::current().id(), module_id.to_string(), entity_type.to_string());
        self.active.lock().get(&key).is_some_and(|&n| n > 0)
    }
}

/// Token returned by [`ImportGuard::enter`].
///
/// Not `Send`: it must drop on the thread that entered the guard.
#[derive(Debug)]
pub struct ImportToken<'a> {
    guard: &'a ImportGuard,
    key: GuardKey,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for ImportToken<'_> {
    fn drop(&mut self) {
        let mut active = self.guard.active.lock();
        if let Some(n) = active.get_mut(&self.key) {
            *n -= 1;
            if *n == 0 {
                active.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, FakeLocal, FakeRemote};
    use syncbridge_core::ErrorKind;

    #[test]
    fn import_guard_nests() {
        let guard = ImportGuard::new();
        assert!(!guard.is_active("orders", "order"));
        {
            let _outer = guard.enter("orders", "order");
            {
                let _inner = guard.enter("orders", "order");
                assert!(guard.is_active("orders", "order"));
            }
            assert!(guard.is_active("orders", "order"));
            assert!(!guard.is_active("orders", "line"));
        }
        assert!(!guard.is_active("orders", "order"));
    }

    #[test]
    fn import_guard_is_scoped_to_the_importing_thread() {
        let guard = ImportGuard::new();
        let entered = std::sync::Barrier::new(2);
        let checked = std::sync::Barrier::new(2);
        std::thread::scope(|s| {
            s.spawn(|| {
                let _token = guard.enter("cal", "event");
                assert!(guard.is_active("cal", "event"));
                entered.wait();
                checked.wait();
            });
            entered.wait();
            assert!(!guard.is_active("cal", "event"));
            checked.wait();
        });
        assert!(!guard.is_active("cal", "event"));
    }

    #[test]
    fn remote_id_of_unmapped_entity_is_transient() {
        let ctx = context(vec![], FakeRemote::new(), FakeLocal::new());
        let failure = ctx.remote_id_of("orders", "order", 5).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Transient);
        assert_eq!(failure.message, "orders/order#5 is not synced yet");

        ctx.record_mapping("orders", "order", 5, 50, "sale.order").unwrap();
        assert_eq!(ctx.remote_id_of("orders", "order", 5).unwrap(), 50);
        assert_eq!(ctx.local_id_of("orders", "order", 50).unwrap(), Some(5));
    }

    #[test]
    fn record_mapping_is_idempotent_and_reports_races() {
        let ctx = context(vec![], FakeRemote::new(), FakeLocal::new());
        ctx.record_mapping("orders", "order", 5, 50, "sale.order").unwrap();
        ctx.record_mapping("orders", "order", 5, 50, "sale.order").unwrap();

        let failure = ctx.record_mapping("orders", "order", 6, 50, "sale.order").unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Transient);
        assert!(failure.message.contains("identity race"));
    }
}
