//! Minimal collaborators for unit tests.

use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::local::{LocalResult, LocalStore};
use crate::module::SyncModule;
use crate::registry::ModuleRegistry;
use crate::remote::{RemoteClient, RemoteError, RemoteResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use syncbridge_core::{Domain, Fields, LocalId, ManualClock, RemoteId};
use syncbridge_store::{MemoryEntityMap, MemoryJobQueue};

#[derive(Default)]
struct RemoteState {
    next_id: RemoteId,
    models: HashMap<String, BTreeMap<RemoteId, Fields>>,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
}

impl RemoteState {
    fn call(&mut self, op: &'static str) -> RemoteResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, model: &str, values: Fields) -> RemoteId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.models.entry(model.to_string()).or_default().insert(id, values);
        id
    }

    pub fn record(&self, model: &str, id: RemoteId) -> Option<Fields> {
        self.state.lock().models.get(model)?.get(&id).cloned()
    }

    pub fn len(&self, model: &str) -> usize {
        self.state.lock().models.get(model).map_or(0, BTreeMap::len)
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn fail_next(&self, op: &'static str, error: RemoteError) {
        self.state.lock().failures.entry(op).or_default().push_back(error);
    }
}

impl RemoteClient for FakeRemote {
    fn create(&self, model: &str, values: &Fields) -> RemoteResult<RemoteId> {
        self.state.lock().call("create")?;
        Ok(self.insert(model, values.clone()))
    }

    fn write(&self, model: &str, ids: &[RemoteId], values: &Fields) -> RemoteResult<bool> {
        let mut state = self.state.lock();
        state.call("write")?;
        let records = state.models.entry(model.to_string()).or_default();
        for id in ids {
            let record = records.get_mut(id).ok_or_else(|| RemoteError::NotFound {
                model: model.to_string(),
                id: *id,
            })?;
            record.extend(values.clone());
        }
        Ok(true)
    }

    fn unlink(&self, model: &str, ids: &[RemoteId]) -> RemoteResult<bool> {
        let mut state = self.state.lock();
        state.call("unlink")?;
        let records = state.models.entry(model.to_string()).or_default();
        for id in ids {
            if records.remove(id).is_none() {
                return Err(RemoteError::NotFound {
                    model: model.to_string(),
                    id: *id,
                });
            }
        }
        Ok(true)
    }

    fn search(&self, model: &str, domain: &Domain, limit: Option<usize>) -> RemoteResult<Vec<RemoteId>> {
        let mut state = self.state.lock();
        state.call("search")?;
        let Some(records) = state.models.get(model) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|(_, values)| domain.matches(values))
            .map(|(id, _)| *id)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn read(&self, model: &str, ids: &[RemoteId], _fields: &[String]) -> RemoteResult<Vec<Fields>> {
        let mut state = self.state.lock();
        state.call("read")?;
        let Some(records) = state.models.get(model) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                let mut values = records.get(id)?.clone();
                values.insert("id".into(), Value::from(*id));
                Some(values)
            })
            .collect())
    }

    fn execute(&self, _model: &str, _method: &str, _args: Vec<Value>) -> RemoteResult<Value> {
        self.state.lock().call("execute")?;
        Ok(Value::Bool(true))
    }
}

#[derive(Default)]
struct LocalState {
    next_id: LocalId,
    tables: HashMap<String, BTreeMap<LocalId, Fields>>,
}

#[derive(Clone, Default)]
pub struct FakeLocal {
    state: Arc<Mutex<LocalState>>,
}

impl FakeLocal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, entity_type: &str, id: LocalId, fields: Fields) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(id);
        state.tables.entry(entity_type.to_string()).or_default().insert(id, fields);
    }

    pub fn get(&self, entity_type: &str, id: LocalId) -> Option<Fields> {
        self.state.lock().tables.get(entity_type)?.get(&id).cloned()
    }
}

impl LocalStore for FakeLocal {
    fn load(&self, entity_type: &str, id: LocalId) -> LocalResult<Option<Fields>> {
        Ok(self.get(entity_type, id))
    }

    fn save(&self, entity_type: &str, fields: &Fields, id: Option<LocalId>) -> LocalResult<LocalId> {
        let mut state = self.state.lock();
        let id = match id {
            Some(id) => id,
            None => {
                state.next_id += 1;
                state.next_id
            }
        };
        state
            .tables
            .entry(entity_type.to_string())
            .or_default()
            .insert(id, fields.clone());
        Ok(id)
    }

    fn delete(&self, entity_type: &str, id: LocalId) -> LocalResult<bool> {
        Ok(self
            .state
            .lock()
            .tables
            .get_mut(entity_type)
            .and_then(|t| t.remove(&id))
            .is_some())
    }
}

pub const START: i64 = 1_000_000;

pub fn context_with_clock(
    modules: Vec<Arc<dyn SyncModule>>,
    remote: FakeRemote,
    local: FakeLocal,
    config: EngineConfig,
    clock: Arc<ManualClock>,
) -> SyncContext {
    let mut registry = ModuleRegistry::new();
    for module in modules {
        registry.register_arc(module).unwrap();
    }
    SyncContext::new(
        Arc::new(registry),
        Arc::new(MemoryJobQueue::with_clock(clock.clone())),
        Arc::new(MemoryEntityMap::with_clock(clock.clone())),
        Arc::new(remote),
        Arc::new(local),
    )
    .with_clock(clock)
    .with_config(config)
}

pub fn context_with_config(
    modules: Vec<Arc<dyn SyncModule>>,
    remote: FakeRemote,
    local: FakeLocal,
    config: EngineConfig,
) -> SyncContext {
    context_with_clock(modules, remote, local, config, Arc::new(ManualClock::new(START)))
}

pub fn context(modules: Vec<Arc<dyn SyncModule>>, remote: FakeRemote, local: FakeLocal) -> SyncContext {
    context_with_config(modules, remote, local, EngineConfig::default())
}
