//! In-memory remote system.
//!
//! Models are created on first write. Every call is counted, and failures
//! can be injected per operation.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use syncbridge_core::{Domain, Fields, RemoteId};
use syncbridge_engine::{RemoteClient, RemoteError, RemoteResult};

/// A remote operation, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// `create`
    Create,
    /// `write`
    Write,
    /// `unlink`
    Unlink,
    /// `search`
    Search,
    /// `read`
    Read,
    /// `execute`
    Execute,
}

/// A recorded `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteCall {
    /// Model.
    pub model: String,
    /// Method name.
    pub method: String,
    /// Arguments.
    pub args: Vec<Value>,
}

#[derive(Debug, Default)]
struct State {
    next_id: RemoteId,
    models: HashMap<String, BTreeMap<RemoteId, Fields>>,
    missing_models: HashSet<String>,
    calls: HashMap<RemoteOp, usize>,
    failures: HashMap<RemoteOp, VecDeque<RemoteError>>,
    executed: Vec<ExecuteCall>,
}

impl State {
    fn enter(&mut self, op: RemoteOp, model: &str) -> RemoteResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if self.missing_models.contains(model) {
            return Err(RemoteError::MissingModel(model.to_string()));
        }
        Ok(())
    }

    fn allocate(&mut self) -> RemoteId {
        self.next_id += 1;
        self.next_id
    }
}

/// An in-memory [`RemoteClient`].
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<State>>,
}

impl InMemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next allocated id `id`. Later ids continue from there.
    pub fn set_next_id(&self, id: RemoteId) {
        self.state.lock().next_id = id - 1;
    }

    /// Stores a record directly, bypassing call counting.
    pub fn insert(&self, model: &str, values: Fields) -> RemoteId {
        let mut state = self.state.lock();
        let id = state.allocate();
        state.models.entry(model.to_string()).or_default().insert(id, values);
        id
    }

    /// Stores a record under a chosen id.
    pub fn insert_with_id(&self, model: &str, id: RemoteId, values: Fields) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(id);
        state.models.entry(model.to_string()).or_default().insert(id, values);
    }

    /// Returns a stored record.
    pub fn get(&self, model: &str, id: RemoteId) -> Option<Fields> {
        self.state.lock().models.get(model)?.get(&id).cloned()
    }

    /// Returns all records of a model by id.
    pub fn records(&self, model: &str) -> BTreeMap<RemoteId, Fields> {
        self.state.lock().models.get(model).cloned().unwrap_or_default()
    }

    /// Number of records of a model.
    pub fn count(&self, model: &str) -> usize {
        self.state.lock().models.get(model).map_or(0, BTreeMap::len)
    }

    /// Number of calls of an operation so far.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// `execute` calls so far.
    pub fn executed(&self) -> Vec<ExecuteCall> {
        self.state.lock().executed.clone()
    }

    /// Makes the next call of `op` fail with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.state.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Makes the next `times` calls of `op` fail with `error`.
    pub fn fail_times(&self, op: RemoteOp, times: usize, error: RemoteError) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Makes every call against `model` fail as an unknown model.
    pub fn remove_model(&self, model: &str) {
        self.state.lock().missing_models.insert(model.to_string());
    }
}

impl RemoteClient for InMemoryRemote {
    fn create(&self, model: &str, values: &Fields) -> RemoteResult<RemoteId> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::Create, model)?;
        let id = state.allocate();
        state.models.entry(model.to_string()).or_default().insert(id, values.clone());
        Ok(id)
    }

    fn write(&self, model: &str, ids: &[RemoteId], values: &Fields) -> RemoteResult<bool> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::Write, model)?;
        let records = state.models.entry(model.to_string()).or_default();
        if let Some(&missing) = ids.iter().find(|id| !records.contains_key(*id)) {
            return Err(RemoteError::NotFound {
                model: model.to_string(),
                id: missing,
            });
        }
        for id in ids {
            if let Some(record) = records.get_mut(id) {
                record.extend(values.clone());
            }
        }
        Ok(true)
    }

    fn unlink(&self, model: &str, ids: &[RemoteId]) -> RemoteResult<bool> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::Unlink, model)?;
        let records = state.models.entry(model.to_string()).or_default();
        if let Some(&missing) = ids.iter().find(|id| !records.contains_key(*id)) {
            return Err(RemoteError::NotFound {
                model: model.to_string(),
                id: missing,
            });
        }
        for id in ids {
            records.remove(id);
        }
        Ok(true)
    }

    fn search(&self, model: &str, domain: &Domain, limit: Option<usize>) -> RemoteResult<Vec<RemoteId>> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::Search, model)?;
        Ok(state
            .models
            .get(model)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, values)| domain.matches(values))
                    .map(|(id, _)| *id)
                    .take(limit.unwrap_or(usize::MAX))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn read(&self, model: &str, ids: &[RemoteId], fields: &[String]) -> RemoteResult<Vec<Fields>> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::Read, model)?;
        let Some(records) = state.models.get(model) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                let record = records.get(id)?;
                let mut values: Fields = if fields.is_empty() {
                    record.clone()
                } else {
                    record
                        .iter()
                        .filter(|(k, _)| fields.contains(k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                };
                values.insert("id".into(), Value::from(*id));
                Some(values)
            })
            .collect())
    }

    fn execute(&self, model: &str, method: &str, args: Vec<Value>) -> RemoteResult<Value> {
        let mut state = self.state.lock();
        state.enter(RemoteOp::Execute, model)?;
        state.executed.push(ExecuteCall {
            model: model.to_string(),
            method: method.to_string(),
            args,
        });
        Ok(Value::Bool(true))
    }
}
