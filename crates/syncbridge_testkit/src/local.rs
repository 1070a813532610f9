//! In-memory local system.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use syncbridge_core::{Fields, JobAction, LocalId};
use syncbridge_engine::{LocalError, LocalResult, LocalStore};

/// Callback invoked after every successful write, the way an application's
/// model hooks would fire.
pub type WriteObserver = Arc<dyn Fn(&str, JobAction, LocalId) + Send + Sync>;

#[derive(Default)]
struct State {
    next_id: LocalId,
    tables: HashMap<String, BTreeMap<LocalId, Fields>>,
    failures: VecDeque<LocalError>,
    observer: Option<WriteObserver>,
}

/// An in-memory [`LocalStore`].
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryLocal {
    state: Arc<Mutex<State>>,
}

impl InMemoryLocal {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record without notifying the observer.
    pub fn put(&self, entity_type: &str, id: LocalId, fields: Fields) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(id);
        state
            .tables
            .entry(entity_type.to_string())
            .or_default()
            .insert(id, fields);
    }

    /// Returns a record.
    pub fn get(&self, entity_type: &str, id: LocalId) -> Option<Fields> {
        self.state.lock().tables.get(entity_type)?.get(&id).cloned()
    }

    /// Number of records of an entity type.
    pub fn count(&self, entity_type: &str) -> usize {
        self.state.lock().tables.get(entity_type).map_or(0, BTreeMap::len)
    }

    /// Makes the next store call fail with `error`.
    pub fn fail_next(&self, error: LocalError) {
        self.state.lock().failures.push_back(error);
    }

    /// Installs the write observer.
    pub fn set_observer(&self, observer: WriteObserver) {
        self.state.lock().observer = Some(observer);
    }

    fn notify(&self, entity_type: &str, action: JobAction, id: LocalId) {
        // Called without the lock held: the observer may read the store.
        let observer = self.state.lock().observer.clone();
        if let Some(observer) = observer {
            observer(entity_type, action, id);
        }
    }
}

impl LocalStore for InMemoryLocal {
    fn load(&self, entity_type: &str, id: LocalId) -> LocalResult<Option<Fields>> {
        let mut state = self.state.lock();
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        Ok(state.tables.get(entity_type).and_then(|t| t.get(&id)).cloned())
    }

    fn save(&self, entity_type: &str, fields: &Fields, id: Option<LocalId>) -> LocalResult<LocalId> {
        let (id, action) = {
            let mut state = self.state.lock();
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }
            let (id, action) = match id {
                Some(id) => (id, JobAction::Update),
                None => {
                    state.next_id += 1;
                    (state.next_id, JobAction::Create)
                }
            };
            state
                .tables
                .entry(entity_type.to_string())
                .or_default()
                .insert(id, fields.clone());
            (id, action)
        };
        self.notify(entity_type, action, id);
        Ok(id)
    }

    fn delete(&self, entity_type: &str, id: LocalId) -> LocalResult<bool> {
        let removed = {
            let mut state = self.state.lock();
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }
            state
                .tables
                .get_mut(entity_type)
                .and_then(|t| t.remove(&id))
                .is_some()
        };
        if removed {
            self.notify(entity_type, JobAction::Delete, id);
        }
        Ok(removed)
    }
}

impl fmt::Debug for InMemoryLocal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryLocal")
            .field("tables", &state.tables)
            .field("observer", &state.observer.is_some())
            .finish()
    }
}
