//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use syncbridge_core::{Clock, Fields, JobAction, NewJob, SystemClock};
use syncbridge_store::{
    EntityMapStore, JobQueue, MemoryEntityMap, MemoryJobQueue, SqliteDatabase, SqliteEntityMap,
    SqliteJobQueue,
};
use tempfile::TempDir;

/// Generate a payload with `fields` random string values.
pub fn random_payload(fields: usize) -> Fields {
    let mut rng = rand::thread_rng();
    let mut payload = Map::new();
    for i in 0..fields {
        let value: String = (&mut rng).sample_iter(Alphanumeric).take(16).map(char::from).collect();
        payload.insert(format!("field_{}", i), Value::String(value));
    }
    payload
}

/// Generate push jobs for distinct local ids.
pub fn push_jobs(count: usize, payload_fields: usize) -> Vec<NewJob> {
    (0..count)
        .map(|i| {
            NewJob::push("bench", "record", JobAction::Update, i as i64 + 1)
                .with_payload(random_payload(payload_fields))
        })
        .collect()
}

/// A product record for the catalog fixture.
pub fn product(i: usize) -> Value {
    json!({ "name": format!("Product {}", i), "list_price": i as f64 })
}

/// A queue and map over one backend, with any temporary directory kept
/// alive.
pub struct Stores {
    /// The job queue.
    pub queue: Arc<dyn JobQueue>,
    /// The entity map.
    pub map: Arc<dyn EntityMapStore>,
    _dir: Option<TempDir>,
}

impl Stores {
    /// In-memory stores.
    pub fn memory() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            queue: Arc::new(MemoryJobQueue::with_clock(Arc::clone(&clock))),
            map: Arc::new(MemoryEntityMap::with_clock(clock)),
            _dir: None,
        }
    }

    /// Stores in a SQLite file under a temporary directory.
    pub fn sqlite() -> Self {
        let dir = TempDir::new().unwrap();
        let db = SqliteDatabase::open(dir.path().join("bench.db")).unwrap();
        Self {
            queue: Arc::new(SqliteJobQueue::new(db.clone())),
            map: Arc::new(SqliteEntityMap::new(db)),
            _dir: Some(dir),
        }
    }

    /// Both backends, labelled.
    pub fn all() -> Vec<(&'static str, fn() -> Stores)> {
        vec![("memory", Stores::memory as fn() -> Stores), ("sqlite", Stores::sqlite)]
    }
}
