//! SQLite-backed queue and entity map.
//!
//! Both stores share one [`SqliteDatabase`]. Multi-row transitions (claim,
//! coalescing enqueue, mapping save) run inside `BEGIN IMMEDIATE`
//! transactions, so several processes may point at the same file.

mod map;
mod queue;
mod schema;

pub use map::SqliteEntityMap;
pub use queue::SqliteJobQueue;
pub use schema::{VersionedSchema, BASE_DB_VERSION, SYNC_VERSIONED_SCHEMAS};

use crate::error::{StoreError, StoreResult};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A shared SQLite connection holding the sync schema.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase").finish_non_exhaustive()
    }
}

impl SqliteDatabase {
    /// Opens or creates a database file.
    ///
    /// A new file gets the latest schema. An existing file is validated
    /// against its recorded version and migrated forward.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;

        let raw_version = user_version(&conn)?;
        if raw_version == 0 {
            latest_schema()?.create(&conn)?;
            info!(path = ?path.as_ref(), "created sync database");
        } else {
            let version = raw_version
                .checked_sub(BASE_DB_VERSION)
                .ok_or_else(|| {
                    StoreError::schema(format!(
                        "database version {} predates base version {}",
                        raw_version, BASE_DB_VERSION
                    ))
                })?;
            let schema = SYNC_VERSIONED_SCHEMAS.get(version).ok_or_else(|| {
                StoreError::schema(format!(
                    "database version {} is too new (max supported: {})",
                    version,
                    SYNC_VERSIONED_SCHEMAS.len() - 1
                ))
            })?;
            schema.validate(&conn)?;
            Self::migrate_if_needed(&conn, version)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a private in-memory database with the latest schema.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        latest_schema()?.create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// The schema version of the open database.
    pub fn schema_version(&self) -> StoreResult<usize> {
        let raw = user_version(&self.conn.lock())?;
        raw.checked_sub(BASE_DB_VERSION)
            .ok_or_else(|| StoreError::schema(format!("unexpected user_version {}", raw)))
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> StoreResult<()> {
        let target_version = SYNC_VERSIONED_SCHEMAS.len() - 1;
        if current_version >= target_version {
            return Ok(());
        }

        info!(
            from = current_version,
            to = target_version,
            "migrating sync database"
        );
        for schema in SYNC_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration) = schema.migration {
                info!(version = schema.version, "running sync database migration");
                migration(conn)?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;
        SYNC_VERSIONED_SCHEMAS[target_version].validate(conn)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

fn latest_schema() -> StoreResult<&'static VersionedSchema> {
    SYNC_VERSIONED_SCHEMAS
        .last()
        .ok_or_else(|| StoreError::schema("no schemas defined"))
}

fn user_version(conn: &Connection) -> StoreResult<usize> {
    let raw = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, i64>(0))?;
    usize::try_from(raw).map_err(|_| StoreError::schema(format!("negative user_version {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_file_gets_latest_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open(dir.path().join("sync.db")).unwrap();
        assert_eq!(db.schema_version().unwrap(), SYNC_VERSIONED_SCHEMAS.len() - 1);
    }

    #[test]
    fn reopen_validates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        drop(SqliteDatabase::open(&path).unwrap());
        let db = SqliteDatabase::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SYNC_VERSIONED_SCHEMAS.len() - 1);
    }

    #[test]
    fn old_file_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        {
            let conn = Connection::open(&path).unwrap();
            SYNC_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
            conn.execute(
                "INSERT INTO sync_jobs (module_id, entity_type, direction, action, local_id, \
                 priority, next_attempt_at, status, last_error, created_at, updated_at) \
                 VALUES ('orders', 'order', 'push', 'create', 1, 5, 0, 'dead', 'boom', 0, 0)",
                [],
            )
            .unwrap();
        }

        let db = SqliteDatabase::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), 1);
        let kind: Option<String> = db
            .lock()
            .query_row("SELECT last_error_kind FROM sync_jobs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kind.as_deref(), Some("permanent"));
    }

    #[test]
    fn too_new_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(&format!("PRAGMA user_version = {}", BASE_DB_VERSION + 99), [])
                .unwrap();
        }
        let err = SqliteDatabase::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("PRAGMA user_version = 3", []).unwrap();
        }
        assert!(matches!(
            SqliteDatabase::open(&path).unwrap_err(),
            StoreError::Schema(_)
        ));
    }
}
