//! SQLite entity map.

use super::SqliteDatabase;
use crate::error::{StoreError, StoreResult};
use crate::map::EntityMapStore;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::Arc;
use syncbridge_core::{Clock, EntityMapping, LocalId, RemoteId, SystemClock};
use tracing::debug;

/// An [`EntityMapStore`] stored in the `entity_map` table.
#[derive(Debug, Clone)]
pub struct SqliteEntityMap {
    db: SqliteDatabase,
    clock: Arc<dyn Clock>,
}

impl SqliteEntityMap {
    /// Creates a map on the system clock.
    pub fn new(db: SqliteDatabase) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    /// Creates a map on the given clock.
    pub fn with_clock(db: SqliteDatabase, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    fn row_to_mapping(row: &rusqlite::Row) -> rusqlite::Result<EntityMapping> {
        Ok(EntityMapping {
            module_id: row.get("module_id")?,
            entity_type: row.get("entity_type")?,
            local_id: row.get("local_id")?,
            remote_model: row.get("remote_model")?,
            remote_id: row.get("remote_id")?,
            created_at: row.get("created_at")?,
        })
    }

    fn find(
        conn: &Connection,
        module_id: &str,
        entity_type: &str,
        column: &str,
        id: i64,
    ) -> StoreResult<Option<EntityMapping>> {
        let sql = format!(
            "SELECT * FROM entity_map WHERE module_id = ?1 AND entity_type = ?2 AND {} = ?3",
            column
        );
        Ok(conn
            .query_row(&sql, params![module_id, entity_type, id], Self::row_to_mapping)
            .optional()?)
    }
}

impl EntityMapStore for SqliteEntityMap {
    fn get(
        &self,
        module_id: &str,
        entity_type: &str,
        local_id: LocalId,
    ) -> StoreResult<Option<EntityMapping>> {
        Self::find(&self.db.lock(), module_id, entity_type, "local_id", local_id)
    }

    fn get_by_remote(
        &self,
        module_id: &str,
        entity_type: &str,
        remote_id: RemoteId,
    ) -> StoreResult<Option<EntityMapping>> {
        Self::find(&self.db.lock(), module_id, entity_type, "remote_id", remote_id)
    }

    fn save(
        &self,
        module_id: &str,
        entity_type: &str,
        local_id: LocalId,
        remote_id: RemoteId,
        remote_model: &str,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = match Self::find(&tx, module_id, entity_type, "local_id", local_id)? {
            Some(row) => Some(row),
            None => Self::find(&tx, module_id, entity_type, "remote_id", remote_id)?,
        };
        if let Some(existing) = existing {
            if existing.local_id == local_id && existing.remote_id == remote_id {
                return Ok(());
            }
            return Err(StoreError::Conflict {
                module_id: module_id.to_string(),
                entity_type: entity_type.to_string(),
                local_id,
                remote_id,
                existing: Box::new(existing),
            });
        }

        tx.execute(
            "INSERT INTO entity_map (module_id, entity_type, local_id, remote_model, remote_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![module_id, entity_type, local_id, remote_model, remote_id, now],
        )?;
        tx.commit()?;
        debug!(module_id, entity_type, local_id, remote_id, "saved mapping");
        Ok(())
    }

    fn delete(&self, module_id: &str, entity_type: &str, local_id: LocalId) -> StoreResult<bool> {
        let removed = self.db.lock().execute(
            "DELETE FROM entity_map WHERE module_id = ?1 AND entity_type = ?2 AND local_id = ?3",
            params![module_id, entity_type, local_id],
        )?;
        Ok(removed > 0)
    }

    fn delete_by_remote(
        &self,
        module_id: &str,
        entity_type: &str,
        remote_id: RemoteId,
    ) -> StoreResult<bool> {
        let removed = self.db.lock().execute(
            "DELETE FROM entity_map WHERE module_id = ?1 AND entity_type = ?2 AND remote_id = ?3",
            params![module_id, entity_type, remote_id],
        )?;
        Ok(removed > 0)
    }

    fn list(&self, module_id: &str, entity_type: Option<&str>) -> StoreResult<Vec<EntityMapping>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM entity_map
             WHERE module_id = ?1 AND (?2 IS NULL OR entity_type = ?2)
             ORDER BY entity_type ASC, local_id ASC",
        )?;
        let rows = stmt
            .query_map(params![module_id, entity_type], Self::row_to_mapping)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&self, module_id: Option<&str>) -> StoreResult<usize> {
        let count: i64 = self.db.lock().query_row(
            "SELECT COUNT(*) FROM entity_map WHERE ?1 IS NULL OR module_id = ?1",
            params![module_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}
