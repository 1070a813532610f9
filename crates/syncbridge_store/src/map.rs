//! The entity map contract.

use crate::error::StoreResult;
use syncbridge_core::{EntityMapping, LocalId, RemoteId};

/// Durable bidirectional map between local and remote identities.
///
/// Rows are unique on `(module, entity_type, local_id)` and on
/// `(module, entity_type, remote_id)`. Rows are never updated; a changed
/// remote identity means delete then save.
pub trait EntityMapStore: Send + Sync {
    /// Fetches the mapping of a local entity.
    fn get(
        &self,
        module_id: &str,
        entity_type: &str,
        local_id: LocalId,
    ) -> StoreResult<Option<EntityMapping>>;

    /// Fetches the mapping of a remote record.
    fn get_by_remote(
        &self,
        module_id: &str,
        entity_type: &str,
        remote_id: RemoteId,
    ) -> StoreResult<Option<EntityMapping>>;

    /// Remote id of a local entity.
    fn get_remote_id(
        &self,
        module_id: &str,
        entity_type: &str,
        local_id: LocalId,
    ) -> StoreResult<Option<RemoteId>> {
        Ok(self.get(module_id, entity_type, local_id)?.map(|m| m.remote_id))
    }

    /// Local id of a remote record.
    fn get_local_id(
        &self,
        module_id: &str,
        entity_type: &str,
        remote_id: RemoteId,
    ) -> StoreResult<Option<LocalId>> {
        Ok(self
            .get_by_remote(module_id, entity_type, remote_id)?
            .map(|m| m.local_id))
    }

    /// Records a mapping.
    ///
    /// Saving a link that already exists is a no-op. A link that collides with
    /// a different row on either side fails with [`StoreError::Conflict`].
    ///
    /// [`StoreError::Conflict`]: crate::StoreError::Conflict
    fn save(
        &self,
        module_id: &str,
        entity_type: &str,
        local_id: LocalId,
        remote_id: RemoteId,
        remote_model: &str,
    ) -> StoreResult<()>;

    /// Removes the mapping of a local entity. Returns whether a row was removed.
    fn delete(&self, module_id: &str, entity_type: &str, local_id: LocalId) -> StoreResult<bool>;

    /// Removes the mapping of a remote record. Returns whether a row was removed.
    fn delete_by_remote(
        &self,
        module_id: &str,
        entity_type: &str,
        remote_id: RemoteId,
    ) -> StoreResult<bool>;

    /// Lists a module's mappings, optionally for one entity type, by local id.
    fn list(&self, module_id: &str, entity_type: Option<&str>) -> StoreResult<Vec<EntityMapping>>;

    /// Counts mappings, optionally for one module.
    fn count(&self, module_id: Option<&str>) -> StoreResult<usize>;
}
