//! Entity identity mappings.

use crate::types::{LocalId, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};

/// A durable link between a local entity and its remote counterpart.
///
/// # Invariants
///
/// - Unique on `(module_id, entity_type, local_id)`
/// - Unique on `(module_id, entity_type, remote_id)`
/// - Never mutated; a change of remote identity is a new mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Owning module.
    pub module_id: String,
    /// Entity type within the module.
    pub entity_type: String,
    /// Local record id.
    pub local_id: LocalId,
    /// Remote model the record lives in.
    pub remote_model: String,
    /// Remote record id.
    pub remote_id: RemoteId,
    /// When the mapping was recorded.
    pub created_at: Timestamp,
}

impl EntityMapping {
    /// Returns true if `other` links the same pair of identities.
    pub fn same_link(&self, other: &EntityMapping) -> bool {
        self.module_id == other.module_id
            && self.entity_type == other.entity_type
            && self.local_id == other.local_id
            && self.remote_id == other.remote_id
    }
}
