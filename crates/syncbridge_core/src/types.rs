//! Primitive identifiers shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a record in the local system.
pub type LocalId = i64;

/// Identifier of a record on the remote system.
pub type RemoteId = i64;

/// Identifier of a queued job.
pub type JobId = i64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// An opaque field map, used for job payloads and mapped record values.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Fully qualified identity of a local entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Owning module.
    pub module_id: String,
    /// Entity type within the module.
    pub entity_type: String,
    /// Local record id.
    pub local_id: LocalId,
}

impl EntityKey {
    /// Creates a new entity key.
    pub fn new(module_id: impl Into<String>, entity_type: impl Into<String>, local_id: LocalId) -> Self {
        Self {
            module_id: module_id.into(),
            entity_type: entity_type.into(),
            local_id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.module_id, self.entity_type, self.local_id)
    }
}
