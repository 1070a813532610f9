//! Local system abstraction.

use syncbridge_core::{Fields, LocalId};
use thiserror::Error;

/// Result type for local store calls.
pub type LocalResult<T> = Result<T, LocalError>;

/// Errors raised by a [`LocalStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalError {
    /// The record does not exist.
    #[error("{entity_type} #{id} not found")]
    NotFound {
        /// Entity type.
        entity_type: String,
        /// Local id.
        id: LocalId,
    },

    /// The local system rejected the values.
    #[error("validation error: {0}")]
    Validation(String),

    /// The local storage is temporarily unavailable.
    #[error("local storage unavailable: {0}")]
    Unavailable(String),

    /// Anything else.
    #[error("local error: {0}")]
    Other(String),
}

/// Record storage of the local system.
///
/// Entity types are the module-level names (e.g. `"order"`); the
/// implementation knows how to find the underlying table.
pub trait LocalStore: Send + Sync {
    /// Loads a record. Returns `None` if it does not exist.
    fn load(&self, entity_type: &str, id: LocalId) -> LocalResult<Option<Fields>>;

    /// Inserts a record when `id` is `None`, otherwise updates it. Returns
    /// the record id.
    fn save(&self, entity_type: &str, fields: &Fields, id: Option<LocalId>) -> LocalResult<LocalId>;

    /// Deletes a record. Returns false if it did not exist.
    fn delete(&self, entity_type: &str, id: LocalId) -> LocalResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = LocalError::NotFound {
            entity_type: "order".into(),
            id: 42,
        };
        assert_eq!(err.to_string(), "order #42 not found");
        assert_eq!(
            LocalError::Unavailable("database is locked".into()).to_string(),
            "local storage unavailable: database is locked"
        );
    }
}
