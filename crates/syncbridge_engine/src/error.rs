//! Error types for the sync engine.

use syncbridge_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the engine itself.
///
/// Per-job failures are [`SyncFailure`](syncbridge_core::SyncFailure)
/// values recorded on the job; these errors stop the caller.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Queue or map storage failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// No module is registered under this id.
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    /// The module does not own this entity type.
    #[error("module '{module_id}' has no entity type '{entity_type}'")]
    UnknownEntityType {
        /// Module id.
        module_id: String,
        /// Entity type.
        entity_type: String,
    },

    /// A module with this id is already registered.
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    /// A module definition is inconsistent.
    #[error("invalid module '{module_id}': {reason}")]
    InvalidModule {
        /// Module id.
        module_id: String,
        /// What is wrong.
        reason: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The background service is no longer running.
    #[error("sync service stopped")]
    ServiceStopped,
}

impl EngineError {
    /// Creates an invalid-module error.
    pub fn invalid_module(module_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidModule {
            module_id: module_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
