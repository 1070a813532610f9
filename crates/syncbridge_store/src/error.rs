//! Error types for queue and mapping storage.

use syncbridge_core::{EntityMapping, JobId, JobStatus};
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the job queue or entity map.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Saving a mapping would break one of the uniqueness invariants.
    #[error(
        "mapping conflict for {module_id}/{entity_type}: local #{local_id} <-> remote #{remote_id} \
         collides with local #{} <-> remote #{}",
        .existing.local_id,
        .existing.remote_id
    )]
    Conflict {
        /// Module of the rejected mapping.
        module_id: String,
        /// Entity type of the rejected mapping.
        entity_type: String,
        /// Local id of the rejected mapping.
        local_id: i64,
        /// Remote id of the rejected mapping.
        remote_id: i64,
        /// The row that is already stored.
        existing: Box<EntityMapping>,
    },

    /// The caller no longer holds the claim on the job.
    #[error("claim lost on job {job_id}")]
    ClaimLost {
        /// Job id.
        job_id: JobId,
    },

    /// No job with this id.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// The job is not in a state that allows the operation.
    #[error("job {job_id} is {status}, cannot {operation}")]
    InvalidState {
        /// Job id.
        job_id: JobId,
        /// Current status.
        status: JobStatus,
        /// Attempted operation.
        operation: &'static str,
    },

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Payload (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database schema does not match any known version.
    #[error("schema error: {0}")]
    Schema(String),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Returns true for mapping uniqueness violations.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Returns true for lost claims.
    pub fn is_claim_lost(&self) -> bool {
        matches!(self, StoreError::ClaimLost { .. })
    }

    /// Returns true if retrying the operation may succeed.
    ///
    /// Busy and locked databases are retryable; everything else is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
