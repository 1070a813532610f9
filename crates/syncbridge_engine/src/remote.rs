//! Remote system abstraction.

use serde_json::Value;
use std::time::Duration;
use syncbridge_core::{Domain, Fields, RemoteId};
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Fault names and message fragments meaning the record does not exist.
pub(crate) const RECORD_GONE_FAULTS: &[&str] = &["missingerror", "does not exist", "not found"];

/// Errors raised by a [`RemoteClient`].
///
/// Transports report what they observed; [`classify_remote`] decides
/// whether a job retries.
///
/// [`classify_remote`]: crate::classify_remote
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The call did not complete in time.
    #[error("remote call timed out: {0}")]
    Timeout(String),

    /// The connection could not be established or was dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote asked the caller to slow down.
    #[error("rate limited")]
    RateLimited {
        /// Delay requested by the remote, if any.
        retry_after: Option<Duration>,
    },

    /// A non-success HTTP status.
    #[error("http {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// A fault raised by the remote application.
    #[error("remote fault{}: {message}", .code.as_ref().map(|c| format!(" {}", c)).unwrap_or_default())]
    Fault {
        /// Application fault code or exception name.
        code: Option<String>,
        /// Fault message.
        message: String,
    },

    /// The credentials lack the required rights.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The remote rejected the values.
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote model or feature does not exist.
    #[error("unknown remote model: {0}")]
    MissingModel(String),

    /// The record does not exist.
    #[error("{model} #{id} not found")]
    NotFound {
        /// Remote model.
        model: String,
        /// Remote id.
        id: RemoteId,
    },

    /// Anything else.
    #[error("remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Creates a fault with an exception name.
    pub fn fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fault {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Creates an HTTP error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the error says the record is already gone.
    ///
    /// Besides [`RemoteError::NotFound`], this covers faults whose name or
    /// message reports a missing record.
    pub fn is_not_found(&self) -> bool {
        match self {
            RemoteError::NotFound { .. } => true,
            RemoteError::Fault { .. } => {
                let haystack = self.fault_text();
                RECORD_GONE_FAULTS.iter().any(|f| haystack.contains(f))
            }
            _ => false,
        }
    }

    /// Lowercased fault code and message, empty for other variants.
    pub(crate) fn fault_text(&self) -> String {
        match self {
            RemoteError::Fault { code, message } => {
                format!("{} {}", code.as_deref().unwrap_or(""), message).to_lowercase()
            }
            _ => String::new(),
        }
    }
}

/// Model-oriented RPC client of the remote system.
///
/// Implementations must be safe to share across threads. Values are JSON
/// field maps; ids are integers.
pub trait RemoteClient: Send + Sync {
    /// Creates a record and returns its id.
    fn create(&self, model: &str, values: &Fields) -> RemoteResult<RemoteId>;

    /// Writes values to existing records.
    fn write(&self, model: &str, ids: &[RemoteId], values: &Fields) -> RemoteResult<bool>;

    /// Deletes records.
    fn unlink(&self, model: &str, ids: &[RemoteId]) -> RemoteResult<bool>;

    /// Returns ids of records matching `domain`.
    fn search(&self, model: &str, domain: &Domain, limit: Option<usize>) -> RemoteResult<Vec<RemoteId>>;

    /// Reads records. An empty `fields` list reads every field.
    ///
    /// Ids that do not exist are omitted from the result.
    fn read(&self, model: &str, ids: &[RemoteId], fields: &[String]) -> RemoteResult<Vec<Fields>>;

    /// Calls a model method with side effects.
    fn execute(&self, model: &str, method: &str, args: Vec<Value>) -> RemoteResult<Value>;
}
