//! Outcome taxonomy for push and pull operations.

use crate::types::{LocalId, RemoteId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retry with backoff until the attempt ceiling.
    Transient,
    /// Dead-letter immediately.
    Permanent,
}

impl ErrorKind {
    /// Returns true for `Transient`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Returns the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
        }
    }

    /// Parses the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(ErrorKind::Transient),
            "permanent" => Some(ErrorKind::Permanent),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed push or pull.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct SyncFailure {
    /// Retry classification.
    pub kind: ErrorKind,
    /// Human-readable description for operators.
    pub message: String,
    /// Minimum delay requested by the remote side (e.g. rate limiting).
    pub retry_after: Option<Duration>,
}

impl SyncFailure {
    /// Creates a retryable failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a terminal failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attaches a minimum retry delay.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Prefixes the message, keeping kind and retry hint.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    /// Returns true if the failure may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// A successful push or pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSuccess {
    /// Remote id touched by the operation, if any.
    pub remote_id: Option<RemoteId>,
    /// Local id touched by the operation, if any.
    pub local_id: Option<LocalId>,
}

impl SyncSuccess {
    /// Success without identities (e.g. a no-op delete).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Success of a push that produced or touched `remote_id`.
    pub fn remote(remote_id: RemoteId) -> Self {
        Self {
            remote_id: Some(remote_id),
            local_id: None,
        }
    }

    /// Success of a pull that produced or touched `local_id`.
    pub fn local(local_id: LocalId) -> Self {
        Self {
            remote_id: None,
            local_id: Some(local_id),
        }
    }

    /// Sets both identities.
    pub fn linked(local_id: LocalId, remote_id: RemoteId) -> Self {
        Self {
            remote_id: Some(remote_id),
            local_id: Some(local_id),
        }
    }
}

/// Result of a module operation.
pub type SyncOutcome = Result<SyncSuccess, SyncFailure>;
