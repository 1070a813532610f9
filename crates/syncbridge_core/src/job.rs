//! Queued synchronization jobs.

use crate::types::{Fields, JobId, LocalId, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way a job moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobDirection {
    /// Local system to remote system.
    Push,
    /// Remote system to local system.
    Pull,
}

impl JobDirection {
    /// Returns the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobDirection::Push => "push",
            JobDirection::Pull => "pull",
        }
    }

    /// Parses the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "push" => Some(JobDirection::Push),
            "pull" => Some(JobDirection::Pull),
            _ => None,
        }
    }
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    /// The entity was created.
    Create,
    /// The entity was modified.
    Update,
    /// The entity was removed.
    Delete,
}

impl JobAction {
    /// Returns the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Create => "create",
            JobAction::Update => "update",
            JobAction::Delete => "delete",
        }
    }

    /// Parses the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(JobAction::Create),
            "update" => Some(JobAction::Update),
            "delete" => Some(JobAction::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// pending ──claim──▶ processing ──complete──▶ done
///    ▲                   │  │
///    └───reschedule──────┘  └──kill──▶ dead ──requeue──▶ pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `next_attempt_at`.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully.
    Done,
    /// Dead-lettered; never retried automatically.
    Dead,
}

impl JobStatus {
    /// Returns true for `Done` and `Dead`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Dead)
    }

    /// Returns the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Dead => "dead",
        }
    }

    /// Parses the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "done" => Some(JobStatus::Done),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing priority. Lower values are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Operator-initiated or repair work.
    pub const HIGH: Priority = Priority(1);
    /// Regular change notifications.
    pub const NORMAL: Priority = Priority(5);
    /// Bulk imports and backfills.
    pub const LOW: Priority = Priority(9);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// The claim attached to a job in `Processing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Opaque token identifying the claiming worker.
    pub token: String,
    /// When the claim becomes reclaimable.
    pub expires_at: Timestamp,
}

/// A job as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Queue-assigned id.
    pub id: JobId,
    /// Owning module.
    pub module_id: String,
    /// Entity type within the module.
    pub entity_type: String,
    /// Push or pull.
    pub direction: JobDirection,
    /// Create, update or delete.
    pub action: JobAction,
    /// Local record id, when known.
    pub local_id: Option<LocalId>,
    /// Remote record id, when known.
    pub remote_id: Option<RemoteId>,
    /// Opaque data attached by the producer.
    pub payload: Fields,
    /// Claim priority.
    pub priority: Priority,
    /// Number of failed attempts so far.
    pub attempt_count: u32,
    /// Earliest time the job may be claimed.
    pub next_attempt_at: Timestamp,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Present while `Processing`.
    pub claim: Option<Claim>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Classification of the most recent failure.
    pub last_error_kind: Option<crate::ErrorKind>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last state change.
    pub updated_at: Timestamp,
}

impl Job {
    /// Returns the claim token, if claimed.
    pub fn claim_token(&self) -> Option<&str> {
        self.claim.as_ref().map(|c| c.token.as_str())
    }
}

/// A job to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    /// Owning module.
    pub module_id: String,
    /// Entity type within the module.
    pub entity_type: String,
    /// Push or pull.
    pub direction: JobDirection,
    /// Create, update or delete.
    pub action: JobAction,
    /// Local record id, when known.
    pub local_id: Option<LocalId>,
    /// Remote record id, when known.
    pub remote_id: Option<RemoteId>,
    /// Opaque data attached by the producer.
    pub payload: Fields,
    /// Claim priority.
    pub priority: Priority,
    /// Earliest time the job may be claimed. `None` means immediately.
    pub not_before: Option<Timestamp>,
}

impl NewJob {
    /// A job pushing a local change to the remote system.
    pub fn push(
        module_id: impl Into<String>,
        entity_type: impl Into<String>,
        action: JobAction,
        local_id: LocalId,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            entity_type: entity_type.into(),
            direction: JobDirection::Push,
            action,
            local_id: Some(local_id),
            remote_id: None,
            payload: Fields::new(),
            priority: Priority::default(),
            not_before: None,
        }
    }

    /// A job pulling a remote change into the local system.
    pub fn pull(
        module_id: impl Into<String>,
        entity_type: impl Into<String>,
        action: JobAction,
        remote_id: RemoteId,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            entity_type: entity_type.into(),
            direction: JobDirection::Pull,
            action,
            local_id: None,
            remote_id: Some(remote_id),
            payload: Fields::new(),
            priority: Priority::default(),
            not_before: None,
        }
    }

    /// Sets the local id.
    pub fn with_local_id(mut self, local_id: LocalId) -> Self {
        self.local_id = Some(local_id);
        self
    }

    /// Sets the remote id.
    pub fn with_remote_id(mut self, remote_id: RemoteId) -> Self {
        self.remote_id = Some(remote_id);
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Fields) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Delays the first attempt.
    pub fn not_before(mut self, at: Timestamp) -> Self {
        self.not_before = Some(at);
        self
    }

    /// The id used to coalesce equivalent pending jobs: the local id for
    /// pushes, the remote id for pulls.
    pub fn coalesce_key(&self) -> Option<i64> {
        match self.direction {
            JobDirection::Push => self.local_id,
            JobDirection::Pull => self.remote_id,
        }
    }
}
