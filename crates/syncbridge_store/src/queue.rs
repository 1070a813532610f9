//! The job queue contract.

use crate::error::StoreResult;
use serde_json::Value;
use std::time::Duration;
use syncbridge_core::{
    ErrorKind, Fields, Job, JobAction, JobId, JobStatus, LocalId, NewJob, Priority, RemoteId,
    Timestamp,
};

/// Result of [`JobQueue::enqueue_unique`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was written.
    Enqueued(JobId),
    /// An equivalent pending job absorbed the request.
    Coalesced(JobId),
}

impl EnqueueOutcome {
    /// The id of the job that will carry the change.
    pub fn job_id(&self) -> JobId {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::Coalesced(id) => *id,
        }
    }

    /// Returns true if no new row was written.
    pub fn is_coalesced(&self) -> bool {
        matches!(self, EnqueueOutcome::Coalesced(_))
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting to be claimed.
    pub pending: u64,
    /// Currently claimed.
    pub processing: u64,
    /// Finished successfully.
    pub done: u64,
    /// Dead-lettered.
    pub dead: u64,
}

impl QueueStats {
    /// Total number of stored jobs.
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.done + self.dead
    }

    pub(crate) fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Done => self.done += count,
            JobStatus::Dead => self.dead += count,
        }
    }
}

/// A durable, at-least-once job queue with claim/lock semantics.
///
/// # Claims
///
/// [`claim`](JobQueue::claim) hands out jobs with a fresh token. Every
/// state transition out of `processing` must present that token; a worker
/// whose claim expired and was taken over gets [`StoreError::ClaimLost`]
/// instead of overwriting the new owner's outcome.
///
/// [`StoreError::ClaimLost`]: crate::StoreError::ClaimLost
pub trait JobQueue: Send + Sync {
    /// Writes a new pending job. Never deduplicates.
    fn enqueue(&self, job: NewJob) -> StoreResult<JobId>;

    /// Writes a job unless an equivalent pending job can absorb it.
    ///
    /// Candidates share module, entity type, direction and key (local id for
    /// pushes, remote id for pulls). Against the newest candidate:
    /// - same action: coalesce, replacing the payload if the new one is non-empty
    /// - pending `create`, new `update`: keep `create`, same payload rule
    /// - anything else: enqueue
    fn enqueue_unique(&self, job: NewJob) -> StoreResult<EnqueueOutcome>;

    /// Atomically claims up to `batch_size` eligible jobs for `claim_ttl`.
    ///
    /// Eligible jobs are pending with `next_attempt_at <= now`, or processing
    /// with an expired claim. Ordered by priority, then `next_attempt_at`,
    /// then id.
    fn claim(&self, batch_size: usize, claim_ttl: Duration) -> StoreResult<Vec<Job>>;

    /// Marks a claimed job done.
    fn complete(&self, job_id: JobId, claim_token: &str) -> StoreResult<()>;

    /// Returns a claimed job to pending after a transient failure.
    ///
    /// Increments `attempt_count` and schedules the next attempt `delay` from now.
    fn reschedule(
        &self,
        job_id: JobId,
        claim_token: &str,
        delay: Duration,
        error: &str,
    ) -> StoreResult<()>;

    /// Dead-letters a claimed job.
    fn kill(
        &self,
        job_id: JobId,
        claim_token: &str,
        reason: &str,
        kind: Option<ErrorKind>,
    ) -> StoreResult<()>;

    /// Fetches a job by id.
    fn get(&self, job_id: JobId) -> StoreResult<Option<Job>>;

    /// Lists jobs by ascending id, optionally filtered by status.
    fn list(&self, status: Option<JobStatus>, limit: usize, offset: usize) -> StoreResult<Vec<Job>>;

    /// Counts jobs per status.
    fn stats(&self) -> StoreResult<QueueStats>;

    /// Revives a dead job: pending, attempts reset, error cleared.
    fn requeue(&self, job_id: JobId) -> StoreResult<()>;

    /// Deletes done jobs last updated before `older_than`. Returns the count.
    fn purge_done(&self, older_than: Timestamp) -> StoreResult<usize>;
}

/// Changes to apply to a pending job that absorbs a new one.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Coalesce {
    pub action: JobAction,
    pub payload: Fields,
    pub priority: Priority,
    pub local_id: Option<LocalId>,
    pub remote_id: Option<RemoteId>,
}

/// Decides whether `incoming` folds into the pending job `existing`.
pub(crate) fn coalesce(existing: &Job, incoming: &NewJob) -> Option<Coalesce> {
    let action = match (existing.action, incoming.action) {
        (a, b) if a == b => a,
        (JobAction::Create, JobAction::Update) => JobAction::Create,
        _ => return None,
    };
    let payload = if incoming.payload.is_empty() {
        existing.payload.clone()
    } else {
        incoming.payload.clone()
    };
    Some(Coalesce {
        action,
        payload,
        priority: existing.priority.min(incoming.priority),
        local_id: existing.local_id.or(incoming.local_id),
        remote_id: existing.remote_id.or(incoming.remote_id),
    })
}

/// Serializes a payload for storage.
pub(crate) fn encode_payload(payload: &Fields) -> StoreResult<String> {
    Ok(serde_json::to_string(payload)?)
}

/// Parses a stored payload. Anything but an object is rejected.
pub(crate) fn decode_payload(raw: &str) -> StoreResult<Fields> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(crate::StoreError::Corrupt(format!(
            "payload is not an object: {}",
            other
        ))),
    }
}
