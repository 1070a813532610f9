//! In-memory queue and entity map.
//!
//! Suitable for unit tests and ephemeral use. Each store keeps all of its
//! state behind one mutex, which makes every operation atomic with respect to
//! concurrent callers.

use crate::error::{StoreError, StoreResult};
use crate::map::EntityMapStore;
use crate::queue::{coalesce, EnqueueOutcome, JobQueue, QueueStats};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use syncbridge_core::{
    duration_millis, Claim, Clock, EntityMapping, ErrorKind, Job, JobDirection, JobId, JobStatus,
    LocalId, NewJob, RemoteId, SystemClock, Timestamp,
};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueState {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
}

/// An in-memory [`JobQueue`].
#[derive(Debug)]
pub struct MemoryJobQueue {
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    /// Creates an empty queue on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty queue on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(QueueState {
                next_id: 1,
                jobs: BTreeMap::new(),
            }),
        }
    }

    /// Number of stored jobs in any status.
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Returns true if no jobs are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(state: &mut QueueState, job: NewJob, now: Timestamp) -> JobId {
        let id = state.next_id;
        state.next_id += 1;
        state.jobs.insert(
            id,
            Job {
                id,
                module_id: job.module_id,
                entity_type: job.entity_type,
                direction: job.direction,
                action: job.action,
                local_id: job.local_id,
                remote_id: job.remote_id,
                payload: job.payload,
                priority: job.priority,
                attempt_count: 0,
                next_attempt_at: job.not_before.unwrap_or(now),
                status: JobStatus::Pending,
                claim: None,
                last_error: None,
                last_error_kind: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    /// Looks up a job held under `claim_token`.
    fn claimed<'a>(
        state: &'a mut QueueState,
        job_id: JobId,
        claim_token: &str,
    ) -> StoreResult<&'a mut Job> {
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        if job.status != JobStatus::Processing || job.claim_token() != Some(claim_token) {
            return Err(StoreError::ClaimLost { job_id });
        }
        Ok(job)
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, job: NewJob) -> StoreResult<JobId> {
        let now = self.clock.now();
        let id = Self::insert(&mut self.state.lock(), job, now);
        debug!(job_id = id, "enqueued job");
        Ok(id)
    }

    fn enqueue_unique(&self, job: NewJob) -> StoreResult<EnqueueOutcome> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let key = job.coalesce_key();
        let candidate = key.and_then(|key| {
            state.jobs.values_mut().rev().find(|existing| {
                existing.status == JobStatus::Pending
                    && existing.module_id == job.module_id
                    && existing.entity_type == job.entity_type
                    && existing.direction == job.direction
                    && match job.direction {
                        JobDirection::Push => existing.local_id == Some(key),
                        JobDirection::Pull => existing.remote_id == Some(key),
                    }
            })
        });

        if let Some(existing) = candidate {
            if let Some(merge) = coalesce(existing, &job) {
                existing.action = merge.action;
                existing.payload = merge.payload;
                existing.priority = merge.priority;
                existing.local_id = merge.local_id;
                existing.remote_id = merge.remote_id;
                existing.updated_at = now;
                debug!(job_id = existing.id, "coalesced job");
                return Ok(EnqueueOutcome::Coalesced(existing.id));
            }
        }

        let id = Self::insert(&mut state, job, now);
        debug!(job_id = id, "enqueued job");
        Ok(EnqueueOutcome::Enqueued(id))
    }

    fn claim(&self, batch_size: usize, claim_ttl: Duration) -> StoreResult<Vec<Job>> {
        let now = self.clock.now();
        let expires_at = now.saturating_add(duration_millis(claim_ttl));
        let mut state = self.state.lock();

        let mut eligible: Vec<&mut Job> = state
            .jobs
            .values_mut()
            .filter(|job| match job.status {
                JobStatus::Pending => job.next_attempt_at <= now,
                JobStatus::Processing => job.claim.as_ref().map_or(true, |c| c.expires_at <= now),
                _ => false,
            })
            .collect();
        eligible.sort_by_key(|job| (job.priority, job.next_attempt_at, job.id));

        let claimed = eligible
            .into_iter()
            .take(batch_size)
            .map(|job| {
                if job.status == JobStatus::Processing {
                    warn!(job_id = job.id, "reclaiming job with expired claim");
                }
                job.status = JobStatus::Processing;
                job.claim = Some(Claim {
                    token: uuid::Uuid::new_v4().to_string(),
                    expires_at,
                });
                job.updated_at = now;
                job.clone()
            })
            .collect::<Vec<_>>();

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed jobs");
        }
        Ok(claimed)
    }

    fn complete(&self, job_id: JobId, claim_token: &str) -> StoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let job = Self::claimed(&mut state, job_id, claim_token)?;
        job.status = JobStatus::Done;
        job.claim = None;
        job.updated_at = now;
        Ok(())
    }

    fn reschedule(
        &self,
        job_id: JobId,
        claim_token: &str,
        delay: Duration,
        error: &str,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let job = Self::claimed(&mut state, job_id, claim_token)?;
        job.status = JobStatus::Pending;
        job.claim = None;
        job.attempt_count += 1;
        job.next_attempt_at = now.saturating_add(duration_millis(delay));
        job.last_error = Some(error.to_string());
        job.last_error_kind = Some(ErrorKind::Transient);
        job.updated_at = now;
        Ok(())
    }

    fn kill(
        &self,
        job_id: JobId,
        claim_token: &str,
        reason: &str,
        kind: Option<ErrorKind>,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let job = Self::claimed(&mut state, job_id, claim_token)?;
        job.status = JobStatus::Dead;
        job.claim = None;
        job.last_error = Some(reason.to_string());
        job.last_error_kind = kind;
        job.updated_at = now;
        Ok(())
    }

    fn get(&self, job_id: JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().jobs.get(&job_id).cloned())
    }

    fn list(&self, status: Option<JobStatus>, limit: usize, offset: usize) -> StoreResult<Vec<Job>> {
        Ok(self
            .state
            .lock()
            .jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn stats(&self) -> StoreResult<QueueStats> {
        let mut stats = QueueStats::default();
        for job in self.state.lock().jobs.values() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }

    fn requeue(&self, job_id: JobId) -> StoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        if job.status != JobStatus::Dead {
            return Err(StoreError::InvalidState {
                job_id,
                status: job.status,
                operation: "requeue",
            });
        }
        job.status = JobStatus::Pending;
        job.attempt_count = 0;
        job.next_attempt_at = now;
        job.last_error = None;
        job.last_error_kind = None;
        job.updated_at = now;
        Ok(())
    }

    fn purge_done(&self, older_than: Timestamp) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let before = state.jobs.len();
        state
            .jobs
            .retain(|_, job| !(job.status == JobStatus::Done && job.updated_at < older_than));
        Ok(before - state.jobs.len())
    }
}

type Scope = (String, String);

#[derive(Debug, Default)]
struct MapState {
    by_local: HashMap<Scope, BTreeMap<LocalId, EntityMapping>>,
    by_remote: HashMap<Scope, HashMap<RemoteId, LocalId>>,
}

/// An in-memory [`EntityMapStore`].
#[derive(Debug)]
pub struct MemoryEntityMap {
    clock: Arc<dyn Clock>,
    state: Mutex<MapState>,
}

impl MemoryEntityMap {
    /// Creates an empty map on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty map on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(MapState::default()),
        }
    }
}

impl Default for MemoryEntityMap {
    fn default() -> Self {
        Self::new()
    }
}

fn scope(module_id: &str, entity_type: &str) -> Scope {
    (module_id.to_string(), entity_type.to_string())
}

impl EntityMapStore for MemoryEntityMap {
    fn get(
        &self,
        module_id: &str,
        entity_type: &str,
        local_id: LocalId,
    ) -> StoreResult<Option<EntityMapping>> {
        Ok(self
            .state
            .lock()
            .by_local
            .get(&scope(module_id, entity_type))
            .and_then(|rows| rows.get(&local_id))
            .cloned())
    }

    fn get_by_remote(
        &self,
        module_id: &str,
        entity_type: &str,
        remote_id: RemoteId,
    ) -> StoreResult<Option<EntityMapping>> {
        let state = self.state.lock();
        let key = scope(module_id, entity_type);
        Ok(state
            .by_remote
            .get(&key)
            .and_then(|index| index.get(&remote_id))
            .and_then(|local_id| state.by_local.get(&key)?.get(local_id))
            .cloned())
    }

    fn save(
        &self,
        module_id: &str,
        entity_type: &str,
        local_id: LocalId,
        remote_id: RemoteId,
        remote_model: &str,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        let key = scope(module_id, entity_type);
        let mut state = self.state.lock();

        let by_local = state.by_local.get(&key).and_then(|rows| rows.get(&local_id));
        let by_remote = state
            .by_remote
            .get(&key)
            .and_then(|index| index.get(&remote_id))
            .and_then(|other| state.by_local.get(&key)?.get(other));

        if let Some(existing) = by_local.or(by_remote) {
            if existing.local_id == local_id && existing.remote_id == remote_id {
                return Ok(());
            }
            return Err(StoreError::Conflict {
                module_id: module_id.to_string(),
                entity_type: entity_type.to_string(),
                local_id,
                remote_id,
                existing: Box::new(existing.clone()),
            });
        }

        state.by_local.entry(key.clone()).or_default().insert(
            local_id,
            EntityMapping {
                module_id: module_id.to_string(),
                entity_type: entity_type.to_string(),
                local_id,
                remote_model: remote_model.to_string(),
                remote_id,
                created_at: now,
            },
        );
        state
            .by_remote
            .entry(key)
            .or_default()
            .insert(remote_id, local_id);
        Ok(())
    }

    fn delete(&self, module_id: &str, entity_type: &str, local_id: LocalId) -> StoreResult<bool> {
        let key = scope(module_id, entity_type);
        let mut state = self.state.lock();
        let removed = state
            .by_local
            .get_mut(&key)
            .and_then(|rows| rows.remove(&local_id));
        match removed {
            Some(mapping) => {
                if let Some(index) = state.by_remote.get_mut(&key) {
                    index.remove(&mapping.remote_id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_by_remote(
        &self,
        module_id: &str,
        entity_type: &str,
        remote_id: RemoteId,
    ) -> StoreResult<bool> {
        let key = scope(module_id, entity_type);
        let mut state = self.state.lock();
        let local_id = state
            .by_remote
            .get_mut(&key)
            .and_then(|index| index.remove(&remote_id));
        match local_id {
            Some(local_id) => {
                if let Some(rows) = state.by_local.get_mut(&key) {
                    rows.remove(&local_id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list(&self, module_id: &str, entity_type: Option<&str>) -> StoreResult<Vec<EntityMapping>> {
        let state = self.state.lock();
        let mut rows: Vec<EntityMapping> = state
            .by_local
            .iter()
            .filter(|((module, et), _)| {
                module == module_id && entity_type.map_or(true, |wanted| et == wanted)
            })
            .flat_map(|(_, rows)| rows.values().cloned())
            .collect();
        rows.sort_by(|a, b| {
            (a.entity_type.as_str(), a.local_id).cmp(&(b.entity_type.as_str(), b.local_id))
        });
        Ok(rows)
    }

    fn count(&self, module_id: Option<&str>) -> StoreResult<usize> {
        Ok(self
            .state
            .lock()
            .by_local
            .iter()
            .filter(|((module, _), _)| module_id.map_or(true, |wanted| module == wanted))
            .map(|(_, rows)| rows.len())
            .sum())
    }
}
