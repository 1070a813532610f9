//! SQLite job queue.

use super::SqliteDatabase;
use crate::error::{StoreError, StoreResult};
use crate::queue::{coalesce, decode_payload, encode_payload, EnqueueOutcome, JobQueue, QueueStats};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;
use syncbridge_core::{
    duration_millis, Claim, Clock, ErrorKind, Job, JobAction, JobDirection, JobId, JobStatus,
    NewJob, Priority, SystemClock, Timestamp,
};
use tracing::{debug, warn};

/// A [`JobQueue`] stored in the `sync_jobs` table.
#[derive(Debug, Clone)]
pub struct SqliteJobQueue {
    db: SqliteDatabase,
    clock: Arc<dyn Clock>,
}

impl SqliteJobQueue {
    /// Creates a queue on the system clock.
    pub fn new(db: SqliteDatabase) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    /// Creates a queue on the given clock.
    pub fn with_clock(db: SqliteDatabase, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<RawJob> {
        Ok(RawJob {
            id: row.get("id")?,
            module_id: row.get("module_id")?,
            entity_type: row.get("entity_type")?,
            direction: row.get("direction")?,
            action: row.get("action")?,
            local_id: row.get("local_id")?,
            remote_id: row.get("remote_id")?,
            payload: row.get("payload")?,
            priority: row.get("priority")?,
            attempt_count: row.get("attempt_count")?,
            next_attempt_at: row.get("next_attempt_at")?,
            status: row.get("status")?,
            claim_token: row.get("claim_token")?,
            claim_expires_at: row.get("claim_expires_at")?,
            last_error: row.get("last_error")?,
            last_error_kind: row.get("last_error_kind")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn insert(conn: &Connection, job: &NewJob, now: Timestamp) -> StoreResult<JobId> {
        conn.execute(
            r#"INSERT INTO sync_jobs (
                module_id, entity_type, direction, action, local_id, remote_id,
                payload, priority, attempt_count, next_attempt_at, status,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, 'pending', ?10, ?10)"#,
            params![
                job.module_id,
                job.entity_type,
                job.direction.as_str(),
                job.action.as_str(),
                job.local_id,
                job.remote_id,
                encode_payload(&job.payload)?,
                job.priority.0,
                job.not_before.unwrap_or(now),
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(job_id = id, module_id = %job.module_id, action = %job.action, "enqueued job");
        Ok(id)
    }

    fn fetch(conn: &Connection, job_id: JobId) -> StoreResult<Option<Job>> {
        conn.query_row(
            "SELECT * FROM sync_jobs WHERE id = ?1",
            params![job_id],
            Self::row_to_job,
        )
        .optional()?
        .map(RawJob::into_job)
        .transpose()
    }

    /// Explains why a guarded update touched no row.
    fn missing_claim(conn: &Connection, job_id: JobId) -> StoreError {
        match Self::fetch(conn, job_id) {
            Ok(Some(_)) => StoreError::ClaimLost { job_id },
            Ok(None) => StoreError::NotFound(job_id),
            Err(e) => e,
        }
    }
}

/// A row as stored, before enum decoding.
struct RawJob {
    id: JobId,
    module_id: String,
    entity_type: String,
    direction: String,
    action: String,
    local_id: Option<i64>,
    remote_id: Option<i64>,
    payload: String,
    priority: i32,
    attempt_count: u32,
    next_attempt_at: Timestamp,
    status: String,
    claim_token: Option<String>,
    claim_expires_at: Option<Timestamp>,
    last_error: Option<String>,
    last_error_kind: Option<String>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl RawJob {
    fn into_job(self) -> StoreResult<Job> {
        let corrupt = |what: &str, value: &str| {
            StoreError::Corrupt(format!("job {}: unknown {} '{}'", self.id, what, value))
        };
        let direction =
            JobDirection::parse(&self.direction).ok_or_else(|| corrupt("direction", &self.direction))?;
        let action = JobAction::parse(&self.action).ok_or_else(|| corrupt("action", &self.action))?;
        let status = JobStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;
        let last_error_kind = match self.last_error_kind.as_deref() {
            Some(kind) => Some(ErrorKind::parse(kind).ok_or_else(|| corrupt("error kind", kind))?),
            None => None,
        };
        let claim = match (self.claim_token, self.claim_expires_at) {
            (Some(token), Some(expires_at)) => Some(Claim { token, expires_at }),
            _ => None,
        };
        Ok(Job {
            id: self.id,
            module_id: self.module_id,
            entity_type: self.entity_type,
            direction,
            action,
            local_id: self.local_id,
            remote_id: self.remote_id,
            payload: decode_payload(&self.payload)?,
            priority: Priority(self.priority),
            attempt_count: self.attempt_count,
            next_attempt_at: self.next_attempt_at,
            status,
            claim,
            last_error: self.last_error,
            last_error_kind,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl JobQueue for SqliteJobQueue {
    fn enqueue(&self, job: NewJob) -> StoreResult<JobId> {
        let now = self.clock.now();
        let conn = self.db.lock();
        Self::insert(&conn, &job, now)
    }

    fn enqueue_unique(&self, job: NewJob) -> StoreResult<EnqueueOutcome> {
        let now = self.clock.now();
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = match job.coalesce_key() {
            Some(key) => {
                let key_column = match job.direction {
                    JobDirection::Push => "local_id",
                    JobDirection::Pull => "remote_id",
                };
                let sql = format!(
                    "SELECT * FROM sync_jobs
                     WHERE module_id = ?1 AND entity_type = ?2 AND direction = ?3
                       AND status = 'pending' AND {} = ?4
                     ORDER BY id DESC LIMIT 1",
                    key_column
                );
                tx.query_row(
                    &sql,
                    params![job.module_id, job.entity_type, job.direction.as_str(), key],
                    Self::row_to_job,
                )
                .optional()?
                .map(RawJob::into_job)
                .transpose()?
            }
            None => None,
        };

        if let Some(existing) = existing {
            if let Some(merge) = coalesce(&existing, &job) {
                tx.execute(
                    "UPDATE sync_jobs
                     SET action = ?1, payload = ?2, priority = ?3, local_id = ?4,
                         remote_id = ?5, updated_at = ?6
                     WHERE id = ?7",
                    params![
                        merge.action.as_str(),
                        encode_payload(&merge.payload)?,
                        merge.priority.0,
                        merge.local_id,
                        merge.remote_id,
                        now,
                        existing.id,
                    ],
                )?;
                tx.commit()?;
                debug!(job_id = existing.id, "coalesced job");
                return Ok(EnqueueOutcome::Coalesced(existing.id));
            }
        }

        let id = Self::insert(&tx, &job, now)?;
        tx.commit()?;
        Ok(EnqueueOutcome::Enqueued(id))
    }

    fn claim(&self, batch_size: usize, claim_ttl: Duration) -> StoreResult<Vec<Job>> {
        let now = self.clock.now();
        let expires_at = now.saturating_add(duration_millis(claim_ttl));
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);

        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidates = {
            let mut stmt = tx.prepare(
                "SELECT * FROM sync_jobs
                 WHERE (status = 'pending' AND next_attempt_at <= ?1)
                    OR (status = 'processing' AND (claim_expires_at IS NULL OR claim_expires_at <= ?1))
                 ORDER BY priority ASC, next_attempt_at ASC, id ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![now, limit], Self::row_to_job)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut claimed = Vec::with_capacity(candidates.len());
        for raw in candidates {
            let mut job = raw.into_job()?;
            if job.status == JobStatus::Processing {
                warn!(
                    job_id = job.id,
                    module_id = %job.module_id,
                    "reclaiming job with expired claim"
                );
            }
            let token = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE sync_jobs
                 SET status = 'processing', claim_token = ?1, claim_expires_at = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![token, expires_at, now, job.id],
            )?;
            job.status = JobStatus::Processing;
            job.claim = Some(Claim { token, expires_at });
            job.updated_at = now;
            claimed.push(job);
        }
        tx.commit()?;

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed jobs");
        }
        Ok(claimed)
    }

    fn complete(&self, job_id: JobId, claim_token: &str) -> StoreResult<()> {
        let now = self.clock.now();
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE sync_jobs
             SET status = 'done', claim_token = NULL, claim_expires_at = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'processing' AND claim_token = ?3",
            params![now, job_id, claim_token],
        )?;
        if updated == 0 {
            return Err(Self::missing_claim(&conn, job_id));
        }
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
        let next_attempt_at = now.saturating_add(duration_millis(delay));
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE sync_jobs
             SET status = 'pending', claim_token = NULL, claim_expires_at = NULL,
                 attempt_count = attempt_count + 1, next_attempt_at = ?1,
                 last_error = ?2, last_error_kind = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'processing' AND claim_token = ?6",
            params![
                next_attempt_at,
                error,
                ErrorKind::Transient.as_str(),
                now,
                job_id,
                claim_token
            ],
        )?;
        if updated == 0 {
            return Err(Self::missing_claim(&conn, job_id));
        }
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
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE sync_jobs
             SET status = 'dead', claim_token = NULL, claim_expires_at = NULL,
                 last_error = ?1, last_error_kind = ?2, updated_at = ?3
             WHERE id = ?4 AND status = 'processing' AND claim_token = ?5",
            params![reason, kind.map(|k| k.as_str()), now, job_id, claim_token],
        )?;
        if updated == 0 {
            return Err(Self::missing_claim(&conn, job_id));
        }
        Ok(())
    }

    fn get(&self, job_id: JobId) -> StoreResult<Option<Job>> {
        Self::fetch(&self.db.lock(), job_id)
    }

    fn list(&self, status: Option<JobStatus>, limit: usize, offset: usize) -> StoreResult<Vec<Job>> {
        let conn = self.db.lock();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT * FROM sync_jobs
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY id ASC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(
                params![status.map(|s| s.as_str()), limit, offset],
                Self::row_to_job,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawJob::into_job).collect()
    }

    fn stats(&self) -> StoreResult<QueueStats> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_jobs GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let status = JobStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{}'", status)))?;
            stats.add(status, count.max(0) as u64);
        }
        Ok(stats)
    }

    fn requeue(&self, job_id: JobId) -> StoreResult<()> {
        let now = self.clock.now();
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE sync_jobs
             SET status = 'pending', attempt_count = 0, next_attempt_at = ?1,
                 last_error = NULL, last_error_kind = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'dead'",
            params![now, job_id],
        )?;
        if updated == 0 {
            return match Self::fetch(&conn, job_id)? {
                Some(job) => Err(StoreError::InvalidState {
                    job_id,
                    status: job.status,
                    operation: "requeue",
                }),
                None => Err(StoreError::NotFound(job_id)),
            };
        }
        Ok(())
    }

    fn purge_done(&self, older_than: Timestamp) -> StoreResult<usize> {
        let conn = self.db.lock();
        let purged = conn.execute(
            "DELETE FROM sync_jobs WHERE status = 'done' AND updated_at < ?1",
            params![older_than],
        )?;
        if purged > 0 {
            debug!(count = purged, "purged done jobs");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use syncbridge_core::ManualClock;

    fn queue() -> (SqliteJobQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let db = SqliteDatabase::in_memory().unwrap();
        (SqliteJobQueue::with_clock(db, clock.clone()), clock)
    }

    #[test]
    fn claim_order() {
        let (q, clock) = queue();
        conformance::claim_order(&q, &clock);
    }

    #[test]
    fn claim_respects_next_attempt() {
        let (q, clock) = queue();
        conformance::claim_respects_next_attempt(&q, &clock);
    }

    #[test]
    fn stale_claims() {
        let (q, clock) = queue();
        conformance::stale_claim_is_reclaimed(&q, &clock);
    }

    #[test]
    fn reschedule_and_kill() {
        let (q, clock) = queue();
        conformance::reschedule_and_kill(&q, &clock);
    }

    #[test]
    fn requeue() {
        let (q, clock) = queue();
        conformance::requeue_revives_dead_jobs(&q, &clock);
    }

    #[test]
    fn coalescing() {
        let (q, clock) = queue();
        conformance::enqueue_unique_coalesces(&q, &clock);
    }

    #[test]
    fn list_stats_purge() {
        let (q, clock) = queue();
        conformance::list_stats_and_purge(&q, &clock);
    }

    #[test]
    fn payload_survives_storage() {
        let (q, _) = queue();
        let payload = serde_json::json!({"name": "Widget", "qty": 3, "tags": ["a"]})
            .as_object()
            .cloned()
            .unwrap();
        let id = q
            .enqueue(NewJob::push("orders", "order", JobAction::Create, 1).with_payload(payload.clone()))
            .unwrap();
        assert_eq!(q.get(id).unwrap().unwrap().payload, payload);
    }

    #[test]
    fn jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let id = {
            let q = SqliteJobQueue::new(SqliteDatabase::open(&path).unwrap());
            q.enqueue(NewJob::pull("orders", "order", JobAction::Update, 987))
                .unwrap()
        };

        let q = SqliteJobQueue::new(SqliteDatabase::open(&path).unwrap());
        let job = q.get(id).unwrap().unwrap();
        assert_eq!(job.direction, JobDirection::Pull);
        assert_eq!(job.remote_id, Some(987));
        assert_eq!(job.local_id, None);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn corrupt_status_is_reported() {
        let (q, _) = queue();
        let id = q
            .enqueue(NewJob::push("orders", "order", JobAction::Create, 1))
            .unwrap();
        q.db.lock()
            .execute("UPDATE sync_jobs SET status = 'weird' WHERE id = ?1", params![id])
            .unwrap();
        assert!(matches!(q.get(id), Err(StoreError::Corrupt(_))));
    }
}
