//! Queue draining and outcome handling.

use crate::config::DormantPolicy;
use crate::context::SyncContext;
use crate::error::EngineResult;
use crate::module::{catch_panics, PullRequest, PushRequest};
use crate::resolver;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncbridge_core::{ErrorKind, Job, JobAction, JobDirection, SyncFailure, SyncOutcome};
use syncbridge_store::StoreResult;
use tracing::{debug, error, info, warn};

/// Summary of one [`Dispatcher::run_once`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Jobs claimed.
    pub claimed: usize,
    /// Jobs marked done.
    pub completed: usize,
    /// Jobs scheduled for another attempt.
    pub rescheduled: usize,
    /// Jobs dead-lettered.
    pub dead: usize,
    /// Jobs whose claim was taken over before the outcome was recorded.
    pub lost_claims: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Cumulative dispatcher statistics.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Number of runs.
    pub runs: u64,
    /// Total jobs claimed.
    pub jobs_claimed: u64,
    /// Total jobs completed.
    pub jobs_completed: u64,
    /// Total reschedules.
    pub jobs_rescheduled: u64,
    /// Total dead-letters.
    pub jobs_dead: u64,
    /// Total lost claims.
    pub lost_claims: u64,
    /// When the last run finished.
    pub last_run: Option<Instant>,
    /// Error of the last run that failed as a whole.
    pub last_error: Option<String>,
}

/// How a job's outcome was recorded.
enum Settled {
    Completed,
    Rescheduled,
    Dead,
}

/// Drains the job queue.
///
/// Each run claims one batch and settles every job in it: success
/// completes the job, a transient failure reschedules it with backoff until
/// the attempt ceiling, anything else dead-letters it.
#[derive(Debug)]
pub struct Dispatcher {
    ctx: Arc<SyncContext>,
    stats: RwLock<DispatchStats>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            stats: RwLock::new(DispatchStats::default()),
        }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Gets the current stats.
    pub fn stats(&self) -> DispatchStats {
        self.stats.read().clone()
    }

    /// Claims and processes one batch.
    pub fn run_once(&self) -> EngineResult<DispatchReport> {
        let start = Instant::now();
        let result = self.run_batch();
        let mut stats = self.stats.write();
        stats.runs += 1;
        stats.last_run = Some(Instant::now());
        match result {
            Ok(mut report) => {
                report.duration = start.elapsed();
                stats.jobs_claimed += report.claimed as u64;
                stats.jobs_completed += report.completed as u64;
                stats.jobs_rescheduled += report.rescheduled as u64;
                stats.jobs_dead += report.dead as u64;
                stats.lost_claims += report.lost_claims as u64;
                stats.last_error = None;
                if report.claimed > 0 {
                    info!(
                        claimed = report.claimed,
                        completed = report.completed,
                        rescheduled = report.rescheduled,
                        dead = report.dead,
                        lost_claims = report.lost_claims,
                        elapsed_ms = report.duration.as_millis() as u64,
                        "dispatch run finished"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());
                error!(error = %e, "dispatch run failed");
                Err(e)
            }
        }
    }

    fn run_batch(&self) -> EngineResult<DispatchReport> {
        let config = self.ctx.config();
        let jobs = self.ctx.queue().claim(config.batch_size, config.claim_ttl)?;
        let mut report = DispatchReport {
            claimed: jobs.len(),
            ..Default::default()
        };

        for job in &jobs {
            let outcome = self.execute(job);
            match self.settle(job, outcome) {
                Ok(Settled::Completed) => report.completed += 1,
                Ok(Settled::Rescheduled) => report.rescheduled += 1,
                Ok(Settled::Dead) => report.dead += 1,
                Err(e) if e.is_claim_lost() => {
                    warn!(job_id = job.id, module_id = %job.module_id, "claim lost, outcome discarded");
                    report.lost_claims += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(report)
    }

    /// Runs a job against its module.
    fn execute(&self, job: &Job) -> SyncOutcome {
        let ctx = self.ctx.as_ref();
        let registry = ctx.registry();
        let module = registry
            .get(&job.module_id)
            .ok_or_else(|| SyncFailure::permanent(format!("unknown module '{}'", job.module_id)))?;

        if registry.is_dormant(&job.module_id) {
            match ctx.config().dormant_policy {
                DormantPolicy::Drop => {
                    return Err(SyncFailure::permanent(format!(
                        "module '{}' is dormant",
                        job.module_id
                    )));
                }
                DormantPolicy::Process => {
                    debug!(job_id = job.id, module_id = %job.module_id, "processing residual job of dormant module");
                }
            }
        }

        if !module.sync_direction().allows(job.direction) {
            return Err(SyncFailure::permanent(format!(
                "module '{}' does not {}",
                job.module_id,
                job.direction.as_str()
            )));
        }

        catch_panics(&job.module_id, job.direction.as_str(), || match job.direction {
            JobDirection::Push => {
                let request = PushRequest {
                    entity_type: job.entity_type.clone(),
                    action: job.action,
                    local_id: job.local_id,
                    remote_id: job.remote_id,
                    payload: job.payload.clone(),
                };
                resolver::push_entity(ctx, module.as_ref(), request)
            }
            JobDirection::Pull => {
                let request = PullRequest {
                    entity_type: job.entity_type.clone(),
                    action: job.action,
                    remote_id: job.remote_id,
                    local_id: job.local_id,
                    payload: job.payload.clone(),
                };
                let success = module.pull(ctx, &request)?;
                if job.action != JobAction::Delete {
                    if let (Some(local_id), Some(remote_id), Some(model)) = (
                        success.local_id,
                        success.remote_id.or(job.remote_id),
                        module.registration().remote_model(&job.entity_type),
                    ) {
                        ctx.record_mapping(&job.module_id, &job.entity_type, local_id, remote_id, model)?;
                    }
                }
                Ok(success)
            }
        })
    }

    /// Records a job's outcome in the queue.
    fn settle(&self, job: &Job, outcome: SyncOutcome) -> StoreResult<Settled> {
        let queue = self.ctx.queue();
        let token = job.claim_token().unwrap_or_default();

        let failure = match outcome {
            Ok(success) => {
                queue.complete(job.id, token)?;
                debug!(
                    job_id = job.id,
                    module_id = %job.module_id,
                    entity_type = %job.entity_type,
                    local_id = ?success.local_id.or(job.local_id),
                    remote_id = ?success.remote_id.or(job.remote_id),
                    "job done"
                );
                return Ok(Settled::Completed);
            }
            Err(failure) => failure,
        };

        let retry = &self.ctx.config().retry;
        if failure.kind == ErrorKind::Transient && retry.should_retry(job.attempt_count) {
            let backoff = retry.delay_for_attempt(job.attempt_count + 1);
            let delay = failure.retry_after.map_or(backoff, |hint| backoff.max(hint));
            queue.reschedule(job.id, token, delay, &failure.message)?;
            warn!(
                job_id = job.id,
                module_id = %job.module_id,
                entity_type = %job.entity_type,
                local_id = ?job.local_id,
                remote_id = ?job.remote_id,
                attempt_count = job.attempt_count + 1,
                error_kind = %failure.kind,
                delay_ms = delay.as_millis() as u64,
                message = %failure.message,
                "job failed, retrying"
            );
            return Ok(Settled::Rescheduled);
        }

        queue.kill(job.id, token, &failure.message, Some(failure.kind))?;
        error!(
            job_id = job.id,
            module_id = %job.module_id,
            entity_type = %job.entity_type,
            local_id = ?job.local_id,
            remote_id = ?job.remote_id,
            attempt_count = job.attempt_count + 1,
            error_kind = %failure.kind,
            message = %failure.message,
            "job dead-lettered"
        );
        Ok(Settled::Dead)
    }
}
