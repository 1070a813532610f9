//! Turning change notifications into jobs.

use crate::context::SyncContext;
use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use syncbridge_core::{Fields, JobAction, JobDirection, LocalId, NewJob, Priority, RemoteId};
use syncbridge_store::EnqueueOutcome;
use tracing::debug;

/// Entry point for local and remote change notifications.
///
/// Notifications for inactive modules, disallowed directions, or records
/// the engine itself is importing are ignored and return `Ok(None)`.
#[derive(Debug, Clone)]
pub struct ChangeCapture {
    ctx: Arc<SyncContext>,
    priority: Priority,
}

impl ChangeCapture {
    /// Creates a capture enqueueing at normal priority.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            priority: Priority::NORMAL,
        }
    }

    /// Sets the priority of captured jobs.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// A local record was created, modified or deleted.
    pub fn local_changed(
        &self,
        module_id: &str,
        entity_type: &str,
        action: JobAction,
        local_id: LocalId,
        payload: Fields,
    ) -> EngineResult<Option<EnqueueOutcome>> {
        if !self.accepts(module_id, entity_type, JobDirection::Push)? {
            return Ok(None);
        }
        if self.ctx.import_guard().is_active(module_id, entity_type) {
            debug!(module_id, entity_type, local_id, "change caused by import, skipped");
            return Ok(None);
        }

        let job = NewJob::push(module_id, entity_type, action, local_id)
            .with_payload(payload)
            .with_priority(self.priority);
        let outcome = self.ctx.queue().enqueue_unique(job)?;
        debug!(module_id, entity_type, local_id, ?action, ?outcome, "local change captured");
        Ok(Some(outcome))
    }

    /// A remote record was created, modified or deleted.
    pub fn remote_changed(
        &self,
        module_id: &str,
        entity_type: &str,
        action: JobAction,
        remote_id: RemoteId,
        payload: Fields,
    ) -> EngineResult<Option<EnqueueOutcome>> {
        if !self.accepts(module_id, entity_type, JobDirection::Pull)? {
            return Ok(None);
        }

        let mut job = NewJob::pull(module_id, entity_type, action, remote_id)
            .with_payload(payload)
            .with_priority(self.priority);
        if let Some(local_id) = self.ctx.map().get_local_id(module_id, entity_type, remote_id)? {
            job = job.with_local_id(local_id);
        }
        let outcome = self.ctx.queue().enqueue_unique(job)?;
        debug!(module_id, entity_type, remote_id, ?action, ?outcome, "remote change captured");
        Ok(Some(outcome))
    }

    /// Enqueues an operator-initiated job.
    ///
    /// Skips the activity gates; the module and entity type must still exist.
    pub fn enqueue(&self, job: NewJob) -> EngineResult<EnqueueOutcome> {
        self.validate(&job.module_id, &job.entity_type)?;
        Ok(self.ctx.queue().enqueue_unique(job)?)
    }

    fn validate(&self, module_id: &str, entity_type: &str) -> EngineResult<()> {
        let module = self
            .ctx
            .registry()
            .get(module_id)
            .ok_or_else(|| EngineError::UnknownModule(module_id.to_string()))?;
        if module.registration().remote_model(entity_type).is_none() {
            return Err(EngineError::UnknownEntityType {
                module_id: module_id.to_string(),
                entity_type: entity_type.to_string(),
            });
        }
        Ok(())
    }

    fn accepts(&self, module_id: &str, entity_type: &str, direction: JobDirection) -> EngineResult<bool> {
        self.validate(module_id, entity_type)?;
        let registry = self.ctx.registry();
        if !registry.is_active(module_id) {
            debug!(module_id, entity_type, "module inactive, change ignored");
            return Ok(false);
        }
        let allowed = registry
            .get(module_id)
            .is_some_and(|m| m.sync_direction().allows(direction));
        if !allowed {
            debug!(module_id, entity_type, direction = direction.as_str(), "direction not synced, change ignored");
        }
        Ok(allowed)
    }
}
