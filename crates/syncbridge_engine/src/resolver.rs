//! Dependency resolution and dedup-before-create.
//!
//! Pushing an entity first makes sure everything it references exists
//! remotely, pushing missing prerequisites inline (bypassing the queue).
//! The chain of entities being resolved lives on a per-thread stack, so a
//! module that calls [`SyncContext::ensure_synced`] from its own push code
//! still gets cycle and depth protection.

use crate::classify::classify_store;
use crate::context::SyncContext;
use crate::module::{PushRequest, SyncModule};
use std::cell::{Cell, RefCell};
use syncbridge_core::{EntityKey, JobAction, LocalId, RemoteId, SyncFailure, SyncOutcome, SyncSuccess};
use syncbridge_store::StoreError;
use tracing::{debug, info};

thread_local! {
    static RESOLUTION: RefCell<Vec<EntityKey>> = const { RefCell::new(Vec::new()) };
    static INLINE_PUSHES: Cell<usize> = const { Cell::new(0) };
}

/// Pops its key off the resolution stack when dropped, including while
/// unwinding.
struct Frame;

impl Frame {
    fn enter(key: EntityKey) -> Self {
        RESOLUTION.with(|stack| stack.borrow_mut().push(key));
        Frame
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        RESOLUTION.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Counts one inline push for as long as it lives.
struct InlinePush;

impl InlinePush {
    fn enter() -> Self {
        INLINE_PUSHES.with(|n| n.set(n.get() + 1));
        InlinePush
    }
}

impl Drop for InlinePush {
    fn drop(&mut self) {
        INLINE_PUSHES.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

/// Inline pushes currently running on this thread.
fn inline_pushes() -> usize {
    INLINE_PUSHES.with(Cell::get)
}

/// Returns the chain `a -> b -> key` if `key` is already being resolved.
fn cycle_through(key: &EntityKey) -> Option<String> {
    RESOLUTION.with(|stack| {
        let stack = stack.borrow();
        let start = stack.iter().position(|k| k == key)?;
        let mut chain: Vec<String> = stack[start..].iter().map(ToString::to_string).collect();
        chain.push(key.to_string());
        Some(chain.join(" -> "))
    })
}

/// Returns the remote id of an entity, pushing it inline if unmapped.
///
/// At most `max_dependency_depth` inline pushes nest on one thread, whether
/// they start from a queued job or from a direct call.
pub fn ensure_synced(
    ctx: &SyncContext,
    module_id: &str,
    entity_type: &str,
    local_id: LocalId,
) -> Result<RemoteId, SyncFailure> {
    if let Some(remote_id) = ctx
        .map()
        .get_remote_id(module_id, entity_type, local_id)
        .map_err(|e| classify_store(&e))?
    {
        return Ok(remote_id);
    }

    let key = EntityKey::new(module_id, entity_type, local_id);
    if let Some(chain) = cycle_through(&key) {
        return Err(SyncFailure::permanent(format!("dependency cycle: {}", chain)));
    }
    let max_depth = ctx.config().max_dependency_depth;
    if inline_pushes() >= max_depth {
        return Err(SyncFailure::permanent(format!(
            "dependency depth exceeds {} at {}",
            max_depth, key
        )));
    }

    let module = ctx
        .registry()
        .get(module_id)
        .ok_or_else(|| SyncFailure::permanent(format!("dependency {} has unknown module", key)))?;
    if module.registration().remote_model(entity_type).is_none() {
        return Err(SyncFailure::permanent(format!(
            "dependency {} has unknown entity type",
            key
        )));
    }
    if !module.sync_direction().allows_push() {
        return Err(SyncFailure::transient(format!("dependency {} not yet synced", key)));
    }

    let _inline = InlinePush::enter();
    debug!(dependency = %key, depth = inline_pushes(), "pushing dependency inline");
    let request = PushRequest::new(entity_type, JobAction::Create, Some(local_id));
    let success = push_entity(ctx, module.as_ref(), request).map_err(|f| f.context(format!("dependency {}", key)))?;

    match success.remote_id {
        Some(remote_id) => Ok(remote_id),
        None => ctx.remote_id_of(module_id, entity_type, local_id).map_err(|_| {
            SyncFailure::permanent(format!("push of dependency {} returned no remote id", key))
        }),
    }
}

/// Runs the full push pipeline for one entity.
///
/// 1. Normalize the action against the entity map.
/// 2. Resolve dependencies (create and update).
/// 3. Dedup (create only): adopt a matching remote record and continue as
///    an update.
/// 4. Push, then record the mapping.
pub fn push_entity(ctx: &SyncContext, module: &dyn SyncModule, mut request: PushRequest) -> SyncOutcome {
    let module_id = module.module_id().to_string();
    let entity_type = request.entity_type.clone();
    let remote_model = module
        .registration()
        .remote_model(&entity_type)
        .map(str::to_string)
        .ok_or_else(|| {
            SyncFailure::permanent(format!(
                "module '{}' has no entity type '{}'",
                module_id, entity_type
            ))
        })?;

    let Some(local_id) = request.local_id else {
        // Payload-only push: nothing to link or resolve.
        return module.push(ctx, &request);
    };

    let mapped = ctx
        .map()
        .get_remote_id(&module_id, &entity_type, local_id)
        .map_err(|e| classify_store(&e))?;

    if request.action == JobAction::Delete {
        if request.remote_id.is_none() {
            request.remote_id = mapped;
        }
        return module.push(ctx, &request);
    }

    match (request.action, mapped) {
        (_, Some(remote_id)) => {
            request.action = JobAction::Update;
            request.remote_id = Some(remote_id);
        }
        (JobAction::Update, None) if request.remote_id.is_none() => {
            request.action = JobAction::Create;
        }
        _ => {}
    }

    let key = EntityKey::new(&module_id, &entity_type, local_id);
    let _frame = Frame::enter(key.clone());

    for dependency in module.dependencies(ctx, &entity_type, local_id)? {
        let dep_module = dependency.module_id.as_deref().unwrap_or(&module_id);
        ensure_synced(ctx, dep_module, &dependency.entity_type, dependency.local_id)?;
    }

    if request.action == JobAction::Create {
        if let Some(remote_id) = dedup(ctx, module, &remote_model, &request, local_id)? {
            request.action = JobAction::Update;
            request.remote_id = Some(remote_id);
        }
    }

    let success = module.push(ctx, &request)?;
    let remote_id = success.remote_id.or(request.remote_id);
    if let Some(remote_id) = remote_id {
        ctx.record_mapping(&module_id, &entity_type, local_id, remote_id, &remote_model)?;
    }
    debug!(entity = %key, action = %request.action, remote_id = ?remote_id, "pushed");
    Ok(SyncSuccess {
        remote_id,
        local_id: Some(local_id),
    })
}

/// Searches the remote for a record matching the entity's natural key and
/// links it. Returns the adopted remote id.
fn dedup(
    ctx: &SyncContext,
    module: &dyn SyncModule,
    remote_model: &str,
    request: &PushRequest,
    local_id: LocalId,
) -> Result<Option<RemoteId>, SyncFailure> {
    let module_id = module.module_id();
    let entity_type = request.entity_type.as_str();
    let values = module.map_to_remote(ctx, entity_type, Some(local_id), &request.payload)?;
    let Some(domain) = module.dedup_domain(entity_type, &values)? else {
        return Ok(None);
    };
    if domain.is_empty() {
        return Ok(None);
    }

    let Some(&remote_id) = ctx.remote().search(remote_model, &domain, Some(1))?.first() else {
        return Ok(None);
    };

    match ctx.map().save(module_id, entity_type, local_id, remote_id, remote_model) {
        Ok(()) => {}
        Err(StoreError::Conflict { existing, .. }) if existing.local_id != local_id => {
            return Err(SyncFailure::permanent(format!(
                "{} #{} matches {} but is already linked to local #{}",
                remote_model, remote_id, EntityKey::new(module_id, entity_type, local_id), existing.local_id
            )));
        }
        Err(StoreError::Conflict { existing, .. }) => {
            return Err(SyncFailure::transient(format!(
                "identity race: {} was linked to {} #{} concurrently",
                EntityKey::new(module_id, entity_type, local_id),
                remote_model,
                existing.remote_id
            )));
        }
        Err(e) => return Err(classify_store(&e)),
    }

    info!(
        module_id,
        entity_type,
        local_id,
        remote_id,
        remote_model,
        "adopted existing remote record"
    );
    Ok(Some(remote_id))
}
