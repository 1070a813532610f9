//! The module contract and the stock composable module.
//!
//! A module owns a set of entity types and knows how to move them between
//! the local and the remote system. Most integrations never implement
//! [`SyncModule`] by hand: they assemble a [`Module`] from one
//! [`EntityHandler`] per entity type and inherit the shared push/pull
//! behavior.

use crate::classify::classify_store;
use crate::context::SyncContext;
use crate::error::{EngineError, EngineResult};
use crate::remote::RemoteError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use syncbridge_core::{
    Domain, Fields, JobAction, LocalId, ModuleRegistration, RemoteId, SyncDirection, SyncFailure,
    SyncOutcome, SyncSuccess,
};
use tracing::{debug, error};

/// A request to move a local change to the remote system.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    /// Entity type within the module.
    pub entity_type: String,
    /// What happened locally.
    pub action: JobAction,
    /// Local record id.
    pub local_id: Option<LocalId>,
    /// Remote record id, when already known.
    pub remote_id: Option<RemoteId>,
    /// Producer payload.
    pub payload: Fields,
}

impl PushRequest {
    /// Creates a request with no remote id and an empty payload.
    pub fn new(entity_type: impl Into<String>, action: JobAction, local_id: Option<LocalId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            action,
            local_id,
            remote_id: None,
            payload: Fields::new(),
        }
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
}

/// A request to apply a remote change locally.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    /// Entity type within the module.
    pub entity_type: String,
    /// What happened remotely.
    pub action: JobAction,
    /// Remote record id.
    pub remote_id: Option<RemoteId>,
    /// Local record id, when already known.
    pub local_id: Option<LocalId>,
    /// Producer payload.
    pub payload: Fields,
}

impl PullRequest {
    /// Creates a request with no local id and an empty payload.
    pub fn new(entity_type: impl Into<String>, action: JobAction, remote_id: RemoteId) -> Self {
        Self {
            entity_type: entity_type.into(),
            action,
            remote_id: Some(remote_id),
            local_id: None,
            payload: Fields::new(),
        }
    }
}

/// An entity that must exist remotely before the dependent is pushed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// Owning module. `None` means the module declaring the dependency.
    pub module_id: Option<String>,
    /// Entity type.
    pub entity_type: String,
    /// Local id.
    pub local_id: LocalId,
}

impl Dependency {
    /// A dependency on an entity of the same module.
    pub fn new(entity_type: impl Into<String>, local_id: LocalId) -> Self {
        Self {
            module_id: None,
            entity_type: entity_type.into(),
            local_id,
        }
    }

    /// Points the dependency at another module.
    pub fn in_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }
}

/// A local record handed to mappers.
#[derive(Debug, Clone)]
pub struct LocalRecord<'a> {
    /// Entity type.
    pub entity_type: &'a str,
    /// Local id. `None` when the job carries the values in its payload.
    pub local_id: Option<LocalId>,
    /// Loaded fields (the payload when there is no local id).
    pub fields: Fields,
    /// Producer payload.
    pub payload: &'a Fields,
}

impl LocalRecord<'_> {
    /// Looks a field up in the loaded fields, then in the payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).or_else(|| self.payload.get(key))
    }

    /// Returns a field as a string.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Returns an integer field, failing permanently when it is absent.
    pub fn require_i64(&self, key: &str) -> Result<i64, SyncFailure> {
        self.get(key).and_then(Value::as_i64).ok_or_else(|| {
            SyncFailure::permanent(format!("{} has no integer field '{}'", self.entity_type, key))
        })
    }
}

/// A remote record handed to pull mappers.
#[derive(Debug, Clone)]
pub struct RemoteRecord<'a> {
    /// Entity type.
    pub entity_type: &'a str,
    /// Remote id.
    pub remote_id: RemoteId,
    /// Local id, when the record is already linked.
    pub local_id: Option<LocalId>,
    /// Values read from the remote.
    pub values: Fields,
    /// Producer payload.
    pub payload: &'a Fields,
}

/// Maps a local record to remote values.
pub type ToRemoteFn =
    Arc<dyn Fn(&SyncContext, &LocalRecord<'_>) -> Result<Fields, SyncFailure> + Send + Sync>;
/// Maps a remote record to local fields.
pub type FromRemoteFn =
    Arc<dyn Fn(&SyncContext, &RemoteRecord<'_>) -> Result<Fields, SyncFailure> + Send + Sync>;
/// Builds a natural-key search from mapped remote values.
pub type DedupFn = Arc<dyn Fn(&Fields) -> Option<Domain> + Send + Sync>;
/// Lists entities that must be pushed first.
pub type DependenciesFn = Arc<
    dyn Fn(&SyncContext, &LocalRecord<'_>) -> Result<Vec<Dependency>, SyncFailure> + Send + Sync,
>;
/// Replaces the stock push.
pub type PushFn = Arc<dyn Fn(&SyncContext, &PushRequest) -> SyncOutcome + Send + Sync>;
/// Replaces the stock pull.
pub type PullFn = Arc<dyn Fn(&SyncContext, &PullRequest) -> SyncOutcome + Send + Sync>;
/// Runs after a successful create or write.
pub type AfterPushFn =
    Arc<dyn Fn(&SyncContext, &PushRequest, RemoteId) -> Result<(), SyncFailure> + Send + Sync>;

/// The interface every pluggable module implements.
///
/// `push` and `pull` report every outcome as a [`SyncOutcome`]; they must
/// not panic. [`Module`] enforces this for user-supplied functions.
pub trait SyncModule: Send + Sync {
    /// Static description of the module.
    fn registration(&self) -> &ModuleRegistration;

    /// Module id.
    fn module_id(&self) -> &str {
        &self.registration().module_id
    }

    /// Directions the module synchronizes.
    fn sync_direction(&self) -> SyncDirection {
        self.registration().sync_direction
    }

    /// Moves a local change to the remote system.
    fn push(&self, ctx: &SyncContext, request: &PushRequest) -> SyncOutcome;

    /// Applies a remote change locally.
    fn pull(&self, ctx: &SyncContext, request: &PullRequest) -> SyncOutcome;

    /// Computes the remote values of a local record.
    fn map_to_remote(
        &self,
        ctx: &SyncContext,
        entity_type: &str,
        local_id: Option<LocalId>,
        payload: &Fields,
    ) -> Result<Fields, SyncFailure>;

    /// Natural-key search used to adopt an existing remote record instead
    /// of creating a duplicate.
    fn dedup_domain(&self, _entity_type: &str, _remote_values: &Fields) -> Result<Option<Domain>, SyncFailure> {
        Ok(None)
    }

    /// Entities that must exist remotely before this one is pushed.
    fn dependencies(
        &self,
        _ctx: &SyncContext,
        _entity_type: &str,
        _local_id: LocalId,
    ) -> Result<Vec<Dependency>, SyncFailure> {
        Ok(Vec::new())
    }
}

/// Per-entity behavior of a [`Module`].
#[derive(Clone)]
pub struct EntityHandler {
    to_remote: ToRemoteFn,
    from_remote: Option<FromRemoteFn>,
    dedup: Option<DedupFn>,
    dependencies: Option<DependenciesFn>,
    push: Option<PushFn>,
    pull: Option<PullFn>,
    after_push: Option<AfterPushFn>,
    read_fields: Vec<String>,
}

impl EntityHandler {
    /// Creates a push-capable handler from its mapper.
    pub fn new<F>(to_remote: F) -> Self
    where
        F: Fn(&SyncContext, &LocalRecord<'_>) -> Result<Fields, SyncFailure> + Send + Sync + 'static,
    {
        Self {
            to_remote: Arc::new(to_remote),
            from_remote: None,
            dedup: None,
            dependencies: None,
            push: None,
            pull: None,
            after_push: None,
            read_fields: Vec::new(),
        }
    }

    /// Sets the pull mapper.
    pub fn from_remote<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncContext, &RemoteRecord<'_>) -> Result<Fields, SyncFailure> + Send + Sync + 'static,
    {
        self.from_remote = Some(Arc::new(f));
        self
    }

    /// Sets the dedup predicate.
    pub fn dedup<F>(mut self, f: F) -> Self
    where
        F: Fn(&Fields) -> Option<Domain> + Send + Sync + 'static,
    {
        self.dedup = Some(Arc::new(f));
        self
    }

    /// Sets the dependency extractor.
    pub fn dependencies<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncContext, &LocalRecord<'_>) -> Result<Vec<Dependency>, SyncFailure>
            + Send
            + Sync
            + 'static,
    {
        self.dependencies = Some(Arc::new(f));
        self
    }

    /// Replaces the stock push.
    pub fn push_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncContext, &PushRequest) -> SyncOutcome + Send + Sync + 'static,
    {
        self.push = Some(Arc::new(f));
        self
    }

    /// Replaces the stock pull.
    pub fn pull_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncContext, &PullRequest) -> SyncOutcome + Send + Sync + 'static,
    {
        self.pull = Some(Arc::new(f));
        self
    }

    /// Runs `f` after every successful create or write.
    pub fn after_push<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncContext, &PushRequest, RemoteId) -> Result<(), SyncFailure> + Send + Sync + 'static,
    {
        self.after_push = Some(Arc::new(f));
        self
    }

    /// Restricts the fields read on pull.
    pub fn read_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.read_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for EntityHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandler")
            .field("from_remote", &self.from_remote.is_some())
            .field("dedup", &self.dedup.is_some())
            .field("dependencies", &self.dependencies.is_some())
            .field("push", &self.push.is_some())
            .field("pull", &self.pull.is_some())
            .field("after_push", &self.after_push.is_some())
            .field("read_fields", &self.read_fields)
            .finish()
    }
}

/// Builder for [`Module`].
#[derive(Debug)]
pub struct ModuleBuilder {
    registration: ModuleRegistration,
    handlers: BTreeMap<String, EntityHandler>,
}

impl ModuleBuilder {
    /// Attaches the handler of an entity type.
    pub fn entity(mut self, entity_type: impl Into<String>, handler: EntityHandler) -> Self {
        self.handlers.insert(entity_type.into(), handler);
        self
    }

    /// Validates the definition and builds the module.
    pub fn build(self) -> EngineResult<Module> {
        let reg = &self.registration;
        if reg.module_id.is_empty() {
            return Err(EngineError::invalid_module("", "module id is empty"));
        }
        if reg.remote_models.is_empty() {
            return Err(EngineError::invalid_module(&reg.module_id, "no entity types"));
        }
        if reg.exclusive_priority.is_some() && reg.exclusive_group.is_none() {
            return Err(EngineError::invalid_module(
                &reg.module_id,
                "exclusive priority without exclusive group",
            ));
        }
        if let Some(extra) = self.handlers.keys().find(|et| reg.remote_model(et).is_none()) {
            return Err(EngineError::invalid_module(
                &reg.module_id,
                format!("handler for undeclared entity type '{}'", extra),
            ));
        }
        if let Some(missing) = reg.entity_types().find(|et| !self.handlers.contains_key(*et)) {
            return Err(EngineError::invalid_module(
                &reg.module_id,
                format!("no handler for entity type '{}'", missing),
            ));
        }
        if reg.sync_direction.allows_pull() {
            if let Some((et, _)) = self
                .handlers
                .iter()
                .find(|(_, h)| h.from_remote.is_none() && h.pull.is_none())
            {
                return Err(EngineError::invalid_module(
                    &reg.module_id,
                    format!("entity type '{}' cannot be pulled", et),
                ));
            }
        }

        Ok(Module {
            registration: self.registration,
            handlers: self.handlers,
        })
    }
}

/// A module assembled from per-entity handlers.
pub struct Module {
    registration: ModuleRegistration,
    handlers: BTreeMap<String, EntityHandler>,
}

impl Module {
    /// Starts building a module.
    pub fn builder(registration: ModuleRegistration) -> ModuleBuilder {
        ModuleBuilder {
            registration,
            handlers: BTreeMap::new(),
        }
    }

    fn handler(&self, entity_type: &str) -> Result<&EntityHandler, SyncFailure> {
        self.handlers.get(entity_type).ok_or_else(|| {
            SyncFailure::permanent(format!(
                "module '{}' has no entity type '{}'",
                self.registration.module_id, entity_type
            ))
        })
    }

    fn remote_model(&self, entity_type: &str) -> Result<&str, SyncFailure> {
        self.registration.remote_model(entity_type).ok_or_else(|| {
            SyncFailure::permanent(format!(
                "module '{}' has no remote model for '{}'",
                self.registration.module_id, entity_type
            ))
        })
    }

    fn load_record<'a>(
        &self,
        ctx: &SyncContext,
        entity_type: &'a str,
        local_id: Option<LocalId>,
        payload: &'a Fields,
    ) -> Result<LocalRecord<'a>, SyncFailure> {
        let fields = match local_id {
            Some(id) => ctx.local().load(entity_type, id)?.ok_or_else(|| {
                SyncFailure::permanent(format!("local {} #{} not found", entity_type, id))
            })?,
            None => payload.clone(),
        };
        Ok(LocalRecord {
            entity_type,
            local_id,
            fields,
            payload,
        })
    }

    fn stock_push(&self, ctx: &SyncContext, handler: &EntityHandler, request: &PushRequest) -> SyncOutcome {
        let module_id = self.registration.module_id.as_str();
        let entity_type = request.entity_type.as_str();
        let model = self.remote_model(entity_type)?;

        if request.action == JobAction::Delete {
            let remote_id = match (request.remote_id, request.local_id) {
                (Some(id), _) => Some(id),
                (None, Some(local_id)) => ctx
                    .map()
                    .get_remote_id(module_id, entity_type, local_id)
                    .map_err(|e| classify_store(&e))?,
                (None, None) => None,
            };
            let Some(remote_id) = remote_id else {
                debug!(module_id, entity_type, local_id = ?request.local_id, "nothing to unlink");
                return Ok(SyncSuccess::empty());
            };
            match ctx.remote().unlink(model, &[remote_id]) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!(module_id, entity_type, remote_id, "remote record already gone");
                }
                Err(e) => return Err(e.into()),
            }
            ctx.map()
                .delete_by_remote(module_id, entity_type, remote_id)
                .map_err(|e| classify_store(&e))?;
            return Ok(SyncSuccess {
                remote_id: Some(remote_id),
                local_id: request.local_id,
            });
        }

        let record = self.load_record(ctx, entity_type, request.local_id, &request.payload)?;
        let values = (handler.to_remote)(ctx, &record)?;
        let remote_id = match (request.action, request.remote_id) {
            (JobAction::Update, Some(id)) => {
                if !ctx.remote().write(model, &[id], &values)? {
                    return Err(SyncFailure::transient(format!(
                        "write of {} #{} was not applied",
                        model, id
                    )));
                }
                id
            }
            _ => ctx.remote().create(model, &values)?,
        };
        if let Some(local_id) = request.local_id {
            ctx.record_mapping(module_id, entity_type, local_id, remote_id, model)?;
        }
        if let Some(after_push) = &handler.after_push {
            after_push(ctx, request, remote_id)?;
        }
        Ok(SyncSuccess {
            remote_id: Some(remote_id),
            local_id: request.local_id,
        })
    }

    fn stock_pull(&self, ctx: &SyncContext, handler: &EntityHandler, request: &PullRequest) -> SyncOutcome {
        let module_id = self.registration.module_id.as_str();
        let entity_type = request.entity_type.as_str();
        let model = self.remote_model(entity_type)?;
        let Some(remote_id) = request.remote_id else {
            return Err(SyncFailure::permanent("pull without a remote id"));
        };
        let known = match request.local_id {
            Some(id) => Some(id),
            None => ctx.local_id_of(module_id, entity_type, remote_id)?,
        };

        if request.action == JobAction::Delete {
            if let Some(local_id) = known {
                let _guard = ctx.import_guard().enter(module_id, entity_type);
                ctx.local().delete(entity_type, local_id)?;
            }
            ctx.map()
                .delete_by_remote(module_id, entity_type, remote_id)
                .map_err(|e| classify_store(&e))?;
            return Ok(SyncSuccess {
                remote_id: Some(remote_id),
                local_id: known,
            });
        }

        let from_remote = handler.from_remote.as_ref().ok_or_else(|| {
            SyncFailure::permanent(format!("module '{}' cannot pull {}", module_id, entity_type))
        })?;
        let values = ctx
            .remote()
            .read(model, &[remote_id], &handler.read_fields)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                SyncFailure::from(RemoteError::NotFound {
                    model: model.to_string(),
                    id: remote_id,
                })
            })?;
        let record = RemoteRecord {
            entity_type,
            remote_id,
            local_id: known,
            values,
            payload: &request.payload,
        };
        let fields = from_remote(ctx, &record)?;

        let local_id = {
            let _guard = ctx.import_guard().enter(module_id, entity_type);
            ctx.local().save(entity_type, &fields, known)?
        };
        ctx.record_mapping(module_id, entity_type, local_id, remote_id, model)?;
        Ok(SyncSuccess::linked(local_id, remote_id))
    }
}

impl SyncModule for Module {
    fn registration(&self) -> &ModuleRegistration {
        &self.registration
    }

    fn push(&self, ctx: &SyncContext, request: &PushRequest) -> SyncOutcome {
        catch_panics(self.module_id(), "push", || {
            let handler = self.handler(&request.entity_type)?;
            match &handler.push {
                Some(push) => push(ctx, request),
                None => self.stock_push(ctx, handler, request),
            }
        })
    }

    fn pull(&self, ctx: &SyncContext, request: &PullRequest) -> SyncOutcome {
        catch_panics(self.module_id(), "pull", || {
            let handler = self.handler(&request.entity_type)?;
            match &handler.pull {
                Some(pull) => pull(ctx, request),
                None => self.stock_pull(ctx, handler, request),
            }
        })
    }

    fn map_to_remote(
        &self,
        ctx: &SyncContext,
        entity_type: &str,
        local_id: Option<LocalId>,
        payload: &Fields,
    ) -> Result<Fields, SyncFailure> {
        catch_panics(self.module_id(), "map_to_remote", || {
            let handler = self.handler(entity_type)?;
            let record = self.load_record(ctx, entity_type, local_id, payload)?;
            (handler.to_remote)(ctx, &record)
        })
    }

    fn dedup_domain(&self, entity_type: &str, remote_values: &Fields) -> Result<Option<Domain>, SyncFailure> {
        catch_panics(self.module_id(), "dedup_domain", || {
            let handler = self.handler(entity_type)?;
            Ok(handler.dedup.as_ref().and_then(|dedup| dedup(remote_values)))
        })
    }

    fn dependencies(
        &self,
        ctx: &SyncContext,
        entity_type: &str,
        local_id: LocalId,
    ) -> Result<Vec<Dependency>, SyncFailure> {
        catch_panics(self.module_id(), "dependencies", || {
            let handler = self.handler(entity_type)?;
            let Some(extract) = &handler.dependencies else {
                return Ok(Vec::new());
            };
            let payload = Fields::new();
            let record = self.load_record(ctx, entity_type, Some(local_id), &payload)?;
            extract(ctx, &record)
        })
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("registration", &self.registration)
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// Runs module code, turning a panic into a permanent failure.
pub(crate) fn catch_panics<T>(
    module_id: &str,
    operation: &str,
    f: impl FnOnce() -> Result<T, SyncFailure>,
) -> Result<T, SyncFailure> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(module_id, operation, reason = %reason, "module panicked");
            Err(SyncFailure::permanent(format!(
                "{} panicked in {}: {}",
                module_id, operation, reason
            )))
        }
    }
}
