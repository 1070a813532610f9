//! # SyncBridge Engine
//!
//! Synchronization engine moving records between a local application and a
//! remote business-object API.
//!
//! This crate provides:
//! - Collaborator traits for the remote API ([`RemoteClient`]) and local
//!   storage ([`LocalStore`]), with an error mapper onto the
//!   transient/permanent taxonomy
//! - The module contract ([`SyncModule`]) and a composable stock module
//!   ([`Module`], [`ModuleBuilder`], [`EntityHandler`])
//! - Exclusive-group arbitration between modules ([`ModuleRegistry`])
//! - Dependency resolution and dedup-before-create ([`ensure_synced`])
//! - The queue dispatcher ([`Dispatcher`]) and change capture
//!   ([`ChangeCapture`])
//! - A tokio background service ([`SyncService`])
//!
//! ## Flow
//!
//! 1. A change notification reaches [`ChangeCapture`], which enqueues a job
//!    if the owning module is active
//! 2. [`Dispatcher::run_once`] claims a batch and resolves each job's module
//! 3. Pushes go through the resolver: dependencies first, then dedup, then
//!    the module's push; the entity map records the link
//! 4. The outcome completes, reschedules or dead-letters the job
//!
//! ## Key Invariants
//!
//! - At most one mapping per local entity and per remote record
//! - A create is preceded by a dedup search when the module defines one
//! - Dependency resolution never recurses past `max_dependency_depth` and
//!   fails permanently on cycles
//! - Transient failures retry with backoff up to `max_attempts`; permanent
//!   failures dead-letter immediately
//! - Module code cannot unwind into the dispatcher

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod capture;
mod classify;
mod config;
mod context;
mod dispatcher;
mod error;
mod local;
mod module;
mod registry;
mod remote;
mod resolver;
mod service;

#[cfg(test)]
mod test_support;

pub use capture::ChangeCapture;
pub use classify::{classify_local, classify_remote, classify_store};
pub use config::{DormantPolicy, EngineConfig, RetryConfig};
pub use context::{ImportGuard, ImportToken, SyncContext};
pub use dispatcher::{DispatchReport, DispatchStats, Dispatcher};
pub use error::{EngineError, EngineResult};
pub use local::{LocalError, LocalResult, LocalStore};
pub use module::{
    AfterPushFn, DedupFn, DependenciesFn, Dependency, EntityHandler, FromRemoteFn, LocalRecord,
    Module, ModuleBuilder, PullFn, PullRequest, PushFn, PushRequest, RemoteRecord, SyncModule,
    ToRemoteFn,
};
pub use registry::ModuleRegistry;
pub use remote::{RemoteClient, RemoteError, RemoteResult};
pub use resolver::{ensure_synced, push_entity};
pub use service::{SyncService, SyncServiceHandle};
