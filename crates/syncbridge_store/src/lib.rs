//! # SyncBridge Store
//!
//! Durable storage for the SyncBridge synchronization engine.
//!
//! This crate provides:
//! - [`JobQueue`]: at-least-once job queue with claim tokens, backoff
//!   scheduling and dead-lettering
//! - [`EntityMapStore`]: bidirectional local/remote identity map with both
//!   uniqueness invariants enforced
//! - In-memory implementations for tests and ephemeral use
//! - SQLite implementations with a versioned, validated, migrating schema
//!
//! ## Key Invariants
//!
//! - A `processing` job always carries a claim token and expiry
//! - Only the current claim holder can complete, reschedule or kill a job
//! - Dead jobs are never claimed; only `requeue` revives them
//! - At most one mapping per local entity and per remote record

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod map;
mod memory;
mod queue;
mod sqlite;

#[cfg(test)]
mod conformance;

pub use error::{StoreError, StoreResult};
pub use map::EntityMapStore;
pub use memory::{MemoryEntityMap, MemoryJobQueue};
pub use queue::{EnqueueOutcome, JobQueue, QueueStats};
pub use sqlite::{
    SqliteDatabase, SqliteEntityMap, SqliteJobQueue, VersionedSchema, BASE_DB_VERSION,
    SYNC_VERSIONED_SCHEMAS,
};
