//! # SyncBridge Core
//!
//! Shared data model for the SyncBridge synchronization engine.
//!
//! This crate provides:
//! - Jobs, job actions, directions and statuses
//! - Entity mappings between local and remote identities
//! - Module registrations (sync direction, exclusive groups)
//! - The sync outcome taxonomy (transient vs permanent failures)
//! - Remote search domains used for dedup-before-create
//! - A clock abstraction so time-dependent logic is testable
//!
//! The crate has no I/O. Persistence lives in `syncbridge_store` and the
//! dispatcher lives in `syncbridge_engine`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod domain;
mod job;
mod mapping;
mod outcome;
mod registration;
mod types;

pub use clock::{duration_millis, Clock, ManualClock, SystemClock};
pub use domain::{Condition, Domain, Operator};
pub use job::{Claim, Job, JobAction, JobDirection, JobStatus, NewJob, Priority};
pub use mapping::EntityMapping;
pub use outcome::{ErrorKind, SyncFailure, SyncOutcome, SyncSuccess};
pub use registration::{ModuleRegistration, SyncDirection};
pub use types::{EntityKey, Fields, JobId, LocalId, RemoteId, Timestamp};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
