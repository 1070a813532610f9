//! # SyncBridge Testkit
//!
//! Test utilities for SyncBridge.
//!
//! This crate provides:
//! - In-memory remote and local systems with call counting and failure
//!   injection
//! - Ready-made modules covering dependencies, dedup and exclusive groups
//! - A fully wired engine harness on a manual clock
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncbridge_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_a_product() {
//!     let h = Harness::builder().module(catalog_module()).build();
//!     h.seed_local("product", 1, json!({ "name": "Widget" }));
//!     h.push(CATALOG, "product", JobAction::Create, 1);
//!     h.drain();
//!     assert!(h.remote_id(CATALOG, "product", 1).is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod local;
pub mod logging;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::local::*;
    pub use crate::logging::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
pub use local::*;
pub use logging::*;
pub use remote::*;
