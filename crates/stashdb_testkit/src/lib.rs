//! # StashDB Testkit
//!
//! Test utilities for StashDB.
//!
//! This crate provides:
//! - An instrumented engine that counts opens, upgrades and deletes and
//!   injects one-shot failures
//! - Record fixtures and a tracing initializer for tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stashdb_core::{SchemaDescriptor, Store};
//! use stashdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn opens_once() {
//!     let engine = InstrumentedEngine::shared();
//!     let store = Store::new(engine.clone(), SchemaDescriptor::default());
//!     store.add_all(users(3)).await.unwrap();
//!     store.count().await.unwrap();
//!     assert_eq!(engine.opens(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use engine::*;
pub use fixtures::*;
pub use generators::*;
