//! # StashDB Engine
//!
//! Storage engine capability traits and an in-memory implementation.
//!
//! This crate is the lowest layer of StashDB. The client in `stashdb_core`
//! talks to storage only through the traits defined here, so any engine
//! with open/upgrade/transact/close/delete-database primitives can sit
//! underneath it.
//!
//! ## Design Principles
//!
//! - Databases are named and versioned; schema changes happen only inside
//!   an upgrade
//! - Partitions are independently keyed collections of JSON records
//! - Every read or write runs inside an atomic unit that commits or aborts
//!   as a whole
//! - Engines must be `Send + Sync` so one engine can serve many tasks
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - in-process engine with IndexedDB semantics

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod key;
mod memory;

pub use engine::{
    AtomicUnit, EngineConnection, StorageEngine, UnitMode, UpgradeHandler, VersionChange,
};
pub use error::{EngineError, EngineResult};
pub use key::{Key, KeyPath, KeyRange, Record};
pub use memory::{MemoryConnection, MemoryEngine};
