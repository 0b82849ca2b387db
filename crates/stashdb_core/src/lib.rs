//! # StashDB Core
//!
//! Schema-migrating client for versioned, multi-partition key-value engines.
//!
//! This crate provides:
//! - Declarative schemas: partitions, key paths and secondary indexes
//! - Lazy connections, opened once and migrated on version bumps
//! - Single-operation execution, one atomic unit per call
//! - All-or-nothing bulk writes
//! - A [`Store`] facade with untyped and serde-typed access
//!
//! Storage itself is delegated to a [`StorageEngine`](stashdb_engine::StorageEngine)
//! from `stashdb_engine`.
//!
//! ```
//! use serde_json::json;
//! use stashdb_core::{IndexSpec, PartitionSpec, SchemaDescriptor, Store};
//! use stashdb_engine::{KeyRange, MemoryEngine};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let schema = SchemaDescriptor::builder()
//!     .database_name("shop")
//!     .partition(PartitionSpec::new("products").index(IndexSpec::new("by_sku", "sku").unique()))
//!     .partition(PartitionSpec::new("orders"))
//!     .build()
//!     .unwrap();
//! let store = Store::new(Arc::new(MemoryEngine::new()), schema);
//!
//! let products = store.partition("products");
//! products
//!     .add_all(vec![
//!         json!({"id": 1, "sku": "A-1"}),
//!         json!({"id": 2, "sku": "B-2"}),
//!     ])
//!     .await
//!     .unwrap();
//!
//! let found = products.index("by_sku").get("B-2").await.unwrap().unwrap();
//! assert_eq!(found["id"], 2);
//! assert_eq!(products.count_range(KeyRange::lower_bound(2, false)).await.unwrap(), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk;
mod config;
mod connection;
mod error;
mod executor;
mod migration;
mod schema;
mod store;
mod typed;

pub use bulk::BulkWriter;
pub use config::{
    Config, DEFAULT_DATABASE_NAME, DEFAULT_KEY_PATH, DEFAULT_PARTITION, DEFAULT_VERSION,
};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ConfigError, StoreError, StoreResult};
pub use executor::{Action, OperationExecutor, Outcome, Primitive};
pub use migration::{migrate, MigrationOperation, MigrationReport};
pub use schema::{IndexSpec, PartitionSpec, SchemaBuilder, SchemaDescriptor};
pub use store::{IndexHandle, PartitionHandle, Store};
pub use typed::TypedPartition;

pub use stashdb_engine::{Key, KeyRange, Record};
