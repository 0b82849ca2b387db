//! The store facade.

use crate::bulk::BulkWriter;
use crate::config::{Config, DEFAULT_PARTITION};
use crate::connection::ConnectionManager;
use crate::error::{ConfigError, StoreError, StoreResult};
use crate::executor::{Action, OperationExecutor, Outcome};
use crate::schema::{PartitionSpec, SchemaDescriptor};
use crate::typed::TypedPartition;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stashdb_engine::{Key, KeyRange, Record, StorageEngine};
use std::sync::Arc;

/// A schema-managed client over a storage engine.
///
/// The store opens its database lazily on the first call, creating every
/// declared partition and index that is missing, and reuses the connection
/// until [`close`](Self::close) or [`destroy`](Self::destroy).
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use stashdb_core::Store;
/// use stashdb_engine::MemoryEngine;
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = Store::new(Arc::new(MemoryEngine::new()), Default::default());
///
/// store.add(json!({"id": 1, "name": "Alice"})).await.unwrap();
/// store.put(json!({"id": 1, "name": "Alicia"})).await.unwrap();
///
/// let record = store.get(1).await.unwrap().unwrap();
/// assert_eq!(record["name"], "Alicia");
/// assert_eq!(store.count().await.unwrap(), 1);
/// # });
/// ```
#[derive(Debug)]
pub struct Store {
    connections: Arc<ConnectionManager>,
    executor: OperationExecutor,
    bulk: BulkWriter,
}

impl Store {
    /// Creates a store over `engine` with the given schema.
    pub fn new(engine: Arc<dyn StorageEngine>, schema: SchemaDescriptor) -> Self {
        let connections = Arc::new(ConnectionManager::new(engine, Arc::new(schema)));
        Self {
            executor: OperationExecutor::new(Arc::clone(&connections)),
            bulk: BulkWriter::new(Arc::clone(&connections)),
            connections,
        }
    }

    /// Creates a single-partition store from `config`.
    ///
    /// The partition is the configured default partition, or `store`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`](crate::StoreError::Config) if the
    /// configuration is invalid.
    pub fn with_config(engine: Arc<dyn StorageEngine>, config: Config) -> StoreResult<Self> {
        let partition = config
            .default_partition
            .clone()
            .unwrap_or_else(|| DEFAULT_PARTITION.to_string());
        let schema = SchemaDescriptor::builder_with(config)
            .partition(PartitionSpec::new(partition))
            .build()?;
        Ok(Self::new(engine, schema))
    }

    /// The store's schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaDescriptor {
        self.connections.schema()
    }

    /// The store's connection manager.
    #[must_use]
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Returns a handle to the named partition.
    ///
    /// The name is not checked here; operations on a partition the
    /// database lacks fail with an operation error.
    #[must_use]
    pub fn partition(&self, name: impl Into<String>) -> PartitionHandle<'_> {
        PartitionHandle {
            store: self,
            name: name.into(),
        }
    }

    /// Returns a typed view of the named partition.
    #[must_use]
    pub fn typed<T>(&self, partition: impl Into<String>) -> TypedPartition<'_, T>
    where
        T: Serialize + DeserializeOwned,
    {
        TypedPartition::new(self.partition(partition))
    }

    fn default_partition(&self) -> StoreResult<PartitionHandle<'_>> {
        let name = self
            .schema()
            .default_partition()
            .ok_or(ConfigError::NoDefaultPartition)?;
        Ok(self.partition(name))
    }

    /// Reads a record from the default partition.
    ///
    /// # Errors
    ///
    /// Fails if there is no default partition, the database cannot be
    /// opened, or the engine rejects the read.
    pub async fn get(&self, key: impl Into<Key>) -> StoreResult<Option<Record>> {
        let key = key.into();
        self.default_partition()?.get(key).await
    }

    /// Reads every record of the default partition in key order.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_all(&self) -> StoreResult<Vec<Record>> {
        self.default_partition()?.get_all().await
    }

    /// Counts the records of the default partition.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn count(&self) -> StoreResult<u64> {
        self.default_partition()?.count().await
    }

    /// Inserts a record into the default partition.
    ///
    /// # Errors
    ///
    /// Returns a constraint error if the key exists.
    pub async fn add(&self, record: Record) -> StoreResult<Key> {
        self.default_partition()?.add(record).await
    }

    /// Inserts or replaces a record in the default partition.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn put(&self, record: Record) -> StoreResult<Key> {
        self.default_partition()?.put(record).await
    }

    /// Deletes a record from the default partition. Missing keys succeed.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn delete(&self, key: impl Into<Key>) -> StoreResult<()> {
        let key = key.into();
        self.default_partition()?.delete(key).await
    }

    /// Inserts a batch into the default partition, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns a bulk-write error if any record is rejected.
    pub async fn add_all(&self, records: Vec<Record>) -> StoreResult<()> {
        self.default_partition()?.add_all(records).await
    }

    /// Releases the cached connection. The next call reopens it.
    pub async fn close(&self) {
        self.connections.close().await;
    }

    /// Deletes the store's database. The next call recreates it.
    ///
    /// # Errors
    ///
    /// Returns a destroy error if the engine refuses the delete.
    pub async fn destroy(&self) -> StoreResult<()> {
        let database = self.schema().database_name().to_string();
        self.connections.destroy(&database).await
    }

    /// Deletes the named database, closing the cached connection first if
    /// it belongs to that database.
    ///
    /// # Errors
    ///
    /// Returns a destroy error if the engine refuses the delete.
    pub async fn destroy_database(&self, name: &str) -> StoreResult<()> {
        self.connections.destroy(name).await
    }
}

/// Operations on one partition.
#[derive(Debug, Clone)]
pub struct PartitionHandle<'a> {
    store: &'a Store,
    name: String,
}

impl<'a> PartitionHandle<'a> {
    /// Partition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a handle to a secondary index of this partition.
    #[must_use]
    pub fn index(&self, name: impl Into<String>) -> IndexHandle<'a> {
        IndexHandle {
            store: self.store,
            partition: self.name.clone(),
            name: name.into(),
        }
    }

    async fn run(&self, action: Action) -> StoreResult<Outcome> {
        self.store.executor.run(&self.name, action).await
    }

    /// Reads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or the engine rejects the read.
    pub async fn get(&self, key: impl Into<Key>) -> StoreResult<Option<Record>> {
        let key = key.into();
        Ok(self.run(Action::Get(key)).await?.into_record())
    }

    /// Reads every record in key order.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_all(&self) -> StoreResult<Vec<Record>> {
        self.get_range(KeyRange::all(), None).await
    }

    /// Reads records in `range`, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_range(
        &self,
        range: KeyRange,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        Ok(self.run(Action::GetAll { range, limit }).await?.into_records())
    }

    /// Counts every record.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn count(&self) -> StoreResult<u64> {
        self.count_range(KeyRange::all()).await
    }

    /// Counts records in `range`.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn count_range(&self, range: KeyRange) -> StoreResult<u64> {
        Ok(self.run(Action::Count(range)).await?.into_count())
    }

    /// Inserts a record and returns its key.
    ///
    /// # Errors
    ///
    /// Returns a constraint error if the key, or a unique index key, exists.
    pub async fn add(&self, record: Record) -> StoreResult<Key> {
        self.write(Action::Add(record)).await
    }

    /// Inserts or replaces a record and returns its key.
    ///
    /// # Errors
    ///
    /// Returns a constraint error if a unique index key is taken by
    /// another record.
    pub async fn put(&self, record: Record) -> StoreResult<Key> {
        self.write(Action::Put(record)).await
    }

    async fn write(&self, action: Action) -> StoreResult<Key> {
        let primitive = action.primitive();
        self.run(action).await?.into_key().ok_or_else(|| {
            StoreError::invalid_record(format!("{primitive} on {} returned no key", self.name))
        })
    }

    /// Deletes the record stored under `key`. Missing keys succeed.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn delete(&self, key: impl Into<Key>) -> StoreResult<()> {
        self.delete_range(KeyRange::only(key)).await
    }

    /// Deletes every record in `range`.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn delete_range(&self, range: KeyRange) -> StoreResult<()> {
        self.run(Action::Delete(range)).await.map(|_| ())
    }

    /// Deletes every record.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn clear(&self) -> StoreResult<()> {
        self.run(Action::Clear).await.map(|_| ())
    }

    /// Inserts a batch, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns a bulk-write error if any record is rejected.
    pub async fn add_all(&self, records: Vec<Record>) -> StoreResult<()> {
        self.store.bulk.add_all(&self.name, records).await
    }

    /// Inserts or replaces a batch, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns a bulk-write error if any record is rejected.
    pub async fn put_all(&self, records: Vec<Record>) -> StoreResult<()> {
        self.store.bulk.put_all(&self.name, records).await
    }
}

/// Lookups through a secondary index.
#[derive(Debug, Clone)]
pub struct IndexHandle<'a> {
    store: &'a Store,
    partition: String,
    name: String,
}

impl IndexHandle<'_> {
    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the first record whose index key equals `key`.
    ///
    /// # Errors
    ///
    /// Fails if the index does not exist or the read is rejected.
    pub async fn get(&self, key: impl Into<Key>) -> StoreResult<Option<Record>> {
        let action = Action::IndexGet {
            index: self.name.clone(),
            key: key.into(),
        };
        Ok(self.store.executor.run(&self.partition, action).await?.into_record())
    }

    /// Reads records whose index key is in `range`, ordered by index key.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_all(&self, range: KeyRange, limit: Option<usize>) -> StoreResult<Vec<Record>> {
        let action = Action::IndexGetAll {
            index: self.name.clone(),
            range,
            limit,
        };
        Ok(self.store.executor.run(&self.partition, action).await?.into_records())
    }

    /// Counts records whose index key is in `range`.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn count(&self, range: KeyRange) -> StoreResult<u64> {
        let action = Action::IndexCount {
            index: self.name.clone(),
            range,
        };
        Ok(self.store.executor.run(&self.partition, action).await?.into_count())
    }
}
