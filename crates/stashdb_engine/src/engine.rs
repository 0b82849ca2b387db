//! Storage engine capability traits.

use crate::error::EngineResult;
use crate::key::{Key, KeyRange, Record};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Access mode declared when an atomic unit begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitMode {
    /// Reads only; writes fail with [`EngineError::ReadOnly`](crate::EngineError::ReadOnly).
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl UnitMode {
    /// Returns true if the mode permits writes.
    #[must_use]
    pub fn is_writable(self) -> bool {
        self == UnitMode::ReadWrite
    }
}

impl fmt::Display for UnitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitMode::ReadOnly => f.write_str("readonly"),
            UnitMode::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// A versioned, multi-partition key-value storage engine.
///
/// The engine is an **opaque capability**: StashDB never looks inside it.
/// It opens databases by name and version, runs the caller's upgrade
/// handler when the stored version is older than the requested one, and
/// hands out connections that group operations into atomic units.
///
/// # Invariants
///
/// - `open` runs the upgrade handler at most once, before it returns, and
///   only when the stored version is lower than `version`
/// - a failed upgrade leaves the stored schema and version untouched
/// - `delete_database` on a missing database succeeds
///
/// # Implementors
///
/// - [`super::MemoryEngine`] - in-process engine with IndexedDB semantics
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Opens the named database at `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `version` is lower than the stored version
    /// - an upgrade is required while other connections are open
    /// - the upgrade handler fails
    async fn open(
        &self,
        name: &str,
        version: u64,
        upgrade: &dyn UpgradeHandler,
    ) -> EngineResult<Arc<dyn EngineConnection>>;

    /// Irrecoverably deletes the named database.
    ///
    /// # Errors
    ///
    /// Returns an error if open connections prevent the delete.
    async fn delete_database(&self, name: &str) -> EngineResult<()>;
}

/// Callback invoked by the engine while a database is being upgraded.
pub trait UpgradeHandler: Send + Sync {
    /// Applies schema changes for the transition described by `change`.
    ///
    /// # Errors
    ///
    /// Any error aborts the upgrade and fails the open.
    fn upgrade(&self, change: &mut dyn VersionChange) -> EngineResult<()>;
}

impl<F> UpgradeHandler for F
where
    F: Fn(&mut dyn VersionChange) -> EngineResult<()> + Send + Sync,
{
    fn upgrade(&self, change: &mut dyn VersionChange) -> EngineResult<()> {
        self(change)
    }
}

/// Schema operations available during an upgrade.
pub trait VersionChange {
    /// Version stored before the upgrade (0 for a new database).
    fn old_version(&self) -> u64;

    /// Version being upgraded to.
    fn new_version(&self) -> u64;

    /// Names of the partitions currently present, in sorted order.
    fn partition_names(&self) -> Vec<String>;

    /// Returns true if the partition exists.
    fn contains_partition(&self, name: &str) -> bool;

    /// Creates a partition keyed by `key_path`.
    ///
    /// # Errors
    ///
    /// Fails if the partition already exists or the key path is malformed.
    fn create_partition(&mut self, name: &str, key_path: &str) -> EngineResult<()>;

    /// Names of the indexes on a partition, in sorted order.
    ///
    /// # Errors
    ///
    /// Fails if the partition does not exist.
    fn index_names(&self, partition: &str) -> EngineResult<Vec<String>>;

    /// Creates a secondary index and populates it from existing records.
    ///
    /// # Errors
    ///
    /// Fails if the partition is missing, the index exists, or a unique
    /// index would be violated by existing records.
    fn create_index(
        &mut self,
        partition: &str,
        name: &str,
        key_path: &str,
        unique: bool,
    ) -> EngineResult<()>;
}

/// A live handle to an open database.
#[async_trait]
pub trait EngineConnection: Send + Sync {
    /// Database name.
    fn name(&self) -> &str;

    /// Version the connection was opened with.
    fn version(&self) -> u64;

    /// Names of the partitions in the database, in sorted order.
    fn partition_names(&self) -> Vec<String>;

    /// Names of the indexes on a partition, in sorted order.
    ///
    /// # Errors
    ///
    /// Fails if the partition does not exist.
    fn index_names(&self, partition: &str) -> EngineResult<Vec<String>>;

    /// Begins an atomic unit scoped to `partitions`.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed, `partitions` is empty, or a
    /// partition does not exist.
    async fn begin(&self, partitions: &[&str], mode: UnitMode) -> EngineResult<Box<dyn AtomicUnit>>;

    /// Releases the connection. Idempotent.
    fn close(&self);

    /// Returns true once the connection has been closed.
    fn is_closed(&self) -> bool;
}

/// A group of operations that commits or aborts as a whole.
///
/// A failed request aborts the unit: every later request and the final
/// `commit` fail with [`EngineError::Aborted`](crate::EngineError::Aborted).
/// Dropping a unit without committing discards its writes.
#[async_trait]
pub trait AtomicUnit: Send {
    /// Mode the unit was started in.
    fn mode(&self) -> UnitMode;

    /// Reads one record. Missing keys yield `None`.
    async fn get(&mut self, partition: &str, key: &Key) -> EngineResult<Option<Record>>;

    /// Reads records in key order, optionally restricted and limited.
    async fn get_all(
        &mut self,
        partition: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Record>>;

    /// Counts records in a range.
    async fn count(&mut self, partition: &str, range: &KeyRange) -> EngineResult<u64>;

    /// Inserts a record; fails with a constraint error if its key exists.
    async fn add(&mut self, partition: &str, record: Record) -> EngineResult<Key>;

    /// Inserts or replaces a record.
    async fn put(&mut self, partition: &str, record: Record) -> EngineResult<Key>;

    /// Deletes every record in a range. Missing keys are not an error.
    async fn delete(&mut self, partition: &str, range: &KeyRange) -> EngineResult<()>;

    /// Deletes every record in a partition.
    async fn clear(&mut self, partition: &str) -> EngineResult<()>;

    /// Reads the first record whose index key equals `key`.
    async fn index_get(
        &mut self,
        partition: &str,
        index: &str,
        key: &Key,
    ) -> EngineResult<Option<Record>>;

    /// Reads records ordered by index key, then primary key.
    async fn index_get_all(
        &mut self,
        partition: &str,
        index: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Record>>;

    /// Counts records whose index key falls in a range.
    async fn index_count(
        &mut self,
        partition: &str,
        index: &str,
        range: &KeyRange,
    ) -> EngineResult<u64>;

    /// Makes every write in the unit durable and visible.
    ///
    /// # Errors
    ///
    /// Fails if the unit was aborted by an earlier request.
    fn commit(self: Box<Self>) -> EngineResult<()>;

    /// Discards every write in the unit.
    fn abort(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_mode_display() {
        assert_eq!(UnitMode::ReadOnly.to_string(), "readonly");
        assert_eq!(UnitMode::ReadWrite.to_string(), "readwrite");
        assert!(UnitMode::ReadWrite.is_writable());
        assert!(!UnitMode::ReadOnly.is_writable());
    }
}
