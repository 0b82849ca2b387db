//! In-memory storage engine.
//!
//! `MemoryEngine` keeps every database in process memory and follows the
//! IndexedDB model closely enough to stand in for it:
//!
//! - databases are opened by name and version; a newer version runs the
//!   upgrade handler inside a version-change transaction
//! - an upgrade, or a delete, is blocked while other connections are open
//! - read-write units on one database are serialized; read-only units read
//!   a consistent snapshot and never wait

mod partition;
mod staged;
mod unit;
mod upgrade;

use crate::engine::{AtomicUnit, EngineConnection, StorageEngine, UnitMode, UpgradeHandler};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use partition::PartitionData;
use staged::StagedPartition;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use unit::MemoryUnit;
use upgrade::VersionChangeTx;

struct DatabaseInner {
    version: u64,
    partitions: BTreeMap<String, Arc<PartitionData>>,
}

/// Shared state of one database.
pub(crate) struct DatabaseState {
    name: String,
    inner: RwLock<DatabaseInner>,
    /// Serializes read-write units and upgrades.
    writer: Arc<tokio::sync::Mutex<()>>,
    open_connections: AtomicUsize,
}

impl DatabaseState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: RwLock::new(DatabaseInner {
                version: 0,
                partitions: BTreeMap::new(),
            }),
            writer: Arc::new(tokio::sync::Mutex::new(())),
            open_connections: AtomicUsize::new(0),
        }
    }

    fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Runs `handler` against a staged copy of the schema and installs the
    /// result only if it succeeds. Callers hold the writer lock.
    fn upgrade(&self, version: u64, handler: &dyn UpgradeHandler) -> EngineResult<()> {
        let (old_version, partitions) = {
            let inner = self.inner.read();
            (inner.version, inner.partitions.clone())
        };
        if old_version >= version {
            return Ok(());
        }

        let mut change = VersionChangeTx {
            old_version,
            new_version: version,
            partitions,
        };
        handler.upgrade(&mut change)?;

        let mut inner = self.inner.write();
        inner.partitions = change.partitions;
        inner.version = version;
        info!(
            database = %self.name,
            from = old_version,
            to = version,
            "database upgraded"
        );
        Ok(())
    }
}

/// A connection to a [`MemoryEngine`] database.
pub struct MemoryConnection {
    db: Arc<DatabaseState>,
    version: u64,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn new(db: Arc<DatabaseState>, version: u64) -> Self {
        Self {
            db,
            version,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EngineConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.db.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn partition_names(&self) -> Vec<String> {
        self.db.inner.read().partitions.keys().cloned().collect()
    }

    fn index_names(&self, partition: &str) -> EngineResult<Vec<String>> {
        self.db
            .inner
            .read()
            .partitions
            .get(partition)
            .map(|data| data.index_names())
            .ok_or_else(|| EngineError::not_found(format!("partition {partition}")))
    }

    async fn begin(
        &self,
        partitions: &[&str],
        mode: UnitMode,
    ) -> EngineResult<Box<dyn AtomicUnit>> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        if partitions.is_empty() {
            return Err(EngineError::InvalidState(
                "a unit needs at least one partition".into(),
            ));
        }

        let writer = match mode {
            UnitMode::ReadWrite => Some(Arc::clone(&self.db.writer).lock_owned().await),
            UnitMode::ReadOnly => None,
        };

        let scope = {
            let inner = self.db.inner.read();
            partitions
                .iter()
                .map(|name| {
                    inner
                        .partitions
                        .get(*name)
                        .map(|data| (name.to_string(), StagedPartition::new(Arc::clone(data))))
                        .ok_or_else(|| EngineError::not_found(format!("partition {name}")))
                })
                .collect::<EngineResult<BTreeMap<_, _>>>()?
        };

        Ok(Box::new(MemoryUnit::new(
            Arc::clone(&self.db),
            mode,
            scope,
            writer,
        )))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.open_connections.fetch_sub(1, Ordering::SeqCst);
            debug!(database = %self.db.name, "connection closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// An in-process storage engine.
///
/// Cheap to create; every instance is an independent set of databases.
///
/// # Example
///
/// ```rust
/// use stashdb_engine::{
///     AtomicUnit, EngineConnection, EngineResult, KeyRange, MemoryEngine, StorageEngine,
///     UnitMode, VersionChange,
/// };
/// use serde_json::json;
///
/// # tokio_test_block_on(async {
/// let engine = MemoryEngine::new();
/// let schema = |change: &mut dyn VersionChange| -> EngineResult<()> {
///     change.create_partition("notes", "id")
/// };
/// let conn = engine.open("app", 1, &schema).await.unwrap();
///
/// let mut unit = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
/// unit.add("notes", json!({"id": 1, "body": "hi"})).await.unwrap();
/// unit.commit().unwrap();
///
/// let mut unit = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
/// assert_eq!(unit.count("notes", &KeyRange::all()).await.unwrap(), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Default)]
pub struct MemoryEngine {
    databases: Mutex<HashMap<String, Arc<DatabaseState>>>,
}

impl MemoryEngine {
    /// Creates an engine with no databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every stored database, sorted.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stored version of a database, or `None` if it does not exist.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.databases.lock().get(name).map(|db| db.version())
    }

    /// Number of open connections to a database.
    #[must_use]
    pub fn open_connections(&self, name: &str) -> usize {
        self.databases
            .lock()
            .get(name)
            .map_or(0, |db| db.open_connections.load(Ordering::SeqCst))
    }

    /// Registers a new connection to `db`, unless the database was deleted
    /// since `db` was looked up.
    fn attach(&self, db: &Arc<DatabaseState>) -> bool {
        let databases = self.databases.lock();
        let is_current = databases
            .get(&db.name)
            .is_some_and(|current| Arc::ptr_eq(current, db));
        if is_current {
            db.open_connections.fetch_add(1, Ordering::SeqCst);
        }
        is_current
    }

    /// One open attempt. `None` means the database was deleted while the
    /// attempt waited for its writer lock.
    async fn try_open(
        &self,
        name: &str,
        version: u64,
        upgrade: &dyn UpgradeHandler,
    ) -> EngineResult<Option<Arc<dyn EngineConnection>>> {
        let (db, created) = {
            let mut databases = self.databases.lock();
            match databases.get(name) {
                Some(db) => (Arc::clone(db), false),
                None => {
                    let db = Arc::new(DatabaseState::new(name));
                    databases.insert(name.to_string(), Arc::clone(&db));
                    (db, true)
                }
            }
        };

        let stored = db.version();
        if version < stored {
            return Err(EngineError::VersionMismatch {
                stored,
                requested: version,
            });
        }

        let _writer = if version > stored {
            let open = db.open_connections.load(Ordering::SeqCst);
            if open > 0 {
                return Err(EngineError::Blocked {
                    database: name.to_string(),
                    open,
                });
            }

            let writer = Arc::clone(&db.writer).lock_owned().await;
            if let Err(err) = db.upgrade(version, upgrade) {
                if created {
                    self.discard(&db);
                }
                return Err(err);
            }
            Some(writer)
        } else {
            None
        };

        if !self.attach(&db) {
            return Ok(None);
        }
        debug!(database = %name, version, "connection opened");
        Ok(Some(Arc::new(MemoryConnection::new(db, version))))
    }

    /// Drops a database created by a failed first open.
    fn discard(&self, db: &Arc<DatabaseState>) {
        let mut databases = self.databases.lock();
        let is_same = databases
            .get(&db.name)
            .is_some_and(|current| Arc::ptr_eq(current, db));
        if is_same && db.version() == 0 {
            databases.remove(&db.name);
        }
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn open(
        &self,
        name: &str,
        version: u64,
        upgrade: &dyn UpgradeHandler,
    ) -> EngineResult<Arc<dyn EngineConnection>> {
        if version == 0 {
            return Err(EngineError::InvalidVersion(version));
        }

        loop {
            if let Some(conn) = self.try_open(name, version, upgrade).await? {
                return Ok(conn);
            }
            debug!(database = %name, "database deleted during open, retrying");
        }
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        let mut databases = self.databases.lock();
        if let Some(db) = databases.get(name) {
            let open = db.open_connections.load(Ordering::SeqCst);
            if open > 0 {
                return Err(EngineError::Blocked {
                    database: name.to_string(),
                    open,
                });
            }
            databases.remove(name);
            info!(database = %name, "database deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::VersionChange;
    use crate::key::{Key, KeyRange};
    use serde_json::json;

    fn notes_schema(change: &mut dyn VersionChange) -> EngineResult<()> {
        if !change.contains_partition("notes") {
            change.create_partition("notes", "id")?;
            change.create_index("notes", "by_tag", "tag", false)?;
        }
        Ok(())
    }

    async fn open_notes(engine: &MemoryEngine) -> Arc<dyn EngineConnection> {
        engine.open("app", 1, &notes_schema).await.unwrap()
    }

    #[tokio::test]
    async fn open_creates_schema_once() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        assert_eq!(conn.name(), "app");
        assert_eq!(conn.version(), 1);
        assert_eq!(conn.partition_names(), vec!["notes".to_string()]);
        assert_eq!(conn.index_names("notes").unwrap(), vec!["by_tag".to_string()]);
        assert_eq!(engine.version_of("app"), Some(1));

        // Same version: the handler must not run again.
        let fail = |_: &mut dyn VersionChange| -> EngineResult<()> {
            Err(EngineError::upgrade("should not run"))
        };
        let again = engine.open("app", 1, &fail).await.unwrap();
        assert_eq!(again.partition_names(), vec!["notes".to_string()]);
        assert_eq!(engine.open_connections("app"), 2);
    }

    #[tokio::test]
    async fn lower_version_is_rejected() {
        let engine = MemoryEngine::new();
        let conn = engine.open("app", 3, &notes_schema).await.unwrap();
        conn.close();

        let err = engine.open("app", 2, &notes_schema).await.err().unwrap();
        assert_eq!(
            err,
            EngineError::VersionMismatch {
                stored: 3,
                requested: 2
            }
        );
    }

    #[tokio::test]
    async fn zero_version_is_invalid() {
        let engine = MemoryEngine::new();
        let err = engine.open("app", 0, &notes_schema).await.err().unwrap();
        assert_eq!(err, EngineError::InvalidVersion(0));
        assert!(engine.database_names().is_empty());
    }

    #[tokio::test]
    async fn upgrade_blocked_by_open_connection() {
        let engine = MemoryEngine::new();
        let _conn = open_notes(&engine).await;

        let err = engine.open("app", 2, &notes_schema).await.err().unwrap();
        assert!(matches!(err, EngineError::Blocked { open: 1, .. }));
        assert_eq!(engine.version_of("app"), Some(1));
    }

    #[tokio::test]
    async fn failed_first_upgrade_discards_database() {
        let engine = MemoryEngine::new();
        let broken = |change: &mut dyn VersionChange| -> EngineResult<()> {
            change.create_partition("notes", "id")?;
            change.create_partition("notes", "id")
        };

        let err = engine.open("app", 1, &broken).await.err().unwrap();
        assert!(err.is_constraint());
        assert!(engine.database_names().is_empty());
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_previous_schema() {
        let engine = MemoryEngine::new();
        open_notes(&engine).await.close();

        let broken = |change: &mut dyn VersionChange| -> EngineResult<()> {
            change.create_partition("tags", "name")?;
            Err(EngineError::upgrade("boom"))
        };
        assert!(engine.open("app", 2, &broken).await.is_err());

        assert_eq!(engine.version_of("app"), Some(1));
        let conn = open_notes(&engine).await;
        assert_eq!(conn.partition_names(), vec!["notes".to_string()]);
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        let mut unit = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
        unit.add("notes", json!({"id": 1, "tag": "a"})).await.unwrap();
        unit.put("notes", json!({"id": 2, "tag": "b"})).await.unwrap();
        unit.commit().unwrap();

        let mut unit = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
        assert_eq!(unit.count("notes", &KeyRange::all()).await.unwrap(), 2);
        let found = unit
            .index_get("notes", "by_tag", &Key::from("b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["id"], 2);
        unit.commit().unwrap();
    }

    #[tokio::test]
    async fn aborted_unit_discards_writes() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        let mut unit = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
        unit.add("notes", json!({"id": 1})).await.unwrap();
        unit.abort();

        let mut unit = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
        assert_eq!(unit.get("notes", &Key::Int(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_request_aborts_unit() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        let mut unit = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
        unit.add("notes", json!({"id": 1})).await.unwrap();
        assert!(unit.add("notes", json!({"id": 1})).await.unwrap_err().is_constraint());
        assert_eq!(
            unit.add("notes", json!({"id": 2})).await.unwrap_err(),
            EngineError::Aborted
        );
        assert_eq!(unit.commit().unwrap_err(), EngineError::Aborted);

        let mut unit = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
        assert_eq!(unit.count("notes", &KeyRange::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_only_unit_rejects_writes() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        let mut unit = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
        let err = unit.put("notes", json!({"id": 1})).await.unwrap_err();
        assert_eq!(err, EngineError::ReadOnly);
    }

    #[tokio::test]
    async fn reader_snapshot_ignores_later_commits() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        let mut reader = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();

        let mut writer = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
        writer.add("notes", json!({"id": 1})).await.unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.count("notes", &KeyRange::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn begin_rejects_unknown_partition_and_closed_connection() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        let err = conn.begin(&["missing"], UnitMode::ReadOnly).await.err().unwrap();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = conn.begin(&[], UnitMode::ReadOnly).await.err().unwrap();
        assert!(matches!(err, EngineError::InvalidState(_)));

        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(engine.open_connections("app"), 0);
        let err = conn.begin(&["notes"], UnitMode::ReadOnly).await.err().unwrap();
        assert_eq!(err, EngineError::Closed);
    }

    #[tokio::test]
    async fn delete_database_requires_closed_connections() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        let err = engine.delete_database("app").await.unwrap_err();
        assert!(matches!(err, EngineError::Blocked { .. }));

        conn.close();
        engine.delete_database("app").await.unwrap();
        assert_eq!(engine.version_of("app"), None);

        // Deleting again is fine.
        engine.delete_database("app").await.unwrap();
    }

    fn committed_ptr(engine: &MemoryEngine, partition: &str) -> *const PartitionData {
        let databases = engine.databases.lock();
        let inner = databases["app"].inner.read();
        Arc::as_ptr(&inner.partitions[partition])
    }

    #[tokio::test]
    async fn commit_updates_partition_in_place() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;
        let before = committed_ptr(&engine, "notes");

        for id in 0..100 {
            let mut unit = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
            unit.put("notes", json!({"id": id, "tag": "t"})).await.unwrap();
            unit.commit().unwrap();
        }

        // No snapshot was alive, so no commit had to copy the partition.
        assert_eq!(committed_ptr(&engine, "notes"), before);
        let mut unit = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
        assert_eq!(unit.count("notes", &KeyRange::all()).await.unwrap(), 100);
        assert_eq!(
            unit.index_count("notes", "by_tag", &KeyRange::only("t"))
                .await
                .unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn commit_copies_partition_held_by_reader() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;
        let before = committed_ptr(&engine, "notes");

        let mut reader = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
        let mut writer = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
        writer.add("notes", json!({"id": 1})).await.unwrap();
        writer.commit().unwrap();

        assert_ne!(committed_ptr(&engine, "notes"), before);
        assert_eq!(reader.count("notes", &KeyRange::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn writes_read_back_inside_unit() {
        let engine = MemoryEngine::new();
        let conn = open_notes(&engine).await;

        let mut unit = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
        unit.add("notes", json!({"id": 1, "tag": "a"})).await.unwrap();
        unit.add("notes", json!({"id": 2, "tag": "a"})).await.unwrap();
        unit.delete("notes", &KeyRange::only(1)).await.unwrap();

        assert_eq!(unit.get("notes", &Key::Int(1)).await.unwrap(), None);
        assert_eq!(unit.count("notes", &KeyRange::all()).await.unwrap(), 1);
        let tagged = unit
            .index_get_all("notes", "by_tag", &KeyRange::only("a"), None)
            .await
            .unwrap();
        assert_eq!(tagged, vec![json!({"id": 2, "tag": "a"})]);
        unit.commit().unwrap();

        let mut unit = conn.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
        let all = unit.get_all("notes", &KeyRange::all(), None).await.unwrap();
        assert_eq!(all, vec![json!({"id": 2, "tag": "a"})]);
    }

    #[tokio::test]
    async fn open_waiting_on_writer_survives_delete() {
        let engine = Arc::new(MemoryEngine::new());
        let conn = open_notes(&engine).await;

        // The unit keeps the writer lock after its connection closes.
        let unit = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
        conn.close();

        let upgrade = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.open("app", 2, &notes_schema).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        engine.delete_database("app").await.unwrap();
        unit.abort();

        let conn = upgrade.await.unwrap().unwrap();
        assert_eq!(engine.version_of("app"), Some(2));
        assert_eq!(engine.open_connections("app"), 1);
        assert_eq!(conn.partition_names(), vec!["notes".to_string()]);

        let mut unit = conn.begin(&["notes"], UnitMode::ReadWrite).await.unwrap();
        unit.add("notes", json!({"id": 1})).await.unwrap();
        unit.commit().unwrap();
        conn.close();

        let reopened = engine.open("app", 2, &notes_schema).await.unwrap();
        let mut unit = reopened.begin(&["notes"], UnitMode::ReadOnly).await.unwrap();
        assert_eq!(unit.count("notes", &KeyRange::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dropping_connection_releases_it() {
        let engine = MemoryEngine::new();
        {
            let _conn = open_notes(&engine).await;
            assert_eq!(engine.open_connections("app"), 1);
        }
        assert_eq!(engine.open_connections("app"), 0);
    }
}
