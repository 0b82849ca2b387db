//! Lazy, cached database connections.

use crate::error::{StoreError, StoreResult};
use crate::migration::{MigrationReport, SchemaMigration};
use crate::schema::SchemaDescriptor;
use parking_lot::RwLock;
use stashdb_engine::{EngineConnection, StorageEngine};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle of the cached connection.
///
/// ```text
/// Closed -> Opening -> (Migrating) -> Open -> Closed
/// ```
///
/// A failure while opening or migrating returns to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection is cached.
    Closed,
    /// The engine is opening the database.
    Opening,
    /// The engine is running the schema migration.
    Migrating,
    /// A connection is cached and ready.
    Open,
}

impl ConnectionState {
    /// Returns the state name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Migrating => "migrating",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the single cached connection of a store.
///
/// The connection is opened on first use and reused until it is closed,
/// destroyed, or found closed by the engine. The whole check-then-open
/// sequence runs under an async mutex, so concurrent callers share one
/// open instead of racing several.
pub struct ConnectionManager {
    engine: Arc<dyn StorageEngine>,
    schema: Arc<SchemaDescriptor>,
    cached: Mutex<Option<Arc<dyn EngineConnection>>>,
    state: RwLock<ConnectionState>,
    last_migration: RwLock<Option<MigrationReport>>,
}

impl ConnectionManager {
    /// Creates a manager; nothing is opened until [`acquire`](Self::acquire).
    pub fn new(engine: Arc<dyn StorageEngine>, schema: Arc<SchemaDescriptor>) -> Self {
        Self {
            engine,
            schema,
            cached: Mutex::new(None),
            state: RwLock::new(ConnectionState::Closed),
            last_migration: RwLock::new(None),
        }
    }

    /// Schema the manager opens databases with.
    #[must_use]
    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Changes applied by the most recent migration, if any ran.
    #[must_use]
    pub fn last_migration(&self) -> Option<MigrationReport> {
        self.last_migration.read().clone()
    }

    /// Returns the cached connection, opening (and migrating) it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the engine fails to open or
    /// upgrade the database. Nothing is cached in that case, so the next
    /// call tries again.
    pub async fn acquire(&self) -> StoreResult<Arc<dyn EngineConnection>> {
        let mut cached = self.cached.lock().await;

        if let Some(conn) = cached.take() {
            if !conn.is_closed() && self.matches(conn.as_ref()) {
                *cached = Some(Arc::clone(&conn));
                return Ok(conn);
            }
            if conn.is_closed() {
                warn!(
                    database = %conn.name(),
                    "cached connection was closed by the engine, reopening"
                );
            } else {
                conn.close();
            }
        }

        let conn = self.open().await?;
        *cached = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Releases the cached connection. Idempotent.
    pub async fn close(&self) {
        let mut cached = self.cached.lock().await;
        if let Some(conn) = cached.take() {
            conn.close();
            debug!(database = %conn.name(), "connection closed");
        }
        self.set_state(ConnectionState::Closed);
    }

    /// Closes the cached connection if it belongs to `database`, then
    /// deletes the database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Destroy`] if the engine refuses the delete,
    /// typically because other connections are still open.
    pub async fn destroy(&self, database: &str) -> StoreResult<()> {
        let mut cached = self.cached.lock().await;

        let owns_target = cached.as_ref().is_some_and(|conn| conn.name() == database);
        if owns_target {
            if let Some(conn) = cached.take() {
                conn.close();
            }
            self.set_state(ConnectionState::Closed);
        }

        self.engine
            .delete_database(database)
            .await
            .map_err(|source| StoreError::Destroy {
                database: database.to_string(),
                source,
            })?;

        info!(database, "database deleted");
        Ok(())
    }

    fn matches(&self, conn: &dyn EngineConnection) -> bool {
        conn.name() == self.schema.database_name() && conn.version() == self.schema.version()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    async fn open(&self) -> StoreResult<Arc<dyn EngineConnection>> {
        let database = self.schema.database_name();
        let version = self.schema.version();

        self.set_state(ConnectionState::Opening);
        let pending = PendingOpen::new(&self.state);
        debug!(database, version, "opening database");

        let migration = SchemaMigration::new(&self.schema, &self.state);
        let opened = self.engine.open(database, version, &migration).await;

        match opened {
            Ok(conn) => {
                if let Some(report) = migration.into_report() {
                    info!(
                        database,
                        from = report.from_version,
                        to = report.to_version,
                        partitions = report.partitions_created(),
                        indexes = report.indexes_created(),
                        "schema migrated"
                    );
                    *self.last_migration.write() = Some(report);
                }
                self.set_state(ConnectionState::Open);
                pending.complete();
                Ok(conn)
            }
            Err(source) => {
                drop(pending);
                debug!(database, version, error = %source, "open failed");
                Err(StoreError::Connection {
                    database: database.to_string(),
                    source,
                })
            }
        }
    }
}

/// Puts the state back to `Closed` unless the open completes, including
/// when the `acquire` future is dropped mid-open.
struct PendingOpen<'a> {
    state: Option<&'a RwLock<ConnectionState>>,
}

impl<'a> PendingOpen<'a> {
    fn new(state: &'a RwLock<ConnectionState>) -> Self {
        Self { state: Some(state) }
    }

    fn complete(mut self) {
        self.state = None;
    }
}

impl Drop for PendingOpen<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state {
            *state.write() = ConnectionState::Closed;
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("database", &self.schema.database_name())
            .field("version", &self.schema.version())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
