//! Single-operation execution.
//!
//! Every store call that touches one record set runs through
//! [`OperationExecutor::execute`]: it acquires the cached connection,
//! begins one atomic unit scoped to the target partition, dispatches
//! exactly one primitive, and commits. A failed primitive aborts the unit,
//! so nothing it did becomes visible.

use crate::connection::ConnectionManager;
use crate::error::{StoreError, StoreResult};
use stashdb_engine::{AtomicUnit, EngineResult, Key, KeyRange, Record, UnitMode};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Names an engine primitive, for error tagging and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Read one record by key.
    Get,
    /// Read records in key order.
    GetAll,
    /// Count records.
    Count,
    /// Insert a new record.
    Add,
    /// Insert or replace a record.
    Put,
    /// Delete records in a range.
    Delete,
    /// Delete every record.
    Clear,
    /// Read one record through an index.
    IndexGet,
    /// Read records through an index.
    IndexGetAll,
    /// Count records through an index.
    IndexCount,
}

impl Primitive {
    /// Returns the primitive name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::GetAll => "getAll",
            Self::Count => "count",
            Self::Add => "add",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::Clear => "clear",
            Self::IndexGet => "index.get",
            Self::IndexGetAll => "index.getAll",
            Self::IndexCount => "index.count",
        }
    }

    /// Returns true if the primitive writes.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Add | Self::Put | Self::Delete | Self::Clear)
    }

    /// Unit mode the primitive needs.
    #[must_use]
    pub fn mode(&self) -> UnitMode {
        if self.is_write() {
            UnitMode::ReadWrite
        } else {
            UnitMode::ReadOnly
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One primitive together with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Read the record stored under a key.
    Get(Key),
    /// Read records in key order.
    GetAll {
        /// Keys to include.
        range: KeyRange,
        /// Maximum number of records.
        limit: Option<usize>,
    },
    /// Count records in a range.
    Count(KeyRange),
    /// Insert a record; fails if its key exists.
    Add(Record),
    /// Insert or replace a record.
    Put(Record),
    /// Delete records in a range.
    Delete(KeyRange),
    /// Delete every record.
    Clear,
    /// Read the first record with the given index key.
    IndexGet {
        /// Index name.
        index: String,
        /// Index key.
        key: Key,
    },
    /// Read records ordered by index key.
    IndexGetAll {
        /// Index name.
        index: String,
        /// Index keys to include.
        range: KeyRange,
        /// Maximum number of records.
        limit: Option<usize>,
    },
    /// Count records whose index key is in a range.
    IndexCount {
        /// Index name.
        index: String,
        /// Index keys to include.
        range: KeyRange,
    },
}

impl Action {
    /// Primitive this action dispatches.
    #[must_use]
    pub fn primitive(&self) -> Primitive {
        match self {
            Self::Get(_) => Primitive::Get,
            Self::GetAll { .. } => Primitive::GetAll,
            Self::Count(_) => Primitive::Count,
            Self::Add(_) => Primitive::Add,
            Self::Put(_) => Primitive::Put,
            Self::Delete(_) => Primitive::Delete,
            Self::Clear => Primitive::Clear,
            Self::IndexGet { .. } => Primitive::IndexGet,
            Self::IndexGetAll { .. } => Primitive::IndexGetAll,
            Self::IndexCount { .. } => Primitive::IndexCount,
        }
    }
}

/// Result of a successful action.
///
/// Each action produces exactly one variant: `Get`/`IndexGet` a `Record`,
/// `GetAll`/`IndexGetAll` `Records`, the counts a `Count`, `Add`/`Put` the
/// stored `Key`, and the deletes `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A single, possibly missing, record.
    Record(Option<Record>),
    /// Records in order.
    Records(Vec<Record>),
    /// A record count.
    Count(u64),
    /// Key of a written record.
    Key(Key),
    /// The action produced no value.
    Done,
}

impl Outcome {
    /// The single record, if this outcome carries one.
    #[must_use]
    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Record(record) => record,
            Self::Records(records) => records.into_iter().next(),
            _ => None,
        }
    }

    /// The records this outcome carries; empty for non-read outcomes.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::Records(records) => records,
            Self::Record(record) => record.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// The count this outcome carries.
    #[must_use]
    pub fn into_count(self) -> u64 {
        match self {
            Self::Count(n) => n,
            Self::Records(records) => records.len() as u64,
            Self::Record(record) => u64::from(record.is_some()),
            _ => 0,
        }
    }

    /// The written key, if this outcome carries one.
    #[must_use]
    pub fn into_key(self) -> Option<Key> {
        match self {
            Self::Key(key) => Some(key),
            _ => None,
        }
    }
}

/// Runs one action per atomic unit.
#[derive(Debug, Clone)]
pub struct OperationExecutor {
    connections: Arc<ConnectionManager>,
}

impl OperationExecutor {
    /// Creates an executor that draws connections from `connections`.
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Executes `action` against `partition` in a fresh unit opened in `mode`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Connection`] if the database cannot be opened
    /// - [`StoreError::Constraint`] if a write violates key uniqueness
    /// - [`StoreError::Operation`] for any other engine failure, including
    ///   an unknown partition or index
    pub async fn execute(
        &self,
        partition: &str,
        mode: UnitMode,
        action: Action,
    ) -> StoreResult<Outcome> {
        let primitive = action.primitive();
        let conn = self.connections.acquire().await?;

        let mut unit = conn
            .begin(&[partition], mode)
            .await
            .map_err(|source| StoreError::operation(partition, primitive, source))?;

        trace!(database = %conn.name(), partition, %primitive, %mode, "executing");

        match dispatch(unit.as_mut(), partition, action).await {
            Ok(outcome) => {
                unit.commit()
                    .map_err(|source| StoreError::operation(partition, primitive, source))?;
                Ok(outcome)
            }
            Err(source) => {
                unit.abort();
                trace!(partition, %primitive, error = %source, "unit aborted");
                Err(StoreError::operation(partition, primitive, source))
            }
        }
    }

    /// Executes `action` in the unit mode its primitive needs.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn run(&self, partition: &str, action: Action) -> StoreResult<Outcome> {
        let mode = action.primitive().mode();
        self.execute(partition, mode, action).await
    }
}

async fn dispatch(
    unit: &mut dyn AtomicUnit,
    partition: &str,
    action: Action,
) -> EngineResult<Outcome> {
    let outcome = match action {
        Action::Get(key) => Outcome::Record(unit.get(partition, &key).await?),
        Action::GetAll { range, limit } => {
            Outcome::Records(unit.get_all(partition, &range, limit).await?)
        }
        Action::Count(range) => Outcome::Count(unit.count(partition, &range).await?),
        Action::Add(record) => Outcome::Key(unit.add(partition, record).await?),
        Action::Put(record) => Outcome::Key(unit.put(partition, record).await?),
        Action::Delete(range) => {
            unit.delete(partition, &range).await?;
            Outcome::Done
        }
        Action::Clear => {
            unit.clear(partition).await?;
            Outcome::Done
        }
        Action::IndexGet { index, key } => {
            Outcome::Record(unit.index_get(partition, &index, &key).await?)
        }
        Action::IndexGetAll {
            index,
            range,
            limit,
        } => Outcome::Records(unit.index_get_all(partition, &index, &range, limit).await?),
        Action::IndexCount { index, range } => {
            Outcome::Count(unit.index_count(partition, &index, &range).await?)
        }
    };
    Ok(outcome)
}
