//! Atomic units for the in-memory engine.

use super::staged::StagedPartition;
use super::DatabaseState;
use crate::engine::{AtomicUnit, UnitMode};
use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyRange, Record};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

/// An atomic unit over a snapshot of its partitions.
///
/// Read-only units never block. Read-write units hold the database's
/// writer lock for their whole life, buffer their writes over the snapshot,
/// and apply them to the committed partitions on `commit`.
pub(crate) struct MemoryUnit {
    db: Arc<DatabaseState>,
    mode: UnitMode,
    scope: BTreeMap<String, StagedPartition>,
    aborted: bool,
    _writer: Option<OwnedMutexGuard<()>>,
}

impl MemoryUnit {
    pub(crate) fn new(
        db: Arc<DatabaseState>,
        mode: UnitMode,
        scope: BTreeMap<String, StagedPartition>,
        writer: Option<OwnedMutexGuard<()>>,
    ) -> Self {
        Self {
            db,
            mode,
            scope,
            aborted: false,
            _writer: writer,
        }
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.aborted {
            return Err(EngineError::Aborted);
        }
        Ok(())
    }

    fn read(&self, partition: &str) -> EngineResult<&StagedPartition> {
        self.ensure_live()?;
        self.scope
            .get(partition)
            .ok_or_else(|| EngineError::not_found(format!("partition {partition} in unit scope")))
    }

    fn write(&mut self, partition: &str) -> EngineResult<&mut StagedPartition> {
        self.ensure_live()?;
        if !self.mode.is_writable() {
            return Err(EngineError::ReadOnly);
        }
        self.scope
            .get_mut(partition)
            .ok_or_else(|| EngineError::not_found(format!("partition {partition} in unit scope")))
    }

    /// A failed request aborts the whole unit.
    fn settle<T>(&mut self, result: EngineResult<T>) -> EngineResult<T> {
        if result.is_err() {
            self.aborted = true;
        }
        result
    }
}

#[async_trait]
impl AtomicUnit for MemoryUnit {
    fn mode(&self) -> UnitMode {
        self.mode
    }

    async fn get(&mut self, partition: &str, key: &Key) -> EngineResult<Option<Record>> {
        let result = self.read(partition).map(|data| data.get(key).cloned());
        self.settle(result)
    }

    async fn get_all(
        &mut self,
        partition: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Record>> {
        let result = self
            .read(partition)
            .map(|data| data.records_in(range, limit));
        self.settle(result)
    }

    async fn count(&mut self, partition: &str, range: &KeyRange) -> EngineResult<u64> {
        let result = self.read(partition).map(|data| data.count(range));
        self.settle(result)
    }

    async fn add(&mut self, partition: &str, record: Record) -> EngineResult<Key> {
        let result = self
            .write(partition)
            .and_then(|data| data.insert(record, false));
        self.settle(result)
    }

    async fn put(&mut self, partition: &str, record: Record) -> EngineResult<Key> {
        let result = self
            .write(partition)
            .and_then(|data| data.insert(record, true));
        self.settle(result)
    }

    async fn delete(&mut self, partition: &str, range: &KeyRange) -> EngineResult<()> {
        let result = self
            .write(partition)
            .map(|data| data.delete(range));
        self.settle(result)
    }

    async fn clear(&mut self, partition: &str) -> EngineResult<()> {
        let result = self.write(partition).map(StagedPartition::clear);
        self.settle(result)
    }

    async fn index_get(
        &mut self,
        partition: &str,
        index: &str,
        key: &Key,
    ) -> EngineResult<Option<Record>> {
        let result = self.read(partition).and_then(|data| {
            data.index_records(index, &KeyRange::only(key.clone()), Some(1))
                .map(|records| records.into_iter().next())
        });
        self.settle(result)
    }

    async fn index_get_all(
        &mut self,
        partition: &str,
        index: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Record>> {
        let result = self
            .read(partition)
            .and_then(|data| data.index_records(index, range, limit));
        self.settle(result)
    }

    async fn index_count(
        &mut self,
        partition: &str,
        index: &str,
        range: &KeyRange,
    ) -> EngineResult<u64> {
        let result = self
            .read(partition)
            .and_then(|data| data.index_count(index, range));
        self.settle(result)
    }

    fn commit(self: Box<Self>) -> EngineResult<()> {
        let unit = *self;
        if unit.aborted {
            return Err(EngineError::Aborted);
        }

        // Dropping the snapshots first lets `make_mut` update the committed
        // partitions in place unless a reader still holds them.
        let writes: Vec<_> = unit
            .scope
            .into_iter()
            .filter(|(_, staged)| staged.is_dirty())
            .map(|(name, staged)| (name, staged.into_writes()))
            .collect();
        if writes.is_empty() {
            return Ok(());
        }

        let mut inner = unit.db.inner.write();
        let partitions = writes.len();
        for (name, pending) in writes {
            if let Some(data) = inner.partitions.get_mut(&name) {
                pending.apply(Arc::make_mut(data));
            }
        }
        trace!(database = %unit.db.name, partitions, "unit committed");
        Ok(())
    }

    fn abort(self: Box<Self>) {
        let dirty = self.scope.values().filter(|staged| staged.is_dirty()).count();
        trace!(database = %self.db.name, dirty, "unit aborted");
    }
}
