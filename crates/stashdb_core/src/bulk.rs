//! Batched writes in a single atomic unit.

use crate::connection::ConnectionManager;
use crate::error::{StoreError, StoreResult};
use crate::executor::Primitive;
use stashdb_engine::{EngineError, Record, UnitMode};
use std::sync::Arc;
use tracing::debug;

/// How a batch treats keys that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchWrite {
    Add,
    Put,
}

impl BatchWrite {
    fn primitive(self) -> Primitive {
        match self {
            Self::Add => Primitive::Add,
            Self::Put => Primitive::Put,
        }
    }
}

/// Writes many records to one partition, all or nothing.
#[derive(Debug, Clone)]
pub struct BulkWriter {
    connections: Arc<ConnectionManager>,
}

impl BulkWriter {
    /// Creates a writer that draws connections from `connections`.
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Inserts every record; fails if any key already exists, in the
    /// partition or earlier in the batch.
    ///
    /// An empty batch succeeds without touching the engine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BulkWrite`] if any record is rejected or the
    /// commit fails. None of the batch is stored in that case.
    pub async fn add_all(&self, partition: &str, records: Vec<Record>) -> StoreResult<()> {
        self.write_all(partition, records, BatchWrite::Add).await
    }

    /// Inserts or replaces every record.
    ///
    /// # Errors
    ///
    /// Same as [`add_all`](Self::add_all), minus existing-key failures.
    pub async fn put_all(&self, partition: &str, records: Vec<Record>) -> StoreResult<()> {
        self.write_all(partition, records, BatchWrite::Put).await
    }

    async fn write_all(
        &self,
        partition: &str,
        records: Vec<Record>,
        batch: BatchWrite,
    ) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let failed = |source: EngineError| StoreError::BulkWrite {
            partition: partition.to_string(),
            source,
        };

        let conn = self.connections.acquire().await?;
        let mut unit = conn
            .begin(&[partition], UnitMode::ReadWrite)
            .await
            .map_err(failed)?;

        let primitive = batch.primitive();
        let count = records.len();
        for record in records {
            let written = match batch {
                BatchWrite::Add => unit.add(partition, record).await,
                BatchWrite::Put => unit.put(partition, record).await,
            };
            if let Err(source) = written {
                unit.abort();
                debug!(partition, %primitive, error = %source, "bulk write aborted");
                return Err(failed(source));
            }
        }

        unit.commit().map_err(failed)?;
        debug!(partition, %primitive, count, "bulk write committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDescriptor;
    use serde_json::json;
    use stashdb_engine::{AtomicUnit, KeyRange, MemoryEngine};

    fn writer() -> (BulkWriter, Arc<ConnectionManager>) {
        let engine = Arc::new(MemoryEngine::new());
        let connections = Arc::new(ConnectionManager::new(
            engine,
            Arc::new(SchemaDescriptor::default()),
        ));
        (BulkWriter::new(connections.clone()), connections)
    }

    async fn count(connections: &ConnectionManager) -> u64 {
        let conn = connections.acquire().await.unwrap();
        let mut unit = conn.begin(&["store"], UnitMode::ReadOnly).await.unwrap();
        unit.count("store", &KeyRange::all()).await.unwrap()
    }

    #[tokio::test]
    async fn empty_batch_skips_engine() {
        let (writer, connections) = writer();
        writer.add_all("store", Vec::new()).await.unwrap();
        assert!(connections.last_migration().is_none());
    }

    #[tokio::test]
    async fn add_all_commits_together() {
        let (writer, connections) = writer();
        writer
            .add_all("store", vec![json!({"id": 1}), json!({"id": 2})])
            .await
            .unwrap();
        assert_eq!(count(&connections).await, 2);
    }

    #[tokio::test]
    async fn duplicate_in_batch_stores_nothing() {
        let (writer, connections) = writer();
        let err = writer
            .add_all("store", vec![json!({"id": 1}), json!({"id": 1})])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::BulkWrite { ref partition, .. } if partition == "store"));
        assert_eq!(count(&connections).await, 0);
    }

    #[tokio::test]
    async fn add_all_rejects_existing_key_put_all_replaces_it() {
        let (writer, connections) = writer();
        writer.add_all("store", vec![json!({"id": 1, "v": 1})]).await.unwrap();

        let err = writer
            .add_all("store", vec![json!({"id": 2}), json!({"id": 1, "v": 2})])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::BulkWrite { ref source, .. } if source.is_constraint()
        ));
        assert_eq!(count(&connections).await, 1);

        writer
            .put_all("store", vec![json!({"id": 2}), json!({"id": 1, "v": 2})])
            .await
            .unwrap();
        assert_eq!(count(&connections).await, 2);
        assert_eq!(BatchWrite::Add.primitive(), Primitive::Add);
        assert_eq!(BatchWrite::Put.primitive(), Primitive::Put);
    }

    #[tokio::test]
    async fn put_all_overwrites() {
        let (writer, connections) = writer();
        writer
            .put_all("store", vec![json!({"id": 1, "v": 1}), json!({"id": 1, "v": 2})])
            .await
            .unwrap();
        writer.put_all("store", vec![json!({"id": 1, "v": 3})]).await.unwrap();
        assert_eq!(count(&connections).await, 1);
    }
}
