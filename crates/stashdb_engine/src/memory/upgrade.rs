//! Version-change transaction for the in-memory engine.

use super::partition::PartitionData;
use crate::engine::VersionChange;
use crate::error::{EngineError, EngineResult};
use crate::key::KeyPath;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Staged schema changes; committed only if the upgrade handler succeeds.
pub(crate) struct VersionChangeTx {
    pub(crate) old_version: u64,
    pub(crate) new_version: u64,
    pub(crate) partitions: BTreeMap<String, Arc<PartitionData>>,
}

impl VersionChange for VersionChangeTx {
    fn old_version(&self) -> u64 {
        self.old_version
    }

    fn new_version(&self) -> u64 {
        self.new_version
    }

    fn partition_names(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    fn contains_partition(&self, name: &str) -> bool {
        self.partitions.contains_key(name)
    }

    fn create_partition(&mut self, name: &str, key_path: &str) -> EngineResult<()> {
        if self.partitions.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "partition {name} already exists"
            )));
        }
        let key_path = KeyPath::parse(key_path)?;
        self.partitions
            .insert(name.to_string(), Arc::new(PartitionData::new(key_path)));
        Ok(())
    }

    fn index_names(&self, partition: &str) -> EngineResult<Vec<String>> {
        self.partitions
            .get(partition)
            .map(|data| data.index_names())
            .ok_or_else(|| EngineError::not_found(format!("partition {partition}")))
    }

    fn create_index(
        &mut self,
        partition: &str,
        name: &str,
        key_path: &str,
        unique: bool,
    ) -> EngineResult<()> {
        let key_path = KeyPath::parse(key_path)?;
        let data = self
            .partitions
            .get_mut(partition)
            .ok_or_else(|| EngineError::not_found(format!("partition {partition}")))?;
        Arc::make_mut(data).create_index(name, key_path, unique)
    }
}
