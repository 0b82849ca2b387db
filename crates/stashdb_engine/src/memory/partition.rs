//! Partition and index storage.

use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyPath, KeyRange, Record};
use std::collections::btree_map::Range;
use std::collections::{BTreeMap, BTreeSet};

/// A secondary index: index key to the primary keys carrying it.
#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    key_path: KeyPath,
    unique: bool,
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexData {
    fn new(key_path: KeyPath, unique: bool) -> Self {
        Self {
            key_path,
            unique,
            entries: BTreeMap::new(),
        }
    }

    /// Returns true if adding `primary` under `index_key` breaks uniqueness.
    fn conflicts(&self, index_key: &Key, primary: &Key) -> bool {
        self.unique
            && self
                .entries
                .get(index_key)
                .is_some_and(|primaries| primaries.iter().any(|p| p != primary))
    }

    fn insert(&mut self, index_key: Key, primary: Key) {
        self.entries.entry(index_key).or_default().insert(primary);
    }

    fn remove(&mut self, index_key: &Key, primary: &Key) {
        if let Some(primaries) = self.entries.get_mut(index_key) {
            primaries.remove(primary);
            if primaries.is_empty() {
                self.entries.remove(index_key);
            }
        }
    }

    pub(crate) fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub(crate) fn is_unique(&self) -> bool {
        self.unique
    }

    /// Primary keys filed under one index key.
    pub(crate) fn primaries_of<'a>(
        &'a self,
        index_key: &Key,
    ) -> impl Iterator<Item = &'a Key> + 'a {
        self.entries.get(index_key).into_iter().flatten()
    }

    /// `(index key, primary key)` pairs in index order.
    pub(crate) fn entries_in<'a>(
        &'a self,
        range: &'a KeyRange,
    ) -> impl Iterator<Item = (&'a Key, &'a Key)> + 'a {
        self.entries
            .range(range.bounds())
            .flat_map(|(index_key, primaries)| primaries.iter().map(move |p| (index_key, p)))
    }
}

/// Records of one partition plus its indexes.
#[derive(Debug, Clone)]
pub(crate) struct PartitionData {
    key_path: KeyPath,
    records: BTreeMap<Key, Record>,
    indexes: BTreeMap<String, IndexData>,
}

impl PartitionData {
    pub(crate) fn new(key_path: KeyPath) -> Self {
        Self {
            key_path,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub(crate) fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub(crate) fn get(&self, key: &Key) -> Option<&Record> {
        self.records.get(key)
    }

    pub(crate) fn range<'a>(&'a self, range: &'a KeyRange) -> Range<'a, Key, Record> {
        self.records.range(range.bounds())
    }

    /// Stores a record under `key`, replacing any previous one and moving
    /// its index entries. Constraints are the caller's job.
    pub(crate) fn store(&mut self, key: Key, record: Record) {
        self.remove(&key);
        for index in self.indexes.values_mut() {
            if let Some(index_key) = index.key_path.extract_optional(&record) {
                index.insert(index_key, key.clone());
            }
        }
        self.records.insert(key, record);
    }

    pub(crate) fn remove(&mut self, key: &Key) {
        if let Some(record) = self.records.remove(key) {
            for index in self.indexes.values_mut() {
                if let Some(index_key) = index.key_path.extract_optional(&record) {
                    index.remove(&index_key, key);
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// Builds an index over the existing records.
    pub(crate) fn create_index(
        &mut self,
        name: &str,
        key_path: KeyPath,
        unique: bool,
    ) -> EngineResult<()> {
        if self.indexes.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "index {name} already exists"
            )));
        }

        let mut index = IndexData::new(key_path, unique);
        for (key, record) in &self.records {
            if let Some(index_key) = index.key_path.extract_optional(record) {
                if index.conflicts(&index_key, key) {
                    return Err(EngineError::constraint(format!(
                        "existing records violate unique index {name} at {index_key}"
                    )));
                }
                index.insert(index_key, key.clone());
            }
        }

        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    pub(crate) fn index(&self, name: &str) -> EngineResult<&IndexData> {
        self.indexes
            .get(name)
            .ok_or_else(|| EngineError::not_found(format!("index {name}")))
    }

    pub(crate) fn indexes(&self) -> impl Iterator<Item = (&str, &IndexData)> {
        self.indexes.iter().map(|(name, index)| (name.as_str(), index))
    }
}
