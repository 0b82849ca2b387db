//! Pending writes of a read-write unit.
//!
//! A unit never copies its partitions. It reads the committed snapshot it
//! began with through an overlay of its own writes, checks constraints
//! against that combined view, and hands the overlay to the committed
//! partition on commit.

use super::partition::{IndexData, PartitionData};
use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyRange, Record};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Index entries of pending records, by index name.
type PendingIndexes = BTreeMap<String, BTreeMap<Key, BTreeSet<Key>>>;

/// One partition as seen from inside a unit.
pub(crate) struct StagedPartition {
    base: Arc<PartitionData>,
    writes: PendingWrites,
    indexes: PendingIndexes,
}

/// Writes buffered by a unit, in the form they are applied on commit.
#[derive(Default)]
pub(crate) struct PendingWrites {
    cleared: bool,
    /// `None` marks a deleted key.
    records: BTreeMap<Key, Option<Record>>,
}

impl PendingWrites {
    pub(crate) fn is_empty(&self) -> bool {
        !self.cleared && self.records.is_empty()
    }

    /// Applies the writes to committed data. The unit checked every
    /// constraint against this same data, so nothing can fail here.
    pub(crate) fn apply(self, data: &mut PartitionData) {
        if self.cleared {
            data.clear();
        }
        for (key, entry) in self.records {
            match entry {
                Some(record) => data.store(key, record),
                None => data.remove(&key),
            }
        }
    }
}

impl StagedPartition {
    pub(crate) fn new(base: Arc<PartitionData>) -> Self {
        Self {
            base,
            writes: PendingWrites::default(),
            indexes: PendingIndexes::new(),
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Releases the snapshot and returns the buffered writes.
    pub(crate) fn into_writes(self) -> PendingWrites {
        self.writes
    }

    /// A committed record is visible unless the unit cleared the partition
    /// or wrote over its key.
    fn shadows(&self, key: &Key) -> bool {
        self.writes.cleared || self.writes.records.contains_key(key)
    }

    pub(crate) fn get(&self, key: &Key) -> Option<&Record> {
        match self.writes.records.get(key) {
            Some(entry) => entry.as_ref(),
            None if self.writes.cleared => None,
            None => self.base.get(key),
        }
    }

    /// Visible records in `range`, in key order.
    fn visible<'a>(
        &'a self,
        range: &'a KeyRange,
    ) -> impl Iterator<Item = (&'a Key, &'a Record)> + 'a {
        let mut committed = (!self.writes.cleared)
            .then(|| self.base.range(range))
            .into_iter()
            .flatten()
            .peekable();
        let mut pending = self.writes.records.range(range.bounds()).peekable();

        std::iter::from_fn(move || loop {
            let mut skip_committed = false;
            let take_pending = match (committed.peek(), pending.peek()) {
                (None, None) => return None,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some((c, _)), Some((p, _))) => match p.cmp(c) {
                    Ordering::Less => true,
                    Ordering::Greater => false,
                    Ordering::Equal => {
                        skip_committed = true;
                        true
                    }
                },
            };
            if skip_committed {
                committed.next();
            }
            if take_pending {
                if let Some((key, Some(record))) = pending.next() {
                    return Some((key, record));
                }
            } else if let Some(entry) = committed.next() {
                return Some(entry);
            }
        })
    }

    pub(crate) fn records_in(&self, range: &KeyRange, limit: Option<usize>) -> Vec<Record> {
        self.visible(range)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub(crate) fn count(&self, range: &KeyRange) -> u64 {
        self.visible(range).count() as u64
    }

    /// `(index key, primary key)` pairs of visible records, in index order.
    fn index_entries<'a>(
        &'a self,
        name: &str,
        range: &'a KeyRange,
    ) -> EngineResult<Vec<(&'a Key, &'a Key)>> {
        let committed = self.base.index(name)?;
        let mut entries: Vec<(&Key, &Key)> = committed
            .entries_in(range)
            .filter(|(_, primary)| !self.shadows(primary))
            .collect();
        if let Some(pending) = self.indexes.get(name) {
            for (index_key, primaries) in pending.range(range.bounds()) {
                entries.extend(primaries.iter().map(|p| (index_key, p)));
            }
            entries.sort();
        }
        Ok(entries)
    }

    pub(crate) fn index_records(
        &self,
        name: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Record>> {
        Ok(self
            .index_entries(name, range)?
            .into_iter()
            .filter_map(|(_, primary)| self.get(primary))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    pub(crate) fn index_count(&self, name: &str, range: &KeyRange) -> EngineResult<u64> {
        Ok(self.index_entries(name, range)?.len() as u64)
    }

    /// Returns true if a visible record other than `primary` is filed
    /// under `index_key` in a unique index.
    fn conflicts(&self, name: &str, index: &IndexData, index_key: &Key, primary: &Key) -> bool {
        if !index.is_unique() {
            return false;
        }
        let committed = index
            .primaries_of(index_key)
            .any(|p| p != primary && !self.shadows(p));
        let pending = self
            .indexes
            .get(name)
            .and_then(|entries| entries.get(index_key))
            .is_some_and(|primaries| primaries.iter().any(|p| p != primary));
        committed || pending
    }

    /// Buffers a record write.
    ///
    /// Nothing is buffered when an error is returned.
    pub(crate) fn insert(&mut self, record: Record, overwrite: bool) -> EngineResult<Key> {
        let key = self.base.key_path().extract(&record)?;
        if !overwrite && self.get(&key).is_some() {
            return Err(EngineError::constraint(format!("key {key} already exists")));
        }

        let mut entries = Vec::new();
        for (name, index) in self.base.indexes() {
            if let Some(index_key) = index.key_path().extract_optional(&record) {
                if self.conflicts(name, index, &index_key, &key) {
                    return Err(EngineError::constraint(format!(
                        "unique index {name} already contains {index_key}"
                    )));
                }
                entries.push((name.to_string(), index_key));
            }
        }

        self.unindex(&key);
        for (name, index_key) in entries {
            self.indexes
                .entry(name)
                .or_default()
                .entry(index_key)
                .or_default()
                .insert(key.clone());
        }
        self.writes.records.insert(key.clone(), Some(record));
        Ok(key)
    }

    pub(crate) fn delete(&mut self, range: &KeyRange) {
        let keys: Vec<Key> = self.visible(range).map(|(key, _)| key.clone()).collect();
        for key in keys {
            self.unindex(&key);
            self.writes.records.insert(key, None);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.writes.cleared = true;
        self.writes.records.clear();
        self.indexes.clear();
    }

    /// Drops the pending index entries of the record buffered under `key`.
    fn unindex(&mut self, key: &Key) {
        let Some(Some(record)) = self.writes.records.get(key) else {
            return;
        };
        for (name, index) in self.base.indexes() {
            let Some(index_key) = index.key_path().extract_optional(record) else {
                continue;
            };
            if let Some(entries) = self.indexes.get_mut(name) {
                if let Some(primaries) = entries.get_mut(&index_key) {
                    primaries.remove(key);
                    if primaries.is_empty() {
                        entries.remove(&index_key);
                    }
                }
            }
        }
    }
}
