//! Serde-typed partition access.

use crate::error::{StoreError, StoreResult};
use crate::store::PartitionHandle;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stashdb_engine::{Key, KeyRange, Record};
use std::marker::PhantomData;

/// A partition whose records are (de)serialized as `T`.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use stashdb_core::Store;
/// use stashdb_engine::MemoryEngine;
/// use std::sync::Arc;
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = Store::new(Arc::new(MemoryEngine::new()), Default::default());
/// let users = store.typed::<User>("store");
///
/// users.add(&User { id: 7, name: "Ada".into() }).await.unwrap();
/// let user = users.get(7).await.unwrap().unwrap();
/// assert_eq!(user.name, "Ada");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TypedPartition<'a, T> {
    handle: PartitionHandle<'a>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T> TypedPartition<'a, T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(handle: PartitionHandle<'a>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    /// The untyped handle underneath.
    #[must_use]
    pub fn untyped(&self) -> &PartitionHandle<'a> {
        &self.handle
    }

    /// Reads and decodes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] if the stored record does not
    /// decode as `T`, or the underlying read error.
    pub async fn get(&self, key: impl Into<Key>) -> StoreResult<Option<T>> {
        let key = key.into();
        self.handle.get(key).await?.map(decode).transpose()
    }

    /// Reads and decodes every value in key order.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_all(&self) -> StoreResult<Vec<T>> {
        self.get_range(KeyRange::all(), None).await
    }

    /// Reads and decodes values in `range`.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_range(&self, range: KeyRange, limit: Option<usize>) -> StoreResult<Vec<T>> {
        self.handle
            .get_range(range, limit)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Counts values.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn count(&self) -> StoreResult<u64> {
        self.handle.count().await
    }

    /// Encodes and inserts `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] if `value` does not encode as a
    /// record, or a constraint error if its key exists.
    pub async fn add(&self, value: &T) -> StoreResult<Key> {
        let record = encode(value)?;
        self.handle.add(record).await
    }

    /// Encodes and inserts or replaces `value`.
    ///
    /// # Errors
    ///
    /// See [`add`](Self::add).
    pub async fn put(&self, value: &T) -> StoreResult<Key> {
        let record = encode(value)?;
        self.handle.put(record).await
    }

    /// Encodes and inserts every value, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] before touching the engine if
    /// any value fails to encode, otherwise a bulk-write error.
    pub async fn add_all(&self, values: &[T]) -> StoreResult<()> {
        let records = values.iter().map(encode).collect::<StoreResult<Vec<_>>>()?;
        self.handle.add_all(records).await
    }

    /// Deletes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn delete(&self, key: impl Into<Key>) -> StoreResult<()> {
        let key = key.into();
        self.handle.delete(key).await
    }
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Record> {
    let record =
        serde_json::to_value(value).map_err(|e| StoreError::invalid_record(e.to_string()))?;
    if !record.is_object() {
        return Err(StoreError::invalid_record("value must serialize to an object"));
    }
    Ok(record)
}

fn decode<T: DeserializeOwned>(record: Record) -> StoreResult<T> {
    serde_json::from_value(record).map_err(|e| StoreError::invalid_record(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        body: String,
    }

    #[test]
    fn encode_requires_object() {
        let err = encode(&42).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));

        let record = encode(&Note {
            id: 1,
            body: "hi".into(),
        })
        .unwrap();
        assert_eq!(record, json!({"id": 1, "body": "hi"}));
    }

    #[test]
    fn decode_reports_mismatch() {
        let err = decode::<Note>(json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
    }
}
