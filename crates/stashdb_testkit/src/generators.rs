//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, key paths and records that satisfy the
//! engine's key rules.

use proptest::prelude::*;
use serde_json::{json, Value};
use stashdb_engine::{Key, Record};
use std::collections::BTreeSet;

/// Strategy for scalar keys (integers and strings).
pub fn scalar_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<i64>().prop_map(Key::Int),
        "[a-z0-9]{0,8}".prop_map(Key::Text),
    ]
}

/// Strategy for any key, compound keys included.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    scalar_key_strategy().prop_recursive(2, 8, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::Array)
    })
}

/// Strategy for valid partition and index names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Strategy for valid key paths of one to three segments.
pub fn key_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9_]{0,7}", 1..=3).prop_map(|segments| segments.join("."))
}

/// Strategy for a record keyed by `id` with an arbitrary payload.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (any::<i64>(), payload_strategy())
        .prop_map(|(id, payload)| json!({ "id": id, "payload": payload }))
}

/// Strategy for a batch of records with distinct `id`s.
pub fn unique_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::btree_set(0..10_000i64, 0..=max).prop_map(|ids: BTreeSet<i64>| {
        ids.into_iter()
            .map(|id| json!({ "id": id, "value": id }))
            .collect()
    })
}

/// Strategy for a non-empty batch in which at least one `id` repeats.
pub fn duplicate_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Record>> {
    (unique_batch_strategy(max.max(1)), any::<prop::sample::Index>()).prop_map(|(mut batch, pick)| {
        if batch.is_empty() {
            batch.push(json!({ "id": 0, "value": 0 }));
        }
        let duplicate = batch[pick.index(batch.len())].clone();
        batch.push(duplicate);
        batch
    })
}

fn payload_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[ -~]{0,16}".prop_map(Value::from),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_engine::KeyPath;

    proptest! {
        #[test]
        fn generated_key_paths_parse(path in key_path_strategy()) {
            prop_assert!(KeyPath::parse(&path).is_ok());
        }

        #[test]
        fn generated_keys_round_trip_through_json(key in key_strategy()) {
            prop_assert_eq!(Key::from_value(&key.to_value()).unwrap(), key);
        }

        #[test]
        fn unique_batches_have_distinct_ids(batch in unique_batch_strategy(32)) {
            let ids: BTreeSet<i64> = batch.iter().filter_map(|r| r["id"].as_i64()).collect();
            prop_assert_eq!(ids.len(), batch.len());
        }

        #[test]
        fn duplicate_batches_repeat_an_id(batch in duplicate_batch_strategy(32)) {
            let ids: BTreeSet<i64> = batch.iter().filter_map(|r| r["id"].as_i64()).collect();
            prop_assert!(ids.len() < batch.len());
        }
    }
}
