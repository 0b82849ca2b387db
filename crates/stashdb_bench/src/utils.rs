//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use stashdb_engine::Record;
use tokio::runtime::Runtime;

/// Random alphanumeric payload of `size` characters.
pub fn random_payload(size: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(size)
        .map(char::from)
        .collect()
}

/// A record keyed by `id` carrying a random payload.
pub fn record(id: i64, payload_size: usize) -> Record {
    json!({ "id": id, "payload": random_payload(payload_size) })
}

/// Records with ids `start..start + count`.
pub fn records(start: i64, count: usize, payload_size: usize) -> Vec<Record> {
    (start..start + count as i64)
        .map(|id| record(id, payload_size))
        .collect()
}

/// Random ids in `0..max`, for lookup benchmarks.
pub fn random_ids(count: usize, max: i64) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..max)).collect()
}

/// Single-threaded runtime for driving async calls from criterion.
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build benchmark runtime")
}
