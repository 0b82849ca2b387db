//! Record fixtures and test helpers.

use serde_json::{json, Value};
use stashdb_engine::Record;
use std::sync::Once;

/// A user record keyed by `id`, with a unique-looking `email`.
pub fn user(id: i64, name: &str) -> Record {
    json!({
        "id": id,
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase()),
    })
}

/// `count` user records with ids `1..=count`.
pub fn users(count: usize) -> Vec<Record> {
    (1..=count as i64)
        .map(|id| user(id, &format!("user{id}")))
        .collect()
}

/// A record whose key sits under a nested key path (`meta.slug`).
pub fn nested(slug: &str, body: &str) -> Record {
    json!({
        "meta": { "slug": slug },
        "body": body,
    })
}

/// Numbered records `{"id": n, "value": n * 10}` for `ids`.
pub fn numbered(ids: impl IntoIterator<Item = i64>) -> Vec<Record> {
    ids.into_iter()
        .map(|id| json!({ "id": id, "value": id * 10 }))
        .collect()
}

/// Extracts the `id` field of each record, skipping records without one.
pub fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|record| record.get("id").and_then(Value::as_i64))
        .collect()
}

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call from
/// every test; only the first call installs anything.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
