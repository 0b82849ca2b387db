//! Integration tests for schema migration across opens.

use serde_json::json;
use stashdb_core::{
    ConnectionState, IndexSpec, MigrationOperation, PartitionSpec, SchemaDescriptor, Store,
    StoreError,
};
use stashdb_engine::{EngineConnection, EngineError, KeyRange};
use stashdb_testkit::{init_tracing, user, users, InstrumentedEngine};
use std::sync::Arc;

fn v1() -> SchemaDescriptor {
    SchemaDescriptor::builder()
        .database_name("evolving")
        .version(1)
        .partition(PartitionSpec::new("users"))
        .build()
        .unwrap()
}

fn v2() -> SchemaDescriptor {
    SchemaDescriptor::builder()
        .database_name("evolving")
        .version(2)
        .partition(
            PartitionSpec::new("users").index(IndexSpec::new("by_email", "email").unique()),
        )
        .partition(PartitionSpec::new("audit").with_key_path("seq"))
        .build()
        .unwrap()
}

async fn partitions(store: &Store) -> Vec<String> {
    let conn: Arc<dyn EngineConnection> = store.connections().acquire().await.unwrap();
    conn.partition_names()
}

#[tokio::test]
async fn migration_is_idempotent_across_stores() {
    init_tracing();
    let engine = InstrumentedEngine::shared();

    let first = Store::new(engine.clone(), v1());
    assert_eq!(partitions(&first).await, vec!["users"]);
    first.close().await;

    let second = Store::new(engine.clone(), v1());
    assert_eq!(partitions(&second).await, vec!["users"]);

    assert_eq!(engine.opens(), 2);
    assert_eq!(engine.upgrades(), 1);
    assert!(second.connections().last_migration().is_none());

    let report = first.connections().last_migration().unwrap();
    assert_eq!(
        report.operations,
        vec![MigrationOperation::CreatePartition {
            name: "users".into(),
            key_path: "id".into(),
        }]
    );
}

#[tokio::test]
async fn version_bump_adds_schema_and_keeps_data() {
    init_tracing();
    let engine = InstrumentedEngine::shared();

    let old = Store::new(engine.clone(), v1());
    old.partition("users").add_all(users(3)).await.unwrap();
    old.close().await;

    let new = Store::new(engine.clone(), v2());
    let users_partition = new.partition("users");
    assert_eq!(users_partition.count().await.unwrap(), 3);
    assert_eq!(partitions(&new).await, vec!["audit", "users"]);
    assert_eq!(engine.inner().version_of("evolving"), Some(2));

    let report = new.connections().last_migration().unwrap();
    assert_eq!((report.from_version, report.to_version), (1, 2));
    assert_eq!(report.partitions_created(), 1);
    assert_eq!(report.indexes_created(), 1);

    // The new index covers records written before it existed.
    let found = users_partition
        .index("by_email")
        .get("user2@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found["id"], 2);

    new.partition("audit")
        .add(json!({"seq": 1, "event": "upgraded"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_migration_leaves_database_untouched() {
    let engine = InstrumentedEngine::shared();

    let old = Store::new(engine.clone(), v1());
    let users_partition = old.partition("users");
    users_partition.add(user(1, "Ada")).await.unwrap();
    users_partition.add(user(2, "Ada")).await.unwrap();
    old.close().await;

    // Both records share an email, so the unique index cannot be built.
    let new = Store::new(engine.clone(), v2());
    let err = new.partition("users").count().await.unwrap_err();
    assert!(matches!(err, StoreError::Connection { .. }));
    assert_eq!(new.connections().state(), ConnectionState::Closed);
    assert_eq!(engine.inner().version_of("evolving"), Some(1));

    let reopened = Store::new(engine.clone(), v1());
    assert_eq!(partitions(&reopened).await, vec!["users"]);
    assert_eq!(reopened.partition("users").count().await.unwrap(), 2);
}

#[tokio::test]
async fn upgrade_blocked_by_open_connection() {
    let engine = InstrumentedEngine::shared();

    let old = Store::new(engine.clone(), v1());
    old.partition("users").count().await.unwrap();

    let new = Store::new(engine.clone(), v2());
    let err = new.partition("users").count().await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Connection {
            source: EngineError::Blocked { .. },
            ..
        }
    ));

    old.close().await;
    assert_eq!(new.partition("users").count().await.unwrap(), 0);
}

#[tokio::test]
async fn opening_older_version_fails() {
    let engine = InstrumentedEngine::shared();

    let new = Store::new(engine.clone(), v2());
    new.partition("users").count().await.unwrap();
    new.close().await;

    let old = Store::new(engine.clone(), v1());
    let err = old.partition("users").count().await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Connection {
            source: EngineError::VersionMismatch {
                stored: 2,
                requested: 1
            },
            ..
        }
    ));
}

#[tokio::test]
async fn destroy_then_reopen_migrates_again() {
    let engine = InstrumentedEngine::shared();
    let store = Store::new(engine.clone(), v2());
    store.partition("users").add_all(users(2)).await.unwrap();

    store.destroy().await.unwrap();
    let count = store
        .partition("users")
        .count_range(KeyRange::all())
        .await
        .unwrap();

    assert_eq!(count, 0);
    assert_eq!(engine.upgrades(), 2);
    let report = store.connections().last_migration().unwrap();
    assert_eq!(report.from_version, 0);
    assert_eq!(report.operations.len(), 3);
}
