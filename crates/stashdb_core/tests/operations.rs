//! End-to-end behavior of the storage API.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stashdb_core::{
    DatabaseConfig, ErrorKind, IndexConfig, Key, KeyRange, Storage, StorageConfig, StoreConfig,
    StoreError, TransactionMode,
};
use stashdb_host::{FileHost, InstrumentedHost, MemoryHost};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: String,
    v: u32,
}

fn item(id: &str, v: u32) -> Item {
    Item { id: id.to_owned(), v }
}

fn items_db(name: &str, version: u32) -> DatabaseConfig {
    DatabaseConfig::new(name, version).with_store(StoreConfig::new("items").key_path("id"))
}

fn instrumented(config: StorageConfig) -> (Arc<InstrumentedHost<MemoryHost>>, Storage) {
    let host = Arc::new(InstrumentedHost::new(MemoryHost::new()));
    let storage = Storage::with_config(host.clone(), config);
    (host, storage)
}

fn fast_retry(attempts: u32) -> StorageConfig {
    StorageConfig::new()
        .retry_attempts(attempts)
        .retry_delay(Duration::from_millis(1))
}

#[tokio::test]
async fn add_put_get_delete_cycle() {
    let storage = Storage::in_memory();
    storage.register_database(items_db("T", 1)).unwrap();

    let added = storage.add("T", "items", &item("a", 1)).await;
    assert!(added.is_success());
    assert_eq!(added.into_data(), Some(Key::from("a")));

    let found = storage.get::<Item>("T", "items", "a").await;
    assert!(found.is_success());
    assert_eq!(found.into_data(), Some(Some(item("a", 1))));

    assert!(storage.put("T", "items", &item("a", 2)).await.is_success());
    let found = storage.get::<Item>("T", "items", "a").await;
    assert_eq!(found.into_data().flatten().map(|i| i.v), Some(2));

    assert!(storage.delete("T", "items", "a").await.is_success());
    let found = storage.get::<Item>("T", "items", "a").await;
    assert!(found.is_success());
    assert_eq!(found.into_data(), Some(None));
}

#[tokio::test]
async fn concurrent_gets_share_one_open() {
    let (host, storage) = instrumented(StorageConfig::default());
    host.set_open_delay(Some(Duration::from_millis(25)));
    storage.register_database(items_db("U", 1)).unwrap();

    let (a, b) = tokio::join!(
        storage.get::<Item>("U", "items", "x"),
        storage.get::<Item>("U", "items", "y"),
    );
    assert!(a.is_success() && b.is_success());
    assert_eq!(host.open_calls(), 1);
}

#[tokio::test]
async fn many_concurrent_first_uses_share_one_open() {
    let (host, storage) = instrumented(StorageConfig::default());
    host.set_open_delay(Some(Duration::from_millis(10)));
    storage.register_database(items_db("U", 1)).unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let storage = storage.clone();
            tokio::spawn(async move { storage.get::<Item>("U", "items", i).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }
    assert_eq!(host.open_calls(), 1);
}

#[tokio::test]
async fn unregistered_databases_fail_without_io() {
    let (host, storage) = instrumented(StorageConfig::default());
    let result = storage.get::<Item>("nope", "items", "a").await;
    assert!(!result.is_success());
    assert!(result.data().is_none());
    assert_eq!(result.error_kind(), Some(ErrorKind::NotRegistered));
    assert_eq!(host.open_calls(), 0);
}

#[tokio::test]
async fn add_conflict_is_not_retried() {
    for attempts in [1, 3, 5] {
        let (host, storage) = instrumented(fast_retry(attempts));
        storage.register_database(items_db("T", 1)).unwrap();
        assert!(storage.add("T", "items", &item("a", 1)).await.is_success());
        let before = host.transaction_calls();

        let again = storage.add("T", "items", &item("a", 9)).await;
        assert_eq!(again.error_kind(), Some(ErrorKind::KeyConflict));
        assert_eq!(host.transaction_calls(), before + 1);

        let kept = storage.get::<Item>("T", "items", "a").await;
        assert_eq!(kept.into_data().flatten(), Some(item("a", 1)));
    }
}

#[tokio::test]
async fn delete_is_idempotent() {
    let storage = Storage::in_memory();
    storage.register_database(items_db("T", 1)).unwrap();
    assert!(storage.delete("T", "items", "never").await.is_success());
    assert!(storage.delete("T", "items", "never").await.is_success());
}

#[tokio::test]
async fn clear_empties_the_store() {
    let storage = Storage::in_memory();
    storage.register_database(items_db("T", 1)).unwrap();
    for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
        storage.add("T", "items", &item(id, i as u32)).await.into_result().unwrap();
    }
    assert_eq!(storage.count("T", "items").await.into_data(), Some(3));

    assert!(storage.clear("T", "items").await.is_success());
    assert_eq!(storage.count("T", "items").await.into_data(), Some(0));
}

#[tokio::test]
async fn get_all_is_in_key_order() {
    let storage = Storage::in_memory();
    storage.register_database(items_db("T", 1)).unwrap();
    for id in ["c", "a", "b"] {
        storage.put("T", "items", &item(id, 0)).await.into_result().unwrap();
    }
    let ids: Vec<String> = storage
        .get_all::<Item>("T", "items")
        .await
        .into_result()
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn query_by_index() {
    let storage = Storage::in_memory();
    storage
        .register_database(
            DatabaseConfig::new("Q", 1).with_store(
                StoreConfig::new("people")
                    .key_path("id")
                    .with_index(IndexConfig::new("by_age", "age"))
                    .with_index(IndexConfig::new("by_email", "email").unique(true))
                    .with_index(IndexConfig::new("by_tag", "tags").multi_entry(true)),
            ),
        )
        .unwrap();

    let people = [
        json!({"id": 1, "age": 40, "email": "a@x", "tags": ["red", "blue"]}),
        json!({"id": 2, "age": 25, "email": "b@x", "tags": ["blue"]}),
        json!({"id": 3, "age": 31, "email": "c@x"}),
        json!({"id": 4, "email": "d@x", "tags": []}),
    ];
    for person in &people {
        storage.add("Q", "people", person).await.into_result().unwrap();
    }

    let ids = |values: Vec<Value>| values.iter().map(|v| v["id"].clone()).collect::<Vec<_>>();

    // No range: every indexed record, ordered by index key.
    let all = storage.query::<Value>("Q", "people", "by_age", None).await;
    assert_eq!(ids(all.into_result().unwrap()), vec![json!(2), json!(3), json!(1)]);

    let range = KeyRange::bound(30, 40, false, true).unwrap();
    let mid = storage.query::<Value>("Q", "people", "by_age", Some(range)).await;
    assert_eq!(ids(mid.into_result().unwrap()), vec![json!(3)]);

    let blue = storage
        .query::<Value>("Q", "people", "by_tag", Some(KeyRange::only("blue")))
        .await;
    assert_eq!(ids(blue.into_result().unwrap()), vec![json!(1), json!(2)]);

    let duplicate = storage
        .add("Q", "people", &json!({"id": 5, "email": "a@x"}))
        .await;
    assert_eq!(duplicate.error_kind(), Some(ErrorKind::KeyConflict));

    let missing = storage.query::<Value>("Q", "people", "by_nothing", None).await;
    assert_eq!(missing.error_kind(), Some(ErrorKind::SchemaError));
}

#[tokio::test]
async fn auto_increment_and_out_of_line_keys() {
    let storage = Storage::in_memory();
    storage
        .register_database(
            DatabaseConfig::new("K", 1)
                .with_store(StoreConfig::new("log").auto_increment(true))
                .with_store(StoreConfig::new("kv"))
                .with_store(StoreConfig::new("rows").key_path("id").auto_increment(true)),
        )
        .unwrap();

    let first = storage.add("K", "log", &json!("boot")).await.into_result().unwrap();
    let second = storage.add("K", "log", &json!("ready")).await.into_result().unwrap();
    assert_eq!((first, second), (Key::from(1), Key::from(2)));

    let explicit = storage.put_with_key("K", "log", 10, &json!("jump")).await;
    assert!(explicit.is_success());
    let next = storage.add("K", "log", &json!("after")).await.into_result().unwrap();
    assert_eq!(next, Key::from(11));

    // Out-of-line store without a generator needs an explicit key.
    let keyless = storage.add("K", "kv", &json!(1)).await;
    assert_eq!(keyless.error_kind(), Some(ErrorKind::InvalidRequest));
    assert!(storage.add_with_key("K", "kv", "answer", &json!(42)).await.is_success());
    let answer = storage.get::<u32>("K", "kv", "answer").await;
    assert_eq!(answer.into_data(), Some(Some(42)));

    // Generated in-line keys are written into the record.
    let key = storage.add("K", "rows", &json!({"name": "x"})).await.into_result().unwrap();
    let row = storage.get::<Value>("K", "rows", key.clone()).await.into_result().unwrap();
    assert_eq!(row, Some(json!({"name": "x", "id": 1})));
    assert_eq!(key, Key::from(1));
}

#[tokio::test]
async fn numeric_keys_match_exactly() {
    let storage = Storage::in_memory();
    storage
        .register_database(
            DatabaseConfig::new("N", 1)
                .with_store(StoreConfig::new("s"))
                .with_store(StoreConfig::new("rows").key_path("id")),
        )
        .unwrap();

    assert!(storage.put_with_key("N", "s", 0, &json!("zero")).await.is_success());
    let negative_zero: Key = serde_json::from_str("-0.0").unwrap();
    let found = storage.get::<String>("N", "s", negative_zero).await;
    assert_eq!(found.into_data(), Some(Some("zero".to_owned())));

    let largest = Key::try_from(9_007_199_254_740_991u64).unwrap();
    assert!(storage.put_with_key("N", "s", largest.clone(), &json!("max")).await.is_success());
    assert!(Key::try_from(9_007_199_254_740_993u64).is_err());
    assert_eq!(storage.count("N", "s").await.into_data(), Some(2));

    // In-line keys that cannot be held exactly are refused, not rounded.
    let wide = storage.put("N", "rows", &json!({"id": 9_007_199_254_740_993u64})).await;
    assert_eq!(wide.error_kind(), Some(ErrorKind::InvalidRequest));
    assert_eq!(storage.count("N", "rows").await.into_data(), Some(0));
}

#[tokio::test]
async fn transactions_commit_atomically() {
    let storage = Storage::in_memory();
    storage
        .register_database(
            DatabaseConfig::new("M", 1)
                .with_store(StoreConfig::new("a").key_path("id"))
                .with_store(StoreConfig::new("b").key_path("id")),
        )
        .unwrap();

    let moved = storage
        .transaction("M", &["a", "b"], TransactionMode::ReadWrite, |tx| {
            tx.add("a", &json!({"id": 1}))?;
            tx.add("b", &json!({"id": 1}))?;
            Ok(tx.count("a")? + tx.count("b")?)
        })
        .await;
    assert_eq!(moved.into_data(), Some(2));

    // The second add conflicts, so the first write in `a` must not land.
    let failed = storage
        .transaction("M", &["a", "b"], TransactionMode::ReadWrite, |tx| {
            tx.add("a", &json!({"id": 2}))?;
            tx.add("b", &json!({"id": 1}))?;
            Ok(())
        })
        .await;
    assert_eq!(failed.error_kind(), Some(ErrorKind::KeyConflict));
    assert_eq!(storage.count("M", "a").await.into_data(), Some(1));

    let aborted = storage
        .transaction("M", &["a"], TransactionMode::ReadWrite, |tx| {
            tx.clear("a")?;
            Err::<(), _>(StoreError::aborted("not today"))
        })
        .await;
    assert_eq!(aborted.error_kind(), Some(ErrorKind::TransactionAborted));
    assert_eq!(storage.count("M", "a").await.into_data(), Some(1));
}

#[tokio::test]
async fn transaction_is_not_retried() {
    let (host, storage) = instrumented(fast_retry(5));
    storage.register_database(items_db("T", 1)).unwrap();
    storage.count("T", "items").await.into_result().unwrap();
    let before = host.transaction_calls();

    host.fail_next_transactions(1);
    let result = storage
        .transaction("T", &["items"], TransactionMode::ReadOnly, |tx| tx.count("items"))
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::TransientStoreError));
    assert_eq!(host.transaction_calls(), before + 1);
}

#[tokio::test]
async fn transient_faults_succeed_on_the_last_attempt() {
    let (host, storage) = instrumented(fast_retry(3));
    storage.register_database(items_db("T", 1)).unwrap();
    storage.count("T", "items").await.into_result().unwrap();
    let before = host.transaction_calls();

    host.fail_next_transactions(2);
    let added = storage.add("T", "items", &item("a", 1)).await;
    assert!(added.is_success());
    assert_eq!(host.transaction_calls(), before + 3);
}

#[tokio::test]
async fn exhausted_retries_report_the_error_with_total_duration() {
    let (host, storage) = instrumented(
        StorageConfig::new()
            .retry_attempts(3)
            .retry_delay(Duration::from_millis(20)),
    );
    storage.register_database(items_db("T", 1)).unwrap();
    storage.count("T", "items").await.into_result().unwrap();
    let before = host.transaction_calls();

    host.fail_next_transactions(10);
    let result = storage.count("T", "items").await;
    assert!(!result.is_success());
    assert_eq!(result.error_kind(), Some(ErrorKind::TransientStoreError));
    assert_eq!(host.transaction_calls(), before + 3);
    assert!(result.duration() >= Duration::from_millis(40));
}

#[tokio::test]
async fn open_faults_are_retried() {
    let (host, storage) = instrumented(fast_retry(3));
    storage.register_database(items_db("T", 1)).unwrap();
    host.fail_next_opens(2);

    assert!(storage.count("T", "items").await.is_success());
    assert_eq!(host.open_calls(), 3);
}

#[tokio::test]
async fn version_change_elsewhere_evicts_and_reopens() {
    let host = Arc::new(InstrumentedHost::new(MemoryHost::new()));
    let first = Storage::new(host.clone());
    first.register_database(items_db("V", 1)).unwrap();
    first.put("V", "items", &item("a", 1)).await.into_result().unwrap();
    assert_eq!(host.open_calls(), 1);

    // A second storage instance on the same host upgrades the database.
    let second = Storage::new(host.clone());
    second
        .register_database(items_db("V", 2).with_store(StoreConfig::new("extra")))
        .unwrap();
    assert!(second.count("V", "extra").await.is_success());
    assert_eq!(host.open_calls(), 2);
    assert!(!first.is_open("V"));

    // The first instance reopens on demand; its v1 config is now older
    // than the stored schema.
    let stale = first.get::<Item>("V", "items", "a").await;
    assert_eq!(stale.error_kind(), Some(ErrorKind::SchemaError));
    assert_eq!(host.open_calls(), 3);

    first.register_database(items_db("V", 2)).unwrap();
    let fresh = first.get::<Item>("V", "items", "a").await;
    assert_eq!(fresh.into_data(), Some(Some(item("a", 1))));
    assert_eq!(host.open_calls(), 4);
}

#[tokio::test]
async fn re_registration_applies_on_next_open() {
    let storage = Storage::in_memory();
    storage.register_database(items_db("R", 1)).unwrap();
    storage.count("R", "items").await.into_result().unwrap();

    storage
        .register_database(items_db("R", 2).with_store(StoreConfig::new("more")))
        .unwrap();
    let before_reopen = storage.count("R", "more").await;
    assert_eq!(before_reopen.error_kind(), Some(ErrorKind::SchemaError));

    storage.close_database("R");
    assert!(storage.count("R", "more").await.is_success());
}

#[tokio::test]
async fn close_all_then_reuse() {
    let (host, storage) = instrumented(StorageConfig::default());
    storage.register_database(items_db("A", 1)).unwrap();
    storage.register_database(items_db("B", 1)).unwrap();
    storage.count("A", "items").await.into_result().unwrap();
    storage.count("B", "items").await.into_result().unwrap();
    assert_eq!(storage.open_connections(), vec!["A".to_owned(), "B".to_owned()]);

    storage.close_all();
    assert!(storage.open_connections().is_empty());

    assert!(storage.count("A", "items").await.is_success());
    assert_eq!(host.open_calls(), 3);
}

#[tokio::test]
async fn envelope_serializes_like_the_wire_format() {
    let storage = Storage::in_memory();
    storage.register_database(items_db("T", 1)).unwrap();

    let ok = serde_json::to_value(storage.add("T", "items", &item("a", 1)).await).unwrap();
    assert_eq!(ok["success"], json!(true));
    assert_eq!(ok["data"], json!("a"));
    assert!(ok["durationMs"].is_number());
    assert!(ok.get("error").is_none());

    let err = serde_json::to_value(storage.add("T", "items", &item("a", 1)).await).unwrap();
    assert_eq!(err["success"], json!(false));
    assert_eq!(err["error"]["kind"], json!("KeyConflict"));
    assert!(err.get("data").is_none());
}

#[tokio::test]
async fn file_host_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = Storage::new(Arc::new(FileHost::open(dir.path()).unwrap()));
        storage.register_database(items_db("F", 1)).unwrap();
        storage.add("F", "items", &item("a", 1)).await.into_result().unwrap();
        storage.close_all();
    }

    let storage = Storage::new(Arc::new(FileHost::open(dir.path()).unwrap()));
    storage.register_database(items_db("F", 1)).unwrap();
    let found = storage.get::<Item>("F", "items", "a").await;
    assert_eq!(found.into_data(), Some(Some(item("a", 1))));

    let estimate = storage.storage_estimate().await.into_result().unwrap();
    assert!(estimate.is_some_and(|e| e.usage_bytes > 0));
}
