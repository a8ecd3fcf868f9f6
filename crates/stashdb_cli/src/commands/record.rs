//! Single-record commands: get, put and count.

use crate::context::parse_key;
use serde_json::Value;
use stashdb_core::Storage;
use tracing::info;

/// Prints the record under `key`.
pub async fn get(
    storage: &Storage,
    db: &str,
    store: &str,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = parse_key(key)?;
    match storage.get::<Value>(db, store, key.clone()).await.into_result()? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => return Err(format!("No record under key {key} in {db}/{store}").into()),
    }
    Ok(())
}

/// Inserts or replaces a record given as JSON text.
pub async fn put(
    storage: &Storage,
    db: &str,
    store: &str,
    value: &str,
    key: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let value: Value = serde_json::from_str(value)?;
    let written = match key {
        Some(key) => storage.put_with_key(db, store, parse_key(key)?, &value).await,
        None => storage.put(db, store, &value).await,
    };
    let duration_ms = written.duration_ms();
    let key = written.into_result()?;
    info!(db, store, %key, duration_ms, "record written");
    println!("✓ Stored under key {key}");
    Ok(())
}

/// Prints the number of records in a store.
pub async fn count(storage: &Storage, db: &str, store: &str) -> Result<(), Box<dyn std::error::Error>> {
    let count = storage.count(db, store).await.into_result()?;
    println!("{count}");
    Ok(())
}
