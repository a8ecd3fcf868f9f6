//! Test fixtures and storage helpers.
//!
//! Every fixture wraps its host in an [`InstrumentedHost`] so tests can
//! count opens and transactions or inject transient faults.

use serde_json::json;
use stashdb_core::{DatabaseConfig, IndexConfig, Storage, StorageConfig, StoreConfig};
use stashdb_host::{FileHost, Host, InstrumentedHost, MemoryHost};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A storage instance over an instrumented host, with automatic cleanup.
pub struct TestStorage<H: Host + 'static = MemoryHost> {
    /// The storage handle.
    pub storage: Storage,
    host: Arc<InstrumentedHost<H>>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStorage<MemoryHost> {
    /// Creates storage over a fresh in-memory host with the default config.
    pub fn memory() -> Self {
        Self::memory_with(StorageConfig::default())
    }

    /// Creates storage over a fresh in-memory host.
    pub fn memory_with(config: StorageConfig) -> Self {
        Self::wrap(MemoryHost::new(), config, None)
    }

    /// Retries with a 1 ms delay, for fault-injection tests.
    pub fn fast_retry(attempts: u32) -> Self {
        Self::memory_with(
            StorageConfig::new()
                .retry_attempts(attempts)
                .retry_delay(Duration::from_millis(1)),
        )
    }
}

impl TestStorage<FileHost> {
    /// Creates storage over a `FileHost` in a new temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let host = FileHost::open(temp_dir.path()).expect("Failed to open file host");
        Self::wrap(host, StorageConfig::default(), Some(temp_dir))
    }

    /// The storage directory.
    pub fn path(&self) -> &Path {
        self.host.inner().path()
    }
}

impl<H: Host + 'static> TestStorage<H> {
    fn wrap(host: H, config: StorageConfig, temp_dir: Option<TempDir>) -> Self {
        let host = Arc::new(InstrumentedHost::new(host));
        Self {
            storage: Storage::with_config(host.clone(), config),
            host,
            _temp_dir: temp_dir,
        }
    }

    /// The instrumented host under the storage.
    pub fn host(&self) -> &InstrumentedHost<H> {
        &self.host
    }

    /// A second storage instance sharing this fixture's host, as another
    /// tab or process would.
    pub fn sibling(&self) -> Storage {
        Storage::new(self.host.clone())
    }
}

impl<H: Host + 'static> std::ops::Deref for TestStorage<H> {
    type Target = Storage;

    fn deref(&self) -> &Self::Target {
        &self.storage
    }
}

/// A database with one `"items"` store keyed by `"id"`.
pub fn items_config(name: &str, version: u32) -> DatabaseConfig {
    DatabaseConfig::new(name, version).with_store(StoreConfig::new("items").key_path("id"))
}

/// A database with a `"people"` store and three indexes: `by_age`,
/// unique `by_email` and multi-entry `by_tag`.
pub fn people_config(name: &str, version: u32) -> DatabaseConfig {
    DatabaseConfig::new(name, version).with_store(
        StoreConfig::new("people")
            .key_path("id")
            .with_index(IndexConfig::new("by_age", "age"))
            .with_index(IndexConfig::new("by_email", "email").unique(true))
            .with_index(IndexConfig::new("by_tag", "tags").multi_entry(true)),
    )
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Storage with database `"T"` holding `count` items with ids `0..count`.
    pub async fn populated_storage(count: u32) -> TestStorage {
        let fixture = TestStorage::memory();
        fixture
            .register_database(items_config("T", 1))
            .expect("Failed to register database");
        for id in 0..count {
            fixture
                .add("T", "items", &json!({"id": id, "value": format!("item-{id}")}))
                .await
                .into_result()
                .expect("Failed to add item");
        }
        fixture
    }

    /// Storage with database `"P"` holding a few people.
    pub async fn people_storage() -> TestStorage {
        let fixture = TestStorage::memory();
        fixture
            .register_database(people_config("P", 1))
            .expect("Failed to register database");
        let people = [
            json!({"id": 1, "age": 40, "email": "ada@example.com", "tags": ["admin", "dev"]}),
            json!({"id": 2, "age": 25, "email": "bo@example.com", "tags": ["dev"]}),
            json!({"id": 3, "age": 31, "email": "cy@example.com"}),
        ];
        for person in &people {
            fixture
                .add("P", "people", person)
                .await
                .into_result()
                .expect("Failed to add person");
        }
        fixture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage() {
        let fixture = TestStorage::memory();
        fixture.register_database(items_config("T", 1)).unwrap();
        assert!(fixture.count("T", "items").await.is_success());
        assert_eq!(fixture.host().open_calls(), 1);
    }

    #[tokio::test]
    async fn test_file_storage() {
        let fixture = TestStorage::file();
        fixture.register_database(items_config("T", 1)).unwrap();
        fixture
            .add("T", "items", &json!({"id": 1}))
            .await
            .into_result()
            .unwrap();
        assert!(fixture.path().exists());
        assert_eq!(fixture.host().inner().databases().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_populated_scenario() {
        let fixture = scenarios::populated_storage(10).await;
        assert_eq!(fixture.count("T", "items").await.into_data(), Some(10));
    }

    #[tokio::test]
    async fn test_sibling_shares_host() {
        let fixture = scenarios::people_storage().await;
        let sibling = fixture.sibling();
        sibling.register_database(people_config("P", 1)).unwrap();
        assert_eq!(sibling.count("P", "people").await.into_data(), Some(3));
    }
}
