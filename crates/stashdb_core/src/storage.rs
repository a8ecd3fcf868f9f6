//! The public storage handle.

use crate::config::StorageConfig;
use crate::connection::ConnectionManager;
use crate::error::{StoreError, StoreResult};
use crate::executor::OperationExecutor;
use crate::result::OperationResult;
use crate::retry::RetryPolicy;
use crate::schema::{DatabaseConfig, SchemaRegistry};
use crate::transaction::Transaction;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use stashdb_host::{Host, Key, KeyRange, MemoryHost, TransactionMode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub(crate) struct StorageInner {
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) connections: Arc<ConnectionManager>,
    pub(crate) executor: OperationExecutor,
    pub(crate) retry: RetryPolicy,
}

/// Async, retrying access to the databases of one host.
///
/// `Storage` is a cheap handle; clones share the registry and the
/// connection cache. Every operation except [`Storage::register_database`]
/// reports its outcome as an [`OperationResult`] and never panics or
/// raises.
///
/// # Example
///
/// ```rust
/// use stashdb_core::{DatabaseConfig, Storage, StoreConfig};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let storage = Storage::in_memory();
/// storage
///     .register_database(
///         DatabaseConfig::new("T", 1).with_store(StoreConfig::new("items").key_path("id")),
///     )
///     .unwrap();
///
/// let added = storage.add("T", "items", &json!({"id": 1, "n": "a"})).await;
/// assert!(added.is_success());
///
/// let found = storage.get::<serde_json::Value>("T", "items", 1).await;
/// assert_eq!(found.into_data().flatten(), Some(json!({"id": 1, "n": "a"})));
/// # }
/// ```
#[derive(Clone)]
pub struct Storage {
    pub(crate) inner: Arc<StorageInner>,
}

impl Storage {
    /// Creates storage over `host` with the default configuration.
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self::with_config(host, StorageConfig::default())
    }

    /// Creates storage over `host`.
    pub fn with_config(host: Arc<dyn Host>, config: StorageConfig) -> Self {
        let registry = Arc::new(SchemaRegistry::new());
        let connections = Arc::new(ConnectionManager::new(host, Arc::clone(&registry)));
        let executor = OperationExecutor::new(Arc::clone(&connections));
        Self {
            inner: Arc::new(StorageInner {
                registry,
                connections,
                executor,
                retry: RetryPolicy::from_config(&config),
            }),
        }
    }

    /// Creates storage over a fresh [`MemoryHost`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryHost::new()))
    }

    /// The retry policy applied to single-shot operations.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    /// The registry of database configs.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    /// The connection manager.
    #[must_use]
    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// Registers `config`, replacing any earlier config of the same name.
    ///
    /// A replacement only affects connections opened afterwards; an open
    /// connection keeps its schema until it is closed or evicted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the config fails validation.
    pub fn register_database(&self, config: DatabaseConfig) -> StoreResult<()> {
        let name = config.name.clone();
        let version = config.version;
        let replaced = self.inner.registry.register(config)?;
        match replaced {
            Some(_) if self.inner.connections.is_open(&name) => warn!(
                db = %name,
                version,
                "database re-registered while open; takes effect on next open"
            ),
            Some(_) => info!(db = %name, version, "database re-registered"),
            None => info!(db = %name, version, "database registered"),
        }
        Ok(())
    }

    /// Returns true if `db` is registered.
    #[must_use]
    pub fn is_registered(&self, db: &str) -> bool {
        self.inner.registry.is_registered(db)
    }

    /// Registered database names, sorted.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        self.inner.registry.database_names()
    }

    /// Returns true if a live connection to `db` is cached.
    #[must_use]
    pub fn is_open(&self, db: &str) -> bool {
        self.inner.connections.is_open(db)
    }

    /// Names with a live cached connection, sorted.
    #[must_use]
    pub fn open_connections(&self) -> Vec<String> {
        self.inner.connections.open_connections()
    }

    /// Reads the record under `key`; absent keys yield `None` data.
    pub async fn get<T>(&self, db: &str, store: &str, key: impl Into<Key>) -> OperationResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let started = Instant::now();
        let key = key.into();
        let name = store.to_owned();
        self.single_shot(started, "get", db, store, TransactionMode::ReadOnly, move |tx| {
            tx.get(&name, key.clone())
        })
        .await
    }

    /// Reads every record of `store` in key order.
    pub async fn get_all<T>(&self, db: &str, store: &str) -> OperationResult<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let started = Instant::now();
        let name = store.to_owned();
        self.single_shot(started, "get_all", db, store, TransactionMode::ReadOnly, move |tx| {
            tx.get_all(&name)
        })
        .await
    }

    /// Inserts `value`; an existing key fails with `KeyConflict`.
    pub async fn add<V>(&self, db: &str, store: &str, value: &V) -> OperationResult<Key>
    where
        V: Serialize + ?Sized,
    {
        self.write_value("add", db, store, value, None, false).await
    }

    /// Inserts `value` under an out-of-line `key`; an existing key fails
    /// with `KeyConflict`.
    pub async fn add_with_key<V>(
        &self,
        db: &str,
        store: &str,
        key: impl Into<Key>,
        value: &V,
    ) -> OperationResult<Key>
    where
        V: Serialize + ?Sized,
    {
        self.write_value("add", db, store, value, Some(key.into()), false)
            .await
    }

    /// Inserts or replaces `value`.
    pub async fn put<V>(&self, db: &str, store: &str, value: &V) -> OperationResult<Key>
    where
        V: Serialize + ?Sized,
    {
        self.write_value("put", db, store, value, None, true).await
    }

    /// Inserts or replaces `value` under an out-of-line `key`.
    pub async fn put_with_key<V>(
        &self,
        db: &str,
        store: &str,
        key: impl Into<Key>,
        value: &V,
    ) -> OperationResult<Key>
    where
        V: Serialize + ?Sized,
    {
        self.write_value("put", db, store, value, Some(key.into()), true)
            .await
    }

    /// Removes the record under `key`. Missing keys succeed.
    pub async fn delete(&self, db: &str, store: &str, key: impl Into<Key>) -> OperationResult<()> {
        let started = Instant::now();
        let key = key.into();
        let name = store.to_owned();
        self.single_shot(started, "delete", db, store, TransactionMode::ReadWrite, move |tx| {
            tx.delete(&name, key.clone())
        })
        .await
    }

    /// Removes every record of `store`.
    pub async fn clear(&self, db: &str, store: &str) -> OperationResult<()> {
        let started = Instant::now();
        let name = store.to_owned();
        self.single_shot(started, "clear", db, store, TransactionMode::ReadWrite, move |tx| {
            tx.clear(&name)
        })
        .await
    }

    /// Number of records in `store`.
    pub async fn count(&self, db: &str, store: &str) -> OperationResult<u64> {
        let started = Instant::now();
        let name = store.to_owned();
        self.single_shot(started, "count", db, store, TransactionMode::ReadOnly, move |tx| {
            tx.count(&name)
        })
        .await
    }

    /// Reads records through `index`, ordered by index key then primary key.
    ///
    /// Without a range every record present in the index is returned.
    pub async fn query<T>(
        &self,
        db: &str,
        store: &str,
        index: &str,
        range: Option<KeyRange>,
    ) -> OperationResult<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let started = Instant::now();
        let name = store.to_owned();
        let index = index.to_owned();
        self.single_shot(started, "query", db, store, TransactionMode::ReadOnly, move |tx| {
            tx.query(&name, &index, range.as_ref())
        })
        .await
    }

    /// Runs `f` in one transaction over `stores`.
    ///
    /// Everything `f` writes commits together or not at all. `f` may abort
    /// by returning an error, e.g. [`StoreError::aborted`]. Not retried.
    pub async fn transaction<T, F>(
        &self,
        db: &str,
        stores: &[&str],
        mode: TransactionMode,
        f: F,
    ) -> OperationResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> StoreResult<T> + Send + 'static,
    {
        let started = Instant::now();
        let scope = stores.iter().map(|s| (*s).to_owned()).collect();
        let result = self.inner.executor.with_store(db, scope, mode, f).await;
        finish("transaction", db, started, result)
    }

    async fn write_value<V>(
        &self,
        operation: &'static str,
        db: &str,
        store: &str,
        value: &V,
        key: Option<Key>,
        overwrite: bool,
    ) -> OperationResult<Key>
    where
        V: Serialize + ?Sized,
    {
        let started = Instant::now();
        let value: Value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => return finish(operation, db, started, Err(StoreError::from(e))),
        };
        let name = store.to_owned();
        self.single_shot(started, operation, db, store, TransactionMode::ReadWrite, move |tx| {
            tx.insert_value(&name, value.clone(), key.clone(), overwrite)
        })
        .await
    }

    /// Runs a one-store transaction under the retry policy.
    async fn single_shot<T, F>(
        &self,
        started: Instant,
        operation: &'static str,
        db: &str,
        store: &str,
        mode: TransactionMode,
        f: F,
    ) -> OperationResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut Transaction<'_>) -> StoreResult<T> + Clone + Send + 'static,
    {
        let inner = &self.inner;
        let result = inner
            .retry
            .run(operation, || {
                inner
                    .executor
                    .with_store(db, vec![store.to_owned()], mode, f.clone())
            })
            .await;
        finish(operation, db, started, result)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("databases", &self.database_names())
            .field("open", &self.open_connections())
            .field("retry", &self.inner.retry)
            .finish()
    }
}

/// Wraps an outcome with the time since `started`.
pub(crate) fn finish<T>(
    operation: &'static str,
    db: &str,
    started: Instant,
    result: StoreResult<T>,
) -> OperationResult<T> {
    let elapsed = started.elapsed();
    if let Err(e) = &result {
        debug!(operation, db, kind = %e.kind(), error = %e, "operation failed");
    }
    OperationResult::from_result(result, elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::StoreConfig;
    use serde_json::json;

    fn storage() -> Storage {
        let storage = Storage::in_memory();
        storage
            .register_database(
                DatabaseConfig::new("T", 1).with_store(StoreConfig::new("items").key_path("id")),
            )
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn add_then_get() {
        let storage = storage();
        let added = storage.add("T", "items", &json!({"id": 1, "n": "a"})).await;
        assert_eq!(added.data(), Some(&Key::from(1)));

        let found = storage.get::<Value>("T", "items", 1).await;
        assert!(found.is_success());
        assert_eq!(found.into_data(), Some(Some(json!({"id": 1, "n": "a"}))));
    }

    #[tokio::test]
    async fn absent_keys_are_successful_none() {
        let storage = storage();
        let found = storage.get::<Value>("T", "items", 42).await;
        assert!(found.is_success());
        assert_eq!(found.into_data(), Some(None));
    }

    #[tokio::test]
    async fn invalid_configs_are_raised() {
        let storage = Storage::in_memory();
        let err = storage
            .register_database(DatabaseConfig::new("", 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(storage.database_names().is_empty());
    }

    #[tokio::test]
    async fn unserializable_values_fail_before_touching_the_host() {
        let storage = storage();
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        let result = storage.add("T", "items", &bad).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidRequest));
        assert!(!storage.is_open("T"));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let storage = storage();
        let other = storage.clone();
        assert!(other.is_registered("T"));
        storage.count("T", "items").await.into_result().unwrap();
        assert_eq!(other.open_connections(), vec!["T".to_owned()]);
    }
}
