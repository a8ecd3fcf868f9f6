//! Host object-store trait definitions.

use crate::error::HostResult;
use crate::key::{Key, KeyPath, KeyRange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Reads only; may run alongside other readers.
    ReadOnly,
    /// Reads and writes; serialized with other writers of the same database.
    ReadWrite,
}

/// Parameters of an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreParams {
    /// Key path for in-line keys; `None` for out-of-line keys.
    pub key_path: Option<KeyPath>,
    /// Whether missing keys are generated from a counter.
    pub auto_increment: bool,
}

/// Options of a secondary index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOptions {
    /// Reject two records with the same index key.
    #[serde(default)]
    pub unique: bool,
    /// Index each element of an array value separately.
    #[serde(default)]
    pub multi_entry: bool,
}

/// Storage usage reported by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    /// Bytes currently used.
    pub usage_bytes: u64,
    /// Bytes available in total.
    pub quota_bytes: u64,
}

/// A database known to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Stored schema version.
    pub version: u32,
}

/// Sent to open connections when their database changes version or is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionChangeEvent {
    /// Database name.
    pub name: String,
    /// Version the connection was opened at.
    pub old_version: u32,
    /// Requested version, or `None` when the database is being deleted.
    pub new_version: Option<u32>,
}

/// Callback invoked on a version change.
pub type VersionChangeHandler = Box<dyn Fn(&VersionChangeEvent) + Send + Sync>;

/// Schema callback run inside the version-change transaction.
pub type UpgradeFn<'a> = dyn FnMut(&mut dyn UpgradeTransaction) -> HostResult<()> + 'a;

/// Body of a data transaction. Returning an error aborts the transaction.
pub type TransactionBody<'a> = dyn FnMut(&mut dyn HostTransaction) -> HostResult<()> + 'a;

/// A transactional, versioned object store.
///
/// Hosts keep one database per name. Each database has a version; opening
/// at a higher version than the stored one runs the upgrade callback in a
/// version-change transaction before the connection is handed out.
///
/// # Invariants
///
/// - Opening at a lower version than the stored one fails with
///   `VersionConflict`
/// - Before an upgrade or deletion, every other open connection of that
///   database receives a [`VersionChangeEvent`]
/// - A failed upgrade leaves the stored schema untouched
///
/// # Implementors
///
/// - [`super::MemoryHost`] - For tests and ephemeral data
/// - [`super::FileHost`] - For persistent storage
/// - [`super::InstrumentedHost`] - Counting and fault-injecting wrapper
pub trait Host: Send + Sync {
    /// Opens `name` at `version`, running `upgrade` if the stored version is lower.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `version` is lower than the stored version (`VersionConflict`)
    /// - Other connections stay open through the version change (`Blocked`)
    /// - The upgrade callback fails (`UpgradeFailed`)
    fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> HostResult<Arc<dyn HostConnection>>;

    /// Deletes a database. Deleting an unknown database succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Blocked` if connections stay open after notification.
    fn delete_database(&self, name: &str) -> HostResult<()>;

    /// Lists the databases stored by this host.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be produced.
    fn databases(&self) -> HostResult<Vec<DatabaseInfo>>;

    /// Reports storage usage, or `None` if the host has no such capability.
    ///
    /// # Errors
    ///
    /// Returns an error if the capability exists but the query fails.
    fn storage_estimate(&self) -> HostResult<Option<StorageEstimate>>;
}

/// An open connection to one database.
pub trait HostConnection: Send + Sync {
    /// Database name.
    fn name(&self) -> &str;

    /// Version negotiated at open time.
    fn version(&self) -> u32;

    /// Names of the stores in this database.
    fn store_names(&self) -> Vec<String>;

    /// Runs `body` in a transaction over `scope`.
    ///
    /// The transaction commits if `body` returns `Ok` and aborts otherwise;
    /// either way nothing partial is left behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, a scoped store does
    /// not exist, `body` fails, or the commit fails.
    fn transaction(
        &self,
        scope: &[String],
        mode: TransactionMode,
        body: &mut TransactionBody<'_>,
    ) -> HostResult<()>;

    /// Installs the callback run when another party changes the version.
    fn set_version_change_handler(&self, handler: VersionChangeHandler);

    /// Closes the connection. Idempotent.
    fn close(&self);

    /// Returns true once the connection is closed.
    fn is_closed(&self) -> bool;
}

/// Operations available inside a data transaction.
pub trait HostTransaction {
    /// The transaction's mode.
    fn mode(&self) -> TransactionMode;

    /// Looks up one record.
    fn get(&self, store: &str, key: &Key) -> HostResult<Option<Value>>;

    /// Returns records in key order, optionally bounded.
    fn get_all(&self, store: &str, range: Option<&KeyRange>) -> HostResult<Vec<Value>>;

    /// Inserts a record; fails with `Constraint` if the key exists.
    fn add(&mut self, store: &str, value: Value, key: Option<Key>) -> HostResult<Key>;

    /// Inserts or replaces a record.
    fn put(&mut self, store: &str, value: Value, key: Option<Key>) -> HostResult<Key>;

    /// Removes a record if present.
    fn delete(&mut self, store: &str, key: &Key) -> HostResult<()>;

    /// Removes every record of a store.
    fn clear(&mut self, store: &str) -> HostResult<()>;

    /// Counts records, optionally bounded.
    fn count(&self, store: &str, range: Option<&KeyRange>) -> HostResult<u64>;

    /// Returns records through an index, ordered by index key then primary key.
    fn index_get_all(
        &self,
        store: &str,
        index: &str,
        range: Option<&KeyRange>,
    ) -> HostResult<Vec<Value>>;
}

/// Schema operations available during an upgrade.
pub trait UpgradeTransaction {
    /// Stored version before the upgrade (0 for a new database).
    fn old_version(&self) -> u32;

    /// Version being upgraded to.
    fn new_version(&self) -> u32;

    /// Names of existing stores.
    fn store_names(&self) -> Vec<String>;

    /// Returns true if the store exists.
    fn has_store(&self, name: &str) -> bool {
        self.store_names().iter().any(|s| s == name)
    }

    /// Creates an object store.
    fn create_store(&mut self, name: &str, params: StoreParams) -> HostResult<()>;

    /// Names of the indexes on a store.
    fn index_names(&self, store: &str) -> HostResult<Vec<String>>;

    /// Creates an index, indexing any records already in the store.
    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: KeyPath,
        options: IndexOptions,
    ) -> HostResult<()>;
}
