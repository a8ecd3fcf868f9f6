//! Capacity, teardown and inspection.

use crate::blocking::blocking;
use crate::error::{StoreError, StoreResult};
use crate::executor::OperationExecutor;
use crate::result::OperationResult;
use crate::storage::{finish, Storage};
use serde::Serialize;
use stashdb_host::{DatabaseInfo, StorageEstimate, TransactionMode};
use std::sync::Arc;
use std::time::Instant;

/// Shape and size of one open database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseReport {
    /// Database name.
    pub name: String,
    /// Version the connection was opened at.
    pub version: u32,
    /// Stores in name order.
    pub stores: Vec<StoreReport>,
}

/// Record count of one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    /// Store name.
    pub name: String,
    /// Number of records.
    pub count: u64,
}

impl Storage {
    /// Usage and quota of the host, or `None` data when the host cannot
    /// tell.
    pub async fn storage_estimate(&self) -> OperationResult<Option<StorageEstimate>> {
        let started = Instant::now();
        let host = Arc::clone(self.inner.connections.host());
        let result = self
            .inner
            .retry
            .run("storage_estimate", || {
                let host = Arc::clone(&host);
                blocking(move || host.storage_estimate().map_err(StoreError::from))
            })
            .await;
        finish("storage_estimate", "", started, result)
    }

    /// Closes and evicts the connection to `db`. The next operation reopens.
    pub fn close_database(&self, db: &str) {
        self.inner.connections.close_database(db);
    }

    /// Closes every connection and discards opens still in flight.
    pub fn close_all(&self) {
        self.inner.connections.close_all();
    }

    /// Closes the connection to `db` and deletes the database with all its
    /// data. Deleting a database the host does not know succeeds.
    pub async fn delete_database(&self, db: &str) -> OperationResult<()> {
        let started = Instant::now();
        let connections = &self.inner.connections;
        let result = self
            .inner
            .retry
            .run("delete_database", || connections.delete_database(db))
            .await;
        finish("delete_database", db, started, result)
    }

    /// Opens `db` if needed and reports its version and per-store counts.
    pub async fn database_info(&self, db: &str) -> OperationResult<DatabaseReport> {
        let started = Instant::now();
        let result = self
            .inner
            .retry
            .run("database_info", || self.report(db))
            .await;
        finish("database_info", db, started, result)
    }

    /// Every database the host stores, registered or not.
    pub async fn host_databases(&self) -> OperationResult<Vec<DatabaseInfo>> {
        let started = Instant::now();
        let host = Arc::clone(self.inner.connections.host());
        let result = self
            .inner
            .retry
            .run("host_databases", || {
                let host = Arc::clone(&host);
                blocking(move || host.databases().map_err(StoreError::from))
            })
            .await;
        finish("host_databases", "", started, result)
    }

    async fn report(&self, db: &str) -> StoreResult<DatabaseReport> {
        let connection = self.inner.connections.get_connection(db).await?;
        let name = connection.name().to_owned();
        let version = connection.version();
        let mut names = connection.store_names();
        names.sort();

        // Counts are read on the same connection the names came from.
        let counts = if names.is_empty() {
            Vec::new()
        } else {
            let scope = names.clone();
            OperationExecutor::run_on(
                connection,
                names.clone(),
                TransactionMode::ReadOnly,
                move |tx| {
                    scope
                        .iter()
                        .map(|store| tx.count(store))
                        .collect::<StoreResult<Vec<u64>>>()
                },
            )
            .await?
        };

        Ok(DatabaseReport {
            name,
            version,
            stores: names
                .into_iter()
                .zip(counts)
                .map(|(name, count)| StoreReport { name, count })
                .collect(),
        })
    }
}
