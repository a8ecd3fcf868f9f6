//! Runs caller code inside a host transaction.

use crate::blocking::blocking;
use crate::connection::{Connection, ConnectionManager};
use crate::error::{StoreError, StoreResult};
use crate::transaction::Transaction;
use stashdb_host::{HostError, TransactionMode};
use std::sync::Arc;
use tracing::debug;

/// Acquires a connection and runs one transaction on it.
///
/// The executor is the single path from the async API to host
/// transactions. It does not retry; see [`crate::RetryPolicy`].
pub struct OperationExecutor {
    connections: Arc<ConnectionManager>,
}

impl OperationExecutor {
    /// Creates an executor drawing connections from `connections`.
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Runs `f` in a transaction over `stores` of database `db`.
    ///
    /// Resolves with the closure's value once the transaction commits. The
    /// first error, whether from the closure, the host or the commit, aborts
    /// the transaction and is returned.
    ///
    /// # Errors
    ///
    /// Any [`StoreError`]; connection failures are reported as by
    /// [`ConnectionManager::get_connection`].
    pub async fn with_store<T, F>(
        &self,
        db: &str,
        stores: Vec<String>,
        mode: TransactionMode,
        f: F,
    ) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> StoreResult<T> + Send + 'static,
    {
        let connection = self.connections.get_connection(db).await?;
        Self::run_on(connection, stores, mode, f).await
    }

    /// Runs `f` in a transaction on a connection the caller already holds.
    pub(crate) async fn run_on<T, F>(
        connection: Arc<Connection>,
        stores: Vec<String>,
        mode: TransactionMode,
        f: F,
    ) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> StoreResult<T> + Send + 'static,
    {
        debug!(db = connection.name(), ?stores, ?mode, "running transaction");
        blocking(move || {
            let mut body = Some(f);
            let mut outcome: Option<StoreResult<T>> = None;
            let committed = connection.handle().transaction(&stores, mode, &mut |tx| {
                let Some(f) = body.take() else {
                    return Err(HostError::Aborted("transaction body ran twice".into()));
                };
                let result = f(&mut Transaction::new(tx));
                let reason = result.as_ref().err().map(ToString::to_string);
                outcome = Some(result);
                match reason {
                    Some(reason) => Err(HostError::Aborted(reason)),
                    None => Ok(()),
                }
            });
            match (committed, outcome) {
                (Ok(()), Some(result)) => result,
                (Err(_), Some(Err(e))) => Err(e),
                (Err(e), _) => Err(e.into()),
                (Ok(()), None) => Err(StoreError::transient("transaction body never ran")),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::{DatabaseConfig, SchemaRegistry, StoreConfig};
    use serde_json::json;
    use stashdb_host::{InstrumentedHost, MemoryHost};

    fn executor() -> (Arc<InstrumentedHost<MemoryHost>>, OperationExecutor) {
        let host = Arc::new(InstrumentedHost::new(MemoryHost::new()));
        let registry = Arc::new(SchemaRegistry::new());
        registry
            .register(
                DatabaseConfig::new("db", 1)
                    .with_store(StoreConfig::new("a").key_path("id"))
                    .with_store(StoreConfig::new("b").key_path("id")),
            )
            .unwrap();
        let manager = Arc::new(ConnectionManager::new(host.clone(), registry));
        (host, OperationExecutor::new(manager))
    }

    fn scope(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn returns_the_closure_value() {
        let (_, executor) = executor();
        let key = executor
            .with_store("db", scope(&["a"]), TransactionMode::ReadWrite, |tx| {
                tx.add("a", &json!({"id": 7}))
            })
            .await
            .unwrap();
        assert_eq!(key, 7.into());

        let found: Option<serde_json::Value> = executor
            .with_store("db", scope(&["a"]), TransactionMode::ReadOnly, |tx| tx.get("a", 7))
            .await
            .unwrap();
        assert_eq!(found, Some(json!({"id": 7})));
    }

    #[tokio::test]
    async fn closure_errors_abort_and_win() {
        let (_, executor) = executor();
        let err = executor
            .with_store("db", scope(&["a", "b"]), TransactionMode::ReadWrite, |tx| {
                tx.add("a", &json!({"id": 1}))?;
                tx.add("b", &json!({"id": 1}))?;
                Err::<(), _>(StoreError::aborted("changed my mind"))
            })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::aborted("changed my mind"));

        let counts = executor
            .with_store("db", scope(&["a", "b"]), TransactionMode::ReadOnly, |tx| {
                Ok((tx.count("a")?, tx.count("b")?))
            })
            .await
            .unwrap();
        assert_eq!(counts, (0, 0));
    }

    #[tokio::test]
    async fn host_faults_are_transient() {
        let (host, executor) = executor();
        host.fail_next_transactions(1);
        let err = executor
            .with_store("db", scope(&["a"]), TransactionMode::ReadOnly, |tx| tx.count("a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientStoreError);
    }

    #[tokio::test]
    async fn run_on_never_reacquires() {
        let (host, executor) = executor();
        let connection = executor.connections.get_connection("db").await.unwrap();
        executor.connections.close_database("db");

        let err = OperationExecutor::run_on(
            connection,
            scope(&["a"]),
            TransactionMode::ReadOnly,
            |tx| tx.count("a"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientStoreError);
        assert_eq!(host.open_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_stores_are_schema_errors() {
        let (_, executor) = executor();
        let err = executor
            .with_store("db", scope(&["zzz"]), TransactionMode::ReadOnly, |tx| tx.count("zzz"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }
}
