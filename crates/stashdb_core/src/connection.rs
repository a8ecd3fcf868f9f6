//! Connection acquisition, caching and eviction.
//!
//! One live connection is kept per database name:
//!
//! ```text
//! get_connection(name)
//! ├─ cached and open  -> reuse
//! ├─ open in flight   -> wait for it (coalesced)
//! └─ otherwise        -> look up config, open + upgrade on the blocking
//!                        pool, cache, watch for version changes
//! ```
//!
//! A version-change event from the host closes the connection it was
//! delivered to and evicts it from the cache, so the next call reopens.

use crate::blocking::blocking;
use crate::error::{StoreError, StoreResult};
use crate::schema::{DatabaseConfig, SchemaRegistry};
use parking_lot::Mutex;
use stashdb_host::{Host, HostConnection, HostResult, UpgradeTransaction, VersionChangeEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A live connection to one database.
pub struct Connection {
    id: u64,
    name: String,
    version: u32,
    handle: Arc<dyn HostConnection>,
}

impl Connection {
    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version negotiated at open time.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Stores present in the database.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.handle.store_names()
    }

    /// Returns true once the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub(crate) fn handle(&self) -> &dyn HostConnection {
        self.handle.as_ref()
    }

    fn close(&self) {
        self.handle.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

type PendingOpen = Arc<OnceCell<StoreResult<Arc<Connection>>>>;

#[derive(Default)]
struct ManagerState {
    cached: HashMap<String, Arc<Connection>>,
    pending: HashMap<String, PendingOpen>,
}

/// Opens, caches and evicts connections.
pub struct ConnectionManager {
    host: Arc<dyn Host>,
    registry: Arc<SchemaRegistry>,
    state: Arc<Mutex<ManagerState>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// Creates a manager with an empty cache.
    pub fn new(host: Arc<dyn Host>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            host,
            registry,
            state: Arc::new(Mutex::new(ManagerState::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// The host connections are opened on.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Returns a live connection to `name`, opening it if needed.
    ///
    /// Concurrent calls for a name that is not open yet share one open.
    ///
    /// # Errors
    ///
    /// - `NotRegistered` if no config is registered under `name`
    /// - `SchemaError` if the upgrade fails or the stored version is newer
    /// - `TransientStoreError` for host faults, or if the open was
    ///   discarded by [`ConnectionManager::close_all`] while in flight
    pub async fn get_connection(&self, name: &str) -> StoreResult<Arc<Connection>> {
        let pending = {
            let mut state = self.state.lock();
            match state.cached.get(name).cloned() {
                Some(conn) if !conn.is_closed() => return Ok(conn),
                Some(_) => {
                    state.cached.remove(name);
                }
                None => {}
            }
            match state.pending.get(name).cloned() {
                Some(pending) => {
                    debug!(db = %name, "joining pending open");
                    pending
                }
                None => {
                    let pending: PendingOpen = Arc::new(OnceCell::new());
                    state.pending.insert(name.to_owned(), Arc::clone(&pending));
                    pending
                }
            }
        };

        pending
            .get_or_init(|| self.settle(name, &pending))
            .await
            .clone()
    }

    /// Runs the open and records its outcome.
    async fn settle(&self, name: &str, pending: &PendingOpen) -> StoreResult<Arc<Connection>> {
        let result = self.open(name).await;

        let mut state = self.state.lock();
        let current = state
            .pending
            .get(name)
            .is_some_and(|p| Arc::ptr_eq(p, pending));
        if current {
            state.pending.remove(name);
        }
        match result {
            Ok(conn) if current => {
                state.cached.insert(name.to_owned(), Arc::clone(&conn));
                Ok(conn)
            }
            Ok(conn) => {
                drop(state);
                conn.close();
                debug!(db = %name, "discarded open settled, connection closed");
                Err(StoreError::transient(format!(
                    "open of {name} was discarded by close_all"
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn open(&self, name: &str) -> StoreResult<Arc<Connection>> {
        let config = self.registry.lookup(name)?;
        let host = Arc::clone(&self.host);
        let handle = blocking(move || {
            let mut upgrade = |tx: &mut dyn UpgradeTransaction| apply_schema(&config, tx);
            host.open(&config.name, config.version, &mut upgrade)
                .map_err(StoreError::from)
        })
        .await?;

        let connection = Arc::new(Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.to_owned(),
            version: handle.version(),
            handle,
        });
        self.watch(&connection);
        info!(db = %name, version = connection.version, "connection opened");
        Ok(connection)
    }

    /// Evicts `connection` when the host reports a version change.
    fn watch(&self, connection: &Arc<Connection>) {
        let state = Arc::downgrade(&self.state);
        let weak = Arc::downgrade(connection);
        connection
            .handle
            .set_version_change_handler(Box::new(move |event: &VersionChangeEvent| {
                let Some(conn) = weak.upgrade() else {
                    return;
                };
                conn.close();
                if let Some(state) = state.upgrade() {
                    let mut state = state.lock();
                    if state
                        .cached
                        .get(&conn.name)
                        .is_some_and(|cached| cached.id == conn.id)
                    {
                        state.cached.remove(&conn.name);
                    }
                }
                info!(
                    db = %conn.name,
                    old_version = event.old_version,
                    new_version = ?event.new_version,
                    "version change, connection evicted"
                );
            }));
    }

    /// Closes and evicts the cached connection to `name`, if any.
    pub fn close_database(&self, name: &str) {
        let removed = self.state.lock().cached.remove(name);
        if let Some(conn) = removed {
            conn.close();
            info!(db = %name, "connection closed");
        }
    }

    /// Closes every cached connection and discards pending opens.
    pub fn close_all(&self) {
        let (cached, pending) = {
            let mut state = self.state.lock();
            let cached: Vec<_> = state.cached.drain().map(|(_, c)| c).collect();
            let pending = state.pending.len();
            state.pending.clear();
            (cached, pending)
        };
        for conn in &cached {
            conn.close();
        }
        info!(closed = cached.len(), discarded = pending, "all connections closed");
    }

    /// Closes the connection to `name`, then deletes the database from the host.
    ///
    /// # Errors
    ///
    /// Returns `TransientStoreError` if the host refuses or fails the deletion.
    pub async fn delete_database(&self, name: &str) -> StoreResult<()> {
        self.close_database(name);
        let host = Arc::clone(&self.host);
        let db = name.to_owned();
        blocking(move || host.delete_database(&db).map_err(StoreError::from)).await?;
        info!(db = %name, "database deleted");
        Ok(())
    }

    /// Returns true if a live connection to `name` is cached.
    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.state
            .lock()
            .cached
            .get(name)
            .is_some_and(|c| !c.is_closed())
    }

    /// Names with a live cached connection, sorted.
    #[must_use]
    pub fn open_connections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .cached
            .iter()
            .filter(|(_, c)| !c.is_closed())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Creates every declared store that does not exist yet, with its indexes.
fn apply_schema(config: &DatabaseConfig, tx: &mut dyn UpgradeTransaction) -> HostResult<()> {
    info!(
        db = %config.name,
        from = tx.old_version(),
        to = tx.new_version(),
        "upgrading schema"
    );
    for store in &config.stores {
        if tx.has_store(&store.name) {
            debug!(db = %config.name, store = %store.name, "store exists, left as is");
            continue;
        }
        tx.create_store(&store.name, store.params())?;
        for index in &store.indexes {
            tx.create_index(&store.name, &index.name, index.key_path.clone(), index.options)?;
        }
    }
    Ok(())
}
