//! Embedded versioned object-store engine.
//!
//! Shared by [`crate::MemoryHost`] and [`crate::FileHost`]. The engine keeps
//! every database in memory:
//!
//! ```text
//! Engine
//! └─ DatabaseSlot (one per name)
//!    ├─ DatabaseState { version, stores }   behind a RwLock
//!    └─ open connections (weak)
//! ```
//!
//! Read-only transactions share the read lock. A read-write transaction
//! holds the write lock, works on copies of its scoped stores and swaps
//! them in only when its body succeeds, so an abort leaves nothing behind.

use crate::backend::{
    DatabaseInfo, HostConnection, HostTransaction, IndexOptions, StoreParams, TransactionBody, TransactionMode,
    UpgradeFn, UpgradeTransaction, VersionChangeEvent, VersionChangeHandler,
};
use crate::error::{HostError, HostResult};
use crate::key::{Key, KeyPath, KeyRange};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Key generators stop here; larger keys cannot be represented exactly.
const MAX_GENERATED_KEY: u64 = 1 << 53;

/// Durable copy of database state, written after schema and data commits.
pub(crate) trait Persistence: Send + Sync {
    /// Writes the full state of one database.
    fn save(&self, name: &str, state: &DatabaseState) -> HostResult<()>;

    /// Removes a database's persisted state.
    fn remove(&self, name: &str) -> HostResult<()>;
}

/// A secondary index: index key -> primary keys.
#[derive(Debug, Clone)]
pub(crate) struct Index {
    key_path: KeyPath,
    options: IndexOptions,
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl Index {
    fn new(key_path: KeyPath, options: IndexOptions) -> Self {
        Self {
            key_path,
            options,
            entries: BTreeMap::new(),
        }
    }

    fn keys_for(&self, value: &Value) -> Vec<Key> {
        self.key_path.index_keys(value, self.options.multi_entry)
    }

    /// Returns the first index key already owned by a different record.
    fn conflict<'k>(&self, keys: &'k [Key], primary: &Key) -> Option<&'k Key> {
        if !self.options.unique {
            return None;
        }
        keys.iter().find(|k| {
            self.entries
                .get(*k)
                .is_some_and(|owners| owners.iter().any(|owner| owner != primary))
        })
    }

    fn insert(&mut self, keys: &[Key], primary: &Key) {
        for key in keys {
            self.entries
                .entry(key.clone())
                .or_default()
                .insert(primary.clone());
        }
    }

    fn remove(&mut self, keys: &[Key], primary: &Key) {
        for key in keys {
            if let Some(owners) = self.entries.get_mut(key) {
                owners.remove(primary);
                if owners.is_empty() {
                    self.entries.remove(key);
                }
            }
        }
    }
}

/// One object store: records ordered by primary key plus its indexes.
#[derive(Debug, Clone)]
pub(crate) struct ObjectStore {
    params: StoreParams,
    next_key: u64,
    records: BTreeMap<Key, Value>,
    indexes: BTreeMap<String, Index>,
}

impl ObjectStore {
    pub(crate) fn new(params: StoreParams) -> Self {
        Self {
            params,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    /// Rebuilds a store from persisted records. Indexes are added afterwards
    /// with [`ObjectStore::create_index`].
    pub(crate) fn restore(params: StoreParams, next_key: u64, records: Vec<(Key, Value)>) -> Self {
        Self {
            params,
            next_key,
            records: records.into_iter().collect(),
            indexes: BTreeMap::new(),
        }
    }

    pub(crate) fn params(&self) -> &StoreParams {
        &self.params
    }

    pub(crate) fn next_key(&self) -> u64 {
        self.next_key
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.records.iter()
    }

    pub(crate) fn index_definitions(
        &self,
    ) -> impl Iterator<Item = (&String, &KeyPath, IndexOptions)> {
        self.indexes
            .iter()
            .map(|(name, index)| (name, &index.key_path, index.options))
    }

    fn get(&self, key: &Key) -> Option<&Value> {
        self.records.get(key)
    }

    fn values(&self, range: Option<&KeyRange>) -> Vec<Value> {
        match range {
            Some(range) => self
                .records
                .range(range.bounds())
                .map(|(_, v)| v.clone())
                .collect(),
            None => self.records.values().cloned().collect(),
        }
    }

    fn count(&self, range: Option<&KeyRange>) -> u64 {
        match range {
            Some(range) => self.records.range(range.bounds()).count() as u64,
            None => self.records.len() as u64,
        }
    }

    fn insert(&mut self, mut value: Value, explicit: Option<Key>, overwrite: bool) -> HostResult<Key> {
        let key_path = self.params.key_path.clone();
        let key = match (key_path, explicit) {
            (Some(_), Some(_)) => {
                return Err(HostError::data(
                    "store uses in-line keys; an explicit key is not allowed",
                ))
            }
            (Some(path), None) => match path.extract(&value) {
                Some(key) => key,
                None if self.params.auto_increment && path.resolve(&value).is_none() => {
                    let key = self.generated_key()?;
                    path.inject(&mut value, &key)?;
                    key
                }
                None => {
                    return Err(HostError::data(format!(
                        "record has no valid key at key path {path}"
                    )))
                }
            },
            (None, Some(key)) => key,
            (None, None) if self.params.auto_increment => self.generated_key()?,
            (None, None) => {
                return Err(HostError::data(
                    "store uses out-of-line keys and no key was provided",
                ))
            }
        };

        if !overwrite && self.records.contains_key(&key) {
            return Err(HostError::constraint(format!("key {key} already exists")));
        }

        let index_keys: Vec<Vec<Key>> = self.indexes.values().map(|i| i.keys_for(&value)).collect();
        for ((name, index), keys) in self.indexes.iter().zip(&index_keys) {
            if let Some(taken) = index.conflict(keys, &key) {
                return Err(HostError::constraint(format!(
                    "unique index {name} already contains {taken}"
                )));
            }
        }

        if let Some(old) = self.records.remove(&key) {
            self.unindex(&key, &old);
        }
        for (index, keys) in self.indexes.values_mut().zip(&index_keys) {
            index.insert(keys, &key);
        }
        self.advance_generator(&key);
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn generated_key(&self) -> HostResult<Key> {
        if self.next_key > MAX_GENERATED_KEY {
            return Err(HostError::constraint("key generator exhausted"));
        }
        Key::number(self.next_key as f64)
    }

    fn advance_generator(&mut self, key: &Key) {
        if !self.params.auto_increment {
            return;
        }
        if let Some(n) = key.as_number() {
            if n >= self.next_key as f64 {
                let next = n.floor().min(MAX_GENERATED_KEY as f64) as u64;
                self.next_key = next.saturating_add(1);
            }
        }
    }

    fn unindex(&mut self, primary: &Key, value: &Value) {
        for index in self.indexes.values_mut() {
            let keys = index.keys_for(value);
            index.remove(&keys, primary);
        }
    }

    fn remove(&mut self, key: &Key) {
        if let Some(old) = self.records.remove(key) {
            self.unindex(key, &old);
        }
    }

    fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    pub(crate) fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: KeyPath,
        options: IndexOptions,
    ) -> HostResult<()> {
        if self.indexes.contains_key(name) {
            return Err(HostError::IndexExists {
                store: store.to_owned(),
                index: name.to_owned(),
            });
        }
        if !key_path.is_valid() {
            return Err(HostError::data(format!("invalid key path {key_path}")));
        }
        if options.multi_entry && key_path.is_compound() {
            return Err(HostError::data("multi-entry indexes need a single key path"));
        }

        let mut index = Index::new(key_path, options);
        for (primary, value) in &self.records {
            let keys = index.keys_for(value);
            if let Some(taken) = index.conflict(&keys, primary) {
                return Err(HostError::constraint(format!(
                    "unique index {name} would contain {taken} twice"
                )));
            }
            index.insert(&keys, primary);
        }
        self.indexes.insert(name.to_owned(), index);
        Ok(())
    }

    fn index_values(
        &self,
        store: &str,
        name: &str,
        range: Option<&KeyRange>,
    ) -> HostResult<Vec<Value>> {
        let index = self.indexes.get(name).ok_or_else(|| HostError::IndexNotFound {
            store: store.to_owned(),
            index: name.to_owned(),
        })?;
        let owners: Box<dyn Iterator<Item = &BTreeSet<Key>>> = match range {
            Some(range) => Box::new(index.entries.range(range.bounds()).map(|(_, o)| o)),
            None => Box::new(index.entries.values()),
        };
        Ok(owners
            .flat_map(|set| set.iter())
            .filter_map(|primary| self.records.get(primary).cloned())
            .collect())
    }
}

/// Schema and data of one database.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseState {
    pub(crate) version: u32,
    pub(crate) stores: BTreeMap<String, ObjectStore>,
}

enum View<'a> {
    Read {
        state: &'a DatabaseState,
        scope: &'a [String],
    },
    Write {
        stores: BTreeMap<String, ObjectStore>,
    },
}

/// A data transaction over the engine.
pub(crate) struct EngineTransaction<'a> {
    mode: TransactionMode,
    view: View<'a>,
}

impl<'a> EngineTransaction<'a> {
    fn read(state: &'a DatabaseState, scope: &'a [String]) -> Self {
        Self {
            mode: TransactionMode::ReadOnly,
            view: View::Read { state, scope },
        }
    }

    fn write(stores: BTreeMap<String, ObjectStore>) -> Self {
        Self {
            mode: TransactionMode::ReadWrite,
            view: View::Write { stores },
        }
    }

    fn into_stores(self) -> BTreeMap<String, ObjectStore> {
        match self.view {
            View::Write { stores } => stores,
            View::Read { .. } => BTreeMap::new(),
        }
    }

    fn store(&self, name: &str) -> HostResult<&ObjectStore> {
        let store = match &self.view {
            View::Read { state, scope } => scope
                .iter()
                .any(|s| s == name)
                .then(|| state.stores.get(name))
                .flatten(),
            View::Write { stores } => stores.get(name),
        };
        store.ok_or_else(|| HostError::StoreNotFound(name.to_owned()))
    }

    fn store_mut(&mut self, name: &str) -> HostResult<&mut ObjectStore> {
        match &mut self.view {
            View::Read { .. } => Err(HostError::ReadOnly),
            View::Write { stores } => stores
                .get_mut(name)
                .ok_or_else(|| HostError::StoreNotFound(name.to_owned())),
        }
    }
}

impl HostTransaction for EngineTransaction<'_> {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn get(&self, store: &str, key: &Key) -> HostResult<Option<Value>> {
        Ok(self.store(store)?.get(key).cloned())
    }

    fn get_all(&self, store: &str, range: Option<&KeyRange>) -> HostResult<Vec<Value>> {
        Ok(self.store(store)?.values(range))
    }

    fn add(&mut self, store: &str, value: Value, key: Option<Key>) -> HostResult<Key> {
        self.store_mut(store)?.insert(value, key, false)
    }

    fn put(&mut self, store: &str, value: Value, key: Option<Key>) -> HostResult<Key> {
        self.store_mut(store)?.insert(value, key, true)
    }

    fn delete(&mut self, store: &str, key: &Key) -> HostResult<()> {
        self.store_mut(store)?.remove(key);
        Ok(())
    }

    fn clear(&mut self, store: &str) -> HostResult<()> {
        self.store_mut(store)?.clear();
        Ok(())
    }

    fn count(&self, store: &str, range: Option<&KeyRange>) -> HostResult<u64> {
        Ok(self.store(store)?.count(range))
    }

    fn index_get_all(
        &self,
        store: &str,
        index: &str,
        range: Option<&KeyRange>,
    ) -> HostResult<Vec<Value>> {
        self.store(store)?.index_values(store, index, range)
    }
}

/// The version-change transaction handed to upgrade callbacks.
pub(crate) struct EngineUpgrade<'a> {
    state: &'a mut DatabaseState,
    old_version: u32,
    new_version: u32,
}

impl UpgradeTransaction for EngineUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn store_names(&self) -> Vec<String> {
        self.state.stores.keys().cloned().collect()
    }

    fn has_store(&self, name: &str) -> bool {
        self.state.stores.contains_key(name)
    }

    fn create_store(&mut self, name: &str, params: StoreParams) -> HostResult<()> {
        if self.state.stores.contains_key(name) {
            return Err(HostError::StoreExists(name.to_owned()));
        }
        if let Some(path) = &params.key_path {
            if !path.is_valid() {
                return Err(HostError::data(format!("invalid key path {path}")));
            }
            if params.auto_increment && (path.is_compound() || path.is_empty_path()) {
                return Err(HostError::data(
                    "auto-increment stores need a non-empty single key path",
                ));
            }
        }
        debug!(store = %name, "creating object store");
        self.state
            .stores
            .insert(name.to_owned(), ObjectStore::new(params));
        Ok(())
    }

    fn index_names(&self, store: &str) -> HostResult<Vec<String>> {
        let store = self
            .state
            .stores
            .get(store)
            .ok_or_else(|| HostError::StoreNotFound(store.to_owned()))?;
        Ok(store.indexes.keys().cloned().collect())
    }

    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: KeyPath,
        options: IndexOptions,
    ) -> HostResult<()> {
        debug!(store = %store, index = %name, "creating index");
        self.state
            .stores
            .get_mut(store)
            .ok_or_else(|| HostError::StoreNotFound(store.to_owned()))?
            .create_index(store, name, key_path, options)
    }
}

/// One named database inside the engine.
pub(crate) struct DatabaseSlot {
    name: String,
    state: RwLock<DatabaseState>,
    connections: Mutex<Vec<Weak<EngineConnection>>>,
    deleted: AtomicBool,
}

impl DatabaseSlot {
    fn new(name: &str, state: DatabaseState) -> Self {
        Self {
            name: name.to_owned(),
            state: RwLock::new(state),
            connections: Mutex::new(Vec::new()),
            deleted: AtomicBool::new(false),
        }
    }

    fn live_connections(&self) -> Vec<Arc<EngineConnection>> {
        let mut connections = self.connections.lock();
        connections.retain(|weak| weak.upgrade().is_some_and(|c| !c.is_closed()));
        connections.iter().filter_map(Weak::upgrade).collect()
    }

    /// Notifies open connections and returns how many stayed open.
    fn notify_version_change(&self, new_version: Option<u32>) -> usize {
        for connection in self.live_connections() {
            let event = VersionChangeEvent {
                name: self.name.clone(),
                old_version: connection.version,
                new_version,
            };
            connection.fire(&event);
        }
        self.live_connections().len()
    }
}

/// The engine behind the in-process hosts.
pub(crate) struct Engine {
    databases: Mutex<BTreeMap<String, Arc<DatabaseSlot>>>,
    persistence: Option<Box<dyn Persistence>>,
}

impl Engine {
    pub(crate) fn new(persistence: Option<Box<dyn Persistence>>) -> Self {
        Self::with_databases(Vec::new(), persistence)
    }

    pub(crate) fn with_databases(
        databases: Vec<(String, DatabaseState)>,
        persistence: Option<Box<dyn Persistence>>,
    ) -> Self {
        let databases = databases
            .into_iter()
            .map(|(name, state)| {
                let slot = Arc::new(DatabaseSlot::new(&name, state));
                (name, slot)
            })
            .collect();
        Self {
            databases: Mutex::new(databases),
            persistence,
        }
    }

    fn persist(&self, name: &str, state: &DatabaseState) -> HostResult<()> {
        match &self.persistence {
            Some(persistence) => persistence.save(name, state),
            None => Ok(()),
        }
    }

    fn slots(&self) -> Vec<Arc<DatabaseSlot>> {
        self.databases.lock().values().cloned().collect()
    }

    /// Calls `f` with the state of every created database.
    pub(crate) fn for_each_database(&self, mut f: impl FnMut(&str, &DatabaseState)) {
        for slot in self.slots() {
            let state = slot.state.read();
            if state.version > 0 {
                f(&slot.name, &state);
            }
        }
    }

    pub(crate) fn databases(&self) -> Vec<DatabaseInfo> {
        let mut infos = Vec::new();
        self.for_each_database(|name, state| {
            infos.push(DatabaseInfo {
                name: name.to_owned(),
                version: state.version,
            });
        });
        infos
    }

    pub(crate) fn open(
        self: &Arc<Self>,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> HostResult<Arc<dyn HostConnection>> {
        if version == 0 {
            return Err(HostError::data("database version must be at least 1"));
        }

        let slot = Arc::clone(
            self.databases
                .lock()
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(DatabaseSlot::new(name, DatabaseState::default()))),
        );

        let stored = slot.state.read().version;
        if version < stored {
            return Err(HostError::VersionConflict {
                name: name.to_owned(),
                requested: version,
                stored,
            });
        }
        if version > stored {
            let open = slot.notify_version_change(Some(version));
            if open > 0 {
                return Err(HostError::Blocked {
                    name: name.to_owned(),
                    open,
                });
            }
            self.upgrade(&slot, version, upgrade)?;
        }

        let connection = Arc::new(EngineConnection {
            name: name.to_owned(),
            version,
            slot: Arc::clone(&slot),
            engine: Arc::clone(self),
            closed: AtomicBool::new(false),
            handler: Mutex::new(None),
        });
        slot.connections.lock().push(Arc::downgrade(&connection));
        debug!(db = %name, version, "connection opened");
        Ok(connection)
    }

    fn upgrade(
        &self,
        slot: &Arc<DatabaseSlot>,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> HostResult<()> {
        let mut state = slot.state.write();
        if state.version > version {
            return Err(HostError::VersionConflict {
                name: slot.name.clone(),
                requested: version,
                stored: state.version,
            });
        }
        if state.version == version {
            return Ok(());
        }

        let old_version = state.version;
        let mut staged = state.clone();
        staged.version = version;
        let outcome = upgrade(&mut EngineUpgrade {
            state: &mut staged,
            old_version,
            new_version: version,
        })
        .map_err(|e| HostError::UpgradeFailed {
            name: slot.name.clone(),
            message: e.to_string(),
        })
        .and_then(|()| self.persist(&slot.name, &staged));

        match outcome {
            Ok(()) => {
                *state = staged;
                info!(db = %slot.name, from = old_version, to = version, "database upgraded");
                Ok(())
            }
            Err(e) => {
                drop(state);
                if old_version == 0 {
                    self.forget(slot);
                }
                Err(e)
            }
        }
    }

    fn forget(&self, slot: &Arc<DatabaseSlot>) {
        let mut databases = self.databases.lock();
        if databases
            .get(&slot.name)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            databases.remove(&slot.name);
        }
    }

    pub(crate) fn delete_database(&self, name: &str) -> HostResult<()> {
        let slot = match self.databases.lock().get(name) {
            Some(slot) => Arc::clone(slot),
            None => return Ok(()),
        };

        let open = slot.notify_version_change(None);
        if open > 0 {
            return Err(HostError::Blocked {
                name: name.to_owned(),
                open,
            });
        }

        slot.deleted.store(true, Ordering::SeqCst);
        self.forget(&slot);
        if let Some(persistence) = &self.persistence {
            persistence.remove(name)?;
        }
        info!(db = %name, "database deleted");
        Ok(())
    }
}

/// A connection handed out by the engine.
pub(crate) struct EngineConnection {
    name: String,
    version: u32,
    slot: Arc<DatabaseSlot>,
    engine: Arc<Engine>,
    closed: AtomicBool,
    handler: Mutex<Option<VersionChangeHandler>>,
}

impl EngineConnection {
    fn fire(&self, event: &VersionChangeEvent) {
        if let Some(handler) = self.handler.lock().as_ref() {
            handler(event);
        }
    }

    fn check_scope(&self, state: &DatabaseState, scope: &[String]) -> HostResult<()> {
        if scope.is_empty() {
            return Err(HostError::data("transaction scope is empty"));
        }
        match scope.iter().find(|s| !state.stores.contains_key(*s)) {
            Some(missing) => Err(HostError::StoreNotFound(missing.clone())),
            None => Ok(()),
        }
    }
}

impl HostConnection for EngineConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.slot.state.read().stores.keys().cloned().collect()
    }

    fn transaction(
        &self,
        scope: &[String],
        mode: TransactionMode,
        body: &mut TransactionBody<'_>,
    ) -> HostResult<()> {
        if self.is_closed() || self.slot.deleted.load(Ordering::SeqCst) {
            return Err(HostError::Closed(self.name.clone()));
        }

        match mode {
            TransactionMode::ReadOnly => {
                let state = self.slot.state.read();
                self.check_scope(&state, scope)?;
                body(&mut EngineTransaction::read(&state, scope))
            }
            TransactionMode::ReadWrite => {
                let mut state = self.slot.state.write();
                self.check_scope(&state, scope)?;
                let working = scope
                    .iter()
                    .map(|name| (name.clone(), state.stores[name].clone()))
                    .collect();
                let mut txn = EngineTransaction::write(working);
                body(&mut txn)?;

                let mut replaced = Vec::new();
                for (name, store) in txn.into_stores() {
                    if let Some(old) = state.stores.insert(name.clone(), store) {
                        replaced.push((name, old));
                    }
                }
                if let Err(e) = self.engine.persist(&self.name, &state) {
                    for (name, old) in replaced {
                        state.stores.insert(name, old);
                    }
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    fn set_version_change_handler(&self, handler: VersionChangeHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(db = %self.name, "connection closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
