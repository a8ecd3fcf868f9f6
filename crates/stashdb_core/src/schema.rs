//! Declared database shapes and the registry that holds them.
//!
//! A [`DatabaseConfig`] lists the stores (and their indexes) a database
//! should have at a given version. Configs are plain data: they can be
//! built in code or loaded from JSON.
//!
//! ```json
//! {
//!   "name": "app",
//!   "version": 2,
//!   "stores": [
//!     { "name": "users", "keyPath": "id",
//!       "indexes": [ { "name": "by_email", "keyPath": "email", "options": { "unique": true } } ] },
//!     { "name": "log", "autoIncrement": true }
//!   ]
//! }
//! ```

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stashdb_host::{IndexOptions, KeyPath, StoreParams};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Declared shape of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Database name, unique per registry.
    pub name: String,
    /// Schema version, at least 1.
    pub version: u32,
    /// Declared stores.
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
}

impl DatabaseConfig {
    /// Creates a config without stores.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            stores: Vec::new(),
        }
    }

    /// Adds a store.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.stores.push(store);
        self
    }

    /// Returns the declared store with this name.
    #[must_use]
    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Checks the config is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.is_empty() {
            return Err(StoreError::invalid_config("database name is empty"));
        }
        if self.version == 0 {
            return Err(StoreError::invalid_config(format!(
                "{}: version must be at least 1",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for store in &self.stores {
            if !seen.insert(store.name.as_str()) {
                return Err(StoreError::invalid_config(format!(
                    "{}: duplicate store {}",
                    self.name, store.name
                )));
            }
            store
                .validate()
                .map_err(|msg| StoreError::invalid_config(format!("{}: {msg}", self.name)))?;
        }
        Ok(())
    }
}

/// Declared shape of one object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Store name, unique per database.
    pub name: String,
    /// Key path for in-line keys; `None` for out-of-line keys.
    #[serde(default)]
    pub key_path: Option<KeyPath>,
    /// Generate missing keys from a counter.
    #[serde(default)]
    pub auto_increment: bool,
    /// Declared indexes.
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

impl StoreConfig {
    /// Creates an out-of-line store without indexes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Sets the in-line key path.
    #[must_use]
    pub fn key_path(mut self, path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Sets key generation.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.indexes.push(index);
        self
    }

    /// Parameters handed to the host when the store is created.
    #[must_use]
    pub fn params(&self) -> StoreParams {
        StoreParams {
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("store name is empty".into());
        }
        if let Some(path) = &self.key_path {
            if !path.is_valid() {
                return Err(format!("store {}: invalid key path {path}", self.name));
            }
            if self.auto_increment && (path.is_compound() || path.is_empty_path()) {
                return Err(format!(
                    "store {}: autoIncrement needs a non-empty single key path",
                    self.name
                ));
            }
        }
        let mut seen = HashSet::new();
        for index in &self.indexes {
            if index.name.is_empty() {
                return Err(format!("store {}: index name is empty", self.name));
            }
            if !seen.insert(index.name.as_str()) {
                return Err(format!("store {}: duplicate index {}", self.name, index.name));
            }
            if !index.key_path.is_valid() {
                return Err(format!(
                    "index {}.{}: invalid key path {}",
                    self.name, index.name, index.key_path
                ));
            }
            if index.options.multi_entry && index.key_path.is_compound() {
                return Err(format!(
                    "index {}.{}: multiEntry needs a single key path",
                    self.name, index.name
                ));
            }
        }
        Ok(())
    }
}

/// Declared secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    /// Index name, unique per store.
    pub name: String,
    /// Path of the indexed value.
    pub key_path: KeyPath,
    /// Uniqueness and multi-entry flags.
    #[serde(default)]
    pub options: IndexOptions,
}

impl IndexConfig {
    /// Creates a non-unique, single-entry index.
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            options: IndexOptions::default(),
        }
    }

    /// Sets the unique flag.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.options.unique = value;
        self
    }

    /// Sets the multi-entry flag.
    #[must_use]
    pub fn multi_entry(mut self, value: bool) -> Self {
        self.options.multi_entry = value;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaDocument {
    One(DatabaseConfig),
    Many(Vec<DatabaseConfig>),
}

/// Parses a JSON schema document holding one config or an array of them.
///
/// # Errors
///
/// Returns `InvalidConfig` if the text is not a valid schema document.
pub fn load_schema_json(text: &str) -> StoreResult<Vec<DatabaseConfig>> {
    let document: SchemaDocument = serde_json::from_str(text)
        .map_err(|e| StoreError::invalid_config(format!("schema document: {e}")))?;
    Ok(match document {
        SchemaDocument::One(config) => vec![config],
        SchemaDocument::Many(configs) => configs,
    })
}

/// Registered database configs, keyed by name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    configs: RwLock<HashMap<String, Arc<DatabaseConfig>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a config, returning the one it replaces.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if validation fails; the registry is unchanged.
    pub fn register(&self, config: DatabaseConfig) -> StoreResult<Option<Arc<DatabaseConfig>>> {
        config.validate()?;
        let name = config.name.clone();
        Ok(self.configs.write().insert(name, Arc::new(config)))
    }

    /// Returns the config registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if there is none.
    pub fn lookup(&self, name: &str) -> StoreResult<Arc<DatabaseConfig>> {
        self.configs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_registered(name))
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.configs.read().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().keys().cloned().collect();
        names.sort();
        names
    }
}
