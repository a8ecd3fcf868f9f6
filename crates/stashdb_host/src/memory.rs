//! In-memory host for tests and ephemeral data.

use crate::backend::{DatabaseInfo, Host, HostConnection, StorageEstimate, UpgradeFn};
use crate::engine::Engine;
use crate::error::HostResult;
use crate::snapshot;
use std::sync::Arc;

/// A host that keeps every database in memory.
///
/// Data lives as long as the host value. Cloning the `Arc` that holds it is
/// the way to share one set of databases between several storage handles.
///
/// # Storage estimate
///
/// Without a quota the host has no estimate capability and
/// [`Host::storage_estimate`] returns `None`. With [`MemoryHost::with_quota`]
/// usage is the encoded size of every database.
///
/// # Example
///
/// ```rust
/// use stashdb_host::{Host, MemoryHost, StoreParams, TransactionMode};
/// use serde_json::json;
///
/// let host = MemoryHost::new();
/// let conn = host
///     .open("app", 1, &mut |tx| tx.create_store("items", StoreParams::default()))
///     .unwrap();
/// conn.transaction(&["items".to_owned()], TransactionMode::ReadWrite, &mut |tx| {
///     tx.put("items", json!("hello"), Some("greeting".into())).map(|_| ())
/// })
/// .unwrap();
/// ```
pub struct MemoryHost {
    engine: Arc<Engine>,
    quota: Option<u64>,
}

impl MemoryHost {
    /// Creates an empty host without an estimate capability.
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: Arc::new(Engine::new(None)),
            quota: None,
        }
    }

    /// Creates an empty host that reports estimates against `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota: Some(quota_bytes),
            ..Self::new()
        }
    }

    fn usage_bytes(&self) -> HostResult<u64> {
        let mut usage = 0u64;
        let mut failure = None;
        self.engine.for_each_database(|name, state| {
            match snapshot::encoded_len(name, state) {
                Ok(len) => usage += len,
                Err(e) => failure = Some(e),
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(usage),
        }
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHost")
            .field("databases", &self.engine.databases().len())
            .field("quota", &self.quota)
            .finish()
    }
}

impl Host for MemoryHost {
    fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> HostResult<Arc<dyn HostConnection>> {
        self.engine.open(name, version, upgrade)
    }

    fn delete_database(&self, name: &str) -> HostResult<()> {
        self.engine.delete_database(name)
    }

    fn databases(&self) -> HostResult<Vec<DatabaseInfo>> {
        Ok(self.engine.databases())
    }

    fn storage_estimate(&self) -> HostResult<Option<StorageEstimate>> {
        let Some(quota_bytes) = self.quota else {
            return Ok(None);
        };
        Ok(Some(StorageEstimate {
            usage_bytes: self.usage_bytes()?,
            quota_bytes,
        }))
    }
}
