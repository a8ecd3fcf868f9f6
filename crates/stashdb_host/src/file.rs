//! Directory-backed host for persistent storage.
//!
//! ```text
//! storage_dir/
//! ├─ LOCK              # Advisory lock, one process at a time
//! ├─ 617070.sdb        # CBOR snapshot of database "app" (hex-encoded name)
//! └─ ...
//! ```

use crate::backend::{DatabaseInfo, Host, HostConnection, StorageEstimate, UpgradeFn};
use crate::engine::{DatabaseState, Engine, Persistence};
use crate::error::{HostError, HostResult};
use crate::snapshot;
use fs2::FileExt;
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Lock file name.
const LOCK_FILE: &str = "LOCK";

/// Extension of database snapshot files.
const DB_EXTENSION: &str = "sdb";

/// Extension of snapshots being written.
const TMP_EXTENSION: &str = "sdb.tmp";

/// A host that persists each database as a snapshot file in a directory.
///
/// Every committed read-write transaction and every upgrade rewrites the
/// database's snapshot: the new content goes to a temporary file which is
/// synced and renamed over the old one, so a crash leaves either the old
/// or the new snapshot.
///
/// # Locking
///
/// The host holds an exclusive lock on the directory for its lifetime.
/// Opening the same directory again fails with [`HostError::Locked`].
///
/// # Example
///
/// ```no_run
/// use stashdb_host::{FileHost, Host};
/// use std::path::Path;
///
/// let host = FileHost::open(Path::new("app_data")).unwrap();
/// for db in host.databases().unwrap() {
///     println!("{} v{}", db.name, db.version);
/// }
/// ```
pub struct FileHost {
    dir: PathBuf,
    engine: Arc<Engine>,
    _lock_file: File,
}

impl FileHost {
    /// Opens or creates a storage directory and loads its databases.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created or is not a directory
    /// - Another process holds the lock (`Locked`)
    /// - A snapshot cannot be read or decoded (`Corrupted`)
    pub fn open(path: &Path) -> HostResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(HostError::Io(io::Error::other(format!(
                "not a directory: {}",
                path.display()
            ))));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(HostError::Locked);
        }

        let mut databases = Vec::new();
        for file in snapshot_files(path)? {
            let bytes = fs::read(&file)?;
            let (name, state) = snapshot::decode(&bytes).map_err(|e| match e {
                HostError::Corrupted(msg) => {
                    HostError::corrupted(format!("{}: {msg}", file.display()))
                }
                other => other,
            })?;
            debug!(db = %name, version = state.version, "loaded snapshot");
            databases.push((name, state));
        }
        info!(path = %path.display(), databases = databases.len(), "storage directory opened");

        let persistence = DirectoryPersistence {
            dir: path.to_path_buf(),
        };
        Ok(Self {
            dir: path.to_path_buf(),
            engine: Arc::new(Engine::with_databases(databases, Some(Box::new(persistence)))),
            _lock_file: lock_file,
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl std::fmt::Debug for FileHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHost").field("dir", &self.dir).finish()
    }
}

impl Host for FileHost {
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
        let mut usage_bytes = 0;
        for file in snapshot_files(&self.dir)? {
            usage_bytes += fs::metadata(&file)?.len();
        }
        let available = fs2::available_space(&self.dir)?;
        Ok(Some(StorageEstimate {
            usage_bytes,
            quota_bytes: usage_bytes.saturating_add(available),
        }))
    }
}

struct DirectoryPersistence {
    dir: PathBuf,
}

impl Persistence for DirectoryPersistence {
    fn save(&self, name: &str, state: &DatabaseState) -> HostResult<()> {
        let bytes = snapshot::encode(name, state)?;
        let path = self.dir.join(file_name(name));
        let tmp = path.with_extension(TMP_EXTENSION);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> HostResult<()> {
        match fs::remove_file(self.dir.join(file_name(name))) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Database names may contain any character, so the file name is their hex encoding.
fn file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() * 2 + DB_EXTENSION.len() + 1);
    for byte in name.bytes() {
        let _ = write!(out, "{byte:02x}");
    }
    out.push('.');
    out.push_str(DB_EXTENSION);
    out
}

fn snapshot_files(dir: &Path) -> HostResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension() == Some(OsStr::new(DB_EXTENSION)) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{IndexOptions, StoreParams, TransactionMode, UpgradeTransaction};
    use crate::key::{Key, KeyPath};
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn schema(tx: &mut dyn UpgradeTransaction) -> HostResult<()> {
        if !tx.has_store("notes") {
            tx.create_store("notes", StoreParams {
                key_path: Some(KeyPath::from("id")),
                auto_increment: true,
            })?;
            tx.create_index("notes", "by_tag", KeyPath::from("tag"), IndexOptions::default())?;
        }
        Ok(())
    }

    fn notes() -> Vec<String> {
        vec!["notes".to_owned()]
    }

    #[test]
    fn file_names_are_hex() {
        assert_eq!(file_name("app"), "617070.sdb");
        assert_eq!(file_name("a/b"), "612f62.sdb");
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let host = FileHost::open(dir.path()).unwrap();
            let conn = host.open("app", 2, &mut schema).unwrap();
            conn.transaction(&notes(), TransactionMode::ReadWrite, &mut |tx| {
                tx.add("notes", json!({"text": "one", "tag": "b"}), None)?;
                tx.add("notes", json!({"text": "two", "tag": "a"}), None)?;
                Ok(())
            })
            .unwrap();
        }

        let host = FileHost::open(dir.path()).unwrap();
        assert_eq!(
            host.databases().unwrap(),
            vec![DatabaseInfo {
                name: "app".into(),
                version: 2
            }]
        );
        let conn = host
            .open("app", 2, &mut |_| panic!("no upgrade expected"))
            .unwrap();

        let mut by_tag: Vec<Value> = Vec::new();
        let mut next = Key::from(0);
        conn.transaction(&notes(), TransactionMode::ReadWrite, &mut |tx| {
            by_tag = tx.index_get_all("notes", "by_tag", None)?;
            next = tx.add("notes", json!({"text": "three"}), None)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(by_tag[0]["text"], "two");
        assert_eq!(next, Key::from(3));
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _host = FileHost::open(dir.path()).unwrap();
        assert!(matches!(FileHost::open(dir.path()), Err(HostError::Locked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        drop(FileHost::open(dir.path()).unwrap());
        assert!(FileHost::open(dir.path()).is_ok());
    }

    #[test]
    fn delete_removes_the_snapshot() {
        let dir = tempdir().unwrap();
        let host = FileHost::open(dir.path()).unwrap();
        host.open("app", 1, &mut schema).unwrap().close();
        assert!(dir.path().join("617070.sdb").exists());

        host.delete_database("app").unwrap();
        assert!(!dir.path().join("617070.sdb").exists());
        assert!(host.databases().unwrap().is_empty());
    }

    #[test]
    fn corrupted_snapshot_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("617070.sdb"), b"garbage").unwrap();
        assert!(matches!(
            FileHost::open(dir.path()),
            Err(HostError::Corrupted(_))
        ));
    }

    #[test]
    fn estimate_counts_snapshot_bytes() {
        let dir = tempdir().unwrap();
        let host = FileHost::open(dir.path()).unwrap();
        let empty = host.storage_estimate().unwrap().unwrap();
        assert_eq!(empty.usage_bytes, 0);

        host.open("app", 1, &mut schema).unwrap().close();
        let used = host.storage_estimate().unwrap().unwrap();
        assert!(used.usage_bytes > 0);
        assert!(used.quota_bytes >= used.usage_bytes);
    }
}
