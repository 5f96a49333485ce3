//! Durable filesystem store backend
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<database>/schema.json          versioned schema (commit point)
//! <root>/<database>/<store>.store.json   records of one store, keyed
//! ```
//!
//! Every file is replaced atomically (temp file in the same directory, then
//! rename, then a directory fsync), so readers observe either the old or the
//! new contents.
//!
//! Upgrades and writes hold the database lock: an in-process mutex shared by
//! every `FsStore` on the same directory, plus an advisory lock on
//! `<root>/<database>/.lock` that excludes other processes.

use crate::error::StoreError;
use crate::schema::{shape_record, validate_name, DatabaseSchema};
use crate::{PersistentStore, StoreHandle};
use async_trait::async_trait;
use dashmap::DashMap;
use fslock::LockFile;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

const SCHEMA_FILE: &str = "schema.json";
const STORE_SUFFIX: &str = ".store.json";
const LOCK_FILE: &str = ".lock";

type Records = BTreeMap<String, Value>;

/// In-process locks keyed by canonical database directory
fn local_locks() -> &'static DashMap<PathBuf, Arc<Mutex<()>>> {
    static LOCKS: OnceLock<DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();
    LOCKS.get_or_init(DashMap::new)
}

/// Exclusive hold on one database, released on drop
struct DatabaseLock {
    _file: LockFile,
    _local: OwnedMutexGuard<()>,
}

/// Store persisted as JSON files under a root directory
///
/// Any number of instances, in one process or several, may share a root.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create store rooted at `root` (created on first write)
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn database_dir(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }

    fn schema_path(&self, database: &str) -> PathBuf {
        self.database_dir(database).join(SCHEMA_FILE)
    }

    fn store_path(&self, database: &str, store: &str) -> PathBuf {
        self.database_dir(database)
            .join(format!("{store}{STORE_SUFFIX}"))
    }

    /// Lock `database`, creating its directory
    async fn lock_database(&self, database: &str) -> Result<DatabaseLock, StoreError> {
        let dir = self.database_dir(database);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        let dir = tokio::fs::canonicalize(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let local = local_locks()
            .entry(dir.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let local = local.lock_owned().await;

        let path = dir.join(LOCK_FILE);
        let file = tokio::task::spawn_blocking(move || {
            let mut file = LockFile::open(path.as_path()).map_err(|e| lock_error(&path, &e))?;
            file.lock().map_err(|e| lock_error(&path, &e))?;
            Ok::<_, StoreError>(file)
        })
        .await
        .map_err(|e| StoreError::Write(format!("lock task failed: {e}")))??;

        Ok(DatabaseLock {
            _file: file,
            _local: local,
        })
    }

    async fn load_schema(&self, database: &str) -> Result<Option<DatabaseSchema>, StoreError> {
        read_json(&self.schema_path(database)).await
    }

    async fn load_records(&self, handle: &StoreHandle) -> Result<Records, StoreError> {
        let schema = self.load_schema(&handle.database).await?;
        if !schema.is_some_and(|s| s.contains(&handle.store)) {
            return Err(StoreError::store_missing(&handle.database, &handle.store));
        }
        Ok(read_json(&self.store_path(&handle.database, &handle.store))
            .await?
            .unwrap_or_default())
    }

    fn handle(database: &str, store: &str, version: u32) -> StoreHandle {
        StoreHandle {
            database: database.to_string(),
            store: store.to_string(),
            version,
        }
    }
}

#[async_trait]
impl PersistentStore for FsStore {
    async fn open(&self, database: &str, store: &str) -> Result<StoreHandle, StoreError> {
        validate_name("database", database)?;
        validate_name("store", store)?;

        if let Some(schema) = self.load_schema(database).await? {
            if schema.contains(store) {
                return Ok(Self::handle(database, store, schema.version));
            }
        }

        let _lock = self.lock_database(database).await?;

        // Re-read under the lock: a concurrent open may have upgraded already.
        let current = self.load_schema(database).await?.unwrap_or_default();
        let Some(next) = current.upgraded_with(store) else {
            return Ok(Self::handle(database, store, current.version));
        };

        tracing::info!(
            database,
            store,
            from = current.version,
            to = next.version,
            "upgrading database schema"
        );

        let upgrade_err = |cause: String| StoreError::Upgrade {
            database: database.to_string(),
            version: next.version,
            cause,
        };

        let store_path = self.store_path(database, store);
        if read_json::<Records>(&store_path).await?.is_none() {
            write_json_atomic(&store_path, &Records::new())
                .await
                .map_err(|e| upgrade_err(e.to_string()))?;
        }
        write_json_atomic(&self.schema_path(database), &next)
            .await
            .map_err(|e| upgrade_err(e.to_string()))?;

        Ok(Self::handle(database, store, next.version))
    }

    async fn put(&self, handle: &StoreHandle, key: &str, value: Value) -> Result<(), StoreError> {
        let record = shape_record(key, value)?;

        // Checked before locking so a missing database is never created here.
        if !self
            .load_schema(&handle.database)
            .await?
            .is_some_and(|s| s.contains(&handle.store))
        {
            return Err(StoreError::store_missing(&handle.database, &handle.store));
        }

        let _lock = self.lock_database(&handle.database).await?;

        let mut records = self.load_records(handle).await?;
        records.insert(key.to_string(), record);
        write_json_atomic(&self.store_path(&handle.database, &handle.store), &records).await
    }

    async fn get(&self, handle: &StoreHandle, key: &str) -> Result<Option<Value>, StoreError> {
        let mut records = self.load_records(handle).await?;
        Ok(records.remove(key))
    }

    async fn keys(&self, handle: &StoreHandle) -> Result<Vec<String>, StoreError> {
        Ok(self.load_records(handle).await?.into_keys().collect())
    }

    async fn schema(&self, database: &str) -> Result<Option<DatabaseSchema>, StoreError> {
        validate_name("database", database)?;
        self.load_schema(database).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;
        sync_dir(dir)
    })
    .await
    .map_err(|e| StoreError::Write(format!("write task failed: {e}")))?
}

fn lock_error(path: &Path, e: &impl std::fmt::Display) -> StoreError {
    StoreError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    )
}

/// Make a rename in `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    std::fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StoreError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn open_writes_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let handle = store.open("db", "files").await.unwrap();
        assert_eq!(handle.version, 1);
        assert!(dir.path().join("db").join(SCHEMA_FILE).exists());
        assert!(dir.path().join("db").join("files.store.json").exists());
    }

    #[tokio::test]
    async fn put_and_get_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let handle = store.open("db", "files").await.unwrap();
        store.put(&handle, "a", json!({"n": 1})).await.unwrap();

        assert_eq!(
            store.get(&handle, "a").await.unwrap(),
            Some(json!({"key": "a", "n": 1}))
        );
        assert_eq!(store.get(&handle, "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn schema_of_unknown_database_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert_eq!(store.schema("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_without_open_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let handle = StoreHandle {
            database: "db".into(),
            store: "files".into(),
            version: 1,
        };
        let result = store.put(&handle, "k", json!({})).await;
        assert!(matches!(result, Err(StoreError::StoreMissing { .. })));
        assert!(!dir.path().join("db").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn atomic_write_syncs_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        write_json_atomic(&path, &json!({"a": 1})).await.unwrap();
        assert_eq!(read_json::<Value>(&path).await.unwrap(), Some(json!({"a": 1})));

        assert!(sync_dir(dir.path()).is_ok());
        let missing = dir.path().join("gone");
        assert!(matches!(sync_dir(&missing), Err(StoreError::Io { .. })));
    }

    #[tokio::test]
    async fn writes_leave_only_store_files_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let handle = store.open("db", "files").await.unwrap();
        store.put(&handle, "a", json!({})).await.unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("db"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![LOCK_FILE, "files.store.json", SCHEMA_FILE]);
    }
}
