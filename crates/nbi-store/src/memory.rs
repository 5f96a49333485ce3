//! In-memory store backend
//!
//! All databases live behind one lock, so a schema upgrade and the existence
//! check that precedes it are a single critical section.

use crate::error::StoreError;
use crate::schema::{shape_record, validate_name, DatabaseSchema};
use crate::{PersistentStore, StoreHandle};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryDatabase {
    schema: DatabaseSchema,
    stores: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Process-local store; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    databases: Arc<RwLock<HashMap<String, MemoryDatabase>>>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of databases created so far
    #[must_use]
    pub fn database_count(&self) -> usize {
        self.databases.read().len()
    }

    /// Total number of records across all databases
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.databases
            .read()
            .values()
            .flat_map(|db| db.stores.values())
            .map(BTreeMap::len)
            .sum()
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
impl PersistentStore for MemoryStore {
    async fn open(&self, database: &str, store: &str) -> Result<StoreHandle, StoreError> {
        validate_name("database", database)?;
        validate_name("store", store)?;

        {
            let guard = self.databases.read();
            if let Some(db) = guard.get(database) {
                if db.schema.contains(store) {
                    return Ok(Self::handle(database, store, db.schema.version));
                }
            }
        }

        // Re-check under the write lock: a concurrent open may have won.
        let mut guard = self.databases.write();
        let db = guard.entry(database.to_string()).or_default();
        if let Some(next) = db.schema.upgraded_with(store) {
            tracing::info!(
                database,
                store,
                from = db.schema.version,
                to = next.version,
                "upgrading database schema"
            );
            db.schema = next;
            db.stores.entry(store.to_string()).or_default();
        }
        Ok(Self::handle(database, store, db.schema.version))
    }

    async fn put(&self, handle: &StoreHandle, key: &str, value: Value) -> Result<(), StoreError> {
        let record = shape_record(key, value)?;

        let mut guard = self.databases.write();
        let records = guard
            .get_mut(&handle.database)
            .and_then(|db| db.stores.get_mut(&handle.store))
            .ok_or_else(|| StoreError::store_missing(&handle.database, &handle.store))?;
        records.insert(key.to_string(), record);
        Ok(())
    }

    async fn get(&self, handle: &StoreHandle, key: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.databases.read();
        let records = guard
            .get(&handle.database)
            .and_then(|db| db.stores.get(&handle.store))
            .ok_or_else(|| StoreError::store_missing(&handle.database, &handle.store))?;
        Ok(records.get(key).cloned())
    }

    async fn keys(&self, handle: &StoreHandle) -> Result<Vec<String>, StoreError> {
        let guard = self.databases.read();
        let records = guard
            .get(&handle.database)
            .and_then(|db| db.stores.get(&handle.store))
            .ok_or_else(|| StoreError::store_missing(&handle.database, &handle.store))?;
        Ok(records.keys().cloned().collect())
    }

    async fn schema(&self, database: &str) -> Result<Option<DatabaseSchema>, StoreError> {
        Ok(self
            .databases
            .read()
            .get(database)
            .map(|db| db.schema.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn open_creates_database_at_version_one() {
        let store = MemoryStore::new();
        let handle = store.open("db", "files").await.unwrap();
        assert_eq!(handle.version, 1);
        assert_eq!(store.version("db").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn open_existing_store_does_not_upgrade() {
        let store = MemoryStore::new();
        store.open("db", "files").await.unwrap();
        let again = store.open("db", "files").await.unwrap();
        assert_eq!(again.version, 1);
    }

    #[tokio::test]
    async fn new_store_bumps_version_and_keeps_data() {
        let store = MemoryStore::new();
        let files = store.open("db", "files").await.unwrap();
        store.put(&files, "a.ipynb", json!({"n": 1})).await.unwrap();

        let blobs = store.open("db", "blobs").await.unwrap();
        assert_eq!(blobs.version, 2);

        let value = store.get(&files, "a.ipynb").await.unwrap();
        assert_eq!(value, Some(json!({"key": "a.ipynb", "n": 1})));
    }

    #[tokio::test]
    async fn put_overwrites_in_place() {
        let store = MemoryStore::new();
        let handle = store.open("db", "files").await.unwrap();
        store.put(&handle, "k", json!({"v": 1})).await.unwrap();
        store.put(&handle, "k", json!({"v": 2})).await.unwrap();

        assert_eq!(store.keys(&handle).await.unwrap(), vec!["k"]);
        assert_eq!(store.record_count(), 1);
        assert_eq!(
            store.get(&handle, "k").await.unwrap(),
            Some(json!({"key": "k", "v": 2}))
        );
    }

    #[tokio::test]
    async fn put_to_unknown_store_fails() {
        let store = MemoryStore::new();
        let handle = StoreHandle {
            database: "nope".into(),
            store: "files".into(),
            version: 1,
        };
        let result = store.put(&handle, "k", json!({})).await;
        assert!(matches!(result, Err(StoreError::StoreMissing { .. })));
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn open_rejects_bad_names() {
        let store = MemoryStore::new();
        assert!(store.open("", "files").await.is_err());
        assert!(store.open("db", "a/b").await.is_err());
        assert_eq!(store.database_count(), 0);
    }
}
