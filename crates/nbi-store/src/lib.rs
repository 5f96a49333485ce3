//! NBI Store - versioned key-value persistence
//!
//! Records live under a string key in a named store inside a named database.
//! Stores are created lazily: opening a store that does not exist upgrades
//! the database schema by exactly one version and creates it.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, used for tests and embedding
//! - [`FsStore`]: durable, one directory per database, atomic file swaps
//!
//! # Example
//!
//! ```rust,ignore
//! use nbi_store::{MemoryStore, PersistentStore};
//!
//! # async fn example() -> Result<(), nbi_store::StoreError> {
//! let store = MemoryStore::new();
//! let handle = store.open("JupyterLite Storage", "files").await?;
//! store.put(&handle, "demo.ipynb", serde_json::json!({"size": 2})).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod fs;
pub mod memory;
pub mod schema;

pub use error::StoreError;
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use schema::{shape_record, validate_name, DatabaseSchema, StoreSchema, KEY_PATH};

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Address of an opened store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreHandle {
    /// Database name
    pub database: String,
    /// Store name
    pub store: String,
    /// Schema version observed when the store was opened
    pub version: u32,
}

impl fmt::Display for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@v{}", self.database, self.store, self.version)
    }
}

/// Versioned key-value store
///
/// Implementations serialise schema upgrades per database and make every
/// `put` all-or-nothing.
#[async_trait]
pub trait PersistentStore: Send + Sync + fmt::Debug {
    /// Open `store` in `database`, creating it (and the database) if needed
    async fn open(&self, database: &str, store: &str) -> Result<StoreHandle, StoreError>;

    /// Write `value` under `key`, overwriting any previous value
    async fn put(&self, handle: &StoreHandle, key: &str, value: Value) -> Result<(), StoreError>;

    /// Read the current value under `key`
    async fn get(&self, handle: &StoreHandle, key: &str) -> Result<Option<Value>, StoreError>;

    /// All keys in the store, sorted
    async fn keys(&self, handle: &StoreHandle) -> Result<Vec<String>, StoreError>;

    /// Current schema of `database`, `None` if it was never created
    async fn schema(&self, database: &str) -> Result<Option<DatabaseSchema>, StoreError>;

    /// Current schema version of `database`
    async fn version(&self, database: &str) -> Result<Option<u32>, StoreError> {
        Ok(self.schema(database).await?.map(|s| s.version))
    }

    /// Names of the stores in `database`, empty if it does not exist
    async fn store_names(&self, database: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .schema(database)
            .await?
            .map(|s| s.store_names())
            .unwrap_or_default())
    }
}

/// Open the target store and write one record
pub async fn store_record(
    store: &dyn PersistentStore,
    database: &str,
    store_name: &str,
    key: &str,
    value: Value,
) -> Result<StoreHandle, StoreError> {
    let handle = store.open(database, store_name).await?;
    store.put(&handle, key, value).await?;
    tracing::debug!(handle = %handle, key, "record stored");
    Ok(handle)
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
