//! Error types for the persistent store
//!
//! Every failure surfaced by a backend carries a human-readable cause. A
//! failed call leaves no partial state behind.

use std::path::PathBuf;

/// Store operation errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database or store name cannot be used as an address
    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        /// "database" or "store"
        kind: &'static str,
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Record key is empty
    #[error("record key must not be empty")]
    EmptyKey,

    /// Handle refers to a store that no longer exists
    #[error("store '{store}' does not exist in database '{database}'")]
    StoreMissing { database: String, store: String },

    /// Schema upgrade failed
    #[error("error upgrading database '{database}' to version {version}: {cause}")]
    Upgrade {
        database: String,
        version: u32,
        cause: String,
    },

    /// Underlying I/O failure
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted data could not be encoded or decoded
    #[error("failed to encode record data: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Write rejected by the backend
    #[error("failed to save data: {0}")]
    Write(String),
}

impl StoreError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a missing-store error
    pub fn store_missing(database: impl Into<String>, store: impl Into<String>) -> Self {
        Self::StoreMissing {
            database: database.into(),
            store: store.into(),
        }
    }

    /// Whether the caller passed a bad address or key
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidName { .. } | Self::EmptyKey)
    }
}
