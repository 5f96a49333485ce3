//! Core identifiers and addresses

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique request identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Ulid);

impl RequestId {
    /// Generate new request ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Database and store a record is written to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreAddress {
    /// Database name
    pub database: String,
    /// Store name
    pub store: String,
}

impl StoreAddress {
    /// Create address
    #[inline]
    #[must_use]
    pub fn new(database: impl Into<String>, store: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            store: store.into(),
        }
    }
}

impl fmt::Display for StoreAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.store)
    }
}
