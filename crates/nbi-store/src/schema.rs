//! Database schema and record shaping
//!
//! A database is a versioned set of named stores. Adding a store is the only
//! schema change, and it always bumps the version by exactly one.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Identity field of every record
pub const KEY_PATH: &str = "key";

/// Field that wraps non-object values
pub const VALUE_FIELD: &str = "value";

/// Definition of a single store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    /// Field holding the record identity
    pub key_path: String,
    /// Keys are always caller-supplied
    pub auto_increment: bool,
}

impl Default for StoreSchema {
    fn default() -> Self {
        Self {
            key_path: KEY_PATH.to_string(),
            auto_increment: false,
        }
    }
}

/// Versioned schema of one database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Current version, 0 for a database that was never opened
    pub version: u32,
    /// Stores by name
    pub stores: BTreeMap<String, StoreSchema>,
}

impl DatabaseSchema {
    /// Check if the store exists
    #[inline]
    #[must_use]
    pub fn contains(&self, store: &str) -> bool {
        self.stores.contains_key(store)
    }

    /// Schema after adding `store`, or `None` if it already exists
    #[must_use]
    pub fn upgraded_with(&self, store: &str) -> Option<DatabaseSchema> {
        if self.contains(store) {
            return None;
        }
        let mut next = self.clone();
        next.version = self.version + 1;
        next.stores.insert(store.to_string(), StoreSchema::default());
        Some(next)
    }

    /// Store names in order
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }
}

/// Reject names that cannot address a database or store
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), StoreError> {
    let reason = if name.trim().is_empty() {
        Some("must not be empty")
    } else if name.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if name == "." || name == ".." {
        Some("must not be a relative path component")
    } else if name.contains('\0') {
        Some("must not contain NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidName {
            kind,
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Build the stored form of `value` under `key`
///
/// Objects get their identity field set (overriding any existing one);
/// anything else is wrapped.
pub fn shape_record(key: &str, value: Value) -> Result<Value, StoreError> {
    if key.is_empty() {
        return Err(StoreError::EmptyKey);
    }

    let mut object = match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(VALUE_FIELD.to_string(), other);
            map
        }
    };
    object.insert(KEY_PATH.to_string(), Value::String(key.to_string()));
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upgrade_bumps_version_once() {
        let schema = DatabaseSchema::default();
        let v1 = schema.upgraded_with("files").unwrap();
        assert_eq!(v1.version, 1);
        assert!(v1.contains("files"));

        assert!(v1.upgraded_with("files").is_none());

        let v2 = v1.upgraded_with("blobs").unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.store_names(), vec!["blobs", "files"]);
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("database", "JupyterLite Storage").is_ok());
        assert!(validate_name("database", "").is_err());
        assert!(validate_name("store", "a/b").is_err());
        assert!(validate_name("store", "..").is_err());
    }

    #[test]
    fn shape_record_sets_key() {
        let shaped = shape_record("k1", json!({"key": "other", "n": 1})).unwrap();
        assert_eq!(shaped, json!({"key": "k1", "n": 1}));

        let wrapped = shape_record("k2", json!([1, 2])).unwrap();
        assert_eq!(wrapped, json!({"key": "k2", "value": [1, 2]}));

        assert!(matches!(
            shape_record("", json!({})),
            Err(StoreError::EmptyKey)
        ));
    }
}
