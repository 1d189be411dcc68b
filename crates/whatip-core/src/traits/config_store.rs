// # Config Store Trait
//
// Defines the interface to the medium that holds the service configuration and
// the last observed external address.
//
// ## Layout
//
// Values live under namespaces derived from the fixed service identifier
// (`whatip/parameters`, `whatip/consumers`). Each value is a string, an
// integer or a boolean.
//
// ## Implementations
//
// - `MemoryConfigStore`: tests and embedding
// - `FileConfigStore`: JSON file with atomic writes and backup recovery

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigStoreError;

/// A typed configuration value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    /// Borrow as a string, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Read as an integer
    ///
    /// Numeric strings are accepted since hand-edited stores often quote numbers.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::Str(s) => s.trim().parse().ok(),
            ConfigValue::Bool(_) => None,
        }
    }

    /// Read as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::Str(s) => s.trim().to_ascii_lowercase().parse().ok(),
            ConfigValue::Int(_) => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => b.fmt(f),
            ConfigValue::Int(i) => i.fmt(f),
            ConfigValue::Str(s) => s.fmt(f),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

/// Trait for configuration store implementations
///
/// Implementations must be thread-safe. The scheduler is the only writer
/// during normal operation, so no cross-key transactions are required beyond
/// [`set_all`](ConfigStore::set_all) writing one namespace in one go.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a single value
    ///
    /// Returns `Ok(None)` when the key (or namespace) does not exist.
    async fn get(&self, namespace: &str, key: &str)
    -> Result<Option<ConfigValue>, ConfigStoreError>;

    /// Create or replace a single value
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: ConfigValue,
    ) -> Result<(), ConfigStoreError>;

    /// Create or replace several values in one namespace
    ///
    /// The default implementation calls [`set`](ConfigStore::set) per entry.
    async fn set_all(
        &self,
        namespace: &str,
        entries: Vec<(String, ConfigValue)>,
    ) -> Result<(), ConfigStoreError> {
        for (key, value) in entries {
            self.set(namespace, &key, value).await?;
        }
        Ok(())
    }

    /// All entries of a namespace, sorted by key
    async fn entries(&self, namespace: &str)
    -> Result<Vec<(String, ConfigValue)>, ConfigStoreError>;

    /// Delete a whole namespace (no-op if it does not exist)
    async fn delete(&self, namespace: &str) -> Result<(), ConfigStoreError>;

    /// Re-read the backing medium, picking up edits made outside the process
    ///
    /// The default implementation does nothing, for stores that are their
    /// own medium.
    async fn refresh(&self) -> Result<(), ConfigStoreError> {
        Ok(())
    }

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), ConfigStoreError>;
}
