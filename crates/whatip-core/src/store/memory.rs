// # Memory Config Store
//
// In-memory implementation of ConfigStore.
//
// Nothing survives a restart: the first cycle after a restart sees no
// previous address and reports a first observation. Useful for tests and for
// embedding where the host application owns persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::ConfigStoreError;
use crate::traits::config_store::{ConfigStore, ConfigValue};

type Namespaces = BTreeMap<String, BTreeMap<String, ConfigValue>>;

/// In-memory config store
///
/// Clones share the same underlying map, so a test can keep a handle and
/// inspect what the scheduler wrote.
///
/// # Example
///
/// ```rust,no_run
/// use whatip_core::store::MemoryConfigStore;
/// use whatip_core::traits::ConfigStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryConfigStore::new();
///     store.set("whatip/parameters", "smtp_port", 25i64.into()).await?;
///     assert_eq!(
///         store.get("whatip/parameters", "smtp_port").await?,
///         Some(25i64.into())
///     );
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<RwLock<Namespaces>>,
}

impl MemoryConfigStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with one namespace
    pub fn with_namespace(
        namespace: &str,
        entries: impl IntoIterator<Item = (String, ConfigValue)>,
    ) -> Self {
        let mut map = Namespaces::new();
        map.insert(namespace.to_string(), entries.into_iter().collect());
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of namespaces held
    pub async fn namespace_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<ConfigValue>, ConfigStoreError> {
        let guard = self.inner.read().await;
        Ok(guard.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: ConfigValue,
    ) -> Result<(), ConfigStoreError> {
        let mut guard = self.inner.write().await;
        guard
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn entries(
        &self,
        namespace: &str,
    ) -> Result<Vec<(String, ConfigValue)>, ConfigStoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, namespace: &str) -> Result<(), ConfigStoreError> {
        let mut guard = self.inner.write().await;
        guard.remove(namespace);
        Ok(())
    }

    async fn flush(&self) -> Result<(), ConfigStoreError> {
        // Nothing buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryConfigStore::new();
        assert_eq!(store.namespace_count().await, 0);

        store.set("ns", "host", "smtp.example.com".into()).await.unwrap();
        store.set("ns", "port", 25i64.into()).await.unwrap();

        assert_eq!(store.get("ns", "port").await.unwrap(), Some(25i64.into()));
        assert_eq!(store.get("ns", "absent").await.unwrap(), None);
        assert_eq!(store.get("other", "port").await.unwrap(), None);

        let entries = store.entries("ns").await.unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["host", "port"]);
    }

    #[tokio::test]
    async fn test_memory_store_delete_namespace() {
        let store = MemoryConfigStore::new();
        store.set("a", "k", true.into()).await.unwrap();
        store.set("b", "k", false.into()).await.unwrap();

        store.delete("a").await.unwrap();
        store.delete("never-existed").await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap(), None);
        assert_eq!(store.get("b", "k").await.unwrap(), Some(false.into()));
        assert_eq!(store.namespace_count().await, 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryConfigStore::new();
        let handle = store.clone();
        store.set("ns", "k", 1i64.into()).await.unwrap();
        assert_eq!(handle.get("ns", "k").await.unwrap(), Some(1i64.into()));
    }
}
