// # File Config Store
//
// File-based implementation of ConfigStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Corruption detection: JSON validated on load
// - Automatic backup: `.backup` holds the last known good file
// - Recovery: falls back to the backup if the main file is corrupted
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "namespaces": {
//     "whatip/parameters": {
//       "service_host": "https://api.ipify.org",
//       "smtp_port": 25,
//       "enable_ssl": false,
//       "current_external_ip": "203.0.113.7"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::ConfigStoreError;
use crate::traits::config_store::{ConfigStore, ConfigValue};

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

type Namespaces = BTreeMap<String, BTreeMap<String, ConfigValue>>;

/// File-based config store with crash recovery
///
/// Every mutation is written through immediately so the last observed
/// address survives a crash right after it was recorded.
///
/// # Example
///
/// ```rust,no_run
/// use whatip_core::store::FileConfigStore;
/// use whatip_core::traits::ConfigStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileConfigStore::new("/var/lib/whatip/store.json").await?;
///     store
///         .set("whatip/parameters", "current_external_ip", "203.0.113.7".into())
///         .await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    namespaces: Namespaces,
    dirty: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    #[serde(default)]
    namespaces: Namespaces,
}

impl FileConfigStore {
    /// Create or load a file config store
    ///
    /// 1. Load the existing file
    /// 2. If it is corrupted, load the backup and restore it
    /// 3. If both are unusable, start empty
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigStoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                ConfigStoreError::io(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let namespaces = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                namespaces,
                dirty: false,
            })),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the cached namespaces with the file content
    ///
    /// Skipped while unflushed changes are pending; the cache is then newer
    /// than the file and the next write brings them back in line.
    async fn sync_from_disk(&self, state: &mut FileState) -> Result<(), ConfigStoreError> {
        if state.dirty {
            tracing::debug!("Unflushed changes pending, not re-reading {}", self.path.display());
            return Ok(());
        }
        state.namespaces = Self::load_with_recovery(&self.path).await?;
        Ok(())
    }

    async fn load_with_recovery(path: &Path) -> Result<Namespaces, ConfigStoreError> {
        match Self::load(path).await {
            Ok(namespaces) => {
                tracing::debug!("Loaded config store: {} namespaces", namespaces.len());
                Ok(namespaces)
            }
            Err(ConfigStoreError::Corrupt(reason)) => {
                tracing::warn!(
                    "Config store appears corrupted: {}. Attempting recovery from backup.",
                    reason
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with an empty store.");
                    return Ok(Namespaces::new());
                }

                match Self::load(&backup_path).await {
                    Ok(namespaces) => {
                        tracing::info!(
                            "Recovered config store from backup: {} namespaces",
                            namespaces.len()
                        );
                        if let Err(e) = fs::copy(&backup_path, path).await {
                            tracing::error!("Failed to restore store file from backup: {}", e);
                        }
                        Ok(namespaces)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unusable: {}. Starting with an empty store.",
                            backup_err
                        );
                        Ok(Namespaces::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<Namespaces, ConfigStoreError> {
        if !path.exists() {
            tracing::debug!("Config store file does not exist: {}", path.display());
            return Ok(Namespaces::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            ConfigStoreError::io(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content).map_err(|e| {
            ConfigStoreError::Corrupt(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Config store version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.namespaces)
    }

    /// Write the whole store atomically
    async fn write(&self) -> Result<(), ConfigStoreError> {
        let mut guard = self.state.write().await;

        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            namespaces: guard.namespaces.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ConfigStoreError::io(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut out = fs::File::create(&temp_path).await.map_err(|e| {
                ConfigStoreError::io(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.write_all(json.as_bytes()).await.map_err(|e| {
                ConfigStoreError::io(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.sync_all().await.map_err(|e| {
                ConfigStoreError::io(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            ConfigStoreError::io(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        guard.dirty = false;
        tracing::trace!("Config store written: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<ConfigValue>, ConfigStoreError> {
        let guard = self.state.read().await;
        Ok(guard
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: ConfigValue,
    ) -> Result<(), ConfigStoreError> {
        {
            let mut guard = self.state.write().await;
            self.sync_from_disk(&mut guard).await?;
            guard
                .namespaces
                .entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), value);
            guard.dirty = true;
        }
        self.write().await
    }

    async fn set_all(
        &self,
        namespace: &str,
        entries: Vec<(String, ConfigValue)>,
    ) -> Result<(), ConfigStoreError> {
        {
            let mut guard = self.state.write().await;
            self.sync_from_disk(&mut guard).await?;
            let ns = guard.namespaces.entry(namespace.to_string()).or_default();
            ns.extend(entries);
            guard.dirty = true;
        }
        self.write().await
    }

    async fn entries(
        &self,
        namespace: &str,
    ) -> Result<Vec<(String, ConfigValue)>, ConfigStoreError> {
        let guard = self.state.read().await;
        Ok(guard
            .namespaces
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, namespace: &str) -> Result<(), ConfigStoreError> {
        {
            let mut guard = self.state.write().await;
            self.sync_from_disk(&mut guard).await?;
            if guard.namespaces.remove(namespace).is_none() {
                return Ok(());
            }
            guard.dirty = true;
        }
        self.write().await
    }

    async fn refresh(&self) -> Result<(), ConfigStoreError> {
        let mut guard = self.state.write().await;
        self.sync_from_disk(&mut guard).await?;
        tracing::debug!("Config store re-read from {}", self.path.display());
        Ok(())
    }

    async fn flush(&self) -> Result<(), ConfigStoreError> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write().await } else { Ok(()) }
    }
}
