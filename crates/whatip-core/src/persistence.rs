//! Durable service state
//!
//! [`PersistentState`] maps [`PersistedState`] onto a [`ConfigStore`]. It is
//! read at startup and on reload. The scheduler writes the address alone after
//! a confirmed change (before any mail goes out) and the whole state only on
//! an explicit persist command.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::address::ExternalAddress;
use crate::config::{CONSUMERS_NAMESPACE, PARAMETERS_NAMESPACE, ServiceConfig, keys};
use crate::error::ConfigStoreError;
use crate::traits::{ConfigStore, ConfigValue};

/// Everything that must survive a restart
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    current_external_address: Option<ExternalAddress>,
    /// Operative configuration
    pub config: ServiceConfig,
}

impl PersistedState {
    /// State for a service that has not observed an address yet
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            current_external_address: None,
            config,
        }
    }

    /// State with a known last address
    pub fn with_address(config: ServiceConfig, address: ExternalAddress) -> Self {
        Self {
            current_external_address: Some(address),
            config,
        }
    }

    /// Last confirmed external address
    pub fn current_external_address(&self) -> Option<ExternalAddress> {
        self.current_external_address
    }

    /// Record a newly confirmed address
    ///
    /// Returns `false` (and leaves the state untouched) when `address` equals
    /// the current one. There is no way to clear the address once set.
    pub fn record_address(&mut self, address: ExternalAddress) -> bool {
        if self.current_external_address == Some(address) {
            return false;
        }
        self.current_external_address = Some(address);
        true
    }
}

/// Store-backed persistence for [`PersistedState`]
#[derive(Clone)]
pub struct PersistentState {
    store: Arc<dyn ConfigStore>,
}

impl PersistentState {
    /// Wrap a config store
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Read configuration and last address
    ///
    /// A stored address that does not parse is logged and treated as absent
    /// rather than failing startup; the next probe will overwrite it.
    pub async fn load(&self) -> Result<PersistedState, ConfigStoreError> {
        self.store.refresh().await?;
        let parameters = self.namespace(PARAMETERS_NAMESPACE).await?;
        let config = self.parse_config(&parameters).await?;

        let current_external_address = match parameters.get(keys::CURRENT_EXTERNAL_IP) {
            None => None,
            Some(ConfigValue::Str(text)) if text.trim().is_empty() => None,
            Some(ConfigValue::Str(text)) => match ExternalAddress::parse(text) {
                Ok(address) => Some(address),
                Err(e) => {
                    tracing::warn!(
                        "Ignoring stored {} '{}': {}",
                        keys::CURRENT_EXTERNAL_IP,
                        text,
                        e
                    );
                    None
                }
            },
            Some(_) => {
                return Err(ConfigStoreError::WrongType {
                    key: keys::CURRENT_EXTERNAL_IP.to_string(),
                    expected: "string",
                });
            }
        };

        Ok(PersistedState {
            current_external_address,
            config,
        })
    }

    /// Re-read only the configuration (used by the reload command)
    ///
    /// The store is refreshed first so edits made while the service runs
    /// are seen.
    pub async fn load_config(&self) -> Result<ServiceConfig, ConfigStoreError> {
        self.store.refresh().await?;
        let parameters = self.namespace(PARAMETERS_NAMESPACE).await?;
        self.parse_config(&parameters).await
    }

    /// Write configuration and last address, then flush
    ///
    /// An absent address is never written, so a stored value is never
    /// cleared by a save.
    pub async fn save(&self, state: &PersistedState) -> Result<(), ConfigStoreError> {
        let (mut parameters, consumer_settings) = state.config.to_store_entries();
        if let Some(address) = state.current_external_address {
            parameters.push((
                keys::CURRENT_EXTERNAL_IP.to_string(),
                address.to_string().into(),
            ));
        }

        self.store.set_all(PARAMETERS_NAMESPACE, parameters).await?;
        if !consumer_settings.is_empty() {
            self.store
                .set_all(CONSUMERS_NAMESPACE, consumer_settings)
                .await?;
        }
        self.store.flush().await
    }

    /// Write only the last address, then flush
    pub async fn save_address(&self, address: &ExternalAddress) -> Result<(), ConfigStoreError> {
        self.store
            .set(
                PARAMETERS_NAMESPACE,
                keys::CURRENT_EXTERNAL_IP,
                address.to_string().into(),
            )
            .await?;
        self.store.flush().await
    }

    /// Persist pending store writes
    pub async fn flush(&self) -> Result<(), ConfigStoreError> {
        self.store.flush().await
    }

    /// Remove everything the service ever stored
    pub async fn purge(&self) -> Result<(), ConfigStoreError> {
        self.store.delete(PARAMETERS_NAMESPACE).await?;
        self.store.delete(CONSUMERS_NAMESPACE).await?;
        self.store.flush().await
    }

    async fn namespace(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, ConfigValue>, ConfigStoreError> {
        Ok(self.store.entries(namespace).await?.into_iter().collect())
    }

    async fn parse_config(
        &self,
        parameters: &BTreeMap<String, ConfigValue>,
    ) -> Result<ServiceConfig, ConfigStoreError> {
        let consumer_settings = self.namespace(CONSUMERS_NAMESPACE).await?;
        ServiceConfig::from_store_entries(parameters, &consumer_settings)
    }
}

impl std::fmt::Debug for PersistentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentState").finish_non_exhaustive()
    }
}
