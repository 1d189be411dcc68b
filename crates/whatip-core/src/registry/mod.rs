//! Plugin-based consumer registry
//!
//! Consumers are registered by name at startup and instantiated from the
//! `consumers` list of the configuration, so enabling a consumer is a matter
//! of configuration rather than a hardcoded branch.
//!
//! ## Registration
//!
//! Implementations register themselves from their own crate:
//!
//! ```rust,ignore
//! // In whatip-consumer-file
//! pub fn register(registry: &ConsumerRegistry) {
//!     registry.register_consumer("firewall_file", Box::new(FirewallFileFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::config::{ConsumerConfig, ServiceConfig};
use crate::error::{Error, Result};
use crate::traits::{ConsumerFactory, ExternalAddressConsumer};

/// Registry of consumer factories
///
/// Uses interior mutability so a shared reference can register and create.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: RwLock<HashMap<String, Box<dyn ConsumerFactory>>>,
}

impl ConsumerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer factory under `name`
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register_consumer(&self, name: impl Into<String>, factory: Box<dyn ConsumerFactory>) {
        let mut consumers = self
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        consumers.insert(name.into(), factory);
    }

    /// Create one consumer from its configuration entry
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ExternalAddressConsumer>)`: Created consumer instance
    /// - `Err(Error)`: If the name is not registered or creation fails
    pub fn create_consumer(&self, config: &ConsumerConfig) -> Result<Box<dyn ExternalAddressConsumer>> {
        let consumers = self
            .consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = consumers
            .get(&config.name)
            .ok_or_else(|| Error::config(format!("Unknown consumer: {}", config.name)))?;

        factory.create(config)
    }

    /// Create every enabled consumer, in configuration order
    pub fn build_consumers(
        &self,
        config: &ServiceConfig,
    ) -> Result<Vec<Box<dyn ExternalAddressConsumer>>> {
        config
            .consumers
            .iter()
            .map(|consumer| self.create_consumer(consumer))
            .collect()
    }

    /// List all registered consumer names, sorted
    pub fn list_consumers(&self) -> Vec<String> {
        let consumers = self
            .consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = consumers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a consumer name is registered
    pub fn has_consumer(&self, name: &str) -> bool {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("consumers", &self.list_consumers())
            .finish()
    }
}
