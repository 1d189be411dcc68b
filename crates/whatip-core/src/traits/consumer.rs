// # External Address Consumer Trait
//
// Defines the interface for dependent systems that must learn the new
// external address (firewall allow-lists, passive FTP external address
// settings, ...).
//
// ## Implementations
//
// - Firewall configuration file: `whatip-consumer-file` crate

use async_trait::async_trait;

use crate::address::ExternalAddress;
use crate::error::ConsumerError;

/// Audit trail returned by a consumer after applying an address
///
/// Used purely to enrich the notification. The consumer is the source of
/// truth for its own state; nothing here is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditInfo {
    /// Human-readable value the consumer held before the update
    pub previous_value: Option<String>,
    /// Free-form detail (e.g. which sites were touched)
    pub detail: Option<String>,
}

impl AuditInfo {
    /// Audit info without a recorded previous value
    pub fn empty() -> Self {
        Self::default()
    }

    /// Audit info carrying the previous value seen by the consumer
    pub fn with_previous(previous_value: impl Into<String>) -> Self {
        Self {
            previous_value: Some(previous_value.into()),
            detail: None,
        }
    }

    /// Attach a detail string
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Trait for dependent-system updaters
///
/// # Rules
///
/// - One `apply` call per change event; the scheduler never retries a
///   consumer within a cycle.
/// - Must not touch the config store or the retry queue.
/// - Errors are reported, not panicked; the dispatcher records them as
///   failed rows and carries on with the next consumer.
#[async_trait]
pub trait ExternalAddressConsumer: Send + Sync {
    /// Stable name used in configuration and notifications
    fn name(&self) -> &str;

    /// Push the new address into the dependent system
    async fn apply(&self, address: &ExternalAddress) -> Result<AuditInfo, ConsumerError>;
}

/// Helper trait for constructing consumers from configuration
pub trait ConsumerFactory: Send + Sync {
    /// Create a consumer instance
    ///
    /// # Parameters
    ///
    /// - `config`: the consumer's entry from the `consumers` namespace
    fn create(
        &self,
        config: &crate::config::ConsumerConfig,
    ) -> Result<Box<dyn ExternalAddressConsumer>, crate::Error>;
}
