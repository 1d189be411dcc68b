//! Consumer dispatch
//!
//! Runs every registered consumer once per change event. Consumers run one
//! after another in registration order, each bounded by the collaborator
//! timeout; a failing or panicking consumer is recorded and the next one
//! still runs.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{info, warn};

use crate::address::ExternalAddress;
use crate::error::{ConsumerError, panic_message};
use crate::traits::{AuditInfo, ExternalAddressConsumer};

/// Outcome of one consumer for one change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerResult {
    pub consumer_name: String,
    /// Value the consumer held before the update, if it reported one
    pub previous_value: Option<String>,
    /// Extra detail reported by the consumer
    pub detail: Option<String>,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl ConsumerResult {
    /// A successful application
    pub fn success(name: impl Into<String>, audit: AuditInfo) -> Self {
        Self {
            consumer_name: name.into(),
            previous_value: audit.previous_value,
            detail: audit.detail,
            succeeded: true,
            error: None,
        }
    }

    /// A failed application
    pub fn failure(name: impl Into<String>, error: &ConsumerError) -> Self {
        Self {
            consumer_name: name.into(),
            previous_value: None,
            detail: None,
            succeeded: false,
            error: Some(error.to_string()),
        }
    }

    /// Whether this result carries audit data worth a table row
    pub fn has_audit_trail(&self) -> bool {
        self.previous_value.is_some() || self.detail.is_some()
    }
}

/// Invokes consumers for a new address
#[derive(Debug, Clone, Copy)]
pub struct ConsumerDispatcher {
    timeout: Duration,
}

impl ConsumerDispatcher {
    /// Create a dispatcher bounding each consumer call by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Apply `address` to every consumer
    ///
    /// Returns one result per consumer, in the order the consumers were given.
    pub async fn dispatch(
        &self,
        address: &ExternalAddress,
        consumers: &[Box<dyn ExternalAddressConsumer>],
    ) -> Vec<ConsumerResult> {
        let mut results = Vec::with_capacity(consumers.len());

        for consumer in consumers {
            let name = consumer.name().to_string();
            let call = AssertUnwindSafe(consumer.apply(address)).catch_unwind();
            let outcome = match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(payload)) => Err(ConsumerError::Apply(format!(
                    "consumer panicked: {}",
                    panic_message(&*payload)
                ))),
                Err(_) => Err(ConsumerError::Timeout(self.timeout)),
            };

            let result = match outcome {
                Ok(audit) => {
                    info!(
                        "Consumer {} applied {} (previous: {})",
                        name,
                        address,
                        audit.previous_value.as_deref().unwrap_or("unknown")
                    );
                    ConsumerResult::success(name, audit)
                }
                Err(e) => {
                    warn!("Consumer {} failed to apply {}: {}", name, address, e);
                    ConsumerResult::failure(name, &e)
                }
            };
            results.push(result);
        }

        results
    }
}
