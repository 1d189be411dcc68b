//! Error types for the external address watcher
//!
//! Each collaborator gets its own error enum so the cycle can decide what a
//! failure means locally (end the cycle, record a failed row, queue a message).
//! [`Error`] wraps all of them for callers that just want to propagate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for whatip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while discovering the external address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The discovery endpoint answered with a blank body
    #[error("discovery endpoint returned an empty response")]
    EmptyResponse,

    /// The body was neither a bare address nor the known JSON envelope
    #[error("unparseable discovery response: {0}")]
    Unparseable(String),

    /// Connectivity, HTTP status, transport or timeout failure
    #[error("network error: {0}")]
    Network(String),
}

/// Failures reported by an [`ExternalAddressConsumer`](crate::traits::ExternalAddressConsumer)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// The consumer tried and failed to apply the address
    #[error("{0}")]
    Apply(String),

    /// The consumer cannot represent this address (e.g. IPv6 in an IPv4-only field)
    #[error("unsupported address: {0}")]
    Unsupported(String),

    /// The consumer did not answer within the collaborator timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Per-recipient mail delivery failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// The transport refused this recipient
    #[error("recipient {recipient} rejected: {reason}")]
    Rejected { recipient: String, reason: String },

    /// The transport itself failed (connection, I/O)
    #[error("mail transport error: {0}")]
    Transport(String),

    /// The message is missing a required field
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Delivery did not finish within the collaborator timeout
    #[error("mail delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Failures of the configuration store collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigStoreError {
    /// A required key is not set
    #[error("missing value {namespace}/{key}")]
    Missing { namespace: String, key: String },

    /// A key holds a value of the wrong type
    #[error("value {key} has the wrong type, expected {expected}")]
    WrongType { key: String, expected: &'static str },

    /// A key holds a value that fails validation
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    /// Reading or writing the backing medium failed
    #[error("config store I/O error: {0}")]
    Io(String),

    /// The backing medium could not be decoded
    #[error("config store corrupted: {0}")]
    Corrupt(String),
}

impl ConfigStoreError {
    /// Create a missing-value error
    pub fn missing(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Missing {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Create a validation error
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an I/O error
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}

/// Text carried by a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Address discovery errors
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Consumer errors
    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    /// Mail errors
    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    /// Configuration store errors
    #[error("config store error: {0}")]
    ConfigStore(#[from] ConfigStoreError),

    /// Configuration errors outside the store (registry, validation)
    #[error("configuration error: {0}")]
    Config(String),

    /// Template resource errors
    #[error("template error: {0}")]
    Template(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
