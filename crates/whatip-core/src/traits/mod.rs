//! Collaborator traits
//!
//! The abstract interfaces the pipeline is written against.
//!
//! - [`AddressProbe`]: discover the current external address
//! - [`ExternalAddressConsumer`]: push a new address into a dependent system
//! - [`Mailer`]: deliver one notification to one recipient
//! - [`ConfigStore`]: typed key/value medium for configuration and state
//! - [`TemplateSource`]: load notification templates

pub mod config_store;
pub mod consumer;
pub mod mailer;
pub mod probe;
pub mod template;

pub use config_store::{ConfigStore, ConfigValue};
pub use consumer::{AuditInfo, ConsumerFactory, ExternalAddressConsumer};
pub use mailer::{MailRequest, Mailer};
pub use probe::{AddressProbe, parse_discovery_body};
pub use template::{CONSUMER_AUDIT_TEMPLATE, DETAILS_PLACEHOLDER, TemplateSource};
