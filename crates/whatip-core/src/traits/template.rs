// # Template Source Trait
//
// Loads notification templates. Loading is a collaborator concern so the
// composer stays a pure string operation; a source that cannot produce a
// template makes the composer fall back to plain text.

use async_trait::async_trait;

/// Name of the HTML template used for consumer audit tables
pub const CONSUMER_AUDIT_TEMPLATE: &str = "consumer_audit";

/// Placeholder replaced with the rendered audit table
pub const DETAILS_PLACEHOLDER: &str = "{ADDITIONAL_DETAILS}";

#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Load the template called `name`
    async fn load(&self, name: &str) -> Result<String, crate::Error>;
}
