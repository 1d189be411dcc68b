// # Mailer Trait
//
// Delivers one message to one recipient. Transport details (SMTP dialogue,
// TLS negotiation, relaying through a pickup directory) belong to the
// implementation; the core only needs a per-recipient success/failure.

use async_trait::async_trait;

use crate::config::MailSettings;
use crate::error::MailError;

/// A single delivery attempt
#[derive(Debug, Clone, Copy)]
pub struct MailRequest<'a> {
    pub recipient: &'a str,
    pub sender: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub is_html: bool,
    pub use_tls: bool,
    /// Transport settings from the running configuration
    pub settings: &'a MailSettings,
}

impl MailRequest<'_> {
    /// Check the fields every transport needs
    pub fn validate(&self) -> Result<(), MailError> {
        if self.recipient.trim().is_empty() {
            return Err(MailError::InvalidMessage("recipient is empty".to_string()));
        }
        if self.sender.trim().is_empty() {
            return Err(MailError::InvalidMessage("sender is empty".to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(MailError::InvalidMessage("subject is empty".to_string()));
        }
        if self.body.is_empty() {
            return Err(MailError::InvalidMessage("body is empty".to_string()));
        }
        Ok(())
    }
}

/// Trait for mail transports
///
/// Implementations perform one delivery per call and never retry; failed
/// recipients are queued by the core and retried on the next cycle.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver the message to `request.recipient`
    async fn send(&self, request: MailRequest<'_>) -> Result<(), MailError>;

    /// Mailer name (for logging)
    fn mailer_name(&self) -> &'static str;
}
