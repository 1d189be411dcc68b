//! Outbound notification messages and their delivery
//!
//! A message is addressed to every administrator at once but delivered one
//! recipient at a time. It remembers which recipients already accepted it so
//! a retry never mails the same person twice.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::MailSettings;
use crate::error::{MailError, panic_message};
use crate::traits::{MailRequest, Mailer};

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A notification awaiting (complete) delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    id: u64,
    recipients: Vec<String>,
    delivered: BTreeSet<String>,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub body_is_html: bool,
    pub created_at: DateTime<Utc>,
    attempts: u32,
}

impl OutboundMessage {
    /// Create a message for `recipients`
    ///
    /// Duplicate recipients are collapsed, keeping the first occurrence.
    pub fn new(
        recipients: Vec<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        body_is_html: bool,
    ) -> Self {
        let mut seen = BTreeSet::new();
        let recipients = recipients
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect();

        Self {
            id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
            recipients,
            delivered: BTreeSet::new(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            body_is_html,
            created_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Process-unique message identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Every recipient the message was originally addressed to
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Recipients that have not accepted the message yet
    pub fn pending_recipients(&self) -> impl Iterator<Item = &str> {
        self.recipients
            .iter()
            .filter(|r| !self.delivered.contains(*r))
            .map(String::as_str)
    }

    /// Whether every original recipient accepted the message
    pub fn is_delivered(&self) -> bool {
        self.pending_recipients().next().is_none()
    }

    /// Number of delivery rounds attempted so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn mark_delivered(&mut self, recipient: &str) {
        self.delivered.insert(recipient.to_string());
    }
}

/// One recipient that did not accept a message in a delivery round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub message_id: u64,
    pub recipient: String,
    pub error: MailError,
}

/// A mailer bound to the running mail settings and collaborator timeout
#[derive(Clone, Copy)]
pub struct Delivery<'a> {
    mailer: &'a dyn Mailer,
    settings: &'a MailSettings,
    timeout: Duration,
}

impl<'a> Delivery<'a> {
    pub fn new(mailer: &'a dyn Mailer, settings: &'a MailSettings, timeout: Duration) -> Self {
        Self {
            mailer,
            settings,
            timeout,
        }
    }

    /// Attempt delivery to every pending recipient of `message`
    ///
    /// Recipients are tried one after another; a failure is recorded and the
    /// next recipient is still tried. A panicking mailer counts as a transport
    /// failure for that recipient. Returns the recipients that failed.
    pub async fn deliver(&self, message: &mut OutboundMessage) -> Vec<DeliveryFailure> {
        message.attempts += 1;

        let pending: Vec<String> = message.pending_recipients().map(str::to_string).collect();
        let mut failures = Vec::new();

        for recipient in pending {
            let request = MailRequest {
                recipient: &recipient,
                sender: &message.sender,
                subject: &message.subject,
                body: &message.body,
                is_html: message.body_is_html,
                use_tls: self.settings.enable_ssl,
                settings: self.settings,
            };

            let send = AssertUnwindSafe(self.mailer.send(request)).catch_unwind();
            let outcome = match tokio::time::timeout(self.timeout, send).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(payload)) => Err(MailError::Transport(format!(
                    "{} mailer panicked: {}",
                    self.mailer.mailer_name(),
                    panic_message(&*payload)
                ))),
                Err(_) => Err(MailError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(()) => {
                    info!(
                        "Email {} sent to {} via {} (attempt {})",
                        message.id,
                        recipient,
                        self.mailer.mailer_name(),
                        message.attempts
                    );
                    message.mark_delivered(&recipient);
                }
                Err(error) => {
                    warn!(
                        "Email {} failed to send to {} (attempt {}): {}",
                        message.id, recipient, message.attempts, error
                    );
                    failures.push(DeliveryFailure {
                        message_id: message.id,
                        recipient,
                        error,
                    });
                }
            }
        }

        failures
    }
}
