//! Notification composition
//!
//! Turns a change event and the consumer results into an [`OutboundMessage`].
//! Composition is pure: the template text (if any) is loaded by the caller
//! through a [`TemplateSource`](crate::traits::TemplateSource).

use chrono::{DateTime, Utc};
use std::fmt::Write as _;

use super::message::OutboundMessage;
use crate::config::MailSettings;
use crate::detector::ChangeEvent;
use crate::dispatcher::ConsumerResult;
use crate::error::ProbeError;
use crate::traits::DETAILS_PLACEHOLDER;

pub const SUBJECT_CHANGED: &str = "whatip - external address changed";
pub const SUBJECT_FIRST_OBSERVATION: &str = "whatip - external address observed";
pub const SUBJECT_PROBE_ERROR: &str = "whatip - discovery error";

/// Builds administrator notifications
#[derive(Debug, Clone)]
pub struct NotificationComposer {
    sender: String,
    recipients: Vec<String>,
}

impl NotificationComposer {
    pub fn new(sender: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            sender: sender.into(),
            recipients,
        }
    }

    /// Composer addressed from the running mail settings
    pub fn from_settings(settings: &MailSettings) -> Self {
        Self::new(settings.sender.clone(), settings.recipients.clone())
    }

    /// Compose the notification for a change event
    ///
    /// When at least one consumer reported an audit trail and `template`
    /// contains the details placeholder, the result is an HTML message with a
    /// table of consumer rows. Otherwise it is a plain-text notice.
    pub fn compose(
        &self,
        event: &ChangeEvent,
        results: &[ConsumerResult],
        template: Option<&str>,
    ) -> OutboundMessage {
        let subject = if event.is_first_observation() {
            SUBJECT_FIRST_OBSERVATION
        } else {
            SUBJECT_CHANGED
        };

        let html_template = template
            .filter(|t| t.contains(DETAILS_PLACEHOLDER))
            .filter(|_| results.iter().any(ConsumerResult::has_audit_trail));

        match html_template {
            Some(template) => {
                let details = audit_details(event, results);
                OutboundMessage::new(
                    self.recipients.clone(),
                    &self.sender,
                    subject,
                    template.replace(DETAILS_PLACEHOLDER, &details),
                    true,
                )
            }
            None => OutboundMessage::new(
                self.recipients.clone(),
                &self.sender,
                subject,
                plain_body(event, results),
                false,
            ),
        }
    }

    /// Compose the notification for a failed probe
    pub fn compose_probe_error(
        &self,
        endpoint: &str,
        error: &ProbeError,
        at: DateTime<Utc>,
    ) -> OutboundMessage {
        let body = format!(
            "The discovery endpoint {} could not provide the external address at {}.\n\nError: {}\n",
            endpoint,
            timestamp(at),
            error
        );
        OutboundMessage::new(
            self.recipients.clone(),
            &self.sender,
            SUBJECT_PROBE_ERROR,
            body,
            false,
        )
    }
}

fn headline(event: &ChangeEvent) -> String {
    match event.previous {
        Some(previous) => format!(
            "External IP changed from {} to {} at {}.",
            previous,
            event.current,
            timestamp(event.timestamp)
        ),
        None => format!(
            "External IP observed for the first time: {} at {}.",
            event.current,
            timestamp(event.timestamp)
        ),
    }
}

fn plain_body(event: &ChangeEvent, results: &[ConsumerResult]) -> String {
    let mut body = headline(event);
    body.push('\n');

    if !results.is_empty() {
        body.push_str("\nConsumers:\n");
        for result in results {
            match (&result.error, &result.previous_value) {
                (Some(error), _) => {
                    let _ = writeln!(body, "- {}: FAILED ({})", result.consumer_name, error);
                }
                (None, Some(previous)) => {
                    let _ = writeln!(
                        body,
                        "- {}: updated (previous: {})",
                        result.consumer_name, previous
                    );
                }
                (None, None) => {
                    let _ = writeln!(body, "- {}: updated", result.consumer_name);
                }
            }
        }
    }

    body
}

fn audit_details(event: &ChangeEvent, results: &[ConsumerResult]) -> String {
    let new_value = escape_html(&event.current.to_string());
    let mut html = format!("<p>{}</p>\n", escape_html(&headline(event)));
    html.push_str("<table>\n<tr><th>Consumer</th><th>Previous value</th><th>New value</th><th>Status</th></tr>\n");

    for result in results {
        let previous = result.previous_value.as_deref().unwrap_or("-");
        let status = match (&result.error, &result.detail) {
            (Some(error), _) => format!("failed: {}", error),
            (None, Some(detail)) => format!("updated ({})", detail),
            (None, None) => "updated".to_string(),
        };
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&result.consumer_name),
            escape_html(previous),
            new_value,
            escape_html(&status)
        );
    }

    html.push_str("</table>");
    html
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
