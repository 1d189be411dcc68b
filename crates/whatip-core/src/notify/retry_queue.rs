//! Retry queue for undelivered notifications
//!
//! Messages stay queued until every originally-addressed recipient has
//! accepted them. There is no expiry and no backoff: each poll cycle drains
//! the queue exactly once, ahead of any new work.

use std::collections::VecDeque;
use tracing::{debug, info};

use super::message::{Delivery, DeliveryFailure, OutboundMessage};

/// In-memory queue of partially delivered messages
#[derive(Debug, Default)]
pub struct RetryQueue {
    messages: VecDeque<OutboundMessage>,
}

impl RetryQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for the next drain
    ///
    /// A message that is already fully delivered is not queued. Enqueueing a
    /// message instance that is already queued (same id) is a no-op.
    pub fn enqueue(&mut self, message: OutboundMessage) {
        if message.is_delivered() {
            debug!("Email {} already delivered, not queueing", message.id());
            return;
        }
        if self.messages.iter().any(|m| m.id() == message.id()) {
            debug!("Email {} already queued", message.id());
            return;
        }
        info!(
            "Queued email {} for retry ({} recipient(s) pending)",
            message.id(),
            message.pending_recipients().count()
        );
        self.messages.push_back(message);
    }

    /// Retry every queued message once
    ///
    /// Messages are updated in place, so the queue is never emptied while a
    /// delivery is in flight. Delivered messages are dropped afterwards, the
    /// rest keep their place in line. Returns the recipients that failed again.
    pub async fn drain(&mut self, delivery: &Delivery<'_>) -> Vec<DeliveryFailure> {
        if self.messages.is_empty() {
            return Vec::new();
        }

        debug!("Retrying {} queued email(s)", self.messages.len());
        let mut failures = Vec::new();

        for message in self.messages.iter_mut() {
            failures.extend(delivery.deliver(message).await);
        }

        self.messages.retain(|message| {
            if message.is_delivered() {
                info!(
                    "Email {} delivered to all recipients after {} attempt(s)",
                    message.id(),
                    message.attempts()
                );
                false
            } else {
                true
            }
        });

        failures
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Queued messages, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailSettings;
    use crate::error::MailError;
    use crate::traits::{MailRequest, Mailer};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Switchable {
        down: Mutex<bool>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Switchable {
        fn set_down(&self, down: bool) {
            *self.down.lock().unwrap() = down;
        }
    }

    #[async_trait]
    impl Mailer for Switchable {
        async fn send(&self, request: MailRequest<'_>) -> Result<(), MailError> {
            if *self.down.lock().unwrap() {
                return Err(MailError::Transport("connection refused".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((request.recipient.to_string(), request.subject.to_string()));
            Ok(())
        }

        fn mailer_name(&self) -> &'static str {
            "switchable"
        }
    }

    fn settings() -> MailSettings {
        MailSettings::new(
            "smtp.example.com",
            25,
            "whatip@example.com",
            vec!["ops@example.com".to_string()],
        )
    }

    fn message(subject: &str) -> OutboundMessage {
        OutboundMessage::new(
            vec!["ops@example.com".to_string(), "oncall@example.com".to_string()],
            "whatip@example.com",
            subject,
            "External IP changed to: 198.51.100.9",
            false,
        )
    }

    #[tokio::test]
    async fn test_same_content_twice_is_delivered_once_per_instance() {
        let mailer = Switchable::default();
        mailer.set_down(true);
        let settings = settings();
        let delivery = Delivery::new(&mailer, &settings, Duration::from_secs(1));

        let mut queue = RetryQueue::new();
        let mut first = message("changed");
        let mut second = message("changed");
        assert_eq!(delivery.deliver(&mut first).await.len(), 2);
        assert_eq!(delivery.deliver(&mut second).await.len(), 2);
        queue.enqueue(first.clone());
        queue.enqueue(first);
        queue.enqueue(second);
        assert_eq!(queue.len(), 2);

        mailer.set_down(false);
        assert!(queue.drain(&delivery).await.is_empty());
        assert!(queue.is_empty());

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(
            sent.iter().filter(|(r, _)| r == "ops@example.com").count(),
            2
        );

        drop(sent);
        assert!(queue.drain(&delivery).await.is_empty());
        assert_eq!(mailer.sent.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_drain_keeps_message_and_counts_attempts() {
        let mailer = Switchable::default();
        mailer.set_down(true);
        let settings = settings();
        let delivery = Delivery::new(&mailer, &settings, Duration::from_secs(1));

        let mut queue = RetryQueue::new();
        let mut msg = message("changed");
        delivery.deliver(&mut msg).await;
        queue.enqueue(msg);

        let failures = queue.drain(&delivery).await;
        assert_eq!(failures.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().attempts(), 2);
    }

    struct Exploding;

    #[async_trait]
    impl Mailer for Exploding {
        async fn send(&self, _request: MailRequest<'_>) -> Result<(), MailError> {
            panic!("smtp client state corrupted");
        }

        fn mailer_name(&self) -> &'static str {
            "exploding"
        }
    }

    #[tokio::test]
    async fn test_panicking_mailer_keeps_message_queued() {
        let mailer = Switchable::default();
        mailer.set_down(true);
        let settings = settings();

        let mut queue = RetryQueue::new();
        let mut msg = message("changed");
        Delivery::new(&mailer, &settings, Duration::from_secs(1))
            .deliver(&mut msg)
            .await;
        let id = msg.id();
        queue.enqueue(msg);

        let failures = queue
            .drain(&Delivery::new(&Exploding, &settings, Duration::from_secs(1)))
            .await;
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| matches!(
            &f.error,
            MailError::Transport(reason) if reason.contains("smtp client state corrupted")
        )));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().id(), id);

        mailer.set_down(false);
        assert!(
            queue
                .drain(&Delivery::new(&mailer, &settings, Duration::from_secs(1)))
                .await
                .is_empty()
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_delivered_message_is_not_queued() {
        let mailer = Switchable::default();
        let settings = settings();
        let delivery = Delivery::new(&mailer, &settings, Duration::from_secs(1));

        let mut msg = message("changed");
        assert!(delivery.deliver(&mut msg).await.is_empty());

        let mut queue = RetryQueue::new();
        queue.enqueue(msg);
        assert!(queue.is_empty());
    }
}
