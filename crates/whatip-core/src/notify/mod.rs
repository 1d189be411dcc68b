// # Notifications
//
// Composition, delivery and retry of administrator emails.
//
// - `message`: the queued unit and per-recipient delivery
// - `retry_queue`: undelivered messages, drained once per cycle
// - `composer`: change event + consumer results -> message
// - `pickup`: file-drop `Mailer` for a local MTA
// - `template`: `TemplateSource` implementations

pub mod composer;
pub mod message;
pub mod pickup;
pub mod retry_queue;
pub mod template;

pub use composer::NotificationComposer;
pub use message::{Delivery, DeliveryFailure, OutboundMessage};
pub use pickup::PickupDirectoryMailer;
pub use retry_queue::RetryQueue;
pub use template::{FileTemplateSource, MemoryTemplateSource};
