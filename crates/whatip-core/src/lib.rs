// # whatip-core
//
// Core library for the external address watcher.
//
// ## Architecture Overview
//
// - **AddressProbe**: Trait for discovering the external address
// - **ExternalAddressConsumer**: Trait for dependent systems that must learn a new address
// - **Mailer**: Trait for delivering administrator notifications
// - **ConfigStore**: Trait for the typed key/value medium holding config and state
// - **Scheduler**: Drives drain → probe → detect → dispatch → persist → notify
// - **ConsumerRegistry**: Plugin-based registry for consumers
//
// ## Design Principles
//
// 1. **Explicit state**: configuration and the last address are passed in, never global
// 2. **One cycle at a time**: the scheduler owns all mutable state behind a single lock
// 3. **Plugin-Based**: consumers are registered by name, enabled by configuration
// 4. **Library-First**: the daemon is a thin layer over this crate

pub mod address;
pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use address::ExternalAddress;
pub use config::{ConsumerConfig, MailSettings, NotificationPolicy, ServiceConfig};
pub use detector::{ChangeEvent, DetectorOutcome, detect};
pub use dispatcher::{ConsumerDispatcher, ConsumerResult};
pub use error::{Error, Result};
pub use notify::{NotificationComposer, OutboundMessage, RetryQueue};
pub use persistence::{PersistedState, PersistentState};
pub use registry::ConsumerRegistry;
pub use scheduler::{ControlCommand, CycleOutcome, Scheduler, SchedulerEvent, SchedulerOptions};
pub use store::{FileConfigStore, MemoryConfigStore};
pub use traits::{AddressProbe, ConfigStore, ExternalAddressConsumer, Mailer};
