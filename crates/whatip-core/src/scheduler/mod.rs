//! Poll scheduler
//!
//! The Scheduler drives the whole pipeline:
//! - Retrying queued notifications
//! - Probing the external address
//! - Detecting a change against the persisted address
//! - Dispatching consumers, persisting, and notifying
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────┐
//!  timer / control │  Scheduler   │── SchedulerEvent ──▶ monitoring
//!  ───────────────▶└──────────────┘
//!                         │ one cycle at a time
//!     ┌──────────┬────────┼───────────┬──────────────┐
//!     ▼          ▼        ▼           ▼              ▼
//! ┌────────┐ ┌───────┐ ┌────────┐ ┌──────────┐ ┌────────────┐
//! │ Retry  │ │ Probe │ │Detector│ │Consumers │ │ Persistent │
//! │ Queue  │ │       │ │        │ │          │ │ State      │
//! └────────┘ └───────┘ └────────┘ └──────────┘ └────────────┘
//! ```
//!
//! ## Cycle
//!
//! 1. Drain the retry queue (stale notifications go first)
//! 2. Probe the discovery endpoint; a failure ends the cycle
//! 3. Compare against the last confirmed address
//! 4. On a change: dispatch consumers, compose the notification
//! 5. Persist the new address (a failure ends the cycle, nothing is mailed)
//! 6. Deliver the notification; undelivered recipients are queued
//!
//! ## Timing
//!
//! The first cycle fires immediately. The timer is single-shot and re-armed
//! only after a cycle has finished, so firings never overlap; the cycle lock
//! additionally skips (and logs) any concurrent call to [`Scheduler::run_cycle`].

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::address::ExternalAddress;
use crate::config::ServiceConfig;
use crate::detector::{ChangeEvent, DetectorOutcome, detect};
use crate::dispatcher::{ConsumerDispatcher, ConsumerResult};
use crate::error::{ConfigStoreError, Error, ProbeError, Result};
use crate::notify::{
    Delivery, FileTemplateSource, NotificationComposer, OutboundMessage, RetryQueue,
};
use crate::persistence::{PersistedState, PersistentState};
use crate::registry::ConsumerRegistry;
use crate::traits::{
    AddressProbe, CONSUMER_AUDIT_TEMPLATE, ExternalAddressConsumer, Mailer, TemplateSource,
};

/// Default capacity of the scheduler event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 100;

/// Events emitted by the Scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Scheduler started
    Started {
        interval: Duration,
        consumers_count: usize,
    },

    /// A cycle began
    CycleStarted,

    /// A firing was skipped because a cycle was still running
    CycleSkipped,

    /// The probe failed; the cycle ended early
    ProbeFailed { error: String },

    /// The probed address equals the persisted one
    AddressUnchanged { address: ExternalAddress },

    /// A new address was confirmed
    AddressChanged {
        previous: Option<ExternalAddress>,
        current: ExternalAddress,
    },

    /// A consumer finished
    ConsumerApplied { name: String, succeeded: bool },

    /// Persisting a new address failed
    PersistFailed { error: String },

    /// A notification was delivered to every recipient
    NotificationDelivered { message_id: u64 },

    /// A notification has recipients left and waits in the retry queue
    NotificationQueued { message_id: u64, pending: usize },

    /// Configuration was re-read
    Reloaded { interval: Duration },

    /// Running state was written to the store
    Persisted,

    /// Scheduler stopped
    Stopped { reason: String },
}

/// Operational commands accepted while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-read configuration and restart the timer
    Reload,
    /// Write the running state back to the store
    ForcePersist,
}

/// What a cycle did after a confirmed change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub event: ChangeEvent,
    pub consumer_results: Vec<ConsumerResult>,
    /// Id of the composed notification, if one was composed
    pub message_id: Option<u64>,
    /// Recipients of that notification still waiting in the retry queue
    pub pending_recipients: usize,
}

/// Result of one [`Scheduler::run_cycle`] call
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another cycle held the lock
    Skipped,
    /// The probe failed; nothing else ran after the queue drain
    ProbeFailed(ProbeError),
    /// No change
    Unchanged(ExternalAddress),
    /// A change was confirmed and persisted
    Changed(ChangeReport),
    /// A change was detected but could not be persisted
    PersistFailed {
        event: ChangeEvent,
        error: ConfigStoreError,
    },
    /// The cycle panicked
    Aborted(String),
}

/// Optional collaborators
pub struct SchedulerOptions {
    /// Template source overriding `template_dir` from the configuration
    pub templates: Option<Box<dyn TemplateSource>>,
    /// Registry used to rebuild consumers on reload
    pub registry: Option<Arc<ConsumerRegistry>>,
    pub event_channel_capacity: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            templates: None,
            registry: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// State owned by the single active cycle
struct CycleState {
    state: PersistedState,
    consumers: Vec<Box<dyn ExternalAddressConsumer>>,
    retry_queue: RetryQueue,
}

struct Inner {
    probe: Box<dyn AddressProbe>,
    mailer: Box<dyn Mailer>,
    templates: Option<Box<dyn TemplateSource>>,
    persistence: PersistentState,
    registry: Option<Arc<ConsumerRegistry>>,
    cycle: Arc<Mutex<CycleState>>,
    event_tx: mpsc::Sender<SchedulerEvent>,
}

/// Poll scheduler
///
/// Cheap to clone; clones share the same cycle state.
///
/// ## Lifecycle
///
/// 1. Create with [`Scheduler::new()`]
/// 2. Run with [`Scheduler::run_with_control()`] (or drive
///    [`Scheduler::run_cycle()`] directly)
/// 3. Stops after the shutdown signal; an in-flight cycle is allowed to finish
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a new scheduler
    ///
    /// # Parameters
    ///
    /// - `probe`: discovers the external address
    /// - `mailer`: delivers notifications
    /// - `persistence`: store-backed state
    /// - `state`: state loaded at startup
    /// - `consumers`: enabled consumers, in registration order
    ///
    /// # Returns
    ///
    /// A tuple of (scheduler, event_receiver)
    pub fn new(
        probe: Box<dyn AddressProbe>,
        mailer: Box<dyn Mailer>,
        persistence: PersistentState,
        state: PersistedState,
        consumers: Vec<Box<dyn ExternalAddressConsumer>>,
        options: SchedulerOptions,
    ) -> Result<(Self, mpsc::Receiver<SchedulerEvent>)> {
        state.config.validate()?;
        if options.event_channel_capacity == 0 {
            return Err(Error::config("event channel capacity must be > 0"));
        }

        let (tx, rx) = mpsc::channel(options.event_channel_capacity);

        let inner = Inner {
            probe,
            mailer,
            templates: options.templates,
            persistence,
            registry: options.registry,
            cycle: Arc::new(Mutex::new(CycleState {
                state,
                consumers,
                retry_queue: RetryQueue::new(),
            })),
            event_tx: tx,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            rx,
        ))
    }

    /// Run until `shutdown_rx` fires
    pub async fn run_with_shutdown(&self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let (_control_tx, control_rx) = mpsc::channel(1);
        self.run_with_control(control_rx, shutdown_rx).await
    }

    /// Run until `shutdown_rx` fires, accepting control commands
    ///
    /// A command or the shutdown signal arriving during a cycle is handled
    /// once that cycle has finished.
    pub async fn run_with_control(
        &self,
        mut control_rx: mpsc::Receiver<ControlCommand>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<()> {
        let (mut interval, consumers_count) = {
            let cycle = self.inner.cycle.lock().await;
            (cycle.state.config.watch_interval, cycle.consumers.len())
        };

        info!(
            "Scheduler started (interval {:?}, {} consumer(s))",
            interval, consumers_count
        );
        self.inner.emit(SchedulerEvent::Started {
            interval,
            consumers_count,
        });

        let mut next_fire = Instant::now();
        let mut control_open = true;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_fire) => {
                    self.run_cycle().await;
                    next_fire = Instant::now() + interval;
                    debug!("Next cycle in {:?}", interval);
                }

                command = control_rx.recv(), if control_open => {
                    match command {
                        Some(ControlCommand::Reload) => match self.reload().await {
                            Ok(new_interval) => {
                                interval = new_interval;
                                next_fire = Instant::now() + interval;
                            }
                            Err(e) => error!("Reload failed, keeping current configuration: {}", e),
                        },
                        Some(ControlCommand::ForcePersist) => {
                            if let Err(e) = self.force_persist().await {
                                error!("Persist failed: {}", e);
                            }
                        }
                        None => {
                            debug!("Control channel closed");
                            control_open = false;
                        }
                    }
                }

                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Waits for a cycle started through a clone to finish
        let _cycle = self.inner.cycle.lock().await;
        self.inner.persistence.flush().await?;
        self.inner.emit(SchedulerEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        info!("State flushed, scheduler stopped");

        Ok(())
    }

    /// Execute exactly one cycle
    ///
    /// Returns [`CycleOutcome::Skipped`] without doing anything if another
    /// cycle is running. The cycle body runs on its own task so a panic in a
    /// collaborator is reported as [`CycleOutcome::Aborted`] instead of
    /// unwinding into the caller.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let guard = match Arc::clone(&self.inner.cycle).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Previous cycle still running, skipping this firing");
                self.inner.emit(SchedulerEvent::CycleSkipped);
                return CycleOutcome::Skipped;
            }
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.execute(guard).await });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Cycle aborted: {}", e);
                CycleOutcome::Aborted(e.to_string())
            }
        }
    }

    /// Re-read configuration from the store
    ///
    /// Waits for an in-flight cycle, then swaps the configuration (and, with a
    /// registry, the consumers). The current address and the retry queue are
    /// kept. Returns the new poll interval.
    pub async fn reload(&self) -> Result<Duration> {
        let mut cycle = self.inner.cycle.lock().await;

        let config = self.inner.persistence.load_config().await?;
        if let Some(registry) = &self.inner.registry {
            cycle.consumers = registry.build_consumers(&config)?;
        }

        if config.log_file_path != cycle.state.config.log_file_path {
            warn!(
                "log_file_path changed to {}; log sinks keep {} until restart",
                config.log_file_path.display(),
                cycle.state.config.log_file_path.display()
            );
        }

        let interval = config.watch_interval;
        cycle.state.config = config;

        info!(
            "Configuration reloaded (interval {:?}, {} consumer(s))",
            interval,
            cycle.consumers.len()
        );
        self.inner.emit(SchedulerEvent::Reloaded { interval });
        Ok(interval)
    }

    /// Write the running configuration and address back to the store
    pub async fn force_persist(&self) -> Result<()> {
        let cycle = self.inner.cycle.lock().await;
        self.inner.persistence.save(&cycle.state).await?;
        info!("Configuration persisted");
        self.inner.emit(SchedulerEvent::Persisted);
        Ok(())
    }

    /// Last confirmed external address
    pub async fn current_address(&self) -> Option<ExternalAddress> {
        self.inner.cycle.lock().await.state.current_external_address()
    }

    /// Running configuration
    pub async fn config(&self) -> ServiceConfig {
        self.inner.cycle.lock().await.state.config.clone()
    }

    /// Number of messages waiting in the retry queue
    pub async fn pending_notifications(&self) -> usize {
        self.inner.cycle.lock().await.retry_queue.len()
    }
}

impl Inner {
    async fn execute(&self, mut guard: OwnedMutexGuard<CycleState>) -> CycleOutcome {
        let CycleState {
            state,
            consumers,
            retry_queue,
        } = &mut *guard;
        let timeout = state.config.operation_timeout;

        debug!("Cycle started");
        self.emit(SchedulerEvent::CycleStarted);

        {
            let delivery = Delivery::new(self.mailer.as_ref(), &state.config.mail, timeout);
            let failures = retry_queue.drain(&delivery).await;
            if !failures.is_empty() {
                warn!(
                    "{} queued email(s) still undelivered ({} recipient failure(s))",
                    retry_queue.len(),
                    failures.len()
                );
            }
        }

        let probed = match self.fetch_address(&state.config).await {
            Ok(address) => address,
            Err(e) => {
                warn!(
                    "Probe {} failed for {}: {}",
                    self.probe.probe_name(),
                    state.config.service_host,
                    e
                );
                self.emit(SchedulerEvent::ProbeFailed {
                    error: e.to_string(),
                });
                if state.config.notifications.on_probe_error {
                    let message = NotificationComposer::from_settings(&state.config.mail)
                        .compose_probe_error(&state.config.service_host, &e, Utc::now());
                    self.notify(message, &state.config, retry_queue).await;
                }
                return CycleOutcome::ProbeFailed(e);
            }
        };

        let event = match detect(state.current_external_address(), probed) {
            DetectorOutcome::Unchanged(address) => {
                debug!("External IP unchanged: {}", address);
                self.emit(SchedulerEvent::AddressUnchanged { address });
                return CycleOutcome::Unchanged(address);
            }
            DetectorOutcome::FirstObservation(current) => ChangeEvent {
                previous: None,
                current,
                timestamp: Utc::now(),
            },
            DetectorOutcome::Changed { from, to } => ChangeEvent {
                previous: Some(from),
                current: to,
                timestamp: Utc::now(),
            },
        };

        match event.previous {
            Some(previous) => info!("External IP changed from {} to {}", previous, event.current),
            None => info!("External IP observed for the first time: {}", event.current),
        }
        self.emit(SchedulerEvent::AddressChanged {
            previous: event.previous,
            current: event.current,
        });

        let consumer_results = ConsumerDispatcher::new(timeout)
            .dispatch(&event.current, consumers)
            .await;
        for result in &consumer_results {
            self.emit(SchedulerEvent::ConsumerApplied {
                name: result.consumer_name.clone(),
                succeeded: result.succeeded,
            });
        }

        let message = if event.is_first_observation() && !state.config.notifications.on_first_observation
        {
            debug!("First observation notifications are disabled");
            None
        } else {
            let template = if consumer_results.iter().any(ConsumerResult::has_audit_trail) {
                self.load_template(&state.config).await
            } else {
                None
            };
            Some(
                NotificationComposer::from_settings(&state.config.mail).compose(
                    &event,
                    &consumer_results,
                    template.as_deref(),
                ),
            )
        };

        // Only the address is written; configuration keys in the store are left
        // as an operator may have edited them
        let saved =
            match tokio::time::timeout(timeout, self.persistence.save_address(&event.current)).await {
                Ok(saved) => saved,
                Err(_) => Err(ConfigStoreError::io(format!(
                    "save timed out after {:?}",
                    timeout
                ))),
            };
        if let Err(error) = saved {
            error!("Failed to persist external IP {}: {}", event.current, error);
            self.emit(SchedulerEvent::PersistFailed {
                error: error.to_string(),
            });
            return CycleOutcome::PersistFailed { event, error };
        }
        state.record_address(event.current);
        debug!("Persisted external IP {}", event.current);

        let (message_id, pending_recipients) = match message {
            Some(message) => {
                let id = message.id();
                (Some(id), self.notify(message, &state.config, retry_queue).await)
            }
            None => (None, 0),
        };

        CycleOutcome::Changed(ChangeReport {
            event,
            consumer_results,
            message_id,
            pending_recipients,
        })
    }

    async fn fetch_address(&self, config: &ServiceConfig) -> std::result::Result<ExternalAddress, ProbeError> {
        let timeout = config.operation_timeout;
        match tokio::time::timeout(timeout, self.probe.fetch(&config.service_host)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Network(format!("timed out after {:?}", timeout))),
        }
    }

    /// Deliver a fresh message, queueing it if recipients remain
    ///
    /// Returns the number of recipients left pending.
    async fn notify(
        &self,
        mut message: OutboundMessage,
        config: &ServiceConfig,
        retry_queue: &mut RetryQueue,
    ) -> usize {
        let delivery = Delivery::new(self.mailer.as_ref(), &config.mail, config.operation_timeout);
        let failures = delivery.deliver(&mut message).await;

        if failures.is_empty() {
            info!(
                "Email sent out to: {}",
                message.recipients().join(", ")
            );
            self.emit(SchedulerEvent::NotificationDelivered {
                message_id: message.id(),
            });
            return 0;
        }

        let pending = message.pending_recipients().count();
        self.emit(SchedulerEvent::NotificationQueued {
            message_id: message.id(),
            pending,
        });
        retry_queue.enqueue(message);
        pending
    }

    async fn load_template(&self, config: &ServiceConfig) -> Option<String> {
        let timeout = config.operation_timeout;
        let loaded = match (&self.templates, &config.template_dir) {
            (Some(source), _) => load_bounded(source.as_ref(), timeout).await,
            (None, Some(dir)) => load_bounded(&FileTemplateSource::new(dir), timeout).await,
            (None, None) => return None,
        };

        match loaded {
            Ok(template) => Some(template),
            Err(e) => {
                warn!("Template unavailable, sending plain text: {}", e);
                None
            }
        }
    }

    /// Emit a scheduler event
    fn emit(&self, event: SchedulerEvent) {
        // A closed channel just means nobody is listening
        if let Err(TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

async fn load_bounded(source: &dyn TemplateSource, timeout: Duration) -> Result<String> {
    match tokio::time::timeout(timeout, source.load(CONSUMER_AUDIT_TEMPLATE)).await {
        Ok(result) => result,
        Err(_) => Err(Error::template(format!(
            "loading {} timed out after {:?}",
            CONSUMER_AUDIT_TEMPLATE, timeout
        ))),
    }
}
