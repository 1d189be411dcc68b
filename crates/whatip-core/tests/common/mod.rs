//! Test doubles and common utilities for contract tests
//!
//! Every double records what it was asked to do and shares its records
//! through `Arc`, so a test can keep a clone after handing the double to the
//! scheduler.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use whatip_core::config::{ConsumerConfig, MailSettings, PARAMETERS_NAMESPACE, keys};
use whatip_core::error::{ConfigStoreError, ConsumerError, MailError, ProbeError};
use whatip_core::traits::{
    AddressProbe, AuditInfo, ConfigStore, ConfigValue, ExternalAddressConsumer, MailRequest,
    Mailer, parse_discovery_body,
};
use whatip_core::{
    ExternalAddress, MemoryConfigStore, PersistedState, PersistentState, Scheduler,
    SchedulerEvent, SchedulerOptions, ServiceConfig,
};

pub const ADMIN: &str = "ops@example.com";
pub const ONCALL: &str = "oncall@example.com";
pub const SENDER: &str = "whatip@example.com";
pub const ENDPOINT: &str = "https://ip.example.test/";

/// One scripted probe answer
#[derive(Debug, Clone)]
pub enum ProbeStep {
    /// Raw discovery body, classified like a real probe would
    Body(&'static str),
    Fail(ProbeError),
    Panic,
}

/// A probe replaying a script; the last step repeats once the script runs out
#[derive(Clone)]
pub struct ScriptedProbe {
    steps: Arc<Mutex<VecDeque<ProbeStep>>>,
    last: Arc<Mutex<Option<ProbeStep>>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn new(steps: impl IntoIterator<Item = ProbeStep>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            last: Arc::new(Mutex::new(None)),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always answer with `body`
    pub fn answering(body: &'static str) -> Self {
        Self::new([ProbeStep::Body(body)])
    }

    /// Wait `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressProbe for ScriptedProbe {
    async fn fetch(&self, _endpoint: &str) -> Result<ExternalAddress, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = {
            let mut steps = self.steps.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match steps.pop_front() {
                Some(step) => {
                    *last = Some(step.clone());
                    Some(step)
                }
                None => last.clone(),
            }
        };

        match step {
            Some(ProbeStep::Body(body)) => parse_discovery_body(body),
            Some(ProbeStep::Fail(e)) => Err(e),
            Some(ProbeStep::Panic) => panic!("probe exploded"),
            None => Err(ProbeError::Network("script exhausted".to_string())),
        }
    }

    fn probe_name(&self) -> &'static str {
        "scripted"
    }
}

/// A delivered (accepted) mail
#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    /// `current_external_ip` as stored at the moment of sending
    pub stored_address: Option<String>,
}

/// A mailer that records deliveries and rejects configured recipients
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
    attempts: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    exploding: Arc<AtomicBool>,
    observed_store: Option<MemoryConfigStore>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the stored address whenever a mail is sent
    pub fn observing(store: MemoryConfigStore) -> Self {
        Self {
            observed_store: Some(store),
            ..Self::default()
        }
    }

    pub fn fail_for(&self, recipient: &str) {
        self.failing.lock().unwrap().insert(recipient.to_string());
    }

    pub fn recover(&self, recipient: &str) {
        self.failing.lock().unwrap().remove(recipient);
    }

    /// Panic on every send until switched off
    pub fn set_exploding(&self, exploding: bool) {
        self.exploding.store(exploding, Ordering::SeqCst);
    }

    /// Accepted mails, in order
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    /// Every recipient a delivery was attempted for, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<SentMail> {
        self.sent()
            .into_iter()
            .filter(|m| m.recipient == recipient)
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, request: MailRequest<'_>) -> Result<(), MailError> {
        self.attempts
            .lock()
            .unwrap()
            .push(request.recipient.to_string());

        if self.exploding.load(Ordering::SeqCst) {
            panic!("mail client crashed while sending to {}", request.recipient);
        }

        if self.failing.lock().unwrap().contains(request.recipient) {
            return Err(MailError::Rejected {
                recipient: request.recipient.to_string(),
                reason: "550 mailbox unavailable".to_string(),
            });
        }

        let stored_address = match &self.observed_store {
            Some(store) => store
                .get(PARAMETERS_NAMESPACE, keys::CURRENT_EXTERNAL_IP)
                .await
                .unwrap()
                .and_then(|v| v.as_str().map(str::to_string)),
            None => None,
        };

        self.sent.lock().unwrap().push(SentMail {
            recipient: request.recipient.to_string(),
            subject: request.subject.to_string(),
            body: request.body.to_string(),
            is_html: request.is_html,
            stored_address,
        });
        Ok(())
    }

    fn mailer_name(&self) -> &'static str {
        "recording"
    }
}

/// A consumer that appends `name:address` to a shared journal
pub struct RecordingConsumer {
    name: String,
    fail: bool,
    explode: bool,
    previous: Option<String>,
    delay: Duration,
    journal: Arc<Mutex<Vec<String>>>,
}

impl RecordingConsumer {
    pub fn new(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            explode: false,
            previous: None,
            delay: Duration::ZERO,
            journal: Arc::clone(journal),
        }
    }

    pub fn failing(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            fail: true,
            ..Self::new(name, journal)
        }
    }

    /// Record the call, then panic
    pub fn exploding(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            explode: true,
            ..Self::new(name, journal)
        }
    }

    /// Report `previous` as the value held before each update
    pub fn reporting_previous(mut self, previous: &str) -> Self {
        self.previous = Some(previous.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn boxed(self) -> Box<dyn ExternalAddressConsumer> {
        Box::new(self)
    }
}

#[async_trait]
impl ExternalAddressConsumer for RecordingConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, address: &ExternalAddress) -> Result<AuditInfo, ConsumerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, address));

        if self.explode {
            panic!("{} lost its session", self.name);
        }
        if self.fail {
            return Err(ConsumerError::Apply(format!("{} is read-only", self.name)));
        }
        Ok(match &self.previous {
            Some(previous) => AuditInfo::with_previous(previous.clone()),
            None => AuditInfo::empty(),
        })
    }
}

/// A store whose writes can be switched off
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryConfigStore,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: MemoryConfigStore) -> Self {
        Self {
            inner,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ConfigStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(ConfigStoreError::io("disk full"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStore for FlakyStore {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<ConfigValue>, ConfigStoreError> {
        self.inner.get(namespace, key).await
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: ConfigValue,
    ) -> Result<(), ConfigStoreError> {
        self.check()?;
        self.inner.set(namespace, key, value).await
    }

    async fn entries(
        &self,
        namespace: &str,
    ) -> Result<Vec<(String, ConfigValue)>, ConfigStoreError> {
        self.inner.entries(namespace).await
    }

    async fn delete(&self, namespace: &str) -> Result<(), ConfigStoreError> {
        self.check()?;
        self.inner.delete(namespace).await
    }

    async fn flush(&self) -> Result<(), ConfigStoreError> {
        self.check()?;
        self.inner.flush().await
    }
}

/// Minimal valid configuration: one admin, long interval, short timeouts
pub fn service_config() -> ServiceConfig {
    ServiceConfig::new(
        ENDPOINT,
        MailSettings::new("smtp.example.com", 25, SENDER, vec![ADMIN.to_string()]),
        "/var/log/whatip",
    )
    .with_watch_interval(Duration::from_secs(3600))
    .with_operation_timeout(Duration::from_secs(2))
    .with_consumer(ConsumerConfig::new("firewall_file").with_setting("path", "/tmp/fw"))
}

/// A memory store holding `config` and, optionally, a last address
pub async fn seeded_store(config: &ServiceConfig, address: Option<&str>) -> MemoryConfigStore {
    let store = MemoryConfigStore::new();
    let state = match address {
        Some(text) => PersistedState::with_address(
            config.clone(),
            ExternalAddress::parse(text).unwrap(),
        ),
        None => PersistedState::new(config.clone()),
    };
    PersistentState::new(Arc::new(store.clone()))
        .save(&state)
        .await
        .unwrap();
    store
}

/// Build a scheduler the way the daemon does: load state from the store
pub async fn scheduler_for(
    store: Arc<dyn ConfigStore>,
    probe: ScriptedProbe,
    mailer: RecordingMailer,
    consumers: Vec<Box<dyn ExternalAddressConsumer>>,
    options: SchedulerOptions,
) -> (Scheduler, mpsc::Receiver<SchedulerEvent>) {
    let persistence = PersistentState::new(store);
    let state = persistence.load().await.expect("seeded state loads");
    Scheduler::new(
        Box::new(probe),
        Box::new(mailer),
        persistence,
        state,
        consumers,
        options,
    )
    .expect("scheduler construction succeeds")
}

/// Stored `current_external_ip`, if any
pub async fn stored_address(store: &dyn ConfigStore) -> Option<String> {
    store
        .get(PARAMETERS_NAMESPACE, keys::CURRENT_EXTERNAL_IP)
        .await
        .unwrap()
        .and_then(|v| v.as_str().map(str::to_string))
}

/// Everything currently buffered in the event channel
pub fn drain_events(rx: &mut mpsc::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
