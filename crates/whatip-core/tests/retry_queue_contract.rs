//! Contract Test: Notification Retry
//!
//! Constraints verified:
//! - A recipient that fails is queued, not dropped
//! - The next cycle retries the queued message before probing
//! - Recipients that already accepted a message never receive it again
//! - A message leaves the queue once every recipient accepted it
//! - A mailer that panics during a retry leaves the queue intact

mod common;

use std::sync::Arc;

use common::*;
use whatip_core::config::MailSettings;
use whatip_core::{CycleOutcome, SchedulerEvent, SchedulerOptions};

fn two_admins() -> whatip_core::ServiceConfig {
    let mut config = service_config();
    config.mail = MailSettings::new(
        "smtp.example.com",
        25,
        SENDER,
        vec![ADMIN.to_string(), ONCALL.to_string()],
    );
    config
}

#[tokio::test]
async fn panicking_mailer_does_not_lose_queued_mail() {
    let config = service_config();
    let store = seeded_store(&config, Some("198.51.100.1")).await;
    let mailer = RecordingMailer::new();
    mailer.fail_for(ADMIN);

    let (scheduler, _events) = scheduler_for(
        Arc::new(store),
        ScriptedProbe::new([
            ProbeStep::Body("198.51.100.9"),
            ProbeStep::Body("198.51.100.9"),
            ProbeStep::Body("198.51.100.9"),
        ]),
        mailer.clone(),
        Vec::new(),
        SchedulerOptions::default(),
    )
    .await;

    assert!(matches!(
        scheduler.run_cycle().await,
        CycleOutcome::Changed(_)
    ));
    assert_eq!(scheduler.pending_notifications().await, 1);

    mailer.set_exploding(true);
    assert!(matches!(
        scheduler.run_cycle().await,
        CycleOutcome::Unchanged(_)
    ));
    assert_eq!(scheduler.pending_notifications().await, 1);

    mailer.set_exploding(false);
    mailer.recover(ADMIN);
    scheduler.run_cycle().await;
    assert_eq!(scheduler.pending_notifications().await, 0);
    assert_eq!(mailer.sent_to(ADMIN).len(), 1);
}

#[tokio::test]
async fn failed_recipient_is_retried_until_delivered() {
    let config = service_config();
    let store = seeded_store(&config, Some("198.51.100.1")).await;
    let mailer = RecordingMailer::new();
    mailer.fail_for(ADMIN);

    let (scheduler, mut events) = scheduler_for(
        Arc::new(store),
        ScriptedProbe::new([
            ProbeStep::Body("198.51.100.9"),
            ProbeStep::Body("198.51.100.9"),
            ProbeStep::Body("198.51.100.9"),
        ]),
        mailer.clone(),
        Vec::new(),
        SchedulerOptions::default(),
    )
    .await;

    // Cycle 1: change detected, delivery to ops@ fails
    let CycleOutcome::Changed(report) = scheduler.run_cycle().await else {
        panic!("expected a change");
    };
    assert_eq!(report.pending_recipients, 1);
    assert_eq!(scheduler.pending_notifications().await, 1);
    assert!(mailer.sent().is_empty());
    assert!(drain_events(&mut events).iter().any(|e| matches!(
        e,
        SchedulerEvent::NotificationQueued { pending: 1, .. }
    )));

    // Cycle 2: still failing, message stays queued
    assert!(matches!(
        scheduler.run_cycle().await,
        CycleOutcome::Unchanged(_)
    ));
    assert_eq!(scheduler.pending_notifications().await, 1);
    assert_eq!(mailer.attempts(), vec![ADMIN, ADMIN]);

    // Cycle 3: transport recovered, drain delivers and removes the message
    mailer.recover(ADMIN);
    assert!(matches!(
        scheduler.run_cycle().await,
        CycleOutcome::Unchanged(_)
    ));
    assert_eq!(scheduler.pending_notifications().await, 0);
    let sent = mailer.sent_to(ADMIN);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("198.51.100.9"));

    // Cycle 4: nothing left to retry
    scheduler.run_cycle().await;
    assert_eq!(mailer.attempts().len(), 3);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn delivered_recipients_are_not_mailed_twice() {
    let config = two_admins();
    let store = seeded_store(&config, Some("198.51.100.1")).await;
    let mailer = RecordingMailer::new();
    mailer.fail_for(ADMIN);

    let (scheduler, _events) = scheduler_for(
        Arc::new(store),
        ScriptedProbe::answering("198.51.100.9"),
        mailer.clone(),
        Vec::new(),
        SchedulerOptions::default(),
    )
    .await;

    scheduler.run_cycle().await;
    assert_eq!(mailer.sent_to(ONCALL).len(), 1);
    assert_eq!(scheduler.pending_notifications().await, 1);

    mailer.recover(ADMIN);
    scheduler.run_cycle().await;

    assert_eq!(mailer.sent_to(ADMIN).len(), 1);
    assert_eq!(mailer.sent_to(ONCALL).len(), 1, "oncall@ already accepted the message");
    assert_eq!(scheduler.pending_notifications().await, 0);
}

#[tokio::test]
async fn queued_messages_go_out_before_new_ones() {
    let config = service_config();
    let store = seeded_store(&config, Some("198.51.100.1")).await;
    let mailer = RecordingMailer::new();
    mailer.fail_for(ADMIN);

    let (scheduler, _events) = scheduler_for(
        Arc::new(store),
        ScriptedProbe::new([
            ProbeStep::Body("198.51.100.9"),
            ProbeStep::Body("198.51.100.20"),
        ]),
        mailer.clone(),
        Vec::new(),
        SchedulerOptions::default(),
    )
    .await;

    scheduler.run_cycle().await;
    mailer.recover(ADMIN);
    scheduler.run_cycle().await;

    let bodies: Vec<String> = mailer.sent().into_iter().map(|m| m.body).collect();
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0].contains("to 198.51.100.9"));
    assert!(bodies[1].contains("to 198.51.100.20"));
    assert_eq!(scheduler.pending_notifications().await, 0);
}

#[tokio::test]
async fn queue_is_drained_even_when_the_probe_fails() {
    let config = service_config();
    let store = seeded_store(&config, Some("198.51.100.1")).await;
    let mailer = RecordingMailer::new();
    mailer.fail_for(ADMIN);

    let (scheduler, _events) = scheduler_for(
        Arc::new(store),
        ScriptedProbe::new([ProbeStep::Body("198.51.100.9"), ProbeStep::Body("")]),
        mailer.clone(),
        Vec::new(),
        SchedulerOptions::default(),
    )
    .await;

    scheduler.run_cycle().await;
    mailer.recover(ADMIN);

    assert!(matches!(
        scheduler.run_cycle().await,
        CycleOutcome::ProbeFailed(_)
    ));
    assert_eq!(mailer.sent_to(ADMIN).len(), 1);
    assert_eq!(scheduler.pending_notifications().await, 0);
}
