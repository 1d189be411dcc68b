//! Address change detection
//!
//! Pure comparison of the last confirmed address against a freshly probed
//! one. Comparison is on [`ExternalAddress`], i.e. the canonical binary form.

use chrono::{DateTime, Utc};

use crate::address::ExternalAddress;

/// Result of comparing a probed address with the last known one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorOutcome {
    /// No previous address was known
    FirstObservation(ExternalAddress),
    /// Probed address equals the previous one
    Unchanged(ExternalAddress),
    /// Probed address differs from the previous one
    Changed {
        from: ExternalAddress,
        to: ExternalAddress,
    },
}

impl DetectorOutcome {
    /// Whether the outcome must be persisted and dispatched
    pub fn is_change(&self) -> bool {
        !matches!(self, DetectorOutcome::Unchanged(_))
    }

    /// Turn a change into the event consumed by dispatch and composition
    pub fn into_event(self, timestamp: DateTime<Utc>) -> Option<ChangeEvent> {
        match self {
            DetectorOutcome::FirstObservation(current) => Some(ChangeEvent {
                previous: None,
                current,
                timestamp,
            }),
            DetectorOutcome::Changed { from, to } => Some(ChangeEvent {
                previous: Some(from),
                current: to,
                timestamp,
            }),
            DetectorOutcome::Unchanged(_) => None,
        }
    }
}

/// A confirmed address change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub previous: Option<ExternalAddress>,
    pub current: ExternalAddress,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// True when there was no previous address
    pub fn is_first_observation(&self) -> bool {
        self.previous.is_none()
    }
}

/// Compare `probed` against `previous`
pub fn detect(previous: Option<ExternalAddress>, probed: ExternalAddress) -> DetectorOutcome {
    match previous {
        None => DetectorOutcome::FirstObservation(probed),
        Some(prev) if prev == probed => DetectorOutcome::Unchanged(probed),
        Some(prev) => DetectorOutcome::Changed {
            from: prev,
            to: probed,
        },
    }
}
