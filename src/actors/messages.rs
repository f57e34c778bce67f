//! Message and statistics types exchanged with actors
//!
//! Commands go to one actor over its mpsc channel and answer through a
//! oneshot. Statistics are plain cloneable values so a handle can hand out
//! copies without touching the actor.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::monitors::{AlarmOutcome, AlarmState};

/// Commands that can be sent to a MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Poll immediately instead of waiting for the next tick
    PollNow {
        respond_to: oneshot::Sender<AlarmOutcome>,
    },

    /// Get a snapshot of the alarm
    GetState {
        respond_to: oneshot::Sender<AlarmState>,
    },
}

/// Commands that can be sent to a RemediatorActor
#[derive(Debug)]
pub enum RemediatorCommand {
    GetStats {
        respond_to: oneshot::Sender<RemediatorStats>,
    },
}

/// What the driving loop did over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub ticks: u64,
    pub productive_ticks: u64,
    pub failures_injected: u64,
}

/// One remediation attempt, successful or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationRecord {
    /// Signal instant minus failure instant
    pub detection: Option<Duration>,

    /// Healthy instant minus failure instant, only for successful attempts
    pub recovery: Option<Duration>,

    /// Time spent inside the remediation operation
    pub duration: Duration,

    pub error: Option<String>,
}

impl RemediationRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediatorStats {
    pub attempts: Vec<RemediationRecord>,
}

impl RemediatorStats {
    pub fn successes(&self) -> usize {
        self.attempts.iter().filter(|a| a.succeeded()).count()
    }

    pub fn failures(&self) -> usize {
        self.attempts.len() - self.successes()
    }

    pub fn detection_latencies(&self) -> Vec<Duration> {
        self.attempts.iter().filter_map(|a| a.detection).collect()
    }

    pub fn recovery_latencies(&self) -> Vec<Duration> {
        self.attempts.iter().filter_map(|a| a.recovery).collect()
    }

    /// Durations of successful remediations
    pub fn remediation_durations(&self) -> Vec<Duration> {
        self.attempts
            .iter()
            .filter(|a| a.succeeded())
            .map(|a| a.duration)
            .collect()
    }
}
