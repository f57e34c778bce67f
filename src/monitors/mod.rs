//! Alarm conditions for the two monitor variants
//!
//! The external-metrics monitor only sees what a managed service exposes: the
//! connected flag and the age of the last offset commit. The direct-status
//! monitor reads the task state a self-managed Connect cluster reports.
//!
//! Both treat a remediation they can see as "not alarming", so the alarm
//! closes while the connector is being repaired and the next failure is a new
//! transition.

pub mod alarm;

use std::time::Duration;

use tokio::time::Instant;

use crate::ObservableMetrics;
use crate::unit::TaskState;

pub use alarm::{Alarm, AlarmEvaluation, AlarmOutcome, AlarmReason, AlarmState};

/// `connected == 0 || offset_age >= threshold`, unless the status shows a remediation
pub fn external_reasons(metrics: &ObservableMetrics, threshold: Duration, now: Instant) -> Vec<AlarmReason> {
    let mut reasons = Vec::new();
    if metrics.remediation_visible() {
        return reasons;
    }

    if metrics.connected == 0 {
        reasons.push(AlarmReason::Disconnected);
    }

    let age = metrics.offset_age(now);
    if age >= threshold {
        reasons.push(AlarmReason::OffsetLag { age });
    }
    reasons
}

pub fn direct_reasons(task_state: TaskState) -> Vec<AlarmReason> {
    match task_state {
        TaskState::Failed => vec![AlarmReason::TaskFailed],
        _ => Vec::new(),
    }
}
