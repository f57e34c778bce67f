use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmEvaluation {
    Ok,
    StartsAlarming,
    Alarming,
    BackToOk,
}

impl AlarmEvaluation {
    pub fn evaluate(condition: bool, active: bool) -> AlarmEvaluation {
        match (condition, active) {
            (true, false) => AlarmEvaluation::StartsAlarming,
            (true, true) => AlarmEvaluation::Alarming,
            (false, true) => AlarmEvaluation::BackToOk,
            (false, false) => AlarmEvaluation::Ok,
        }
    }
}

/// Why a poll counts as alarming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AlarmReason {
    /// Connected metric reports 0
    Disconnected,
    /// No offset commit for at least the threshold
    OffsetLag {
        #[serde(rename = "age_ms", serialize_with = "serialize_millis")]
        age: Duration,
    },
    /// The task itself reports FAILED
    TaskFailed,
}

fn serialize_millis<S: serde::Serializer>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(crate::util::millis(*age))
}

impl fmt::Display for AlarmReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmReason::Disconnected => write!(f, "connected == 0"),
            AlarmReason::OffsetLag { age } => write!(f, "offset lag {:.1}s", age.as_secs_f64()),
            AlarmReason::TaskFailed => write!(f, "task FAILED"),
        }
    }
}

/// What a single observation did to the alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmOutcome {
    Quiet,
    /// Transition into the alarm, the signal must be raised
    Raised,
    /// A remediation finished while alarming, the signal must be raised again
    Rearmed,
    Persisting,
    Cleared,
}

impl AlarmOutcome {
    pub fn raises_signal(self) -> bool {
        matches!(self, AlarmOutcome::Raised | AlarmOutcome::Rearmed)
    }
}

/// Snapshot of a monitor's alarm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmState {
    pub active: bool,
    pub since: Option<Instant>,
    pub reasons: Vec<AlarmReason>,
    pub signals_raised: u64,
    pub polls: u64,
}

/// Edge-triggered alarm latch
///
/// The signal is raised on the transition into the alarm condition and, while
/// alarming, whenever `marker` (finished remediation attempts) grows. A
/// remediation that started and ended between two polls therefore still
/// counts as leaving the alarm. An unchanged condition never raises twice.
#[derive(Debug, Default)]
pub struct Alarm {
    active: bool,
    since: Option<Instant>,
    reasons: Vec<AlarmReason>,
    marker: u64,
    signals_raised: u64,
    polls: u64,
}

impl Alarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, reasons: Vec<AlarmReason>, marker: u64, now: Instant) -> AlarmOutcome {
        self.polls += 1;
        let condition = !reasons.is_empty();

        let outcome = match AlarmEvaluation::evaluate(condition, self.active) {
            AlarmEvaluation::Ok => AlarmOutcome::Quiet,
            AlarmEvaluation::StartsAlarming => {
                self.active = true;
                self.since = Some(now);
                self.signals_raised += 1;
                AlarmOutcome::Raised
            }
            AlarmEvaluation::Alarming if marker > self.marker => {
                self.signals_raised += 1;
                AlarmOutcome::Rearmed
            }
            AlarmEvaluation::Alarming => AlarmOutcome::Persisting,
            AlarmEvaluation::BackToOk => {
                self.active = false;
                self.since = None;
                AlarmOutcome::Cleared
            }
        };

        self.marker = self.marker.max(marker);
        self.reasons = reasons;
        outcome
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> AlarmState {
        AlarmState {
            active: self.active,
            since: self.since,
            reasons: self.reasons.clone(),
            signals_raised: self.signals_raised,
            polls: self.polls,
        }
    }
}
