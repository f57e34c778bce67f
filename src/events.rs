//! Timestamped event stream shared by every actor
//!
//! Actors never print. They push [`Event`]s into a bounded channel and a single
//! presenter task renders them, so lines from concurrent lanes never
//! interleave mid-line. When the channel is full the event is dropped and
//! counted instead of blocking the actor.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::unit::{RemediationPhase, TaskState};

/// How loudly an event should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Emphasis {
    Dim,
    Normal,
    Success,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Produced {
        items: u64,
        total: u64,
    },
    /// No progress this tick because the unit is down
    Silence {
        offset_age_ms: u64,
    },
    FailureInjected {
        silent: bool,
    },
    MetricsPolled {
        connected: u8,
        offset_age_ms: u64,
        status: String,
    },
    StatusPolled {
        task_state: TaskState,
    },
    AlarmRaised {
        reasons: Vec<String>,
    },
    /// A remediation finished while the alarm was active and the condition holds
    AlarmRearmed {
        failed_remediations: u64,
        remediations: u64,
    },
    AlarmPersisting {
        reasons: Vec<String>,
    },
    AlarmCleared,
    RemediationStarted {
        strategy: String,
    },
    RemediationPhase {
        phase: RemediationPhase,
        detail: String,
    },
    RemediationSucceeded {
        detection_ms: Option<u64>,
        remediation_ms: u64,
        total_ms: Option<u64>,
    },
    RemediationFailed {
        error: String,
    },
    ActorStopped,
}

impl EventKind {
    pub fn emphasis(&self) -> Emphasis {
        match self {
            EventKind::Produced { .. }
            | EventKind::MetricsPolled { .. }
            | EventKind::StatusPolled { .. } => Emphasis::Dim,
            EventKind::Silence { .. }
            | EventKind::RemediationStarted { .. }
            | EventKind::RemediationPhase { .. }
            | EventKind::ActorStopped => Emphasis::Normal,
            EventKind::AlarmCleared | EventKind::RemediationSucceeded { .. } => Emphasis::Success,
            EventKind::AlarmPersisting { .. } | EventKind::AlarmRearmed { .. } => Emphasis::Warning,
            EventKind::FailureInjected { .. }
            | EventKind::AlarmRaised { .. }
            | EventKind::RemediationFailed { .. } => Emphasis::Critical,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Produced { items, total } => write!(f, "committed {items} items ({total} total)"),
            EventKind::Silence { offset_age_ms } => {
                write!(f, "no progress, last commit {offset_age_ms}ms ago")
            }
            EventKind::FailureInjected { silent: true } => {
                write!(f, "task failed, connected metric still reports 1")
            }
            EventKind::FailureInjected { silent: false } => write!(f, "task failed, broker disconnected"),
            EventKind::MetricsPolled {
                connected,
                offset_age_ms,
                status,
            } => write!(f, "connected={connected} offset_age={offset_age_ms}ms status={status}"),
            EventKind::StatusPolled { task_state } => write!(f, "task state {task_state:?}"),
            EventKind::AlarmRaised { reasons } => write!(f, "ALARM: {}", reasons.join(", ")),
            EventKind::AlarmRearmed {
                failed_remediations,
                remediations,
            } => write!(
                f,
                "still alarming after a remediation ({failed_remediations} failed, {remediations} succeeded), signalling again"
            ),
            EventKind::AlarmPersisting { reasons } => write!(f, "still alarming: {}", reasons.join(", ")),
            EventKind::AlarmCleared => write!(f, "back to OK"),
            EventKind::RemediationStarted { strategy } => write!(f, "starting {strategy} remediation"),
            EventKind::RemediationPhase { phase, detail } => write!(f, "{phase:?}: {detail}"),
            EventKind::RemediationSucceeded {
                detection_ms,
                remediation_ms,
                total_ms,
            } => {
                write!(f, "recovered, remediation took {remediation_ms}ms")?;
                if let Some(detection_ms) = detection_ms {
                    write!(f, ", detected after {detection_ms}ms")?;
                }
                if let Some(total_ms) = total_ms {
                    write!(f, ", {total_ms}ms since failure")?;
                }
                Ok(())
            }
            EventKind::RemediationFailed { error } => write!(f, "remediation failed: {error}"),
            EventKind::ActorStopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    /// Time since the sink was created
    pub elapsed_ms: u64,
    pub actor: Arc<str>,
    pub emphasis: Emphasis,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Producing side of the event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<Event>,
    origin: Instant,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let sink = Self {
            sender,
            origin: Instant::now(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, receiver)
    }

    /// Sink whose events go nowhere
    pub fn discard() -> Self {
        Self::channel(1).0
    }

    pub fn emitter(&self, actor: impl Into<Arc<str>>) -> EventEmitter {
        EventEmitter {
            sink: self.clone(),
            actor: actor.into(),
        }
    }

    pub fn emit(&self, actor: &Arc<str>, kind: EventKind) {
        let event = Event {
            timestamp: Utc::now(),
            elapsed_ms: crate::util::millis(self.origin.elapsed()),
            actor: actor.clone(),
            emphasis: kind.emphasis(),
            kind,
        };

        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // nobody is presenting anymore
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Events lost because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// An [`EventSink`] bound to one actor name
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sink: EventSink,
    actor: Arc<str>,
}

impl EventEmitter {
    pub fn emit(&self, kind: EventKind) {
        self.sink.emit(&self.actor, kind);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Presenter {
    /// One log line per event, level chosen by emphasis
    #[default]
    Tracing,
    /// One JSON object per line on stdout
    JsonLines,
}

/// Render events until every sender is gone; resolves to the number rendered
pub fn spawn_presenter(mut receiver: mpsc::Receiver<Event>, presenter: Presenter) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut rendered = 0;
        while let Some(event) = receiver.recv().await {
            match presenter {
                Presenter::Tracing => render(&event),
                Presenter::JsonLines => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => {
                        error!("could not serialize event: {e}");
                        continue;
                    }
                },
            }
            rendered += 1;
        }
        rendered
    })
}

fn render(event: &Event) {
    let secs = event.elapsed_ms as f64 / 1000.0;
    let actor = &*event.actor;
    match event.emphasis {
        Emphasis::Dim => trace!(target: "events", "[{secs:>7.2}s] {actor:<26} {}", event.kind),
        Emphasis::Normal => debug!(target: "events", "[{secs:>7.2}s] {actor:<26} {}", event.kind),
        Emphasis::Success => info!(target: "events", "[{secs:>7.2}s] {actor:<26} {}", event.kind),
        Emphasis::Warning => warn!(target: "events", "[{secs:>7.2}s] {actor:<26} {}", event.kind),
        Emphasis::Critical => error!(target: "events", "[{secs:>7.2}s] {actor:<26} {}", event.kind),
    }
}
