//! MonitorActor - polls a unit and raises the remediation signal
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick / task-state change → read metrics → Alarm::observe → Signal::raise
//!     ↑
//!     └─── Commands (PollNow, GetState), StopSignal
//! ```
//!
//! The actor never writes to the unit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, instrument, trace, warn};

use crate::events::{EventEmitter, EventKind};
use crate::monitors::{Alarm, AlarmOutcome, AlarmReason, AlarmState, direct_reasons, external_reasons};
use crate::signal::{Signal, StopSignal};
use crate::unit::{TaskState, Unit};

use super::messages::MonitorCommand;

/// What the monitor is allowed to look at
#[derive(Debug)]
pub enum MonitorVariant {
    /// Connected flag and offset age only
    ExternalMetrics { offset_threshold: Duration },

    /// Precise task state, woken on every change
    DirectStatus { task_rx: watch::Receiver<TaskState> },
}

impl MonitorVariant {
    pub fn direct(unit: &Unit) -> Self {
        MonitorVariant::DirectStatus {
            task_rx: unit.subscribe_task_state(),
        }
    }
}

/// Resolves when the watched task state changes; never for external metrics
async fn task_state_changed(variant: &mut MonitorVariant) -> bool {
    match variant {
        MonitorVariant::ExternalMetrics { .. } => std::future::pending().await,
        MonitorVariant::DirectStatus { task_rx } => task_rx.changed().await.is_ok(),
    }
}

pub struct MonitorActor {
    /// Unit under observation, read only
    unit: Arc<Unit>,

    /// External metrics or direct task status
    variant: MonitorVariant,

    /// Time between two scheduled polls
    poll_interval: Duration,

    /// Edge-triggered alarm latch
    alarm: Alarm,

    /// Raised for the remediator on every alarm transition
    signal: Arc<Signal>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Scenario-wide stop
    stop: StopSignal,

    /// Poll and alarm events
    events: EventEmitter,
}

impl MonitorActor {
    pub fn new(
        unit: Arc<Unit>,
        variant: MonitorVariant,
        poll_interval: Duration,
        signal: Arc<Signal>,
        command_rx: mpsc::Receiver<MonitorCommand>,
        stop: StopSignal,
        events: EventEmitter,
    ) -> Self {
        Self {
            unit,
            variant,
            poll_interval,
            alarm: Alarm::new(),
            signal,
            command_rx,
            stop,
            events,
        }
    }

    /// Run until the stop signal fires; returns the final alarm state
    #[instrument(skip(self), fields(unit = %self.unit.name()))]
    pub async fn run(mut self) -> AlarmState {
        debug!("starting monitor actor");

        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);

        loop {
            tokio::select! {
                biased;

                _ = self.stop.stopped() => {
                    debug!("stop requested");
                    break;
                }

                true = task_state_changed(&mut self.variant) => {
                    trace!("task state changed");
                    self.poll();
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        MonitorCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            let outcome = self.poll();
                            let _ = respond_to.send(outcome);
                        }

                        MonitorCommand::GetState { respond_to } => {
                            let _ = respond_to.send(self.alarm.state());
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.poll();
                }
            }
        }

        self.events.emit(EventKind::ActorStopped);
        debug!("monitor actor stopped");
        self.alarm.state()
    }

    fn poll(&mut self) -> AlarmOutcome {
        let now = Instant::now();
        let metrics = self.unit.metrics();

        let reasons = match &mut self.variant {
            MonitorVariant::ExternalMetrics { offset_threshold } => {
                self.events.emit(EventKind::MetricsPolled {
                    connected: metrics.connected,
                    offset_age_ms: crate::util::millis(metrics.offset_age(now)),
                    status: metrics.status.to_string(),
                });
                external_reasons(&metrics, *offset_threshold, now)
            }
            MonitorVariant::DirectStatus { task_rx } => {
                let task_state = *task_rx.borrow_and_update();
                self.events.emit(EventKind::StatusPolled { task_state });
                direct_reasons(task_state)
            }
        };

        let outcome = self
            .alarm
            .observe(reasons.clone(), metrics.finished_remediations(), now);

        match outcome {
            AlarmOutcome::Quiet => {}
            AlarmOutcome::Raised => {
                warn!("alarm raised: {}", describe(&reasons));
                self.signal.raise();
                self.events.emit(EventKind::AlarmRaised {
                    reasons: reasons.iter().map(ToString::to_string).collect(),
                });
            }
            AlarmOutcome::Rearmed => {
                warn!(
                    "still alarming after a remediation ({} failed so far), signalling again",
                    metrics.failed_remediations
                );
                self.signal.raise();
                self.events.emit(EventKind::AlarmRearmed {
                    failed_remediations: metrics.failed_remediations,
                    remediations: metrics.remediations,
                });
            }
            AlarmOutcome::Persisting => {
                self.events.emit(EventKind::AlarmPersisting {
                    reasons: reasons.iter().map(ToString::to_string).collect(),
                });
            }
            AlarmOutcome::Cleared => {
                debug!("alarm cleared");
                self.events.emit(EventKind::AlarmCleared);
            }
        }

        outcome
    }
}

fn describe(reasons: &[AlarmReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Handle for controlling a MonitorActor
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn a new monitor actor
    pub fn spawn(
        unit: Arc<Unit>,
        variant: MonitorVariant,
        poll_interval: Duration,
        signal: Arc<Signal>,
        stop: StopSignal,
        events: EventEmitter,
    ) -> (Self, JoinHandle<AlarmState>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = MonitorActor::new(unit, variant, poll_interval, signal, cmd_rx, stop, events);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Poll immediately
    pub async fn poll_now(&self) -> Result<AlarmOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::PollNow { respond_to: tx })
            .await
            .context("monitor is not running")?;

        rx.await.context("monitor dropped the request")
    }

    pub async fn state(&self) -> Result<AlarmState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetState { respond_to: tx })
            .await
            .context("monitor is not running")?;

        rx.await.context("monitor dropped the request")
    }
}
