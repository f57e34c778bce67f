//! RemediatorActor - waits for the signal and repairs the unit
//!
//! ## Message Flow
//!
//! ```text
//! Signal::wait (bounded) → clear → fast/slow remediate → stats
//!     ↑
//!     └─── Commands (GetStats), StopSignal
//! ```
//!
//! Remediations run inline in the actor loop, so at most one is in flight per
//! unit. A stop that arrives mid-remediation is observed once it finishes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::RemediationBackend;
use crate::error::RemediationError;
use crate::events::{EventEmitter, EventKind};
use crate::remediation::RecreateSettings;
use crate::signal::{Signal, StopSignal};
use crate::unit::Unit;
use crate::util::millis;

use super::messages::{RemediationRecord, RemediatorCommand, RemediatorStats};

/// How the remediator repairs its unit
#[derive(Clone)]
pub enum RemediationStrategy {
    /// Restart the failed task only
    TaskRestart { restart_duration: Duration },

    /// Delete the connector and create it again
    Recreate {
        backend: Arc<dyn RemediationBackend>,
        settings: RecreateSettings,
    },
}

impl RemediationStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            RemediationStrategy::TaskRestart { .. } => "task restart",
            RemediationStrategy::Recreate { .. } => "delete/recreate",
        }
    }
}

pub struct RemediatorActor {
    /// Unit to repair
    unit: Arc<Unit>,

    /// Task restart or delete/recreate
    strategy: RemediationStrategy,

    /// Raised by the monitor, cleared here before each attempt
    signal: Arc<Signal>,

    /// Upper bound on a single signal wait, so stops are noticed
    wait_step: Duration,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<RemediatorCommand>,

    /// Publishes the attempt history after every attempt
    stats_tx: watch::Sender<RemediatorStats>,

    /// Scenario-wide stop
    stop: StopSignal,

    /// Remediation events
    events: EventEmitter,
}

impl RemediatorActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        unit: Arc<Unit>,
        strategy: RemediationStrategy,
        signal: Arc<Signal>,
        wait_step: Duration,
        command_rx: mpsc::Receiver<RemediatorCommand>,
        stats_tx: watch::Sender<RemediatorStats>,
        stop: StopSignal,
        events: EventEmitter,
    ) -> Self {
        Self {
            unit,
            strategy,
            signal,
            wait_step,
            command_rx,
            stats_tx,
            stop,
            events,
        }
    }

    #[instrument(skip(self), fields(unit = %self.unit.name()))]
    pub async fn run(mut self) -> RemediatorStats {
        debug!("starting remediator actor ({})", self.strategy.label());

        while !self.stop.is_stopped() {
            tokio::select! {
                biased;

                _ = self.stop.stopped() => {
                    debug!("stop requested");
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RemediatorCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats_tx.borrow().clone());
                        }
                    }
                }

                raised = self.signal.wait(self.wait_step) => {
                    if raised {
                        self.remediate().await;
                    }
                }
            }
        }

        self.events.emit(EventKind::ActorStopped);
        debug!("remediator actor stopped");
        self.stats_tx.borrow().clone()
    }

    async fn remediate(&mut self) {
        let Some(raised_at) = self.signal.clear() else {
            return;
        };

        let failed_at = self.unit.failed_at();
        let detection = failed_at.map(|at| raised_at.saturating_duration_since(at));

        self.events.emit(EventKind::RemediationStarted {
            strategy: self.strategy.label().to_string(),
        });

        let started = Instant::now();
        let result = match &self.strategy {
            RemediationStrategy::TaskRestart { restart_duration } => {
                self.unit.fast_remediate(*restart_duration).await
            }
            RemediationStrategy::Recreate { backend, settings } => self
                .unit
                .slow_remediate(backend.as_ref(), settings, &self.events)
                .await
                .map(|report| {
                    debug!("{} replaced by {}", report.old_id, report.new_id);
                }),
        };
        let finished = Instant::now();
        let duration = finished - started;

        let record = match result {
            Ok(()) => {
                let recovery = failed_at.map(|at| finished.saturating_duration_since(at));
                info!(
                    "unit recovered after {:?} of remediation (detection {:?})",
                    duration, detection
                );
                self.events.emit(EventKind::RemediationSucceeded {
                    detection_ms: detection.map(millis),
                    remediation_ms: millis(duration),
                    total_ms: recovery.map(millis),
                });
                RemediationRecord {
                    detection,
                    recovery,
                    duration,
                    error: None,
                }
            }
            Err(e @ RemediationError::AlreadyInFlight { .. }) => {
                // someone else owns the unit; close the attempt without counting it
                warn!("{e}");
                self.events.emit(EventKind::RemediationFailed {
                    error: e.to_string(),
                });
                return;
            }
            Err(e) => {
                error!("remediation failed: {e}");
                self.events.emit(EventKind::RemediationFailed {
                    error: e.to_string(),
                });
                RemediationRecord {
                    detection,
                    recovery: None,
                    duration,
                    error: Some(e.to_string()),
                }
            }
        };

        self.stats_tx.send_modify(|stats| stats.attempts.push(record));
    }
}

/// Handle for controlling a RemediatorActor
#[derive(Clone)]
pub struct RemediatorHandle {
    sender: mpsc::Sender<RemediatorCommand>,
    stats_rx: watch::Receiver<RemediatorStats>,
}

impl RemediatorHandle {
    /// Spawn a new remediator actor
    pub fn spawn(
        unit: Arc<Unit>,
        strategy: RemediationStrategy,
        signal: Arc<Signal>,
        wait_step: Duration,
        stop: StopSignal,
        events: EventEmitter,
    ) -> (Self, JoinHandle<RemediatorStats>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (stats_tx, stats_rx) = watch::channel(RemediatorStats::default());

        let actor = RemediatorActor::new(unit, strategy, signal, wait_step, cmd_rx, stats_tx, stop, events);
        let task = tokio::spawn(actor.run());

        let handle = Self {
            sender: cmd_tx,
            stats_rx,
        };
        (handle, task)
    }

    /// Ask the actor for its statistics
    pub async fn stats(&self) -> Result<RemediatorStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RemediatorCommand::GetStats { respond_to: tx })
            .await
            .context("remediator is not running")?;

        rx.await.context("remediator dropped the request")
    }

    /// Statistics as last published, available even if the actor is stuck
    pub fn latest_stats(&self) -> RemediatorStats {
        self.stats_rx.borrow().clone()
    }
}
