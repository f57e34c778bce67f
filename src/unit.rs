//! The simulated connector
//!
//! A [`Unit`] produces work while healthy and can be pushed into a failed
//! state by the failure injector. All of its mutable state sits behind one
//! mutex so compound updates (health plus connected metric plus counters) are
//! never observed half-done. No lock is held across an `.await`.

use std::ops::RangeInclusive;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, trace};

use crate::ObservableMetrics;
use crate::backend::RemediationBackend;
use crate::error::RemediationError;
use crate::events::EventEmitter;
use crate::remediation::{RecreateReport, RecreateSettings, recreate_connector};

/// What a remediation is currently doing to the unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationPhase {
    /// Task-level restart
    TaskRestart,
    /// Waiting for the control plane to delete the connector
    Deleting,
    /// Waiting for the replacement connector to come up
    Creating,
}

/// Ground-truth health of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Failed,
    Remediating(RemediationPhase),
}

/// Precise task status, as a self-managed Connect REST API reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Running,
    Failed,
    Restarting,
    Deleting,
    Creating,
}

impl From<Health> for TaskState {
    fn from(health: Health) -> Self {
        match health {
            Health::Healthy => TaskState::Running,
            Health::Failed => TaskState::Failed,
            Health::Remediating(RemediationPhase::TaskRestart) => TaskState::Restarting,
            Health::Remediating(RemediationPhase::Deleting) => TaskState::Deleting,
            Health::Remediating(RemediationPhase::Creating) => TaskState::Creating,
        }
    }
}

/// Copy of the unit's ground truth, for reports and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSnapshot {
    pub health: Health,
    pub connected: u8,
    pub last_progress: Instant,
    pub total_work_items: u64,
    pub remediation_count: u64,
    pub failed_remediations: u64,
    pub failed_at: Option<Instant>,
    pub connector_id: String,
}

#[derive(Debug)]
struct UnitState {
    health: Health,
    connected: u8,
    last_progress: Instant,
    total_work_items: u64,
    remediation_count: u64,
    failed_remediations: u64,
    failed_at: Option<Instant>,
    connector_id: String,
}

#[derive(Debug)]
pub struct Unit {
    name: String,
    work_range: RangeInclusive<u64>,
    state: Mutex<UnitState>,
    task_state_tx: watch::Sender<TaskState>,
}

impl Unit {
    pub fn new(
        name: impl Into<String>,
        connector_id: impl Into<String>,
        work_range: RangeInclusive<u64>,
    ) -> Self {
        let (task_state_tx, _) = watch::channel(TaskState::Running);

        Self {
            name: name.into(),
            work_range,
            state: Mutex::new(UnitState {
                health: Health::Healthy,
                connected: 1,
                last_progress: Instant::now(),
                total_work_items: 0,
                remediation_count: 0,
                failed_remediations: 0,
                failed_at: None,
                connector_id: connector_id.into(),
            }),
            task_state_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produce one tick worth of work
    ///
    /// Returns the number of items committed, 0 unless the unit is healthy.
    pub fn tick<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let mut state = self.state.lock();
        if state.health != Health::Healthy {
            return 0;
        }

        let items = rng.gen_range(self.work_range.clone());
        state.total_work_items += items;
        state.last_progress = Instant::now();
        items
    }

    /// Stop the task and drop the connected metric in one step
    ///
    /// Returns `false` (and changes nothing) unless the unit is healthy.
    pub fn inject_failure(&self) -> bool {
        self.fail(true)
    }

    /// Stop the task while the connected metric keeps reporting 1
    pub fn inject_silent_failure(&self) -> bool {
        self.fail(false)
    }

    fn fail(&self, disconnect: bool) -> bool {
        let mut state = self.state.lock();
        if state.health != Health::Healthy {
            return false;
        }

        state.health = Health::Failed;
        if disconnect {
            state.connected = 0;
        }
        state.failed_at = Some(Instant::now());
        self.publish(&state);
        debug!(unit = %self.name, disconnect, "failure injected");
        true
    }

    /// Override the connected metric without touching health
    pub fn set_observable_connected(&self, connected: bool) {
        self.state.lock().connected = u8::from(connected);
    }

    /// Restart only the failed task
    #[instrument(skip(self), fields(unit = %self.name))]
    pub async fn fast_remediate(&self, restart_duration: Duration) -> Result<(), RemediationError> {
        self.begin_remediation(RemediationPhase::TaskRestart)?;
        sleep(restart_duration).await;
        self.complete_remediation(None);
        Ok(())
    }

    /// Delete the whole connector and create it again through `backend`
    ///
    /// On error the unit goes back to `Failed` and the failed remediation is
    /// counted; the caller decides whether to try again.
    #[instrument(skip_all, fields(unit = %self.name))]
    pub async fn slow_remediate(
        &self,
        backend: &dyn RemediationBackend,
        settings: &RecreateSettings,
        events: &EventEmitter,
    ) -> Result<RecreateReport, RemediationError> {
        recreate_connector(self, backend, settings, events).await
    }

    /// Move into `Remediating(phase)`
    ///
    /// Fails if another remediation already holds the unit.
    pub fn begin_remediation(&self, phase: RemediationPhase) -> Result<(), RemediationError> {
        let mut state = self.state.lock();
        if let Health::Remediating(_) = state.health {
            return Err(RemediationError::AlreadyInFlight {
                unit: self.name.clone(),
            });
        }

        state.health = Health::Remediating(phase);
        state.connected = 0;
        self.publish(&state);
        trace!(unit = %self.name, ?phase, "remediation started");
        Ok(())
    }

    /// Advance an in-flight remediation to its next phase
    pub fn set_phase(&self, phase: RemediationPhase) {
        let mut state = self.state.lock();
        if let Health::Remediating(_) = state.health {
            state.health = Health::Remediating(phase);
            self.publish(&state);
        }
    }

    /// Back to healthy; returns the new remediation count
    ///
    /// The restarted task commits its starting offset, so the offset age
    /// starts over from here.
    pub fn complete_remediation(&self, connector_id: Option<String>) -> u64 {
        let mut state = self.state.lock();
        state.health = Health::Healthy;
        state.connected = 1;
        state.last_progress = Instant::now();
        state.remediation_count += 1;
        state.failed_at = None;
        if let Some(id) = connector_id {
            state.connector_id = id;
        }
        self.publish(&state);
        state.remediation_count
    }

    /// Give up on an in-flight remediation, the unit stays down
    pub fn abort_remediation(&self) {
        let mut state = self.state.lock();
        state.health = Health::Failed;
        state.connected = 0;
        state.failed_remediations += 1;
        if state.failed_at.is_none() {
            state.failed_at = Some(Instant::now());
        }
        self.publish(&state);
    }

    fn publish(&self, state: &UnitState) {
        self.task_state_tx.send_replace(state.health.into());
    }

    /// Status as the managed control plane reports it
    ///
    /// A failed task still reads `RUNNING`; only an ongoing remediation is
    /// visible from the outside.
    pub fn observable_status(&self) -> &'static str {
        status_string(self.state.lock().health)
    }

    pub fn task_state(&self) -> TaskState {
        self.state.lock().health.into()
    }

    pub fn subscribe_task_state(&self) -> watch::Receiver<TaskState> {
        self.task_state_tx.subscribe()
    }

    pub fn metrics(&self) -> ObservableMetrics {
        let state = self.state.lock();
        ObservableMetrics {
            connected: state.connected,
            last_progress: state.last_progress,
            failed_remediations: state.failed_remediations,
            remediations: state.remediation_count,
            status: status_string(state.health),
        }
    }

    pub fn snapshot(&self) -> UnitSnapshot {
        let state = self.state.lock();
        UnitSnapshot {
            health: state.health,
            connected: state.connected,
            last_progress: state.last_progress,
            total_work_items: state.total_work_items,
            remediation_count: state.remediation_count,
            failed_remediations: state.failed_remediations,
            failed_at: state.failed_at,
            connector_id: state.connector_id.clone(),
        }
    }

    pub fn health(&self) -> Health {
        self.state.lock().health
    }

    pub fn is_healthy(&self) -> bool {
        self.health() == Health::Healthy
    }

    pub fn connector_id(&self) -> String {
        self.state.lock().connector_id.clone()
    }

    pub fn failed_at(&self) -> Option<Instant> {
        self.state.lock().failed_at
    }

    pub fn total_work_items(&self) -> u64 {
        self.state.lock().total_work_items
    }

    pub fn remediation_count(&self) -> u64 {
        self.state.lock().remediation_count
    }
}

fn status_string(health: Health) -> &'static str {
    match health {
        Health::Healthy | Health::Failed => "RUNNING",
        Health::Remediating(RemediationPhase::TaskRestart) => "RESTARTING",
        Health::Remediating(RemediationPhase::Deleting) => "DELETING",
        Health::Remediating(RemediationPhase::Creating) => "CREATING",
    }
}
