//! Delete/recreate procedure behind the slow-path strategy
//!
//! Every failure path notifies the operator with a severity prefix and leaves
//! the unit `Failed` with its failed-remediation counter bumped, so the
//! monitor can signal again.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, trace, warn};

use crate::backend::{ConnectorSpec, ConnectorState, RemediationBackend};
use crate::config::ResolvedBackendConfig;
use crate::error::{BackendError, RemediationError};
use crate::events::{EventEmitter, EventKind};
use crate::unit::{RemediationPhase, Unit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecreateSettings {
    /// What to create once the old connector is gone
    pub spec: ConnectorSpec,
    pub deletion_poll_interval: Duration,
    pub deletion_timeout: Duration,
}

impl From<&ResolvedBackendConfig> for RecreateSettings {
    fn from(config: &ResolvedBackendConfig) -> Self {
        Self {
            spec: ConnectorSpec {
                name: config.connector_id.clone(),
            },
            deletion_poll_interval: config.deletion_poll_interval,
            deletion_timeout: config.deletion_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecreateReport {
    /// State reported before anything was deleted
    pub previous_state: ConnectorState,
    pub old_id: String,
    pub new_id: String,
    /// Whether the success notification went out
    pub notified: bool,
}

#[instrument(skip_all, fields(unit = %unit.name()))]
pub async fn recreate_connector(
    unit: &Unit,
    backend: &dyn RemediationBackend,
    settings: &RecreateSettings,
    events: &EventEmitter,
) -> Result<RecreateReport, RemediationError> {
    unit.begin_remediation(RemediationPhase::Deleting)?;
    let old_id = unit.connector_id();

    match run_steps(unit, backend, settings, events, &old_id).await {
        Ok(report) => {
            unit.complete_remediation(Some(report.new_id.clone()));
            Ok(report)
        }
        Err(e) => {
            warn!("recreate of {old_id} failed: {e}");
            backend.notify(&failure_message(&old_id, &e)).await;
            unit.abort_remediation();
            Err(e)
        }
    }
}

async fn run_steps(
    unit: &Unit,
    backend: &dyn RemediationBackend,
    settings: &RecreateSettings,
    events: &EventEmitter,
    old_id: &str,
) -> Result<RecreateReport, RemediationError> {
    let previous_state = backend.describe(old_id).await?;
    events.emit(EventKind::RemediationPhase {
        phase: RemediationPhase::Deleting,
        detail: format!("{old_id} is {previous_state:?}"),
    });

    match previous_state {
        ConnectorState::Absent => debug!("{old_id} already gone, skipping delete"),
        ConnectorState::Deleting => debug!("{old_id} already deleting"),
        ConnectorState::Running | ConnectorState::Creating => backend.delete(old_id).await?,
    }

    let waited = wait_until_absent(backend, old_id, settings).await?;
    unit.set_phase(RemediationPhase::Creating);
    events.emit(EventKind::RemediationPhase {
        phase: RemediationPhase::Creating,
        detail: format!("{old_id} deleted after {}ms", crate::util::millis(waited)),
    });

    let new_id = backend.create(&settings.spec).await?;
    events.emit(EventKind::RemediationPhase {
        phase: RemediationPhase::Creating,
        detail: format!("created {new_id}"),
    });

    let notified = backend
        .notify(&format!(
            "[RECOVERED] connector {old_id} ({previous_state:?} before recovery) was recreated as {new_id}"
        ))
        .await;

    Ok(RecreateReport {
        previous_state,
        old_id: old_id.to_string(),
        new_id,
        notified,
    })
}

/// Poll `describe` until the connector is gone
///
/// Errors while polling are logged and polling continues; only the deadline
/// ends the wait.
async fn wait_until_absent(
    backend: &dyn RemediationBackend,
    id: &str,
    settings: &RecreateSettings,
) -> Result<Duration, RemediationError> {
    let start = Instant::now();
    loop {
        match backend.describe(id).await {
            Ok(ConnectorState::Absent) => return Ok(start.elapsed()),
            Ok(state) => trace!("{id} still {state:?}"),
            Err(e) => warn!("describe failed while waiting for deletion: {e}"),
        }

        let waited = start.elapsed();
        if waited >= settings.deletion_timeout {
            return Err(RemediationError::DeletionTimeout {
                id: id.to_string(),
                waited,
            });
        }
        sleep(settings.deletion_poll_interval).await;
    }
}

fn failure_message(id: &str, error: &RemediationError) -> String {
    match error {
        RemediationError::TransientBackend(BackendError::Describe { details, .. }) => {
            format!("[WARN] could not describe connector {id}: {details}")
        }
        RemediationError::TransientBackend(BackendError::Delete { details, .. }) => {
            format!("[ERROR] could not delete connector {id}: {details}")
        }
        RemediationError::TransientBackend(BackendError::Create { details, .. }) => format!(
            "[CRITICAL] connector {id} was deleted but could not be created again: {details}. Manual action needed"
        ),
        RemediationError::DeletionTimeout { waited, .. } => format!(
            "[ERROR] connector {id} was still deleting after {}s",
            waited.as_secs()
        ),
        RemediationError::AlreadyInFlight { unit } => {
            format!("[WARN] remediation for {unit} already in progress")
        }
    }
}
