use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, trace, warn};

use crate::config::{BackendFaults, ResolvedBackendConfig};
use crate::error::BackendError;
use crate::notify::Notifier;

use super::{ConnectorSpec, ConnectorState, RemediationBackend};

#[derive(Debug, Clone, Copy)]
enum Record {
    Running,
    /// `None` means the deletion never finishes
    Deleting { until: Option<Instant> },
}

/// In-memory control plane with fixed latencies and scripted faults
pub struct SimulatedBackend {
    delete_latency: Duration,
    create_latency: Duration,
    connectors: Mutex<HashMap<String, Record>>,
    faults: Mutex<BackendFaults>,
    created: AtomicU64,
    notifier: Arc<dyn Notifier>,
}

impl SimulatedBackend {
    pub fn new(delete_latency: Duration, create_latency: Duration, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            delete_latency,
            create_latency,
            connectors: Mutex::new(HashMap::new()),
            faults: Mutex::new(BackendFaults::default()),
            created: AtomicU64::new(0),
            notifier,
        }
    }

    /// Backend seeded with the configured connector and faults
    pub fn from_config(config: &ResolvedBackendConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(config.delete_latency, config.create_latency, notifier)
            .with_connector(&config.connector_id)
            .with_faults(config.faults)
    }

    pub fn with_connector(self, id: &str) -> Self {
        self.connectors.lock().insert(id.to_string(), Record::Running);
        self
    }

    pub fn with_faults(self, faults: BackendFaults) -> Self {
        *self.faults.lock() = faults;
        self
    }

    /// Script additional failing calls
    pub fn add_faults(&self, faults: BackendFaults) {
        let mut current = self.faults.lock();
        current.describe += faults.describe;
        current.delete += faults.delete;
        current.create += faults.create;
        current.stall_deletion += faults.stall_deletion;
    }

    /// Current state without consuming faults
    pub fn state_of(&self, id: &str) -> ConnectorState {
        let mut connectors = self.connectors.lock();
        Self::resolve_state(&mut connectors, id)
    }

    /// Number of connectors created so far
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    fn resolve_state(connectors: &mut HashMap<String, Record>, id: &str) -> ConnectorState {
        match connectors.get(id).copied() {
            None => ConnectorState::Absent,
            Some(Record::Running) => ConnectorState::Running,
            Some(Record::Deleting { until: Some(until) }) if until <= Instant::now() => {
                connectors.remove(id);
                ConnectorState::Absent
            }
            Some(Record::Deleting { .. }) => ConnectorState::Deleting,
        }
    }
}

/// Consume one scripted failure of a kind, if any is left
fn take_fault(counter: &mut u32) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

#[async_trait]
impl RemediationBackend for SimulatedBackend {
    #[instrument(skip(self))]
    async fn describe(&self, id: &str) -> Result<ConnectorState, BackendError> {
        if take_fault(&mut self.faults.lock().describe) {
            warn!("describe failed (scripted)");
            return Err(BackendError::Describe {
                id: id.to_string(),
                details: "throttling exception".to_string(),
            });
        }

        let state = Self::resolve_state(&mut self.connectors.lock(), id);
        trace!("{id} is {state:?}");
        Ok(state)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let stall = {
            let mut faults = self.faults.lock();
            if take_fault(&mut faults.delete) {
                warn!("delete failed (scripted)");
                return Err(BackendError::Delete {
                    id: id.to_string(),
                    details: "conflict exception".to_string(),
                });
            }
            take_fault(&mut faults.stall_deletion)
        };

        let mut connectors = self.connectors.lock();
        match connectors.get(id).copied() {
            None => Err(BackendError::Delete {
                id: id.to_string(),
                details: "connector not found".to_string(),
            }),
            Some(Record::Deleting { .. }) => Ok(()),
            Some(Record::Running) => {
                let until = (!stall).then(|| Instant::now() + self.delete_latency);
                connectors.insert(id.to_string(), Record::Deleting { until });
                debug!("deletion of {id} accepted");
                Ok(())
            }
        }
    }

    #[instrument(skip(self))]
    async fn create(&self, spec: &ConnectorSpec) -> Result<String, BackendError> {
        if take_fault(&mut self.faults.lock().create) {
            warn!("create failed (scripted)");
            return Err(BackendError::Create {
                name: spec.name.clone(),
                details: "service quota exceeded".to_string(),
            });
        }

        sleep(self.create_latency).await;

        let generation = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{}#{generation}", spec.name);
        self.connectors.lock().insert(id.clone(), Record::Running);
        debug!("created {id}");
        Ok(id)
    }

    async fn notify(&self, message: &str) -> bool {
        self.notifier.notify(message).await
    }
}
