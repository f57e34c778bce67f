//! Control-plane contract used by the delete/recreate remediation
//!
//! The real implementation would talk to a managed connector service. This
//! crate only ships [`SimulatedBackend`], which models latencies and scripted
//! failures.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

pub use simulated::SimulatedBackend;

/// Connector lifecycle state as the control plane reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorState {
    Running,
    Creating,
    Deleting,
    /// The connector no longer exists
    Absent,
}

/// Parameters needed to create a connector again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub name: String,
}

/// Calls the slow-path remediation issues, in order: describe, delete,
/// describe until absent, create, notify
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; one backend may serve several
/// remediators.
#[async_trait]
pub trait RemediationBackend: Send + Sync {
    async fn describe(&self, id: &str) -> Result<ConnectorState, BackendError>;

    /// Request deletion; completion is observed through `describe`
    async fn delete(&self, id: &str) -> Result<(), BackendError>;

    /// Create a connector and return its id
    async fn create(&self, spec: &ConnectorSpec) -> Result<String, BackendError>;

    /// Deliver an operator notification; returns whether it was delivered
    async fn notify(&self, message: &str) -> bool;
}
