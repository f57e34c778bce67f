pub mod actors;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod monitors;
pub mod notify;
pub mod remediation;
pub mod scenario;
pub mod signal;
pub mod unit;
pub mod util;

use std::time::Duration;

use tokio::time::Instant;

/// Metrics a unit exposes to the outside world
///
/// This is everything the external-metrics monitor can see. It may lag or
/// contradict the unit's real health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservableMetrics {
    /// 1 while the connector reports a broker connection
    pub connected: u8,

    /// Last time offsets were committed
    pub last_progress: Instant,

    /// Remediation attempts that ended in an error
    pub failed_remediations: u64,

    /// Remediations that brought the connector back
    pub remediations: u64,

    /// Coarse status string from the control-plane API
    pub status: &'static str,
}

impl ObservableMetrics {
    pub fn offset_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }

    /// A remediation is under way and shows up in the control plane status
    pub fn remediation_visible(&self) -> bool {
        self.status != "RUNNING"
    }

    /// Finished remediation attempts, successful or not
    pub fn finished_remediations(&self) -> u64 {
        self.failed_remediations + self.remediations
    }
}
