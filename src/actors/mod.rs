//! Actors of one strategy lane
//!
//! Each lane runs three independent tokio tasks that only share the [`Unit`]
//! and a [`Signal`]:
//!
//! ```text
//!   DriverActor ──tick/inject──▶ Unit ◀──read── MonitorActor
//!                                 ▲                  │ raise
//!                                 │ remediate        ▼
//!                                 └────────── RemediatorActor ◀── Signal
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: monitor and remediator accept mpsc commands answered via oneshot
//! 2. **Events**: every actor emits into the shared event sink
//! 3. **Stop**: one [`StopSignal`] per scenario, watched at every suspension point
//!
//! [`Unit`]: crate::unit::Unit
//! [`Signal`]: crate::signal::Signal
//! [`StopSignal`]: crate::signal::StopSignal

pub mod driver;
pub mod messages;
pub mod monitor;
pub mod remediator;

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Wait for an actor task to finish, aborting it after `timeout`
pub async fn join_actor<T>(name: &str, mut handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("{name} ended abnormally: {e}");
            None
        }
        Err(_) => {
            warn!("{name} did not stop within {timeout:?}, aborting");
            handle.abort();
            None
        }
    }
}
