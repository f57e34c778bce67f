//! One-shot remediation signal and the scenario-wide stop signal

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

/// Single-slot flag between a monitor and its remediator
///
/// At most one request can be pending. Raising while a request is pending
/// keeps the original raise instant, so the remediator measures detection
/// latency from the first alarm.
#[derive(Debug, Default)]
pub struct Signal {
    slot: Mutex<Option<Instant>>,
    notify: Notify,
    raises: AtomicU64,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag; returns `false` if a request was already pending
    pub fn raise(&self) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(Instant::now());
        }
        self.raises.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
        true
    }

    /// Clear the flag and return when it was raised
    pub fn clear(&self) -> Option<Instant> {
        self.slot.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Number of raises that actually set the flag
    pub fn raises(&self) -> u64 {
        self.raises.load(Ordering::Relaxed)
    }

    /// Wait until the flag is set or `timeout` elapses
    ///
    /// Returns whether the flag is set. The flag is not consumed.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // register before checking, a raise in between must not be lost
        notified.as_mut().enable();

        if self.is_set() {
            return true;
        }

        let _ = tokio::time::timeout(timeout, notified).await;
        self.is_set()
    }
}

/// Stop request broadcast to every actor of a scenario
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop; returns `false` if a stop was already requested
    pub fn stop(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_raise() {
        let signal = Signal::new();
        let start = Instant::now();

        assert!(!signal.wait(Duration::from_secs(1)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_raise() {
        let signal = Arc::new(Signal::new());
        let raiser = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            raiser.raise();
        });

        let start = Instant::now();
        assert!(signal.wait(Duration::from_secs(5)).await);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_raise_is_idempotent_while_pending() {
        let signal = Signal::new();

        assert!(signal.raise());
        let first = *signal.slot.lock();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!signal.raise());

        assert_eq!(signal.raises(), 1);
        assert_eq!(signal.clear(), first);
        assert!(!signal.is_set());
        assert_eq!(signal.clear(), None);
    }

    #[tokio::test]
    async fn test_pending_raise_returns_immediately() {
        let signal = Signal::new();
        signal.raise();
        assert!(signal.wait(Duration::from_secs(3600)).await);
        // waiting does not consume the request
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let stop = StopSignal::new();
        assert!(!stop.is_stopped());

        assert!(stop.stop());
        assert!(!stop.stop());
        assert!(stop.is_stopped());

        // already stopped, resolves immediately
        stop.stopped().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_wakes_all_clones() {
        let stop = StopSignal::new();
        let mut waiters = vec![];
        for _ in 0..3 {
            let stop = stop.clone();
            waiters.push(tokio::spawn(async move { stop.stopped().await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.stop();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
