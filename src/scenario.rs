//! Scenario runner
//!
//! Starts one lane (driver, monitor, remediator around one unit) per
//! configured strategy, lets them run for the configured duration, stops them
//! together and aggregates their results into a [`ScenarioReport`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

use crate::actors::driver::{DriverActor, FailureInjector};
use crate::actors::join_actor;
use crate::actors::messages::{DriverStats, RemediatorStats};
use crate::actors::monitor::{MonitorHandle, MonitorVariant};
use crate::actors::remediator::{RemediationStrategy, RemediatorHandle};
use crate::backend::{RemediationBackend, SimulatedBackend};
use crate::config::{
    MonitorSettings, RemediationSettings, ResolvedBackendConfig, ResolvedScenarioConfig,
    ResolvedStrategy, StrategyKind,
};
use crate::events::EventSink;
use crate::monitors::AlarmState;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::remediation::RecreateSettings;
use crate::signal::{Signal, StopSignal};
use crate::unit::Unit;
use crate::util::millis;

/// Backend for a recreate strategy when none was supplied
fn default_backend(config: &ResolvedBackendConfig) -> Result<Arc<dyn RemediationBackend>> {
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier::new()),
    };
    Ok(Arc::new(SimulatedBackend::from_config(config, notifier)))
}

/// The actors of one strategy
struct Lane {
    name: String,
    kind: StrategyKind,
    unit: Arc<Unit>,
    signal: Arc<Signal>,
    monitor: MonitorHandle,
    remediator: RemediatorHandle,
    driver_task: JoinHandle<DriverStats>,
    monitor_task: JoinHandle<AlarmState>,
    remediator_task: JoinHandle<RemediatorStats>,
}

impl Lane {
    fn spawn(
        strategy: &ResolvedStrategy,
        remediation: RemediationStrategy,
        config: &ResolvedScenarioConfig,
        seed: u64,
        stop: &StopSignal,
        events: &EventSink,
    ) -> Self {
        let name = strategy.name.clone();
        let connector_id = match &strategy.remediation {
            RemediationSettings::Recreate(backend) => backend.connector_id.clone(),
            RemediationSettings::TaskRestart { .. } => format!("{name}/connector"),
        };
        let unit = Arc::new(Unit::new(
            name.clone(),
            connector_id,
            config.unit.work_range.clone(),
        ));
        let signal = Arc::new(Signal::new());

        // same seed in every lane, so all lanes fail at the same ticks
        let mut rng = StdRng::seed_from_u64(seed);
        let injector = FailureInjector::new(
            config.unit.failure_after.clone(),
            config.unit.failure_mode,
            &mut rng,
        );
        let driver_task = DriverActor::new(
            unit.clone(),
            injector,
            rng,
            config.unit.tick_interval,
            stop.clone(),
            events.emitter(format!("{name}/driver")),
        )
        .spawn();

        let variant = match strategy.monitor {
            MonitorSettings::ExternalMetrics {
                offset_threshold, ..
            } => MonitorVariant::ExternalMetrics { offset_threshold },
            MonitorSettings::DirectStatus { .. } => MonitorVariant::direct(&unit),
        };
        let (monitor, monitor_task) = MonitorHandle::spawn(
            unit.clone(),
            variant,
            strategy.monitor.poll_interval(),
            signal.clone(),
            stop.clone(),
            events.emitter(format!("{name}/monitor")),
        );

        let (remediator, remediator_task) = RemediatorHandle::spawn(
            unit.clone(),
            remediation,
            signal.clone(),
            strategy.wait_step,
            stop.clone(),
            events.emitter(format!("{name}/remediator")),
        );

        debug!("lane {name} started");

        Self {
            name,
            kind: strategy.kind,
            unit,
            signal,
            monitor,
            remediator,
            driver_task,
            monitor_task,
            remediator_task,
        }
    }

    async fn finish(self, timeout: Duration) -> StrategyReport {
        let Lane {
            name,
            kind,
            unit,
            signal,
            remediator,
            driver_task,
            monitor_task,
            remediator_task,
            ..
        } = self;

        let (driver_name, monitor_name, remediator_name) = (
            format!("{name}/driver"),
            format!("{name}/monitor"),
            format!("{name}/remediator"),
        );
        let (driver, alarm, stats) = tokio::join!(
            join_actor(&driver_name, driver_task, timeout),
            join_actor(&monitor_name, monitor_task, timeout),
            join_actor(&remediator_name, remediator_task, timeout),
        );

        let clean_shutdown = driver.is_some() && alarm.is_some() && stats.is_some();
        let stats = stats.unwrap_or_else(|| remediator.latest_stats());
        let snapshot = unit.snapshot();

        StrategyReport {
            name,
            kind,
            detection: LatencySummary::from_samples(&stats.detection_latencies()),
            recovery: LatencySummary::from_samples(&stats.recovery_latencies()),
            remediation: LatencySummary::from_samples(&stats.remediation_durations()),
            remediation_count: snapshot.remediation_count,
            failed_remediations: snapshot.failed_remediations,
            failures_injected: driver.map_or(0, |d| d.failures_injected),
            signals_raised: alarm.map_or_else(|| signal.raises(), |a| a.signals_raised),
            total_work_items: snapshot.total_work_items,
            connector_id: snapshot.connector_id,
            healthy_at_end: unit.is_healthy(),
            clean_shutdown,
        }
    }
}

/// A running scenario
pub struct Scenario {
    config: ResolvedScenarioConfig,
    seed: u64,
    lanes: Vec<Lane>,
    stop: StopSignal,
    events: EventSink,
    started: Instant,
    interrupted: bool,
}

impl Scenario {
    /// Start every configured strategy with its default backend
    pub fn start(config: ResolvedScenarioConfig, events: EventSink) -> Result<Self> {
        Self::start_with_backends(config, events, HashMap::new())
    }

    /// Start every configured strategy; recreate strategies named in
    /// `backends` use the supplied backend instead of a simulated one
    #[instrument(skip_all)]
    pub fn start_with_backends(
        config: ResolvedScenarioConfig,
        events: EventSink,
        mut backends: HashMap<String, Arc<dyn RemediationBackend>>,
    ) -> Result<Self> {
        let seed = config.seed.unwrap_or_else(rand::random);
        let stop = StopSignal::new();

        // build every backend before spawning anything
        let mut remediations = Vec::with_capacity(config.strategies.len());
        for strategy in &config.strategies {
            let remediation = match &strategy.remediation {
                RemediationSettings::TaskRestart { restart_duration } => {
                    RemediationStrategy::TaskRestart {
                        restart_duration: *restart_duration,
                    }
                }
                RemediationSettings::Recreate(backend_config) => {
                    let backend = match backends.remove(&strategy.name) {
                        Some(backend) => backend,
                        None => default_backend(backend_config)?,
                    };
                    RemediationStrategy::Recreate {
                        backend,
                        settings: RecreateSettings::from(backend_config),
                    }
                }
            };
            remediations.push(remediation);
        }

        let lanes = config
            .strategies
            .iter()
            .zip(remediations)
            .map(|(strategy, remediation)| Lane::spawn(strategy, remediation, &config, seed, &stop, &events))
            .collect();

        info!(
            "scenario started with {} strategies, seed {seed}",
            config.strategies.len()
        );

        Ok(Self {
            config,
            seed,
            lanes,
            stop,
            events,
            started: Instant::now(),
            interrupted: false,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn unit(&self, strategy: &str) -> Option<Arc<Unit>> {
        self.lane(strategy).map(|lane| lane.unit.clone())
    }

    pub fn monitor(&self, strategy: &str) -> Option<MonitorHandle> {
        self.lane(strategy).map(|lane| lane.monitor.clone())
    }

    pub fn remediator(&self, strategy: &str) -> Option<RemediatorHandle> {
        self.lane(strategy).map(|lane| lane.remediator.clone())
    }

    fn lane(&self, strategy: &str) -> Option<&Lane> {
        self.lanes.iter().find(|lane| lane.name == strategy)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Ask every actor to stop; returns `false` if already stopping
    pub fn stop(&self) -> bool {
        let first = self.stop.stop();
        if first {
            info!("stopping scenario");
        } else {
            debug!("scenario already stopping");
        }
        first
    }

    /// Run for the configured duration or until Ctrl-C
    pub async fn run(self) -> ScenarioReport {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run for the configured duration, until `interrupt` resolves or until
    /// someone stops the scenario, whichever comes first
    pub async fn run_until<F>(mut self, interrupt: F) -> ScenarioReport
    where
        F: Future<Output = ()>,
    {
        let stop = self.stop.clone();

        tokio::select! {
            _ = sleep(self.config.duration) => {
                info!("scenario duration elapsed");
            }

            _ = stop.stopped() => {
                debug!("scenario stopped externally");
            }

            _ = interrupt => {
                warn!("interrupted, stopping scenario");
                self.interrupted = true;
            }
        }

        self.shutdown().await
    }

    /// Stop every actor and collect the report
    ///
    /// Each actor gets the configured shutdown timeout; stuck actors are
    /// aborted and reported with whatever statistics they had published.
    pub async fn shutdown(mut self) -> ScenarioReport {
        self.stop();
        let elapsed = self.started.elapsed();
        let timeout = self.config.shutdown_timeout;

        let lanes = std::mem::take(&mut self.lanes);
        let strategies = join_all(lanes.into_iter().map(|lane| lane.finish(timeout))).await;

        ScenarioReport {
            seed: self.seed,
            elapsed_ms: millis(elapsed),
            interrupted: self.interrupted,
            dropped_events: self.events.dropped(),
            strategies,
        }
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        // actors must not outlive a scenario that was never shut down
        if self.stop.stop() {
            debug!("scenario dropped while running, stopping actors");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub min_ms: Option<u64>,
    pub mean_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl LatencySummary {
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let total: Duration = samples.iter().sum();
        let mean = total / samples.len() as u32;

        Self {
            samples: samples.len(),
            min_ms: samples.iter().min().copied().map(millis),
            mean_ms: Some(millis(mean)),
            max_ms: samples.iter().max().copied().map(millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyReport {
    pub name: String,
    pub kind: StrategyKind,
    pub detection: LatencySummary,
    pub recovery: LatencySummary,
    pub remediation: LatencySummary,
    pub remediation_count: u64,
    pub failed_remediations: u64,
    pub failures_injected: u64,
    pub signals_raised: u64,
    pub total_work_items: u64,
    pub connector_id: String,
    pub healthy_at_end: bool,
    /// Every actor acknowledged the stop within the timeout
    pub clean_shutdown: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub seed: u64,
    pub elapsed_ms: u64,
    pub interrupted: bool,
    pub dropped_events: u64,
    pub strategies: Vec<StrategyReport>,
}

impl ScenarioReport {
    pub fn strategy(&self, name: &str) -> Option<&StrategyReport> {
        self.strategies.iter().find(|s| s.name == name)
    }
}

fn secs(ms: Option<u64>) -> String {
    match ms {
        Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
        None => "-".to_string(),
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scenario finished after {} (seed {}){}",
            secs(Some(self.elapsed_ms)),
            self.seed,
            if self.interrupted { ", interrupted" } else { "" }
        )?;
        writeln!(
            f,
            "{:<14} {:>9} {:>9} {:>12} {:>9} {:>7} {:>7} {:>11}",
            "strategy", "detect", "recover", "remediation", "failures", "fixed", "failed", "work items"
        )?;

        for s in &self.strategies {
            writeln!(
                f,
                "{:<14} {:>9} {:>9} {:>12} {:>9} {:>7} {:>7} {:>11}",
                s.name,
                secs(s.detection.mean_ms),
                secs(s.recovery.mean_ms),
                secs(s.remediation.mean_ms),
                s.failures_injected,
                s.remediation_count,
                s.failed_remediations,
                s.total_work_items,
            )?;
        }

        let recovery = |kind| {
            self.strategies
                .iter()
                .find(|s| s.kind == kind)
                .and_then(|s| s.recovery.mean_ms)
        };
        if let (Some(fast), Some(slow)) = (recovery(StrategyKind::FastPath), recovery(StrategyKind::SlowPath)) {
            if fast > 0 {
                writeln!(
                    f,
                    "fast path recovers {:.1}x faster on average",
                    slow as f64 / fast as f64
                )?;
            }
        }

        if self.dropped_events > 0 {
            writeln!(f, "{} events dropped", self.dropped_events)?;
        }
        Ok(())
    }
}
