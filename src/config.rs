use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ConfigError;
use crate::util;

/// Scenario configuration as read from disk
///
/// All durations are expressed in time units; `time_unit_ms` decides how long
/// one unit is on the wall clock (1000 reproduces the original demo pacing).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,

    /// Wall-clock budget of the whole scenario, in units
    #[serde(default = "default_duration")]
    pub duration: u64,

    /// Seed for failure schedules and produced item counts
    pub seed: Option<u64>,

    #[serde(default)]
    pub unit: UnitConfig,

    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyConfig>,

    /// How long each actor gets to acknowledge the stop signal, in units
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Capacity of the event channel between actors and the presenter
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_unit_ms: default_time_unit_ms(),
            duration: default_duration(),
            seed: None,
            unit: UnitConfig::default(),
            strategies: default_strategies(),
            shutdown_timeout: default_shutdown_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// The connected metric drops to 0 together with the task
    #[default]
    Disconnected,

    /// The task stops but every metric except offset progress still looks fine
    Silent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval: u64,
    #[serde(default = "default_work_min")]
    pub work_min: u64,
    #[serde(default = "default_work_max")]
    pub work_max: u64,
    /// Ticks of healthy production before the next failure, lower bound
    #[serde(default = "default_failure_after_min")]
    pub failure_after_min: u32,
    #[serde(default = "default_failure_after_max")]
    pub failure_after_max: u32,
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            work_min: default_work_min(),
            work_max: default_work_max(),
            failure_after_min: default_failure_after_min(),
            failure_after_max: default_failure_after_max(),
            failure_mode: FailureMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Direct task status, task-level restart
    FastPath,

    /// External metrics alarm, connector delete/recreate
    SlowPath,
}

impl StrategyKind {
    pub fn default_name(self) -> &'static str {
        match self {
            StrategyKind::FastPath => "fast-path",
            StrategyKind::SlowPath => "slow-path",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    FastPath {
        name: Option<String>,
        #[serde(default = "default_fast_poll")]
        poll_interval: u64,
        #[serde(default = "default_restart_duration")]
        restart_duration: u64,
        #[serde(default = "default_wait_step")]
        wait_step: u64,
    },
    SlowPath {
        name: Option<String>,
        #[serde(default = "default_slow_poll")]
        poll_interval: u64,
        #[serde(default = "default_offset_threshold")]
        offset_threshold: u64,
        #[serde(default = "default_wait_step")]
        wait_step: u64,
        #[serde(default)]
        backend: BackendConfig,
    },
}

impl StrategyConfig {
    pub fn fast_path() -> Self {
        StrategyConfig::FastPath {
            name: None,
            poll_interval: default_fast_poll(),
            restart_duration: default_restart_duration(),
            wait_step: default_wait_step(),
        }
    }

    pub fn slow_path(connector_id: impl Into<String>) -> Self {
        StrategyConfig::SlowPath {
            name: None,
            poll_interval: default_slow_poll(),
            offset_threshold: default_offset_threshold(),
            wait_step: default_wait_step(),
            backend: BackendConfig {
                connector_id: Some(connector_id.into()),
                ..BackendConfig::default()
            },
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyConfig::FastPath { .. } => StrategyKind::FastPath,
            StrategyConfig::SlowPath { .. } => StrategyKind::SlowPath,
        }
    }

    pub fn name(&self) -> String {
        let name = match self {
            StrategyConfig::FastPath { name, .. } | StrategyConfig::SlowPath { name, .. } => name,
        };
        name.clone()
            .unwrap_or_else(|| self.kind().default_name().to_string())
    }
}

/// Simulated control-plane behaviour for the slow path
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub connector_id: Option<String>,
    #[serde(default = "default_delete_latency")]
    pub delete_latency: u64,
    #[serde(default = "default_create_latency")]
    pub create_latency: u64,
    #[serde(default = "default_deletion_poll")]
    pub deletion_poll_interval: u64,
    #[serde(default = "default_deletion_timeout")]
    pub deletion_timeout: u64,
    pub notify_webhook: Option<String>,
    #[serde(default)]
    pub faults: BackendFaults,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            connector_id: None,
            delete_latency: default_delete_latency(),
            create_latency: default_create_latency(),
            deletion_poll_interval: default_deletion_poll(),
            deletion_timeout: default_deletion_timeout(),
            notify_webhook: None,
            faults: BackendFaults::default(),
        }
    }
}

/// Number of upcoming backend calls of each kind that fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct BackendFaults {
    #[serde(default)]
    pub describe: u32,
    #[serde(default)]
    pub delete: u32,
    #[serde(default)]
    pub create: u32,
    /// Deletions that never complete
    #[serde(default)]
    pub stall_deletion: u32,
}

fn default_time_unit_ms() -> u64 {
    1000
}

fn default_duration() -> u64 {
    45
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_event_buffer() -> usize {
    1024
}

fn default_tick_interval() -> u64 {
    1
}

fn default_work_min() -> u64 {
    50
}

fn default_work_max() -> u64 {
    200
}

fn default_failure_after_min() -> u32 {
    8
}

fn default_failure_after_max() -> u32 {
    15
}

fn default_fast_poll() -> u64 {
    2
}

fn default_slow_poll() -> u64 {
    3
}

fn default_offset_threshold() -> u64 {
    6
}

fn default_restart_duration() -> u64 {
    1
}

fn default_wait_step() -> u64 {
    1
}

fn default_delete_latency() -> u64 {
    5
}

fn default_create_latency() -> u64 {
    3
}

fn default_deletion_poll() -> u64 {
    1
}

fn default_deletion_timeout() -> u64 {
    30
}

fn default_strategies() -> Vec<StrategyConfig> {
    vec![
        StrategyConfig::SlowPath {
            name: None,
            poll_interval: default_slow_poll(),
            offset_threshold: default_offset_threshold(),
            wait_step: default_wait_step(),
            backend: BackendConfig::default(),
        },
        StrategyConfig::fast_path(),
    ]
}

/// Fully validated scenario configuration with durations on the wall clock
#[derive(Debug, Clone)]
pub struct ResolvedScenarioConfig {
    pub duration: Duration,
    pub seed: Option<u64>,
    pub unit: ResolvedUnitConfig,
    pub strategies: Vec<ResolvedStrategy>,
    pub shutdown_timeout: Duration,
    pub event_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct ResolvedUnitConfig {
    pub tick_interval: Duration,
    pub work_range: RangeInclusive<u64>,
    pub failure_after: RangeInclusive<u32>,
    pub failure_mode: FailureMode,
}

#[derive(Debug, Clone)]
pub struct ResolvedStrategy {
    pub name: String,
    pub kind: StrategyKind,
    pub monitor: MonitorSettings,
    pub remediation: RemediationSettings,
    /// Upper bound on one remediator wait before it re-checks the stop signal
    pub wait_step: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSettings {
    ExternalMetrics {
        poll_interval: Duration,
        offset_threshold: Duration,
    },
    DirectStatus {
        poll_interval: Duration,
    },
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        match self {
            MonitorSettings::ExternalMetrics { poll_interval, .. }
            | MonitorSettings::DirectStatus { poll_interval } => *poll_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RemediationSettings {
    TaskRestart { restart_duration: Duration },
    Recreate(ResolvedBackendConfig),
}

#[derive(Debug, Clone)]
pub struct ResolvedBackendConfig {
    pub connector_id: String,
    pub delete_latency: Duration,
    pub create_latency: Duration,
    pub deletion_poll_interval: Duration,
    pub deletion_timeout: Duration,
    pub notify_webhook: Option<String>,
    pub faults: BackendFaults,
}

impl Config {
    /// Single slow-path strategy, the setup of the original silent failure demo
    pub fn single(connector_id: impl Into<String>) -> Self {
        Self {
            duration: 40,
            strategies: vec![StrategyConfig::slow_path(connector_id)],
            ..Self::default()
        }
    }

    /// Slow path and fast path side by side
    pub fn comparison(connector_id: impl Into<String>) -> Self {
        Self {
            strategies: vec![
                StrategyConfig::slow_path(connector_id),
                StrategyConfig::fast_path(),
            ],
            ..Self::default()
        }
    }

    fn units(&self, n: u64) -> Duration {
        Duration::from_millis(n.saturating_mul(self.time_unit_ms))
    }

    /// Validate the configuration and scale every duration to the wall clock
    ///
    /// Connector ids missing from the file fall back to the `CONNECTOR_ID`
    /// environment variable; a slow path without any id is rejected.
    pub fn resolve(&self) -> Result<ResolvedScenarioConfig, ConfigError> {
        if self.time_unit_ms == 0 {
            return Err(invalid("time_unit_ms", "must be positive"));
        }
        if self.duration == 0 {
            return Err(invalid("duration", "must be positive"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer", "must be positive"));
        }
        if self.strategies.is_empty() {
            return Err(ConfigError::NoStrategies);
        }

        let unit = self.resolve_unit()?;

        let mut names = HashSet::new();
        let mut strategies = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let resolved = self.resolve_strategy(strategy)?;
            if !names.insert(resolved.name.clone()) {
                return Err(ConfigError::DuplicateStrategy(resolved.name));
            }
            strategies.push(resolved);
        }

        let resolved = ResolvedScenarioConfig {
            duration: self.units(self.duration),
            seed: self.seed,
            unit,
            strategies,
            shutdown_timeout: self.units(self.shutdown_timeout),
            event_buffer: self.event_buffer,
        };
        trace!("resolved config: {resolved:?}");
        Ok(resolved)
    }

    fn resolve_unit(&self) -> Result<ResolvedUnitConfig, ConfigError> {
        let UnitConfig {
            tick_interval,
            work_min,
            work_max,
            failure_after_min,
            failure_after_max,
            failure_mode,
        } = self.unit;

        if tick_interval == 0 {
            return Err(invalid("unit.tick_interval", "must be positive"));
        }
        if work_min > work_max {
            return Err(invalid(
                "unit.work_min",
                format!("{work_min} is larger than work_max {work_max}"),
            ));
        }
        if failure_after_min == 0 || failure_after_min > failure_after_max {
            return Err(invalid(
                "unit.failure_after_min",
                format!("expected 1 <= {failure_after_min} <= {failure_after_max}"),
            ));
        }

        Ok(ResolvedUnitConfig {
            tick_interval: self.units(tick_interval),
            work_range: work_min..=work_max,
            failure_after: failure_after_min..=failure_after_max,
            failure_mode,
        })
    }

    fn resolve_strategy(&self, strategy: &StrategyConfig) -> Result<ResolvedStrategy, ConfigError> {
        let name = strategy.name();

        match strategy {
            StrategyConfig::FastPath {
                poll_interval,
                restart_duration,
                wait_step,
                ..
            } => {
                positive("strategies.poll_interval", *poll_interval)?;
                positive("strategies.wait_step", *wait_step)?;
                Ok(ResolvedStrategy {
                    name,
                    kind: StrategyKind::FastPath,
                    monitor: MonitorSettings::DirectStatus {
                        poll_interval: self.units(*poll_interval),
                    },
                    remediation: RemediationSettings::TaskRestart {
                        restart_duration: self.units(*restart_duration),
                    },
                    wait_step: self.units(*wait_step),
                })
            }
            StrategyConfig::SlowPath {
                poll_interval,
                offset_threshold,
                wait_step,
                backend,
                ..
            } => {
                positive("strategies.poll_interval", *poll_interval)?;
                positive("strategies.offset_threshold", *offset_threshold)?;
                positive("strategies.wait_step", *wait_step)?;
                positive("backend.deletion_poll_interval", backend.deletion_poll_interval)?;

                let connector_id = backend
                    .connector_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .or_else(util::get_connector_id)
                    .ok_or_else(|| ConfigError::MissingConnectorId {
                        strategy: name.clone(),
                        env: util::CONNECTOR_ID,
                    })?;

                Ok(ResolvedStrategy {
                    name,
                    kind: StrategyKind::SlowPath,
                    monitor: MonitorSettings::ExternalMetrics {
                        poll_interval: self.units(*poll_interval),
                        offset_threshold: self.units(*offset_threshold),
                    },
                    remediation: RemediationSettings::Recreate(ResolvedBackendConfig {
                        connector_id,
                        delete_latency: self.units(backend.delete_latency),
                        create_latency: self.units(backend.create_latency),
                        deletion_poll_interval: self.units(backend.deletion_poll_interval),
                        deletion_timeout: self.units(backend.deletion_timeout),
                        notify_webhook: backend
                            .notify_webhook
                            .clone()
                            .or_else(util::get_notify_webhook),
                        faults: backend.faults,
                    }),
                    wait_step: self.units(*wait_step),
                })
            }
        }
    }
}

fn invalid(field: &'static str, details: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        details: details.into(),
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be positive"));
    }
    Ok(())
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    let config: Config = serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {path}"))?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
