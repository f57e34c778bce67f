//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use connector_recovery::{
    backend::SimulatedBackend,
    config::{
        BackendConfig, BackendFaults, Config, FailureMode, ResolvedScenarioConfig, StrategyConfig,
        UnitConfig,
    },
    notify::LogNotifier,
};

pub const CONNECTOR_ID: &str = "arn:aws:kafkaconnect:test:connector/orders-cdc";

/// Unit that fails on the `after`-th tick of every episode
pub fn unit_config(after: u32, failure_mode: FailureMode) -> UnitConfig {
    UnitConfig {
        failure_after_min: after,
        failure_after_max: after,
        failure_mode,
        ..UnitConfig::default()
    }
}

pub fn slow_path(poll_interval: u64, offset_threshold: u64, faults: BackendFaults) -> StrategyConfig {
    StrategyConfig::SlowPath {
        name: None,
        poll_interval,
        offset_threshold,
        wait_step: 1,
        backend: BackendConfig {
            connector_id: Some(CONNECTOR_ID.to_string()),
            faults,
            ..BackendConfig::default()
        },
    }
}

pub fn scenario_config(duration: u64, unit: UnitConfig, strategies: Vec<StrategyConfig>) -> ResolvedScenarioConfig {
    Config {
        duration,
        seed: Some(7),
        unit,
        strategies,
        ..Config::default()
    }
    .resolve()
    .unwrap()
}

/// Simulated backend with the default latencies and a recording notifier
pub fn recording_backend(faults: BackendFaults) -> (Arc<SimulatedBackend>, Arc<LogNotifier>) {
    let notifier = Arc::new(LogNotifier::new());
    let backend = SimulatedBackend::new(Duration::from_secs(5), Duration::from_secs(3), notifier.clone())
        .with_connector(CONNECTOR_ID)
        .with_faults(faults);
    (Arc::new(backend), notifier)
}

pub fn ms(secs: u64) -> u64 {
    secs * 1000
}
