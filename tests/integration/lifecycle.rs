//! Scenario lifecycle: stop, interruption and shutdown

use std::future::pending;
use std::time::Duration;

use connector_recovery::{
    config::{BackendFaults, FailureMode, StrategyConfig, read_config_file},
    events::EventSink,
    scenario::Scenario,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let config = scenario_config(
        30,
        unit_config(3, FailureMode::Disconnected),
        vec![StrategyConfig::fast_path()],
    );
    let scenario = Scenario::start(config, EventSink::discard()).unwrap();
    let stop = scenario.stop_signal();

    assert!(scenario.stop());
    assert!(!scenario.stop());
    assert!(!stop.stop());

    let report = scenario.run_until(pending()).await;
    assert_eq!(report.elapsed_ms, 0);
    assert!(!report.interrupted);
    assert!(report.strategies[0].clean_shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_stops_early() {
    let config = scenario_config(
        30,
        unit_config(3, FailureMode::Disconnected),
        vec![StrategyConfig::fast_path()],
    );

    let report = Scenario::start(config, EventSink::discard())
        .unwrap()
        .run_until(tokio::time::sleep(Duration::from_secs(2)))
        .await;

    assert!(report.interrupted);
    assert_eq!(report.elapsed_ms, ms(2));
    assert_eq!(report.strategies[0].failures_injected, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_from_another_task() {
    let config = scenario_config(
        30,
        unit_config(3, FailureMode::Disconnected),
        vec![StrategyConfig::fast_path()],
    );
    let scenario = Scenario::start(config, EventSink::discard()).unwrap();
    let stop = scenario.stop_signal();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.stop();
    });

    let report = scenario.run_until(pending()).await;
    assert_eq!(report.elapsed_ms, ms(5));
    assert!(!report.interrupted);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_running_remediation_finish() {
    // detected by 6, the recreate needs 8 more units
    let config = scenario_config(
        9,
        unit_config(3, FailureMode::Disconnected),
        vec![slow_path(3, 6, BackendFaults::default())],
    );

    let report = Scenario::start(config, EventSink::discard())
        .unwrap()
        .run_until(pending())
        .await;
    let slow = &report.strategies[0];

    assert_eq!(slow.remediation_count, 1);
    assert!(slow.healthy_at_end);
    assert!(slow.clean_shutdown);
    assert_eq!(slow.remediation.samples, 1);
}

#[tokio::test(start_paused = true)]
async fn test_runs_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scenario.json");
    std::fs::write(
        &path,
        format!(
            r#"{{
                "duration": 12,
                "seed": 99,
                "unit": {{ "failure_after_min": 2, "failure_after_max": 2, "failure_mode": "silent" }},
                "strategies": [
                    {{ "kind": "fast_path", "name": "self-managed" }},
                    {{ "kind": "slow_path", "name": "managed", "backend": {{ "connector_id": "{CONNECTOR_ID}" }} }}
                ]
            }}"#
        ),
    )
    .unwrap();

    let config = read_config_file(path.to_str().unwrap())
        .unwrap()
        .resolve()
        .unwrap();
    let report = Scenario::start(config, EventSink::discard())
        .unwrap()
        .run_until(pending())
        .await;

    assert_eq!(report.seed, 99);
    let names: Vec<_> = report.strategies.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["self-managed", "managed"]);
    assert!(report.strategy("self-managed").unwrap().remediation_count >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_lane_handles_answer_while_running() {
    let config = scenario_config(
        30,
        unit_config(3, FailureMode::Disconnected),
        vec![StrategyConfig::fast_path()],
    );
    let scenario = Scenario::start(config, EventSink::discard()).unwrap();
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    let monitor = scenario.monitor("fast-path").unwrap();
    let remediator = scenario.remediator("fast-path").unwrap();
    assert!(scenario.monitor("managed").is_none());
    assert!(scenario.remediator("managed").is_none());

    let alarm = monitor.state().await.unwrap();
    let stats = remediator.stats().await.unwrap();
    assert!(alarm.polls > 0);
    assert!(alarm.signals_raised >= 1);
    assert!(stats.successes() >= 1);

    let report = scenario.shutdown().await;
    let fast = report.strategy("fast-path").unwrap();
    assert!(fast.remediation_count >= stats.successes() as u64);
    assert!(monitor.state().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_scenario_stops_its_actors() {
    let config = scenario_config(
        30,
        unit_config(100, FailureMode::Disconnected),
        vec![StrategyConfig::fast_path()],
    );
    let scenario = Scenario::start(config, EventSink::discard()).unwrap();
    let stop = scenario.stop_signal();
    let unit = scenario.unit("fast-path").unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(unit.total_work_items() > 0);
    drop(scenario);
    assert!(stop.is_stopped());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let produced = unit.total_work_items();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(unit.total_work_items(), produced);
}
