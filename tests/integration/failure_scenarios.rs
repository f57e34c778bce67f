//! Backend failures during the delete/recreate remediation
//!
//! A failed attempt must leave the unit down, be counted, notify the operator
//! and get retried after the monitor signals again.

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;

use connector_recovery::{
    backend::RemediationBackend,
    config::{BackendConfig, BackendFaults, FailureMode, StrategyConfig},
    events::EventSink,
    scenario::Scenario,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn with_backend(backend: Arc<dyn RemediationBackend>) -> HashMap<String, Arc<dyn RemediationBackend>> {
    HashMap::from([("slow-path".to_string(), backend)])
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_is_retried_after_rearm() {
    let (backend, notifier) = recording_backend(BackendFaults {
        delete: 1,
        ..BackendFaults::default()
    });
    let config = scenario_config(
        25,
        unit_config(3, FailureMode::Disconnected),
        vec![slow_path(3, 6, BackendFaults::default())],
    );

    let report = Scenario::start_with_backends(config, EventSink::discard(), with_backend(backend))
        .unwrap()
        .run_until(pending())
        .await;
    let slow = report.strategy("slow-path").unwrap();

    assert_eq!(slow.failed_remediations, 1);
    assert!(slow.remediation_count >= 1);
    assert!(slow.signals_raised >= 2);

    let sent = notifier.sent();
    assert!(sent[0].starts_with("[ERROR]"), "{sent:?}");
    assert!(sent[1].starts_with("[RECOVERED]"), "{sent:?}");
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_is_critical_and_retry_only_creates() {
    let (backend, notifier) = recording_backend(BackendFaults {
        create: 1,
        ..BackendFaults::default()
    });
    let config = scenario_config(
        25,
        unit_config(3, FailureMode::Disconnected),
        vec![slow_path(3, 6, BackendFaults::default())],
    );

    let report = Scenario::start_with_backends(config, EventSink::discard(), with_backend(backend.clone()))
        .unwrap()
        .run_until(pending())
        .await;
    let slow = report.strategy("slow-path").unwrap();

    assert_eq!(slow.failed_remediations, 1);
    assert!(slow.remediation_count >= 1);

    let sent = notifier.sent();
    assert!(sent[0].starts_with("[CRITICAL]"), "{sent:?}");
    assert!(sent[0].contains("Manual action needed"));
    assert!(sent[1].starts_with("[RECOVERED]"), "{sent:?}");
    assert!(backend.created() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_deletion_times_out_every_attempt() {
    let strategy = StrategyConfig::SlowPath {
        name: None,
        poll_interval: 3,
        offset_threshold: 6,
        wait_step: 1,
        backend: BackendConfig {
            connector_id: Some(CONNECTOR_ID.to_string()),
            deletion_timeout: 4,
            faults: BackendFaults {
                stall_deletion: 1,
                ..BackendFaults::default()
            },
            ..BackendConfig::default()
        },
    };
    let config = scenario_config(25, unit_config(3, FailureMode::Disconnected), vec![strategy]);

    let report = Scenario::start(config, EventSink::discard())
        .unwrap()
        .run_until(pending())
        .await;
    let slow = report.strategy("slow-path").unwrap();

    assert_eq!(slow.remediation_count, 0);
    assert!(slow.failed_remediations >= 2);
    assert_eq!(slow.recovery.samples, 0);
    assert!(!slow.healthy_at_end);
    assert!(slow.clean_shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_broken_backend_does_not_affect_other_lane() {
    let (backend, notifier) = recording_backend(BackendFaults {
        describe: u32::MAX,
        ..BackendFaults::default()
    });
    let config = scenario_config(
        30,
        unit_config(3, FailureMode::Disconnected),
        vec![
            slow_path(3, 6, BackendFaults::default()),
            StrategyConfig::fast_path(),
        ],
    );

    let report = Scenario::start_with_backends(config, EventSink::discard(), with_backend(backend))
        .unwrap()
        .run_until(pending())
        .await;
    let slow = report.strategy("slow-path").unwrap();
    let fast = report.strategy("fast-path").unwrap();

    assert_eq!(slow.remediation_count, 0);
    assert!(slow.failed_remediations >= 2);
    assert!(notifier.sent().iter().all(|m| m.starts_with("[WARN]")));

    assert!(fast.remediation_count >= 2);
    assert_eq!(fast.failed_remediations, 0);
    assert!(slow.clean_shutdown && fast.clean_shutdown);
}
