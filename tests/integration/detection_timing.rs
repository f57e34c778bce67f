//! Detection and recovery timing of both strategies
//!
//! All tests run on the paused tokio clock with one time unit = 1s, so the
//! latencies in the report are exact multiples of the configured durations.

use std::future::pending;

use connector_recovery::{
    config::{BackendFaults, Config, FailureMode, StrategyConfig},
    events::EventSink,
    scenario::Scenario,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_silent_failure_detected_within_threshold_plus_poll() {
    // failure at T = 3s, threshold 5, poll every 2
    let config = scenario_config(
        17,
        unit_config(3, FailureMode::Silent),
        vec![slow_path(2, 5, BackendFaults::default())],
    );

    let report = Scenario::start(config, EventSink::discard())
        .unwrap()
        .run_until(pending())
        .await;
    let slow = report.strategy("slow-path").unwrap();

    let detection = slow.detection.mean_ms.unwrap();
    assert!((ms(5)..=ms(7)).contains(&detection), "detected after {detection}ms");

    // delete (5) + create (3)
    assert_eq!(slow.remediation.mean_ms, Some(ms(8)));
    let recovery = slow.recovery.mean_ms.unwrap();
    assert!((ms(13)..=ms(15)).contains(&recovery), "recovered after {recovery}ms");

    assert_eq!(slow.remediation_count, 1);
    assert_eq!(slow.failed_remediations, 0);
    assert_eq!(slow.signals_raised, 1);
    assert_ne!(slow.connector_id, CONNECTOR_ID);
    assert!(slow.clean_shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_fast_path_detects_immediately_and_restarts_in_one_unit() {
    let config = scenario_config(
        6,
        unit_config(3, FailureMode::Silent),
        vec![StrategyConfig::fast_path()],
    );

    let report = Scenario::start(config, EventSink::discard())
        .unwrap()
        .run_until(pending())
        .await;
    let fast = report.strategy("fast-path").unwrap();

    assert_eq!(fast.detection.mean_ms, Some(0));
    assert_eq!(fast.remediation.mean_ms, Some(ms(1)));
    assert_eq!(fast.recovery.mean_ms, Some(ms(1)));
    assert_eq!(fast.remediation_count, 1);
    assert_eq!(fast.failures_injected, 1);
    assert!(fast.healthy_at_end);
}

#[tokio::test(start_paused = true)]
async fn test_direct_status_detects_no_later_than_external_metrics() {
    let config = scenario_config(
        20,
        unit_config(4, FailureMode::Silent),
        vec![
            slow_path(2, 5, BackendFaults::default()),
            StrategyConfig::fast_path(),
        ],
    );

    let report = Scenario::start(config, EventSink::discard())
        .unwrap()
        .run_until(pending())
        .await;
    let slow = report.strategy("slow-path").unwrap();
    let fast = report.strategy("fast-path").unwrap();

    // same seed in both lanes, so the first failure happens at the same tick
    assert!(fast.detection.min_ms.unwrap() <= slow.detection.min_ms.unwrap());
    assert!(fast.remediation.max_ms.unwrap() < slow.remediation.min_ms.unwrap());
    assert!(fast.failures_injected >= slow.failures_injected);
}

#[tokio::test(start_paused = true)]
async fn test_default_comparison_reports_both_strategies() {
    let config = Config {
        seed: Some(1234),
        ..Config::comparison(CONNECTOR_ID)
    }
    .resolve()
    .unwrap();

    let report = Scenario::start(config, EventSink::discard())
        .unwrap()
        .run_until(pending())
        .await;

    assert_eq!(report.seed, 1234);
    assert_eq!(report.elapsed_ms, ms(45));
    assert!(!report.interrupted);

    let slow = report.strategy("slow-path").unwrap();
    let fast = report.strategy("fast-path").unwrap();
    assert!(slow.remediation_count >= 1);
    assert!(fast.remediation_count >= slow.remediation_count);
    assert!(fast.recovery.mean_ms.unwrap() < slow.recovery.mean_ms.unwrap());
    assert!(fast.total_work_items > slow.total_work_items);

    let text = report.to_string();
    assert!(text.contains("faster on average"));
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_failures_are_each_remediated() {
    // the next failure lands right after a recovery, often before the
    // monitor has polled a healthy unit
    for (after, poll) in [(1, 2), (2, 4)] {
        let config = scenario_config(
            60,
            unit_config(after, FailureMode::Disconnected),
            vec![slow_path(poll, 6, BackendFaults::default())],
        );

        let report = Scenario::start(config, EventSink::discard())
            .unwrap()
            .run_until(pending())
            .await;
        let slow = report.strategy("slow-path").unwrap();

        assert!(slow.failures_injected >= 3, "after={after} poll={poll}: {slow:?}");
        // only a failure injected just before the stop may still be open
        assert!(
            slow.remediation_count + 1 >= slow.failures_injected,
            "after={after} poll={poll}: {slow:?}"
        );
        assert!(slow.signals_raised >= slow.remediation_count);
        assert_eq!(slow.failed_remediations, 0);
    }
}
