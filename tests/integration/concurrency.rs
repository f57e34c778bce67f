//! Concurrency tests
//!
//! Verify that remediations never overlap on one unit and that readers never
//! observe the unit going backwards.

use std::sync::Arc;
use std::time::Duration;

use connector_recovery::{
    actors::remediator::{RemediationStrategy, RemediatorHandle},
    config::{FailureMode, StrategyConfig},
    error::RemediationError,
    events::{EventKind, EventSink},
    scenario::Scenario,
    signal::{Signal, StopSignal},
    unit::{Health, Unit},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_concurrent_remediations_on_one_unit() {
    let unit = Arc::new(Unit::new("shared", CONNECTOR_ID, 50..=200));
    unit.inject_failure();

    let mut tasks = vec![];
    for _ in 0..8 {
        let unit = unit.clone();
        tasks.push(tokio::spawn(async move {
            unit.fast_remediate(Duration::from_secs(1)).await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(RemediationError::AlreadyInFlight { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 7);
    assert_eq!(unit.remediation_count(), 1);
    assert_eq!(unit.health(), Health::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_two_remediators_never_overlap() {
    let unit = Arc::new(Unit::new("shared", CONNECTOR_ID, 50..=200));
    let stop = StopSignal::new();
    let strategy = RemediationStrategy::TaskRestart {
        restart_duration: Duration::from_secs(2),
    };

    let signals = [Arc::new(Signal::new()), Arc::new(Signal::new())];
    let mut handles = vec![];
    for (i, signal) in signals.iter().enumerate() {
        handles.push(RemediatorHandle::spawn(
            unit.clone(),
            strategy.clone(),
            signal.clone(),
            Duration::from_secs(1),
            stop.clone(),
            EventSink::discard().emitter(format!("remediator-{i}")),
        ));
    }

    unit.inject_failure();
    for signal in &signals {
        signal.raise();
    }
    tokio::time::sleep(Duration::from_secs(3)).await;
    stop.stop();

    let mut successes = 0;
    for (_, task) in handles {
        successes += task.await.unwrap().successes();
    }

    assert_eq!(successes, 1);
    assert_eq!(unit.remediation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_work_items_never_decrease_while_running() {
    let config = scenario_config(
        30,
        unit_config(3, FailureMode::Disconnected),
        vec![StrategyConfig::fast_path()],
    );
    let scenario = Scenario::start(config, EventSink::discard()).unwrap();
    let unit = scenario.unit("fast-path").unwrap();

    let sampler = tokio::spawn(async move {
        let mut samples = vec![];
        for _ in 0..280 {
            let snapshot = unit.snapshot();
            samples.push((snapshot.health, snapshot.connected, snapshot.total_work_items));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        samples
    });

    let report = scenario.run_until(std::future::pending()).await;
    let samples = sampler.await.unwrap();

    assert!(samples.windows(2).all(|w| w[0].2 <= w[1].2));
    assert!(samples.iter().any(|(health, _, _)| *health != Health::Healthy));
    assert!(report.strategy("fast-path").unwrap().total_work_items >= samples.last().unwrap().2);

    // disconnected failures: the metric is 1 exactly while healthy
    for (health, connected, _) in &samples {
        let expected = u8::from(*health == Health::Healthy);
        assert_eq!(*connected, expected, "{health:?} with connected={connected}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_event_stream_orders_detection_before_recovery() {
    let config = scenario_config(
        6,
        unit_config(3, FailureMode::Silent),
        vec![StrategyConfig::fast_path()],
    );
    let (sink, mut rx) = EventSink::channel(1024);

    let report = Scenario::start(config, sink.clone())
        .unwrap()
        .run_until(std::future::pending())
        .await;
    drop(sink);

    let mut kinds = vec![];
    while let Some(event) = rx.recv().await {
        kinds.push((event.actor.to_string(), event.kind));
    }

    let position = |pred: fn(&EventKind) -> bool| {
        kinds
            .iter()
            .position(|(_, kind)| pred(kind))
            .expect("event emitted")
    };
    let injected = position(|k| matches!(k, EventKind::FailureInjected { silent: true }));
    let raised = position(|k| matches!(k, EventKind::AlarmRaised { .. }));
    let started = position(|k| matches!(k, EventKind::RemediationStarted { .. }));
    let recovered = position(|k| matches!(k, EventKind::RemediationSucceeded { .. }));

    assert!(injected < raised);
    assert!(raised < started);
    assert!(started < recovered);
    assert_eq!(kinds[raised].0, "fast-path/monitor");
    assert_eq!(kinds[recovered].0, "fast-path/remediator");
    assert_eq!(report.dropped_events, 0);
}
