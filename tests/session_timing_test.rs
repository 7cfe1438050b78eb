//! Timing behaviour of timed and cancelled acquisitions.

use spectro_daq::config::SessionConfig;
use spectro_daq::producer::{MockProducer, MockProducerConfig};
use spectro_daq::{
    CancellationToken, MemorySink, Producer, SessionController, SessionState, StopReason,
};
use std::sync::Arc;
use std::time::Duration;

fn mocks() -> Vec<Arc<dyn Producer>> {
    vec![
        Arc::new(MockProducer::with_config(
            "dig_a",
            MockProducerConfig {
                channels: vec![0, 1],
                seed: Some(3),
                ..Default::default()
            },
        )),
        Arc::new(MockProducer::with_config(
            "dig_b",
            MockProducerConfig {
                channels: vec![2],
                seed: Some(4),
                ..Default::default()
            },
        )),
    ]
}

#[tokio::test]
async fn test_two_second_run_stops_on_time() {
    let config = SessionConfig::default();
    let poll = config.poll_interval();
    let controller = SessionController::new(mocks(), config);
    controller.boot_all().await.unwrap();

    let mut states = controller.subscribe();
    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == SessionState::Idle {
                break;
            }
        }
        seen
    });

    let sink = Arc::new(MemorySink::new());
    let result = controller
        .run_timed(Some(Duration::from_secs(2)), &CancellationToken::new(), sink.clone())
        .await
        .unwrap();

    assert_eq!(result.stop_reason, StopReason::Timeout);
    assert!(result.time_to_stop >= Duration::from_secs(2), "{:?}", result.time_to_stop);
    assert!(
        result.time_to_stop <= Duration::from_secs(2) + poll,
        "{:?}",
        result.time_to_stop
    );
    assert!(result.elapsed >= result.time_to_stop);

    // Starting may be overwritten before the watcher runs; the rest must be seen in order
    let seen: Vec<_> = watcher
        .await
        .unwrap()
        .into_iter()
        .filter(|s| *s != SessionState::Starting)
        .collect();
    assert_eq!(
        seen,
        vec![
            SessionState::Running,
            SessionState::Stopping,
            SessionState::Draining,
            SessionState::Idle,
        ]
    );

    assert!(result.report.events_out > 0);
    assert_eq!(sink.flush_count(), 1);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_cancel_is_not_bound_to_poll_interval() {
    // One poll per minute: only the cancel wakeup can end this run quickly
    let controller = SessionController::new(
        mocks(),
        SessionConfig {
            poll_interval_ms: 60_000,
            ..Default::default()
        },
    );
    controller.boot_all().await.unwrap();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });
    }

    let result = controller
        .run_timed(None, &cancel, Arc::new(MemorySink::new()))
        .await
        .unwrap();
    assert_eq!(result.stop_reason, StopReason::Cancelled);
    assert!(result.time_to_stop < Duration::from_secs(2), "{:?}", result.time_to_stop);
}

#[tokio::test]
async fn test_controller_can_run_again() {
    let controller = SessionController::new(
        mocks(),
        SessionConfig {
            poll_interval_ms: 20,
            drain_interval_ms: 5,
            timeout_secs: None,
        },
    );
    controller.boot_all().await.unwrap();

    let first = controller
        .run_timed(Some(Duration::from_millis(250)), &CancellationToken::new(), Arc::new(MemorySink::new()))
        .await
        .unwrap();
    let second = controller
        .run_timed(Some(Duration::from_millis(250)), &CancellationToken::new(), Arc::new(MemorySink::new()))
        .await
        .unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.started.len(), 2);

    controller.shutdown_all().await;
    assert!(!controller.aggregate_status().is_booted());
}
