//! Offline queueing and replay.

use std::sync::Arc;
use std::time::Duration;

use resilient_request::error::ErrorCategory;
use resilient_request::offline::{run_replay_loop, ConnectivityMonitor, DrainReport};
use resilient_request::resilience::CircuitState;
use resilient_request::{ErrorKind, RequestDescriptor, ServiceStatusEvent, Shutdown};

mod common;
use common::{client_with, client_with_connectivity, test_config, ScriptedTransport, Step};

#[tokio::test(start_paused = true)]
async fn test_offline_failure_is_queued_then_replayed() {
    let connectivity = ConnectivityMonitor::new();
    connectivity.set_online(false);
    let transport = ScriptedTransport::new(vec![Step::NoResponse]);
    let client = client_with_connectivity(transport.clone(), test_config(), connectivity.clone());
    let mut events = client.subscribe_events();

    let err = client
        .execute("job", RequestDescriptor::post("/jobs", serde_json::json!({"title": "Fix sink"})))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Offline);
    assert!(err.queued);
    assert!(err.retryable);
    assert_eq!(err.category, ErrorCategory::Network);
    assert_eq!(transport.calls(), 1, "offline failures are not retried");
    assert_eq!(client.offline_queue().len(), 1);
    assert!(matches!(events.try_recv().unwrap(), ServiceStatusEvent::RequestQueued { .. }));

    connectivity.set_online(true);
    let report = client.drain_offline_queue().await;

    assert_eq!(report, DrainReport { delivered: 1, requeued: 0, dropped: 0 });
    assert!(client.offline_queue().is_empty());
    let replayed = &transport.requests()[1];
    assert_eq!(replayed.url.path(), "/jobs");
    assert_eq!(replayed.body, Some(serde_json::json!({"title": "Fix sink"})));
}

#[tokio::test(start_paused = true)]
async fn test_offline_failures_leave_breaker_closed() {
    let connectivity = ConnectivityMonitor::new();
    connectivity.set_online(false);
    let transport = ScriptedTransport::new(vec![Step::NoResponse; 5]);
    let client = client_with_connectivity(transport.clone(), test_config(), connectivity.clone());

    for i in 0..5 {
        let err = client
            .execute("job", RequestDescriptor::get(format!("/jobs/{}", i)))
            .await
            .unwrap_err();
        assert!(err.queued);
    }

    let status = client.status("job").unwrap();
    assert_eq!(status.circuit.state, CircuitState::Closed);
    assert_eq!(status.circuit.failure_count, 0);
    assert!(status.health.is_none());

    connectivity.set_online(true);
    let report = client.drain_offline_queue().await;

    assert_eq!(report, DrainReport { delivered: 5, requeued: 0, dropped: 0 });
    assert!(client.offline_queue().is_empty());
    assert_eq!(client.status("job").unwrap().circuit.state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_queued_after_cold_start_retries_exhausted() {
    let mut config = test_config();
    config.breaker.failure_threshold = 10;
    let transport = ScriptedTransport::with_fallback(vec![], Step::NoResponse);
    let client = client_with(transport.clone(), config);

    let err = client.execute("messaging", RequestDescriptor::get("/threads")).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Offline);
    assert_eq!(transport.calls(), 7);
    assert_eq!(client.offline_queue().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replay_dropped_after_ceiling() {
    let mut config = test_config();
    config.retry.enabled = false;
    let connectivity = ConnectivityMonitor::new();
    connectivity.set_online(false);
    let transport = ScriptedTransport::with_fallback(vec![], Step::NoResponse);
    let client = client_with_connectivity(transport.clone(), config, connectivity.clone());

    client.execute("job", RequestDescriptor::get("/jobs")).await.unwrap_err();
    connectivity.set_online(true);

    assert_eq!(client.drain_offline_queue().await.requeued, 1);
    assert_eq!(client.drain_offline_queue().await.requeued, 1);
    assert_eq!(client.offline_queue().pending()[0].retry_count, 2);

    let report = client.drain_offline_queue().await;
    assert_eq!(report.dropped, 1);
    assert!(client.offline_queue().is_empty());
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_replay_is_discarded() {
    let connectivity = ConnectivityMonitor::new();
    connectivity.set_online(false);
    let transport = ScriptedTransport::new(vec![Step::NoResponse, Step::Reply(422)]);
    let client = client_with_connectivity(transport.clone(), test_config(), connectivity.clone());

    client.execute("job", RequestDescriptor::get("/jobs")).await.unwrap_err();
    connectivity.set_online(true);

    let report = client.drain_offline_queue().await;
    assert_eq!(report, DrainReport { delivered: 0, requeued: 0, dropped: 1 });
    assert!(client.offline_queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_replay_loop_drains_on_reconnect() {
    let connectivity = ConnectivityMonitor::new();
    connectivity.set_online(false);
    let transport = ScriptedTransport::new(vec![Step::NoResponse, Step::NoResponse]);
    let client = Arc::new(client_with_connectivity(
        transport.clone(),
        test_config(),
        connectivity.clone(),
    ));

    let shutdown = Shutdown::new();
    let task = tokio::spawn(run_replay_loop(Arc::clone(&client), shutdown.subscribe()));

    client.execute("job", RequestDescriptor::get("/jobs/1")).await.unwrap_err();
    client.execute("user", RequestDescriptor::get("/users/1")).await.unwrap_err();
    assert_eq!(client.offline_queue().len(), 2);

    connectivity.set_online(true);
    for _ in 0..50 {
        if client.offline_queue().is_empty() && transport.calls() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(client.offline_queue().is_empty());
    assert_eq!(transport.calls(), 4);

    shutdown.trigger();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_hanging_replay() {
    let connectivity = ConnectivityMonitor::new();
    connectivity.set_online(false);
    let transport = ScriptedTransport::new(vec![Step::NoResponse, Step::Hang]);
    let client = Arc::new(client_with_connectivity(
        transport.clone(),
        test_config(),
        connectivity.clone(),
    ));

    let shutdown = Shutdown::new();
    let task = tokio::spawn(run_replay_loop(Arc::clone(&client), shutdown.subscribe()));

    client.execute("job", RequestDescriptor::get("/jobs")).await.unwrap_err();
    connectivity.set_online(true);
    for _ in 0..50 {
        if transport.calls() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.calls(), 2, "replay is in flight");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("replay task stops promptly")
        .unwrap();

    let pending = client.offline_queue().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 0);
}
