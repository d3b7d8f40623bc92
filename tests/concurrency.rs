//! Concurrency tests for executors, channels and the served harness.
//!
//! Covers bookkeeping under concurrent submission and end-to-end delivery
//! over TCP and loopback connections.

mod harness;

use harness::{TestClient, TestServer};
use rsload::config::{DEFAULT_BROADCAST_DESTINATION, DEFAULT_REQUEST_DESTINATION};
use rsload::{
    ClientConfig, Command, Error, Executor, ExecutorConfig, HarnessConfig, InboundRequest,
    LoadConfigRequest, LoadHarness, LoadTestClient, LoopbackConnector, TcpConnector, WorkKind,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_pool_drains_concurrent_submissions() {
    let executor = Arc::new(
        Executor::from_config(&ExecutorConfig::bounded(8, 2048).with_name_prefix("drain-"))
            .unwrap(),
    );
    let ran = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for _ in 0..1000 {
        let executor = executor.clone();
        let ran = ran.clone();
        set.spawn(async move {
            executor
                .submit(async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    ran.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
                .await
                .unwrap();
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    executor.wait_idle().await;
    assert_eq!(ran.load(Ordering::Relaxed), 1000);
    let stats = executor.stats();
    assert_eq!(stats.total_submitted, 1000);
    assert_eq!(stats.active_threads, 0);
    assert_eq!(stats.queue_depth, 0);
    executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_active_count_recovers_after_failures_and_panics() {
    for config in [
        ExecutorConfig::bounded(4, 64),
        ExecutorConfig::per_task(Some(4)),
    ] {
        let executor = Executor::from_config(&config).unwrap();
        for i in 0..30u32 {
            let outcome = executor.submit(async move {
                match i % 3 {
                    0 => Ok(()),
                    1 => Err(Error::TaskFailed(format!("task {i}"))),
                    _ => panic!("task {i} panicked"),
                }
            });
            outcome.await.unwrap();
        }

        executor.wait_idle().await;
        let stats = executor.stats();
        assert_eq!(stats.active_threads, 0, "{}", executor.name());
        assert_eq!(stats.total_submitted, 30);
        assert_eq!(stats.failed, 20);
        executor.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_clients_receive_broadcast() {
    const NUM_CLIENTS: usize = 5;

    let (server, addr) =
        TestServer::spawn_with(HarnessConfig::default().with_outbound_tps(20)).await;
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS + 1));
    let received = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for _ in 0..NUM_CLIENTS {
        let barrier = barrier.clone();
        let received = received.clone();
        set.spawn(async move {
            let mut client = TestClient::connect(addr).await.unwrap();
            client.subscribe_broadcast().await.unwrap();
            barrier.wait().await;

            let frame = client.recv().await.unwrap().expect("broadcast frame");
            assert_eq!(frame.command, Command::Message);
            assert_eq!(frame.destination(), Some(DEFAULT_BROADCAST_DESTINATION));
            assert_eq!(frame.header("subscription"), Some("sub-0"));
            let body: serde_json::Value = frame.json().unwrap();
            assert!(body["id"].as_u64().unwrap() >= 1);

            received.fetch_add(1, Ordering::Relaxed);
            client.disconnect().await.unwrap();
        });
    }

    barrier.wait().await;
    // Subscriptions travel through the inbound executor.
    while server.harness().subscriber_count(DEFAULT_BROADCAST_DESTINATION) < NUM_CLIENTS {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(server.harness().start_broadcast());

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }
    assert_eq!(received.load(Ordering::Relaxed), NUM_CLIENTS);
    assert!(server.harness().metrics().total_outbound_messages >= NUM_CLIENTS as u64);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_requests_are_measured() {
    let (server, addr) = TestServer::spawn().await;
    server
        .harness()
        .configure(LoadConfigRequest {
            outbound_tps: 10,
            load_kind: WorkKind::IoBound,
            load_duration_ms: 2,
        })
        .unwrap();

    let mut client = TestClient::connect(addr).await.unwrap();
    for id in 1..=20 {
        client.send_request(id).await.unwrap();
    }
    client.disconnect().await.unwrap();

    let harness = server.harness().clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.metrics().total_inbound_messages < 20 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        harness.settle().await;
    })
    .await
    .unwrap();

    let snapshot = harness.metrics();
    assert_eq!(snapshot.total_inbound_messages, 20);
    assert!(snapshot.business_logic_p95 >= 1.9);
    assert!(snapshot.inbound_p99 >= snapshot.business_logic_p99 - 0.1);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_client_over_tcp() {
    let (server, addr) = TestServer::spawn().await;
    let connector = TcpConnector::new(addr).with_connect_timeout(Duration::from_secs(2));
    let client = LoadTestClient::connect(&connector, ClientConfig::new(4))
        .await
        .unwrap();
    assert_eq!(client.connection_count(), 4);

    client
        .start_sending(DEFAULT_REQUEST_DESTINATION, 40, || InboundRequest::now(1))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.close_all(Duration::from_secs(1)).await;

    let harness = server.harness().clone();
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.settle().await;
    assert!(client.sent() >= 16);
    assert_eq!(harness.metrics().total_inbound_messages, client.sent());
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_loopback_client_feeds_metrics() {
    let harness = Arc::new(LoadHarness::new(HarnessConfig::default()).unwrap());
    let connector = LoopbackConnector::new(harness.clone());
    let client = LoadTestClient::connect(&connector, ClientConfig::new(10))
        .await
        .unwrap();
    client.subscribe_all(DEFAULT_BROADCAST_DESTINATION).await.unwrap();
    harness.settle().await;
    assert_eq!(harness.subscriber_count(DEFAULT_BROADCAST_DESTINATION), 10);

    let shares = client
        .start_sending(DEFAULT_REQUEST_DESTINATION, 100, || InboundRequest::now(0))
        .unwrap();
    assert_eq!(shares, vec![10; 10]);
    assert!(harness.start_broadcast());

    tokio::time::sleep(Duration::from_millis(350)).await;
    harness.service().stop_and_wait().await;
    harness.settle().await;
    let broadcasts = harness.metrics().total_outbound_messages;
    assert!(broadcasts >= 10);
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.received() < broadcasts {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(client.received(), broadcasts);

    client.close_all(Duration::from_secs(1)).await;
    harness.settle().await;
    assert_eq!(harness.metrics().total_inbound_messages, client.sent());
    assert!(client.sent() >= 30);
    harness.shutdown().await;
}
