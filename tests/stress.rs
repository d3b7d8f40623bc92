//! Stress tests for sustained load through the served harness.
//!
//! These tests are marked #[ignore] and run via: cargo test -- --ignored

mod harness;

use harness::TestServer;
use rsload::config::{DEFAULT_BROADCAST_DESTINATION, DEFAULT_REQUEST_DESTINATION};
use rsload::{
    ClientConfig, HarnessConfig, InboundRequest, LoadConfigRequest, LoadTestClient, TcpConnector,
    WorkKind,
};
use std::time::{Duration, Instant};

fn get_stress_tps() -> u32 {
    std::env::var("RSLOAD_STRESS_TPS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2000)
}

const CONNECTIONS: usize = 50;
const RUN_TIME: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn test_stress_sustained_rate() {
    let tps = get_stress_tps();
    println!("Stress test: {tps} msg/s over {CONNECTIONS} connections for {RUN_TIME:?}");

    let (server, addr) = TestServer::spawn_with(HarnessConfig::default().with_outbound_tps(100)).await;
    server
        .harness()
        .configure(LoadConfigRequest {
            outbound_tps: 100,
            load_kind: WorkKind::IoBound,
            load_duration_ms: 5,
        })
        .unwrap();

    let connector = TcpConnector::new(addr).with_connect_timeout(Duration::from_secs(5));
    let client = LoadTestClient::connect(&connector, ClientConfig::new(CONNECTIONS))
        .await
        .unwrap();
    client.subscribe_all(DEFAULT_BROADCAST_DESTINATION).await.unwrap();
    assert!(server.harness().start_broadcast());

    let start = Instant::now();
    client
        .start_sending(DEFAULT_REQUEST_DESTINATION, tps, || InboundRequest::now(0))
        .unwrap();
    tokio::time::sleep(RUN_TIME).await;
    client.close_all(Duration::from_secs(5)).await;
    server.harness().stop_broadcast();
    let elapsed = start.elapsed();

    tokio::time::sleep(Duration::from_millis(200)).await;
    server.harness().settle().await;
    let snapshot = server.harness().metrics();

    println!("client: sent={} received={}", client.sent(), client.received());
    println!(
        "inbound p95/p99 {:.2}/{:.2} ms, business p95/p99 {:.2}/{:.2} ms, outbound p95/p99 {:.2}/{:.2} ms",
        snapshot.inbound_p95,
        snapshot.inbound_p99,
        snapshot.business_logic_p95,
        snapshot.business_logic_p99,
        snapshot.outbound_p95,
        snapshot.outbound_p99,
    );

    let achieved = client.sent() as f64 / elapsed.as_secs_f64();
    println!("achieved {achieved:.1} msg/s");
    assert!(achieved >= f64::from(tps) * 0.8, "achieved {achieved:.1} of {tps}");
    assert_eq!(snapshot.total_inbound_messages, client.sent());
    assert!(client.received() > 0);
    server.shutdown().await;
}
