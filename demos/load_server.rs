//! Standalone load-test server: STOMP over TCP plus the HTTP control surface.
//!
//! ```text
//! cargo run --features http --example load_server -- --stomp 0.0.0.0:61613 --http 0.0.0.0:8080
//! ```
//!
//! Harness settings come from `RSLOAD_*` environment variables.

use clap::Parser;
use rsload::http::serve_http;
use rsload::{HarnessConfig, LoadHarness, init_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(about = "Serve the load-test harness over STOMP and HTTP")]
struct Args {
    /// STOMP listen address.
    #[arg(long, default_value = "127.0.0.1:61613")]
    stomp: SocketAddr,

    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    http: SocketAddr,

    /// Seconds between metrics reports; 0 disables them.
    #[arg(long, default_value_t = 5)]
    report_interval: u64,

    /// Print reports as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");
    let args = Args::parse();

    let harness = Arc::new(LoadHarness::new(HarnessConfig::from_env()?)?);
    let shutdown = CancellationToken::new();

    let stomp = TcpListener::bind(args.stomp).await?;
    let http = TcpListener::bind(args.http).await?;

    if !args.json {
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║           Load Test Server                                   ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║  STOMP:        {:>44}  ║", args.stomp);
        println!("║  HTTP:         {:>44}  ║", args.http);
        println!("╚══════════════════════════════════════════════════════════════╝");
        println!();
        println!("Waiting for connections... (Ctrl+C to stop)");
    }

    let stomp_task = tokio::spawn(rsload::harness::serve(
        harness.clone(),
        stomp,
        shutdown.clone(),
    ));
    let http_task = tokio::spawn(serve_http(harness.clone(), http, shutdown.clone()));

    if args.report_interval > 0 {
        let harness = harness.clone();
        let shutdown = shutdown.clone();
        let json = args.json;
        let period = Duration::from_secs(args.report_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let m = harness.metrics();
                if json {
                    match serde_json::to_string(&m) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!(error = %e, "report not serialised"),
                    }
                } else {
                    println!(
                        "in {:>8} (p95 {:>7.2} p99 {:>7.2}) | out {:>8} (p95 {:>7.2} p99 {:>7.2}) | logic p99 {:>7.2} | queues {}/{} | {:?}",
                        m.total_inbound_messages,
                        m.inbound_p95,
                        m.inbound_p99,
                        m.total_outbound_messages,
                        m.outbound_p95,
                        m.outbound_p99,
                        m.business_logic_p99,
                        m.inbound_queue_size,
                        m.outbound_queue_size,
                        harness.broadcast_state(),
                    );
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();
    let _ = stomp_task.await;
    let _ = http_task.await;
    harness.shutdown().await;
    Ok(())
}
