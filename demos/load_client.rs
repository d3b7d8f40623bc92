//! TPS ratio sweep against an in-process harness.
//!
//! Each scenario configures the broadcaster, starts it, drives inbound
//! requests through a loopback [`LoadTestClient`] for the run time, then
//! prints the metrics snapshot and appends it as a row to a TSV results file.
//!
//! ```text
//! cargo run --example load_client -- --scenario 100:10 --scenario 2000:2000 --seconds 60
//! ```

use clap::Parser;
use rsload::metrics::TSV_HEADER;
use rsload::{
    ClientConfig, HarnessConfig, InboundRequest, LoadConfigRequest, LoadHarness, LoadTestClient,
    LoopbackConnector, MetricsSnapshot, WorkKind, init_tracing,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Measure channel latency across inbound/outbound TPS ratios")]
struct Args {
    /// Scenario as INBOUND:OUTBOUND messages per second. Repeatable.
    #[arg(long = "scenario", value_parser = parse_scenario, default_value = "2000:2000")]
    scenarios: Vec<(u32, u32)>,

    /// Client connections the inbound rate is split across.
    #[arg(long, default_value_t = 10)]
    connections: usize,

    /// Seconds each scenario sends for.
    #[arg(long, default_value_t = 60)]
    seconds: u64,

    /// Simulated work per message.
    #[arg(long, value_parser = parse_kind, default_value = "NONE")]
    load: WorkKind,

    /// Simulated work duration in milliseconds.
    #[arg(long, default_value_t = 0)]
    load_ms: u64,

    /// Results file; the header is written when it does not exist yet.
    #[arg(long, default_value = "target/load-test/tps-ratio-results.tsv")]
    output: PathBuf,

    /// Print snapshots as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn parse_scenario(raw: &str) -> Result<(u32, u32), String> {
    let (inbound, outbound) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected INBOUND:OUTBOUND, got {raw:?}"))?;
    let parse = |s: &str| s.trim().parse::<u32>().map_err(|e| format!("{s:?}: {e}"));
    Ok((parse(inbound)?, parse(outbound)?))
}

fn parse_kind(raw: &str) -> Result<WorkKind, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_uppercase()))
        .map_err(|_| format!("unknown load kind {raw:?}"))
}

fn report(inbound: u32, outbound: u32, m: &MetricsSnapshot) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  Scenario: inbound {:>6} TPS, outbound {:>6} TPS            ║", inbound, outbound);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  LATENCY (ms)                   P95          P99             ║");
    println!("║    Inbound:               {:>9.2}    {:>9.2}             ║", m.inbound_p95, m.inbound_p99);
    println!("║    Outbound:              {:>9.2}    {:>9.2}             ║", m.outbound_p95, m.outbound_p99);
    println!("║    Business logic:        {:>9.2}    {:>9.2}             ║", m.business_logic_p95, m.business_logic_p99);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  EXECUTORS                    Active        Queue            ║");
    println!("║    Inbound:               {:>9}    {:>9}             ║", m.inbound_active_threads, m.inbound_queue_size);
    println!("║    Outbound:              {:>9}    {:>9}             ║", m.outbound_active_threads, m.outbound_queue_size);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  MESSAGES                                                    ║");
    println!("║    Inbound:               {:>12}                       ║", m.total_inbound_messages);
    println!("║    Outbound:              {:>12}                       ║", m.total_outbound_messages);
    println!("╚══════════════════════════════════════════════════════════════╝");
}

fn append_row(path: &PathBuf, row: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let exists = path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if !exists {
        writeln!(file, "{TSV_HEADER}")?;
    }
    writeln!(file, "{row}")
}

async fn run_scenario(
    args: &Args,
    inbound: u32,
    outbound: u32,
) -> Result<MetricsSnapshot, Box<dyn std::error::Error>> {
    let harness = Arc::new(LoadHarness::new(HarnessConfig::from_env()?)?);
    harness.configure(LoadConfigRequest {
        outbound_tps: outbound,
        load_kind: args.load,
        load_duration_ms: args.load_ms,
    })?;
    if !harness.start_broadcast() {
        return Err("response service did not start".into());
    }

    let connector = LoopbackConnector::new(harness.clone());
    let client = LoadTestClient::connect(&connector, ClientConfig::new(args.connections)).await?;
    client.subscribe_all(&harness.config().broadcast_destination).await?;

    let destination = harness.config().request_destination.clone();
    let shares = client.start_sending(&destination, inbound, || {
        InboundRequest::now(chrono::Utc::now().timestamp_millis().max(0) as u64)
    })?;
    tracing::info!(inbound, outbound, ?shares, seconds = args.seconds, "scenario running");

    tokio::time::sleep(Duration::from_secs(args.seconds)).await;
    client.stop_sending();

    let snapshot = harness.metrics();
    client.close().await;
    harness.shutdown().await;
    Ok(snapshot)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");
    let args = Args::parse();

    for &(inbound, outbound) in &args.scenarios {
        let snapshot = run_scenario(&args, inbound, outbound).await?;
        if args.json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            report(inbound, outbound, &snapshot);
        }

        let row = snapshot.to_tsv_row(&format!("{inbound}:{outbound}"));
        match append_row(&args.output, &row) {
            Ok(()) => tracing::info!(path = %args.output.display(), "results saved"),
            Err(e) => tracing::error!(path = %args.output.display(), error = %e, "failed to save results"),
        }
    }
    Ok(())
}
