//! # rsload - Load generation and latency instrumentation for STOMP channels
//!
//! `rsload` drives synthetic message traffic through a STOMP-style
//! request/broadcast pipeline and measures where the time goes.
//!
//! ## Features
//!
//! - **Rate-controlled scheduling** with a first tick on start and no overlap
//! - **Per-stage latency** (inbound, business logic, outbound) via channel
//!   interceptors, reported as p95/p99 from HDR histograms
//! - **Bounded or per-task executors** behind each channel, with live stats
//! - **Synthetic workload** (CPU or I/O bound) swapped atomically at runtime
//! - **Load-test client** splitting an aggregate rate across many connections
//! - **Optional HTTP control surface** behind the `http` feature
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rsload::{HarnessConfig, LoadHarness, LoadTestClient, LoopbackConnector, ClientConfig};
//!
//! let harness = Arc::new(LoadHarness::new(HarnessConfig::default())?);
//! let client = LoadTestClient::connect(&LoopbackConnector::new(harness.clone()), ClientConfig::new(10)).await?;
//! client.start_sending("/app/test/load/request", 100, || InboundRequest::now(1))?;
//! ```

pub mod broker;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod harness;
pub mod interceptor;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod workload;

#[cfg(feature = "http")]
pub mod http;

pub use broker::{Broker, Publisher, SessionRegistry};
pub use channel::{MessageChannel, MessageHandler};
pub use client::{
    Connector, LoadTestClient, LoopbackConnector, Session, TcpConnector, distribute_rate,
};
pub use codec::{StompCodec, decode_frame, encode_frame};
pub use config::{
    ClientConfig, ExecutorConfig, FullQueuePolicy, HarnessConfig, Limits, MetricsConfig,
};
pub use error::{Error, Result};
pub use executor::{BoundedPool, Executor, ExecutorStats, PerTaskExecutor};
pub use harness::{LoadConfigRequest, LoadHarness};
pub use interceptor::{ChannelInterceptor, InboundMetricInterceptor, OutboundMetricInterceptor};
pub use logging::init_tracing;
pub use message::{Command, InboundRequest, Message, OutboundResponse};
pub use metrics::{Counter, CorrelationId, MetricsAggregator, MetricsSnapshot, Stage};
pub use scheduler::{ChainHandle, RateScheduler, ScheduleHandle, TaskChain};
pub use service::{ResponseService, ServiceState};
pub use workload::{LoadProfile, ProfileSnapshot, WorkKind, WorkSimulator};
