//! The load-test server side, wired together.
//!
//! [`LoadHarness`] owns the profile, the metrics aggregator, both executors
//! and channels, the broker and the response service. Transports hand it
//! client frames through [`LoadHarness::dispatch`] and drain each session's
//! outgoing queue. The configuration, control and metrics endpoints are
//! plain methods; the `http` feature exposes them over HTTP.

mod server;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::broker::{Broker, SessionRegistry};
use crate::channel::{MessageChannel, MessageHandler};
use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::executor::{Executor, ExecutorStats};
use crate::interceptor::{ChannelInterceptor, InboundMetricInterceptor, OutboundMetricInterceptor};
use crate::message::{Command, InboundRequest, Message, SessionId};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::service::{ResponseService, ServiceState};
use crate::workload::{LoadProfile, ProfileSnapshot, WorkKind, WorkSimulator};

pub use server::{bind_and_serve, serve};

/// Outgoing frames buffered per session before delivery applies backpressure.
pub const SESSION_QUEUE_CAPACITY: usize = 1024;

/// Body of the configuration endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadConfigRequest {
    /// Broadcast rate for the next start. Must be positive.
    pub outbound_tps: u32,
    /// Work each handler simulates.
    #[serde(alias = "loadType")]
    pub load_kind: WorkKind,
    /// Duration of the simulated work.
    pub load_duration_ms: u64,
}

/// Server half of the load test.
pub struct LoadHarness {
    config: HarnessConfig,
    profile: LoadProfile,
    metrics: Arc<MetricsAggregator>,
    inbound: Arc<MessageChannel>,
    outbound: Arc<MessageChannel>,
    broker: Arc<Broker>,
    service: ResponseService,
}

impl LoadHarness {
    /// Build every component from `config`.
    ///
    /// Must be called inside a tokio runtime when either executor is
    /// per-task.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `config` fails validation, or whatever
    /// building an executor returns.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;

        let profile = LoadProfile::new(config.outbound_tps)?;
        let metrics = Arc::new(MetricsAggregator::new(config.metrics.clone())?);
        let sessions = Arc::new(SessionRegistry::new());

        let outbound_interceptors: Vec<Arc<dyn ChannelInterceptor>> =
            vec![Arc::new(OutboundMetricInterceptor::new(metrics.clone()))];
        let outbound = Arc::new(MessageChannel::new(
            "outbound",
            Arc::new(Executor::from_config(&config.outbound)?),
            outbound_interceptors,
            sessions.clone(),
        ));
        let broker = Arc::new(Broker::new(outbound.clone(), sessions));

        let inbound_interceptors: Vec<Arc<dyn ChannelInterceptor>> =
            vec![Arc::new(InboundMetricInterceptor::new(metrics.clone()))];
        let router = Arc::new(InboundRouter {
            broker: broker.clone(),
            profile: profile.clone(),
            request_destination: config.request_destination.clone(),
        });
        let inbound = Arc::new(MessageChannel::new(
            "inbound",
            Arc::new(Executor::from_config(&config.inbound)?),
            inbound_interceptors,
            router,
        ));

        let service = ResponseService::new(
            broker.clone(),
            profile.clone(),
            config.broadcast_destination.clone(),
        );

        tracing::info!(
            inbound = inbound.executor().name(),
            outbound = outbound.executor().name(),
            outbound_tps = config.outbound_tps,
            "load harness ready"
        );
        Ok(Self {
            config,
            profile,
            metrics,
            inbound,
            outbound,
            broker,
            service,
        })
    }

    /// Apply a configuration request to the profile and the broadcaster.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRate`] for a zero rate; nothing is changed.
    pub fn configure(&self, request: LoadConfigRequest) -> Result<()> {
        self.profile.replace(ProfileSnapshot {
            kind: request.load_kind,
            duration: Duration::from_millis(request.load_duration_ms),
            outbound_rate: request.outbound_tps,
        })
    }

    /// Start the broadcaster. Returns whether it started.
    pub fn start_broadcast(&self) -> bool {
        match self.service.start() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "broadcast not started");
                false
            }
        }
    }

    /// Stop the broadcaster. Always succeeds.
    pub fn stop_broadcast(&self) -> bool {
        self.service.stop();
        true
    }

    /// Current metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.inbound.stats(), self.outbound.stats())
    }

    /// Register a new session and return its id and outgoing queue.
    pub fn connect(&self) -> (SessionId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        (self.broker.sessions().register(tx), rx)
    }

    /// Feed one client frame from `session` into the inbound channel.
    ///
    /// # Errors
    ///
    /// Backpressure or shutdown errors from the inbound executor.
    pub async fn dispatch(&self, session: SessionId, message: Message) -> Result<()> {
        self.inbound.send(message.with_session(session)).await
    }

    /// Forget `session` and its subscriptions.
    pub fn disconnect(&self, session: SessionId) {
        self.broker.disconnect(session);
    }

    /// Wait until both executors have no accepted work left.
    pub async fn settle(&self) {
        self.inbound.executor().wait_idle().await;
        self.outbound.executor().wait_idle().await;
    }

    /// Stop the broadcaster and both executors.
    pub async fn shutdown(&self) {
        self.service.stop_and_wait().await;
        self.inbound.executor().shutdown().await;
        self.outbound.executor().shutdown().await;
        tracing::info!("load harness stopped");
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub fn profile(&self) -> &LoadProfile {
        &self.profile
    }

    #[must_use]
    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    #[must_use]
    pub fn service(&self) -> &ResponseService {
        &self.service
    }

    #[must_use]
    pub fn broadcast_state(&self) -> ServiceState {
        self.service.state()
    }

    #[must_use]
    pub fn inbound_stats(&self) -> ExecutorStats {
        self.inbound.stats()
    }

    #[must_use]
    pub fn outbound_stats(&self) -> ExecutorStats {
        self.outbound.stats()
    }

    #[must_use]
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.broker.subscriber_count(destination)
    }
}

impl std::fmt::Debug for LoadHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHarness")
            .field("profile", &self.profile.snapshot())
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// Inbound channel handler: session frames go to the broker, requests to
/// the simulated business logic.
struct InboundRouter {
    broker: Arc<Broker>,
    profile: LoadProfile,
    request_destination: String,
}

impl InboundRouter {
    fn is_request(&self, destination: &str) -> bool {
        destination.trim_start_matches('/') == self.request_destination.trim_start_matches('/')
    }

    async fn handle_request(&self, message: &Message) -> Result<()> {
        let request: InboundRequest = message.json()?;
        let elapsed = WorkSimulator::new()
            .simulate_profile(&self.profile.snapshot())
            .await;
        tracing::trace!(id = request.id, ?elapsed, "request handled");
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for InboundRouter {
    async fn handle(&self, message: &Message) -> Result<()> {
        let session = message.session();
        match message.command {
            Command::Send => match message.destination() {
                Some(dest) if self.is_request(dest) => self.handle_request(message).await,
                Some(dest) => {
                    tracing::debug!(destination = dest, "no handler for destination");
                    Ok(())
                }
                None => Err(Error::InvalidFrame("SEND without destination".into())),
            },
            Command::Subscribe => {
                let session = session.ok_or(Error::SessionClosed)?;
                let destination = message
                    .destination()
                    .ok_or_else(|| Error::InvalidFrame("SUBSCRIBE without destination".into()))?;
                let id = message.header("id").unwrap_or("0");
                self.broker.subscribe(session, destination, id);
                Ok(())
            }
            Command::Unsubscribe => {
                let session = session.ok_or(Error::SessionClosed)?;
                let id = message
                    .header("id")
                    .ok_or_else(|| Error::InvalidFrame("UNSUBSCRIBE without id".into()))?;
                self.broker.unsubscribe(session, id);
                Ok(())
            }
            Command::Disconnect => {
                if let Some(session) = session {
                    self.broker.disconnect(session);
                }
                Ok(())
            }
            other => {
                tracing::debug!(command = %other, "ignored inbound frame");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_BROADCAST_DESTINATION, DEFAULT_REQUEST_DESTINATION, ExecutorConfig};
    use crate::message::OutboundResponse;

    fn small_config() -> HarnessConfig {
        HarnessConfig::new()
            .with_inbound(ExecutorConfig::bounded(2, 64).with_name_prefix("t-in-"))
            .with_outbound(ExecutorConfig::bounded(2, 64).with_name_prefix("t-out-"))
    }

    fn request(id: u64) -> Message {
        let body = serde_json::to_vec(&InboundRequest::now(id)).unwrap();
        Message::send(DEFAULT_REQUEST_DESTINATION, body)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inbound_requests_are_measured() {
        let harness = LoadHarness::new(small_config()).unwrap();
        let (session, _rx) = harness.connect();
        for id in 0..20 {
            harness.dispatch(session, request(id)).await.unwrap();
        }
        harness.settle().await;

        let metrics = harness.metrics();
        assert_eq!(metrics.total_inbound_messages, 20);
        assert_eq!(metrics.total_outbound_messages, 0);
        assert_eq!(metrics.inbound_active_threads, 0);
        assert_eq!(harness.aggregator().samples(crate::metrics::Stage::BusinessLogic), 20);
        harness.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bad_payload_counts_as_failure() {
        let harness = LoadHarness::new(small_config()).unwrap();
        let (session, _rx) = harness.connect();
        harness
            .dispatch(session, Message::send(DEFAULT_REQUEST_DESTINATION, "not json"))
            .await
            .unwrap();
        harness.settle().await;
        assert_eq!(harness.inbound_stats().failed, 1);
        assert_eq!(harness.metrics().total_inbound_messages, 1);
        harness.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscriber_receives_broadcast() {
        let harness = LoadHarness::new(small_config().with_outbound_tps(50)).unwrap();
        let (session, mut rx) = harness.connect();
        harness
            .dispatch(session, Message::subscribe(DEFAULT_BROADCAST_DESTINATION, "sub-0"))
            .await
            .unwrap();
        harness.settle().await;
        assert_eq!(harness.subscriber_count(DEFAULT_BROADCAST_DESTINATION), 1);

        assert!(harness.start_broadcast());
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(harness.stop_broadcast());

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert!(frame.correlation_id().is_some());
        let response: OutboundResponse = frame.json().unwrap();
        assert_eq!(response.id, 1);

        harness.settle().await;
        assert!(harness.metrics().total_outbound_messages >= 1);
        harness.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_configure_is_all_or_nothing() {
        let harness = LoadHarness::new(small_config()).unwrap();
        let rejected = harness.configure(LoadConfigRequest {
            outbound_tps: 0,
            load_kind: WorkKind::CpuBound,
            load_duration_ms: 50,
        });
        assert_eq!(rejected, Err(Error::InvalidRate(0)));
        assert_eq!(harness.profile().snapshot(), ProfileSnapshot::default());

        harness
            .configure(LoadConfigRequest {
                outbound_tps: 40,
                load_kind: WorkKind::IoBound,
                load_duration_ms: 5,
            })
            .unwrap();
        let snap = harness.profile().snapshot();
        assert_eq!(snap.outbound_rate, 40);
        assert_eq!(snap.kind, WorkKind::IoBound);
        assert_eq!(snap.duration, Duration::from_millis(5));
        harness.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_double_start_reports_false() {
        let harness = LoadHarness::new(small_config()).unwrap();
        assert!(harness.start_broadcast());
        assert!(!harness.start_broadcast());
        assert!(harness.stop_broadcast());
        assert!(harness.stop_broadcast());
        assert_eq!(harness.broadcast_state(), ServiceState::Stopped);
        harness.shutdown().await;
    }

    #[test]
    fn test_config_request_json() {
        let request: LoadConfigRequest = serde_json::from_str(
            r#"{"outboundTps":100,"loadKind":"CPU_BOUND","loadDurationMs":60000}"#,
        )
        .unwrap();
        assert_eq!(request.outbound_tps, 100);
        assert_eq!(request.load_kind, WorkKind::CpuBound);

        let aliased: LoadConfigRequest = serde_json::from_str(
            r#"{"outboundTps":1,"loadType":"IO_BOUND","loadDurationMs":0}"#,
        )
        .unwrap();
        assert_eq!(aliased.load_kind, WorkKind::IoBound);

        assert!(
            serde_json::from_str::<LoadConfigRequest>(
                r#"{"outboundTps":-1,"loadKind":"NONE","loadDurationMs":0}"#
            )
            .is_err()
        );
    }
}
