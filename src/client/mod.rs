//! Rate-controlled load-test client.
//!
//! [`LoadTestClient`] opens its connections up front through a
//! [`Connector`], splits an aggregate send rate across them with
//! [`distribute_rate`], and drives each connection from its own
//! [`RateScheduler`].

mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Instant, timeout};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::scheduler::RateScheduler;

pub use transport::{Connector, LoopbackConnector, Session, TcpConnector};

/// Split `total` messages per second across `connections` senders.
///
/// Every sender gets `total / connections`; the first
/// `total % connections` get one more. The shares sum to `total`. Zero
/// connections get an empty split.
#[must_use]
pub fn distribute_rate(total: u32, connections: usize) -> Vec<u32> {
    if connections == 0 {
        return Vec::new();
    }
    let n = connections as u64;
    let base = u64::from(total) / n;
    let remainder = (u64::from(total) % n) as usize;
    (0..connections)
        .map(|i| (base + u64::from(i < remainder)) as u32)
        .collect()
}

/// Many concurrent connections sending at a combined target rate.
pub struct LoadTestClient {
    sessions: Vec<Arc<dyn Session>>,
    senders: Mutex<Vec<RateScheduler>>,
    sent: Arc<AtomicU64>,
    config: ClientConfig,
}

impl LoadTestClient {
    /// Open `config.connections` connections.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for zero connections, or
    /// [`Error::ConnectionFailure`] naming the first connection that could
    /// not be opened. Connections opened before the failure are closed
    /// first.
    pub async fn connect<C>(connector: &C, config: ClientConfig) -> Result<Self>
    where
        C: Connector + ?Sized,
    {
        config.validate()?;
        let mut sessions: Vec<Arc<dyn Session>> = Vec::with_capacity(config.connections);

        for index in 0..config.connections {
            let attempt = timeout(config.connect_timeout(), connector.connect(index)).await;
            let failure = match attempt {
                Ok(Ok(session)) => {
                    sessions.push(session);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", config.connect_timeout()),
            };

            tracing::warn!(index, reason = %failure, opened = sessions.len(), "connection failed");
            close_sessions(&sessions, config.close_grace()).await;
            return Err(Error::ConnectionFailure {
                index,
                reason: failure,
            });
        }

        tracing::info!(connections = sessions.len(), "load test client connected");
        Ok(Self {
            sessions,
            senders: Mutex::new(Vec::new()),
            sent: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Subscribe every connection to `destination`.
    ///
    /// # Errors
    ///
    /// The first subscription error.
    pub async fn subscribe_all(&self, destination: &str) -> Result<()> {
        for (index, session) in self.sessions.iter().enumerate() {
            session.subscribe(destination, &format!("sub-{index}")).await?;
        }
        Ok(())
    }

    /// Start sending to `destination` at `rate` messages per second in total.
    ///
    /// `factory` is called once per send for a fresh payload, serialised as
    /// JSON. Connections whose share is zero stay idle. Returns the
    /// per-connection rates.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRate`] if `rate` is zero
    /// - [`Error::AlreadyScheduled`] if already sending
    /// - [`Error::NoRuntime`] outside a tokio runtime
    pub fn start_sending<F, T>(&self, destination: &str, rate: u32, factory: F) -> Result<Vec<u32>>
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        if rate == 0 {
            return Err(Error::InvalidRate(rate));
        }
        let mut senders = self.senders.lock();
        if !senders.is_empty() {
            return Err(Error::AlreadyScheduled);
        }

        let shares = distribute_rate(rate, self.sessions.len());
        let factory = Arc::new(factory);
        let destination: Arc<str> = destination.into();
        let mut started = Vec::with_capacity(self.sessions.len());

        for (index, (session, &share)) in self.sessions.iter().zip(&shares).enumerate() {
            if share == 0 {
                continue;
            }
            let scheduler = {
                let session = session.clone();
                let factory = factory.clone();
                let destination = destination.clone();
                let sent = self.sent.clone();
                RateScheduler::new(format!("connection-{index}"), move || {
                    let session = session.clone();
                    let destination = destination.clone();
                    let sent = sent.clone();
                    let payload = serde_json::to_vec(&factory());
                    async move {
                        session.send(&destination, Bytes::from(payload?)).await?;
                        sent.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                })
            };
            // Dropping `started` on error cancels the senders already running.
            scheduler.schedule(share)?;
            started.push(scheduler);
        }

        tracing::info!(rate, destination = %destination, senders = started.len(), "sending started");
        *senders = started;
        Ok(shares)
    }

    /// Stop every connection's sender. Calling it again does nothing.
    pub fn stop_sending(&self) {
        let senders = std::mem::take(&mut *self.senders.lock());
        if senders.is_empty() {
            return;
        }
        for sender in &senders {
            sender.cancel();
        }
        tracing::info!(sent = self.sent(), "sending stopped");
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        !self.senders.lock().is_empty()
    }

    /// Messages sent successfully so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// `MESSAGE` frames received across every connection.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.sessions.iter().map(|s| s.received()).sum()
    }

    /// Stop sending and close every connection.
    ///
    /// In-flight sends get `grace` to finish before the connections are
    /// closed regardless.
    pub async fn close_all(&self, grace: Duration) {
        let senders = std::mem::take(&mut *self.senders.lock());
        let deadline = Instant::now() + grace;
        let handles: Vec<_> = senders.iter().filter_map(RateScheduler::handle).collect();
        for handle in &handles {
            handle.cancel();
        }
        for (sender, handle) in senders.iter().zip(&handles) {
            let left = deadline.saturating_duration_since(Instant::now());
            if timeout(left, handle.cancel_and_wait()).await.is_err() {
                tracing::warn!(sender = sender.name(), "in-flight send outlived grace period");
            }
        }
        close_sessions(&self.sessions, deadline.saturating_duration_since(Instant::now())).await;
        tracing::info!(connections = self.sessions.len(), sent = self.sent(), "load test client closed");
    }

    /// [`LoadTestClient::close_all`] with the configured grace period.
    pub async fn close(&self) {
        self.close_all(self.config.close_grace()).await;
    }
}

impl std::fmt::Debug for LoadTestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTestClient")
            .field("connections", &self.sessions.len())
            .field("sending", &self.is_sending())
            .field("sent", &self.sent())
            .finish_non_exhaustive()
    }
}

async fn close_sessions(sessions: &[Arc<dyn Session>], grace: Duration) {
    let closing = futures::future::join_all(sessions.iter().map(|session| async move {
        if let Err(e) = session.close().await {
            tracing::debug!(error = %e, "close failed");
        }
    }));
    if timeout(grace, closing).await.is_err() {
        tracing::warn!(connections = sessions.len(), "connections did not close within grace period");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_distribute_rate_examples() {
        assert_eq!(distribute_rate(10, 3), vec![4, 3, 3]);
        assert_eq!(distribute_rate(2, 5), vec![1, 1, 0, 0, 0]);
        assert_eq!(distribute_rate(9, 3), vec![3, 3, 3]);
        assert!(distribute_rate(5, 0).is_empty());
    }

    #[derive(Default)]
    struct Recorded {
        sends: SyncMutex<Vec<(usize, Bytes)>>,
        closed: AtomicU64,
    }

    struct FakeSession {
        index: usize,
        record: Arc<Recorded>,
        open: AtomicBool,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn send(&self, _destination: &str, body: Bytes) -> Result<()> {
            self.record.sends.lock().push((self.index, body));
            Ok(())
        }

        async fn subscribe(&self, _destination: &str, _id: &str) -> Result<()> {
            Ok(())
        }

        fn received(&self) -> u64 {
            0
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<()> {
            if self.open.swap(false, Ordering::SeqCst) {
                self.record.closed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct FakeConnector {
        record: Arc<Recorded>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, index: usize) -> Result<Arc<dyn Session>> {
            if self.fail_at == Some(index) {
                return Err(Error::Io("refused".into()));
            }
            Ok(Arc::new(FakeSession {
                index,
                record: self.record.clone(),
                open: AtomicBool::new(true),
            }))
        }
    }

    fn connector(fail_at: Option<usize>) -> (FakeConnector, Arc<Recorded>) {
        let record = Arc::new(Recorded::default());
        (
            FakeConnector {
                record: record.clone(),
                fail_at,
            },
            record,
        )
    }

    #[tokio::test]
    async fn test_partial_failure_closes_opened_connections() {
        let (connector, record) = connector(Some(3));
        let result = LoadTestClient::connect(&connector, ClientConfig::new(5)).await;
        match result {
            Err(Error::ConnectionFailure { index, reason }) => {
                assert_eq!(index, 3);
                assert!(reason.contains("refused"));
            }
            other => panic!("expected ConnectionFailure, got {other:?}"),
        }
        assert_eq!(record.closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_split_across_connections() {
        let (connector, record) = connector(None);
        let client = LoadTestClient::connect(&connector, ClientConfig::new(3))
            .await
            .unwrap();
        let shares = client
            .start_sending("/app/x", 10, || serde_json::json!({"n": 1}))
            .unwrap();
        assert_eq!(shares, vec![4, 3, 3]);

        tokio::time::sleep(Duration::from_millis(999)).await;
        client.stop_sending();

        let sends = record.sends.lock();
        let per_connection = |i| sends.iter().filter(|(c, _)| *c == i).count();
        assert_eq!(per_connection(0), 4);
        assert_eq!(per_connection(1), 3);
        assert_eq!(per_connection(2), 3);
        assert_eq!(client.sent(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_payload_per_tick() {
        let (connector, record) = connector(None);
        let client = LoadTestClient::connect(&connector, ClientConfig::new(1))
            .await
            .unwrap();
        let next = Arc::new(AtomicU64::new(0));
        let counter = next.clone();
        client
            .start_sending("/app/x", 5, move || counter.fetch_add(1, Ordering::SeqCst))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        client.stop_sending();

        let bodies: Vec<u64> = record
            .sends
            .lock()
            .iter()
            .map(|(_, body)| serde_json::from_slice(body).unwrap())
            .collect();
        assert_eq!(bodies, (0..bodies.len() as u64).collect::<Vec<_>>());
        assert!(bodies.len() >= 3);
    }

    #[tokio::test]
    async fn test_invalid_and_duplicate_start() {
        let (connector, _record) = connector(None);
        let client = LoadTestClient::connect(&connector, ClientConfig::new(2))
            .await
            .unwrap();
        assert_eq!(
            client.start_sending("/x", 0, || 0).unwrap_err(),
            Error::InvalidRate(0)
        );
        assert!(!client.is_sending());

        client.start_sending("/x", 4, || 0).unwrap();
        assert_eq!(
            client.start_sending("/x", 4, || 0).unwrap_err(),
            Error::AlreadyScheduled
        );
        client.stop_sending();
        client.stop_sending();
        assert!(!client.is_sending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connections_when_rate_below_count() {
        let (connector, record) = connector(None);
        let client = LoadTestClient::connect(&connector, ClientConfig::new(5))
            .await
            .unwrap();
        assert_eq!(client.start_sending("/x", 2, || 0).unwrap(), vec![1, 1, 0, 0, 0]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.close_all(Duration::from_secs(1)).await;

        assert!(record.sends.lock().iter().all(|(i, _)| *i < 2));
        assert_eq!(record.closed.load(Ordering::SeqCst), 5);
    }
}
