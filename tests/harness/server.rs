//! Load harness served over TCP on a random port.

use std::net::SocketAddr;
use std::sync::Arc;

use rsload::{HarnessConfig, LoadHarness};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    harness: Arc<LoadHarness>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a harness with default settings.
    pub async fn spawn() -> (Self, SocketAddr) {
        Self::spawn_with(HarnessConfig::default()).await
    }

    pub async fn spawn_with(config: HarnessConfig) -> (Self, SocketAddr) {
        let harness = Arc::new(LoadHarness::new(config).expect("harness config"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let harness = harness.clone();
            let shutdown = shutdown.clone();
            async move {
                rsload::harness::serve(harness, listener, shutdown)
                    .await
                    .unwrap();
            }
        });

        (
            Self {
                harness,
                shutdown,
                task,
            },
            addr,
        )
    }

    pub fn harness(&self) -> &Arc<LoadHarness> {
        &self.harness
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
        self.harness.shutdown().await;
    }
}
