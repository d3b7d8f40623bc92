use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::codec::StompCodec;
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::harness::LoadHarness;
use crate::message::{Command, Message, SessionId};

/// One open client connection.
#[async_trait]
pub trait Session: Send + Sync {
    /// Send `body` to `destination` as a `SEND` frame.
    async fn send(&self, destination: &str, body: Bytes) -> Result<()>;

    /// Subscribe to `destination` under subscription `id`.
    async fn subscribe(&self, destination: &str, id: &str) -> Result<()>;

    /// `MESSAGE` frames received so far.
    fn received(&self) -> u64;

    fn is_open(&self) -> bool;

    /// Close the connection. Closing twice is harmless.
    async fn close(&self) -> Result<()>;
}

/// Opens [`Session`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the connection numbered `index`.
    async fn connect(&self, index: usize) -> Result<Arc<dyn Session>>;
}

/// Connects straight into an in-process [`LoadHarness`].
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    harness: Arc<LoadHarness>,
}

impl LoopbackConnector {
    #[must_use]
    pub fn new(harness: Arc<LoadHarness>) -> Self {
        Self { harness }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, index: usize) -> Result<Arc<dyn Session>> {
        let (id, mut outgoing) = self.harness.connect();
        let received = Arc::new(AtomicU64::new(0));
        let drain = {
            let received = received.clone();
            tokio::spawn(async move {
                while let Some(frame) = outgoing.recv().await {
                    if frame.command == Command::Message {
                        received.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        };
        tracing::debug!(index, session = id, "loopback session opened");
        Ok(Arc::new(LoopbackSession {
            harness: self.harness.clone(),
            id,
            received,
            open: AtomicBool::new(true),
            drain,
        }))
    }
}

struct LoopbackSession {
    harness: Arc<LoadHarness>,
    id: SessionId,
    received: Arc<AtomicU64>,
    open: AtomicBool,
    drain: JoinHandle<()>,
}

impl LoopbackSession {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::SessionClosed)
        }
    }
}

#[async_trait]
impl Session for LoopbackSession {
    async fn send(&self, destination: &str, body: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.harness
            .dispatch(self.id, Message::send(destination, body))
            .await
    }

    async fn subscribe(&self, destination: &str, id: &str) -> Result<()> {
        self.ensure_open()?;
        self.harness
            .dispatch(self.id, Message::subscribe(destination, id))
            .await
    }

    fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.harness.disconnect(self.id);
            self.drain.abort();
        }
        Ok(())
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

/// Speaks STOMP 1.2 over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    connect_timeout: Duration,
    limits: Limits,
}

impl TcpConnector {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(1),
            limits: Limits::default(),
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    async fn handshake(&self) -> Result<TcpSession> {
        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = StompCodec::new(read_half, self.limits.clone());
        let mut writer = StompCodec::new(write_half, self.limits.clone());

        writer
            .send(
                &Message::new(Command::Connect)
                    .with_header("accept-version", "1.2")
                    .with_header("host", self.addr.ip().to_string())
                    .with_header("heart-beat", "0,0"),
            )
            .await?;
        match reader.read_frame().await? {
            Some(frame) if frame.command == Command::Connected => {}
            Some(frame) => {
                let reason = frame.header("message").unwrap_or("unexpected reply");
                return Err(Error::InvalidFrame(format!("{}: {reason}", frame.command)));
            }
            None => return Err(Error::SessionClosed),
        }

        let received = Arc::new(AtomicU64::new(0));
        let reader_task = tokio::spawn(read_frames(reader, received.clone()));
        Ok(TcpSession {
            writer: tokio::sync::Mutex::new(writer),
            received,
            open: AtomicBool::new(true),
            reader: reader_task,
        })
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, index: usize) -> Result<Arc<dyn Session>> {
        let session = timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| Error::Io(format!("connect to {} timed out", self.addr)))??;
        tracing::debug!(index, addr = %self.addr, "tcp session opened");
        Ok(Arc::new(session))
    }
}

async fn read_frames(mut reader: StompCodec<ReadHalf<TcpStream>>, received: Arc<AtomicU64>) {
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => match frame.command {
                Command::Message => {
                    received.fetch_add(1, Ordering::Relaxed);
                }
                Command::Error => {
                    tracing::warn!(
                        message = frame.header("message").unwrap_or(""),
                        "server reported an error"
                    );
                }
                _ => {}
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "read loop ended");
                break;
            }
        }
    }
}

struct TcpSession {
    writer: tokio::sync::Mutex<StompCodec<WriteHalf<TcpStream>>>,
    received: Arc<AtomicU64>,
    open: AtomicBool,
    reader: JoinHandle<()>,
}

impl TcpSession {
    async fn write(&self, frame: &Message) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }
        self.writer.lock().await.send(frame).await
    }
}

#[async_trait]
impl Session for TcpSession {
    async fn send(&self, destination: &str, body: Bytes) -> Result<()> {
        self.write(
            &Message::send(destination, body).with_header("content-type", "application/json"),
        )
        .await
    }

    async fn subscribe(&self, destination: &str, id: &str) -> Result<()> {
        self.write(&Message::subscribe(destination, id)).await
    }

    fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.reader.is_finished()
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        let result = match writer.send(&Message::new(Command::Disconnect)).await {
            Ok(()) => writer.shutdown().await,
            Err(e) => Err(e),
        };
        self.reader.abort();
        result
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
