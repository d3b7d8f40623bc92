//! Raw STOMP client speaking directly to the harness over TCP.

use std::net::SocketAddr;
use std::time::Duration;

use rsload::config::{DEFAULT_BROADCAST_DESTINATION, DEFAULT_REQUEST_DESTINATION};
use rsload::{Command, InboundRequest, Limits, Message, Result, StompCodec};
use tokio::net::TcpStream;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    codec: StompCodec<TcpStream>,
    session: String,
}

impl TestClient {
    /// Connect and complete the STOMP handshake.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let mut codec = StompCodec::new(stream, Limits::default());
        codec
            .send(
                &Message::new(Command::Connect)
                    .with_header("accept-version", "1.2")
                    .with_header("host", "localhost"),
            )
            .await?;

        let reply = codec.read_frame().await?.expect("CONNECTED frame");
        assert_eq!(reply.command, Command::Connected);
        let session = reply.header("session").unwrap_or_default().to_string();
        Ok(Self { codec, session })
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub async fn subscribe_broadcast(&mut self) -> Result<()> {
        self.codec
            .send(&Message::subscribe(DEFAULT_BROADCAST_DESTINATION, "sub-0"))
            .await
    }

    pub async fn send_request(&mut self, id: u64) -> Result<()> {
        let body = serde_json::to_vec(&InboundRequest::now(id))?;
        self.codec
            .send(&Message::send(DEFAULT_REQUEST_DESTINATION, body))
            .await
    }

    /// Next frame, or `None` on close or after a quiet period.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        match timeout(RECV_TIMEOUT, self.codec.read_frame()).await {
            Ok(frame) => frame,
            Err(_) => Ok(None),
        }
    }

    pub async fn disconnect(mut self) -> Result<()> {
        self.codec.send(&Message::new(Command::Disconnect)).await?;
        self.codec.shutdown().await
    }
}
