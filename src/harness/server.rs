use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::LoadHarness;
use crate::codec::StompCodec;
use crate::error::{Error, Result};
use crate::message::{Command, Message};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept STOMP-over-TCP clients until `shutdown` is cancelled.
///
/// Each connection must open with `CONNECT` (or `STOMP`) within ten seconds.
/// After that its frames go to [`LoadHarness::dispatch`] and its outgoing
/// queue is written back as frames.
///
/// # Errors
///
/// [`Error::Io`] if accepting fails.
pub async fn serve(
    harness: Arc<LoadHarness>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "accepting STOMP connections");
    }
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "set_nodelay failed");
        }
        let harness = harness.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match handle_connection(&harness, stream, shutdown).await {
                Ok(()) => tracing::debug!(%peer, "connection closed"),
                Err(e) => tracing::warn!(%peer, error = %e, "connection ended with error"),
            }
        });
    }
    tracing::info!("accept loop stopped");
    Ok(())
}

/// Run one STOMP connection over any byte stream.
pub(crate) async fn handle_connection<S>(
    harness: &LoadHarness,
    stream: S,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let limits = harness.config().limits.clone();
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = StompCodec::new(read_half, limits.clone());
    let mut writer = StompCodec::new(write_half, limits);

    let first = match timeout(CONNECT_TIMEOUT, reader.read_frame()).await {
        Ok(frame) => frame?,
        Err(_) => return Err(Error::Io("timed out waiting for CONNECT".into())),
    };
    match first {
        Some(frame) if frame.command == Command::Connect => {}
        Some(frame) => {
            let error = Message::new(Command::Error)
                .with_header("message", format!("expected CONNECT, got {}", frame.command));
            writer.send(&error).await?;
            return Err(Error::InvalidFrame("session did not start with CONNECT".into()));
        }
        None => return Ok(()),
    }

    let (session, mut outgoing) = harness.connect();
    writer
        .send(
            &Message::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "0,0")
                .with_header("session", session.to_string()),
        )
        .await?;
    tracing::debug!(session, "session connected");

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if let Err(e) = writer.send(&frame).await {
                tracing::debug!(session, error = %e, "write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let result = read_loop(harness, session, &mut reader, &shutdown).await;
    harness.disconnect(session);
    writer_task.abort();
    result
}

async fn read_loop<R>(
    harness: &LoadHarness,
    session: crate::message::SessionId,
    reader: &mut StompCodec<R>,
    shutdown: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = reader.read_frame() => frame?,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        let closing = frame.command == Command::Disconnect;
        if let Err(e) = harness.dispatch(session, frame).await {
            tracing::warn!(session, error = %e, "frame dropped");
        }
        if closing {
            return Ok(());
        }
    }
}

/// Bind `addr` and [`serve`] on it.
///
/// # Errors
///
/// [`Error::Io`] if binding or accepting fails.
pub async fn bind_and_serve(
    harness: Arc<LoadHarness>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(harness, listener, shutdown).await
}
