use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::stomp::{decode_frame, encode_frame, skip_heartbeats};
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;

const READ_CHUNK: usize = 4096;

/// Buffered STOMP frame reader/writer over an async byte stream.
///
/// Reading needs `T: AsyncRead`, writing needs `T: AsyncWrite`, so the two
/// halves of a split stream can each be wrapped in their own codec.
pub struct StompCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    limits: Limits,
}

impl<T> StompCodec<T> {
    #[must_use]
    pub fn new(io: T, limits: Limits) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: AsyncRead + Unpin> StompCodec<T> {
    /// Read the next frame. Returns `Ok(None)` on a clean end of stream.
    ///
    /// # Errors
    ///
    /// Framing errors from [`decode_frame`], I/O errors, and
    /// [`Error::SessionClosed`] if the stream ends in the middle of a frame.
    pub async fn read_frame(&mut self) -> Result<Option<Message>> {
        loop {
            skip_heartbeats(&mut self.read_buf);
            if !self.read_buf.is_empty() {
                if let Some((message, consumed)) = decode_frame(&self.read_buf, &self.limits)? {
                    let _ = self.read_buf.split_to(consumed);
                    return Ok(Some(message));
                }
            }

            self.read_buf.reserve(READ_CHUNK);
            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return if self.read_buf.is_empty() {
                    Ok(None)
                } else {
                    Err(Error::SessionClosed)
                };
            }
        }
    }
}

impl<T: AsyncWrite + Unpin> StompCodec<T> {
    /// Encode and write one frame without flushing.
    ///
    /// # Errors
    ///
    /// [`Error::FrameTooLarge`] if the encoded frame exceeds the limits, or an
    /// I/O error from the stream.
    pub async fn write_frame(&mut self, message: &Message) -> Result<()> {
        self.write_buf.clear();
        encode_frame(message, &mut self.write_buf);
        self.limits.check_frame_size(self.write_buf.len())?;
        self.io.write_all(&self.write_buf).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// Write one frame and flush.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        self.write_frame(message).await?;
        self.flush().await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
