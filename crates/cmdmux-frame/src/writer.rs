use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `AsyncWrite` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write a wire message as one frame.
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let payload = message.to_bytes()?;
        self.send(&payload).await
    }

    /// Encode and send one frame payload, then flush.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;

        let inner = &mut self.inner;
        let buf = &self.buf;
        let write = async move {
            inner.write_all(buf).await?;
            inner.flush().await
        };
        match self.config.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result.map_err(map_write_error),
                Err(_) => Err(FrameError::WriteTimeout),
            },
            None => write.await.map_err(map_write_error),
        }
    }

    /// Shut down the write half of the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(map_write_error)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn map_write_error(err: std::io::Error) -> FrameError {
    match err.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::WriteZero => {
            FrameError::ConnectionClosed
        }
        _ => FrameError::Io(err),
    }
}
