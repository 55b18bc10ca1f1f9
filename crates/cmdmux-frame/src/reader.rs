use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reads complete frames from any `AsyncRead` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame payload.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(frame);
            }

            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }
        }
    }

    /// Read the next frame and decode it as a wire message.
    ///
    /// A frame that is intact but not a valid message yields
    /// `FrameError::Malformed`; the reader stays usable afterwards.
    pub async fn read_message(&mut self) -> Result<Message> {
        let frame = self.read_frame().await?;
        Message::from_bytes(&frame)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use cmdmux_transport::memory_pair;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::codec::{encode_frame, MAGIC};
    use crate::message::Payload;

    fn wire_of(payloads: &[&[u8]]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for payload in payloads {
            encode_frame(payload, &mut wire).unwrap();
        }
        wire.to_vec()
    }

    #[tokio::test]
    async fn read_single_frame() {
        let wire = wire_of(&["hello".as_bytes()]);
        let mut reader = FrameReader::new(wire.as_slice());
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn read_multiple_messages() {
        let wire = wire_of(&[
            r#"[1,"echo",1]"#.as_bytes(),
            r#"[0,"x"]"#.as_bytes(),
            r#"[-4,"OK",4]"#.as_bytes(),
        ]);
        let mut reader = FrameReader::new(wire.as_slice());

        let m1 = reader.read_message().await.unwrap();
        let m2 = reader.read_message().await.unwrap();
        let m3 = reader.read_message().await.unwrap();

        assert_eq!(m1.conversation_id(), -1);
        assert!(m1.is_stream());
        assert_eq!(m2.payload, Payload::single("x"));
        assert_eq!(m3.conversation_id(), 1);
        assert_eq!(m3.payload.args, vec![json!("OK"), json!(4)]);
    }

    #[tokio::test]
    async fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let wire = wire_of(&[payload.as_slice()]);
        let mut reader = FrameReader::new(wire.as_slice());
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn partial_read_handling() {
        // A one-byte pipe forces the reader to assemble the frame piecewise.
        let (mut tx, rx) = memory_pair(1);
        let wire = wire_of(&[r#"[0,"slow"]"#.as_bytes()]);
        let writer = tokio::spawn(async move { tx.write_all(&wire).await.unwrap() });

        let mut reader = FrameReader::new(rx);
        let msg = reader.read_message().await.unwrap();
        assert_eq!(msg.payload, Payload::single("slow"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(&b""[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(&partial[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn invalid_magic_in_stream() {
        let bytes = [0x00u8, 0x01, 0x00, 0x00, 0x00, 0x00];
        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic));
    }

    #[tokio::test]
    async fn malformed_message_does_not_poison_reader() {
        let wire = wire_of(&[r#"{"not":"a message"}"#.as_bytes(), "[5]".as_bytes()]);
        let mut reader = FrameReader::new(wire.as_slice());

        let err = reader.read_message().await.unwrap_err();
        assert!(err.is_recoverable());

        let msg = reader.read_message().await.unwrap();
        assert_eq!(msg.id_and_flags, 5);
        assert!(msg.payload.is_empty());
    }

    #[tokio::test]
    async fn max_payload_is_enforced() {
        let wire = wire_of(&[&[b'x'; 128][..]]);
        let config = FrameConfig {
            max_payload_size: 64,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(wire.as_slice(), config);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 128, max: 64 }));
    }
}
