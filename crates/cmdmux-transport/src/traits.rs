use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};

/// Default buffer size of each direction of an in-memory pair.
pub const DEFAULT_MEMORY_BUFFER: usize = 64 * 1024;

/// An ordered, bidirectional byte channel the session driver can own.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite` type that can be
/// moved into a task, so `tokio::net::UnixStream`, `TcpStream` and
/// `DuplexStream` all qualify without wrappers.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// One end of an in-memory transport pair.
pub type MemoryStream = DuplexStream;

/// Create two connected in-memory transports.
///
/// Bytes written to one end are read from the other, in order. Each
/// direction buffers up to `max_buf_size` bytes before writers wait.
pub fn memory_pair(max_buf_size: usize) -> (MemoryStream, MemoryStream) {
    tokio::io::duplex(max_buf_size)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn assert_transport<T: Transport>(_: &T) {}

    #[tokio::test]
    async fn memory_pair_is_duplex() {
        let (mut a, mut b) = memory_pair(DEFAULT_MEMORY_BUFFER);
        assert_transport(&a);

        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").await.unwrap();
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn dropping_one_end_reads_eof() {
        let (a, mut b) = memory_pair(16);
        drop(a);
        let mut buf = Vec::new();
        let n = b.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
