/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x434d \"CM\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame was intact but its payload is not a wire message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// Writing a frame did not finish within the configured timeout.
    #[error("frame write timed out")]
    WriteTimeout,
}

impl FrameError {
    /// Whether this error only affects one message and the stream can continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
