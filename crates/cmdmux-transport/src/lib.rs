//! Byte transport collaborators for cmdmux.
//!
//! The session engine only needs an ordered, bidirectional byte channel.
//! Anything implementing [`Transport`] qualifies:
//! - Unix domain sockets (Linux/macOS)
//! - In-memory duplex pairs (tests, in-process peers)
//!
//! This is the lowest layer of cmdmux. Framing lives in `cmdmux-frame`.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{memory_pair, MemoryStream, Transport, DEFAULT_MEMORY_BUFFER};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
