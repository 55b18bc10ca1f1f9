//! Multiplexed command/response and streaming sessions.
//!
//! cmdmux runs many independent conversations (plain calls, streams in
//! either or both directions) over one ordered byte transport, with
//! credit-based flow control, cancellation and structured remote errors.
//!
//! # Crate Structure
//!
//! - [`transport`] - Byte transports (Unix domain sockets, in-memory pairs)
//! - [`frame`] - Length-prefixed framing and the wire message model
//! - [`session`] - The conversation engine, handlers and the socket driver

/// Re-export transport types.
pub mod transport {
    pub use cmdmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cmdmux_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use cmdmux_session::*;
}

pub use cmdmux_session::{
    connect, CmdError, CommandRegistry, Conversation, Inbound, Payload, Session, SessionError,
    Stream,
};
