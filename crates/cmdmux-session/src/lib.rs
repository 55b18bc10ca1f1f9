//! Multiplexed command/response and streaming sessions.
//!
//! A [`Session`] carries many independent conversations over one ordered
//! transport: plain calls ([`Session::cmd`]), streams in either or both
//! directions ([`Session::stream_in`] and friends), credit-based flow
//! control, cancellation and structured remote errors.
//!
//! The session itself is transport-agnostic: feed decoded messages into
//! [`Session::message_in`] and drain [`Session::message_out`]. The
//! [`driver`] module does that for any [`cmdmux_transport::Transport`].

pub mod config;
pub mod connector;
pub mod conversation;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod flow;
mod forward;
pub mod handler;
#[cfg(unix)]
pub mod listener;
pub mod session;
pub mod signal;
pub mod stream;

pub use config::SessionConfig;
pub use connector::{connect, connect_with_config};
pub use conversation::{Conversation, StreamState};
pub use dispatch::CommandRegistry;
pub use driver::{run, spawn, Connection};
pub use error::{CmdError, RemoteError, Result, SessionError};
pub use handler::{Handler, HandlerFuture};
#[cfg(unix)]
pub use listener::SessionListener;
pub use session::{Inbound, Session, StreamDir};
pub use signal::Signal;
pub use stream::Stream;

pub use cmdmux_frame::{Message, Payload};
