//! Message framing for cmdmux.
//!
//! Every message travels in one frame:
//! - A 2-byte magic number ("CM") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A JSON array payload: `[id_and_flags, args..., kw?]`
//!
//! The low two bits of `id_and_flags` carry [`B_STREAM`] and [`B_ERROR`];
//! the rest is the conversation ID (see [`flags`]).

pub mod codec;
pub mod error;
pub mod flags;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC};
pub use error::{FrameError, Result};
pub use flags::{decode_id, encode_id, B_ERROR, B_STREAM};
pub use message::{Message, Payload};
pub use reader::FrameReader;
pub use writer::FrameWriter;
