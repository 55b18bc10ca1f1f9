//! The `id_and_flags` integer leading every wire message.
//!
//! Bit 0 is [`B_STREAM`], bit 1 is [`B_ERROR`], the remaining bits hold
//! the conversation ID. Conversations opened locally have positive IDs;
//! the peer sees them as negative IDs and vice versa, so both sides
//! allocate independently without clashing.

/// Set while a direction is streaming; clear on the final message.
pub const B_STREAM: i64 = 1;

/// Set on errors and out-of-band control messages.
pub const B_ERROR: i64 = 2;

const FLAG_MASK: i64 = B_STREAM | B_ERROR;

/// Encode a local conversation ID and flags for sending.
///
/// Positive (locally opened) IDs are shifted down by one so that ID 1 maps
/// to wire value 0; non-positive (peer opened) IDs are sent as-is.
pub fn encode_id(id: i64, flags: i64) -> i64 {
    let base = if id > 0 { id - 1 } else { id };
    (base << 2) | (flags & FLAG_MASK)
}

/// Recover the receiver's view of the conversation ID from a wire value.
///
/// A wire value produced by the peer for its own positive ID `n` decodes
/// to `-n`; a wire value for a peer-side negative ID `-n` (i.e. one we
/// opened) decodes to `n`.
pub fn decode_id(id_and_flags: i64) -> i64 {
    let id = -1 - (id_and_flags >> 2);
    if id >= 0 {
        id + 1
    } else {
        id
    }
}

/// Whether the stream bit is set.
pub fn is_stream(id_and_flags: i64) -> bool {
    id_and_flags & B_STREAM != 0
}

/// Whether the error bit is set.
pub fn is_error(id_and_flags: i64) -> bool {
    id_and_flags & B_ERROR != 0
}
