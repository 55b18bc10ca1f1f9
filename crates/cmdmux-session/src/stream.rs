use std::ops::Deref;

use cmdmux_frame::Payload;

use crate::conversation::{Conversation, Kill};
use crate::error::Result;

/// An open stream on a conversation.
///
/// Dereferences to the [`Conversation`] for `send`/`recv`. Call
/// [`Stream::finish`] to close it and collect the peer's final reply; a
/// stream this side opened that is dropped unfinished is cancelled.
pub struct Stream {
    conv: Conversation,
    initial: Payload,
    initiator: bool,
    finished: bool,
}

impl Stream {
    pub(crate) fn new(conv: Conversation, initial: Payload, initiator: bool) -> Self {
        Self {
            conv,
            initial,
            initiator,
            finished: false,
        }
    }

    /// The peer's initial reply. Empty on the handler side.
    pub fn initial(&self) -> &Payload {
        &self.initial
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conv
    }

    /// Close the outgoing side (if still open) and wait for the peer's
    /// final reply.
    ///
    /// If the peer answered without ever streaming, its only reply is both
    /// the initial and the final one.
    pub async fn finish(mut self) -> Result<Payload> {
        let last = self.conv.close_and_wait(&self.initial).await;
        self.finished = true;
        if self.initiator {
            self.conv.kill_nowait(Kill::Close);
        }
        last
    }
}

impl Deref for Stream {
    type Target = Conversation;

    fn deref(&self) -> &Conversation {
        &self.conv
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.initiator && !self.finished {
            self.conv.kill_nowait(Kill::Cancel);
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("conv", &self.conv)
            .field("initial", &self.initial)
            .field("initiator", &self.initiator)
            .finish()
    }
}
