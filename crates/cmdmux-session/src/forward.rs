//! Relaying an incoming conversation to another session.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use cmdmux_frame::{Message, Payload, B_ERROR, B_STREAM};
use serde_json::Value;
use tracing::debug;

use crate::conversation::Conversation;
use crate::error::{Failure, Result, SessionError};
use crate::session::{Route, Session, SessionInner};
use crate::signal::Signal;

/// Which end of a forward a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    /// The session whose peer opened the conversation.
    Src,
    /// The session the conversation was forwarded into.
    Dst,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Src => 0,
            Side::Dst => 1,
        }
    }

    fn other(self) -> Side {
        match self {
            Side::Src => Side::Dst,
            Side::Dst => Side::Src,
        }
    }
}

#[derive(Default)]
struct ForwardState {
    started: bool,
    /// Messages that arrived while the opening exchange was being sent.
    backlog: Vec<(Side, Message)>,
    /// Whether each side has sent its final message.
    ended: [bool; 2],
}

pub(crate) struct Forward {
    src: Weak<SessionInner>,
    src_id: i64,
    dst: Weak<SessionInner>,
    dst_id: i64,
    state: Mutex<ForwardState>,
}

/// Hand `conv` over to `dst` as command `cmd`.
pub(crate) fn start(conv: &Conversation, dst: &Session, cmd: Value) -> Result<()> {
    let src = conv.session()?;
    let src_id = conv.id();
    let dst_inner = dst.inner();

    let mut created = None;
    let dst_id = dst_inner.alloc_route(|id| {
        let forward = Arc::new(Forward {
            src: Arc::downgrade(&src),
            src_id,
            dst: Arc::downgrade(dst_inner),
            dst_id: id,
            state: Mutex::new(ForwardState::default()),
        });
        created = Some(forward.clone());
        Route::Forward(forward, Side::Dst)
    })?;
    let forward = created.ok_or(SessionError::IdsExhausted)?;

    let mut state = forward.lock();
    if let Err(err) = src.set_route(src_id, Route::Forward(forward.clone(), Side::Src)) {
        dst_inner.remove_route(dst_id);
        return Err(err);
    }
    let taken = match conv.take_for_forward() {
        Ok(taken) => taken,
        Err(err) => {
            src.set_route(src_id, Route::Conv(conv.clone())).ok();
            dst_inner.remove_route(dst_id);
            return Err(err);
        }
    };
    debug!(src_id, dst_id, %cmd, "forwarding conversation");

    let mut request = taken.request;
    request.args.insert(0, cmd);
    let stream = taken.streaming || taken.final_reply.is_some();
    dst_inner.enqueue(
        Message::outgoing(dst_id, if stream { B_STREAM } else { 0 }, request),
        false,
    );
    if !stream {
        state.ended[Side::Src.index()] = true;
    }
    for item in taken.pending {
        let (flags, payload) = item_parts(B_STREAM, item);
        dst_inner.enqueue(Message::outgoing(dst_id, flags, payload), false);
    }
    if let Some(item) = taken.final_reply {
        let (flags, payload) = item_parts(0, item);
        dst_inner.enqueue(Message::outgoing(dst_id, flags, payload), false);
        state.ended[Side::Src.index()] = true;
    }

    state.started = true;
    for (side, msg) in std::mem::take(&mut state.backlog) {
        forward.pass(&mut state, side, msg);
    }
    Ok(())
}

fn item_parts(flags: i64, item: std::result::Result<Payload, Failure>) -> (i64, Payload) {
    match item {
        Ok(payload) => (flags, payload),
        Err(failure) => (flags | B_ERROR, failure.to_payload()),
    }
}

impl Forward {
    fn lock(&self) -> MutexGuard<'_, ForwardState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn target(&self, side: Side) -> (&Weak<SessionInner>, i64) {
        match side {
            Side::Src => (&self.src, self.src_id),
            Side::Dst => (&self.dst, self.dst_id),
        }
    }

    /// A message arrived on `side`; pass it to the other one.
    pub(crate) fn relay(&self, side: Side, msg: Message) {
        let mut state = self.lock();
        if !state.started {
            state.backlog.push((side, msg));
            return;
        }
        self.pass(&mut state, side, msg);
    }

    fn pass(&self, state: &mut ForwardState, side: Side, msg: Message) {
        let mut flags = 0;
        if msg.is_stream() {
            flags |= B_STREAM;
        }
        if msg.is_error() {
            flags |= B_ERROR;
        }

        let (session, id) = self.target(side.other());
        match session.upgrade() {
            Some(session) if !session.is_down() => {
                session.enqueue(Message::outgoing(id, flags, msg.payload), false);
            }
            _ => debug!(id, "forward target gone, dropping message"),
        }

        if flags & B_STREAM == 0 {
            state.ended[side.index()] = true;
            if state.ended.iter().all(|ended| *ended) {
                self.remove_routes();
            }
        }
    }

    /// The session on `side` went down. Stops the other side and drops
    /// routes that can no longer carry traffic.
    pub(crate) fn link_down(&self, side: Side) {
        let mut state = self.lock();
        let alive = side.other();
        if !state.ended[alive.index()] || !state.ended[side.index()] {
            let (session, id) = self.target(alive);
            if let Some(session) = session.upgrade() {
                session.enqueue(Message::outgoing(id, B_ERROR, Signal::Stop.to_payload()), false);
            }
        }
        state.ended[side.index()] = true;
        state.started = true;
        state.backlog.clear();
        // Our own ID can go right away; a peer-opened one waits for the
        // peer's final message.
        if alive == Side::Dst || state.ended[alive.index()] {
            self.remove_routes();
        }
    }

    fn remove_routes(&self) {
        if let Some(src) = self.src.upgrade() {
            src.remove_route(self.src_id);
        }
        if let Some(dst) = self.dst.upgrade() {
            dst.remove_route(self.dst_id);
        }
        debug!(src_id = self.src_id, dst_id = self.dst_id, "forward finished");
    }
}
