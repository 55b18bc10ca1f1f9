use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use cmdmux_frame::{Message, Payload, B_ERROR, B_STREAM};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Failure, RemoteError, Result, SessionError};
use crate::flow::{FlowIn, FlowOut};
use crate::session::{Session, SessionInner, StreamDir};
use crate::signal::Signal;
use crate::stream::Stream;

/// State of one direction of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing sent or received yet.
    New,
    /// The first message went through and more may follow.
    On,
    /// This side declined further streamed data.
    Off,
    /// The final message went through; nothing more may pass.
    End,
}

/// How to end a conversation without waiting.
#[derive(Debug)]
pub(crate) enum Kill {
    /// Close quietly; sends an empty final message if the outgoing side is open.
    Close,
    /// Send the cancellation signal and wake every local waiter.
    Cancel,
    Error(RemoteError),
}

pub(crate) struct Inbox {
    items: VecDeque<std::result::Result<Payload, Failure>>,
    flow: FlowIn,
    closed: bool,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            flow: FlowIn::new(capacity),
            closed: false,
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.flow.capacity()
    }
}

pub(crate) struct ConvState {
    stream_in: StreamState,
    stream_out: StreamState,
    may_stream_out: bool,
    /// Non-streamed values (initial and final), consumed once each.
    replies: VecDeque<std::result::Result<Payload, Failure>>,
    /// The most recently consumed reply, or the request on the handler side.
    message: Payload,
    command: Option<Value>,
    inbox: Option<Inbox>,
    skipped: bool,
    flow_out: FlowOut,
    warnings: Vec<Failure>,
    down: Option<String>,
    detached: bool,
    pub(crate) forwarded: bool,
}

impl ConvState {
    fn new(inbox: Option<usize>) -> Self {
        Self {
            stream_in: StreamState::New,
            stream_out: StreamState::New,
            may_stream_out: false,
            replies: VecDeque::new(),
            message: Payload::new(),
            command: None,
            inbox: inbox.map(Inbox::new),
            skipped: false,
            flow_out: FlowOut::new(),
            warnings: Vec::new(),
            down: None,
            detached: false,
            forwarded: false,
        }
    }

    fn apply_send(&mut self, flags: i64) -> Result<()> {
        if self.stream_out == StreamState::End {
            return Err(SessionError::AlreadyReplied);
        }
        let stream = flags & B_STREAM != 0;
        let error = flags & B_ERROR != 0;
        if !stream {
            self.stream_out = StreamState::End;
        } else if self.stream_out == StreamState::New && !error {
            self.stream_out = StreamState::On;
        }
        Ok(())
    }
}

pub(crate) struct ConvInner {
    id: i64,
    session: Weak<SessionInner>,
    state: Mutex<ConvState>,
    changed: Notify,
    cancel: CancellationToken,
}

/// One call or stream exchange with the peer.
///
/// Cheap to clone; all clones share state. Positive IDs were opened by this
/// side, negative IDs by the peer.
#[derive(Clone)]
pub struct Conversation {
    inner: Arc<ConvInner>,
}

impl Conversation {
    pub(crate) fn new(id: i64, session: &Arc<SessionInner>, inbox: Option<usize>) -> Self {
        Self {
            inner: Arc::new(ConvInner {
                id,
                session: Arc::downgrade(session),
                state: Mutex::new(ConvState::new(inbox)),
                changed: Notify::new(),
                cancel: session.shutdown_token().child_token(),
            }),
        }
    }

    pub fn id(&self) -> i64 {
        self.inner.id
    }

    pub fn stream_in_state(&self) -> StreamState {
        self.lock().stream_in
    }

    pub fn stream_out_state(&self) -> StreamState {
        self.lock().stream_out
    }

    /// Whether the peer opened this conversation as a stream and has not
    /// closed its side yet.
    pub fn is_stream_call(&self) -> bool {
        self.lock().stream_in == StreamState::On
    }

    /// The command of an incoming conversation.
    pub fn cmd(&self) -> Option<Value> {
        self.lock().command.clone()
    }

    /// The request (handler side) or the last consumed reply (caller side).
    pub fn message(&self) -> Payload {
        self.lock().message.clone()
    }

    pub fn args(&self) -> Vec<Value> {
        self.lock().message.args.clone()
    }

    pub fn arg(&self, index: usize) -> Option<Value> {
        self.lock().message.args.get(index).cloned()
    }

    pub fn kw(&self) -> Map<String, Value> {
        self.lock().message.kw.clone()
    }

    /// Drain out-of-band errors that arrived while no inbox was reading.
    pub fn take_warnings(&self) -> Vec<SessionError> {
        std::mem::take(&mut self.lock().warnings)
            .into_iter()
            .map(Failure::into_error)
            .collect()
    }

    /// Whether the conversation was cancelled (locally, by the peer, or by
    /// session shutdown).
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the conversation is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Send one streamed item.
    ///
    /// Requires an open outgoing stream. Waits while flow-control credit is
    /// exhausted. Fails with `NoStream` once the peer has ended its side.
    pub async fn send(&self, payload: Payload) -> Result<()> {
        self.report_skip();
        let session = self.session()?;
        loop {
            self.wait_for(|st| {
                if !st.may_stream_out {
                    return Some(Err(SessionError::NotStreaming));
                }
                if st.stream_out != StreamState::On {
                    return Some(Err(SessionError::NoStream));
                }
                st.flow_out.can_send().then_some(Ok(()))
            })
            .await?;
            let permit = session.reserve().await?;
            {
                let mut guard = self.lock();
                let st = &mut *guard;
                if let Some(reason) = &st.down {
                    return Err(SessionError::LinkDown(reason.clone()));
                }
                if st.forwarded {
                    return Err(SessionError::AlreadyReplied);
                }
                if st.stream_out != StreamState::On {
                    return Err(SessionError::NoStream);
                }
                // Credit is only spent on an item that is actually queued.
                if st.flow_out.take() {
                    st.apply_send(B_STREAM)?;
                    permit.forget();
                    session.enqueue(Message::outgoing(self.id(), B_STREAM, payload), true);
                    drop(guard);
                    self.inner.changed.notify_waiters();
                    return Ok(());
                }
            }
        }
    }

    /// Send the final result. Fails with `AlreadyReplied` if the outgoing
    /// side already ended.
    pub async fn result(&self, payload: Payload) -> Result<()> {
        self.transmit(0, payload).await
    }

    /// Send a final error.
    pub async fn error(&self, err: RemoteError) -> Result<()> {
        self.transmit(B_ERROR, err.to_payload()).await
    }

    /// Send an out-of-band warning without ending the outgoing side.
    pub async fn warn(&self, payload: Payload) -> Result<()> {
        self.transmit(B_STREAM | B_ERROR, payload).await
    }

    /// Receive the next streamed item.
    ///
    /// Returns `None` once the peer closed its side (or no inbox is
    /// attached). Out-of-band errors from the peer arrive in order as
    /// `Some(Err(..))`.
    pub async fn recv(&self) -> Option<Result<Payload>> {
        self.report_skip();
        let item = self
            .wait_for(|st| {
                let inbox = match st.inbox.as_mut() {
                    Some(inbox) => inbox,
                    None => return Some(Ok(None)),
                };
                match inbox.items.pop_front() {
                    Some(item) => {
                        let grant = inbox.flow.on_read(inbox.items.len());
                        if let Some(n) = grant {
                            if st.stream_out != StreamState::End {
                                self.emit(B_STREAM | B_ERROR, Signal::Flow(n).to_payload());
                            }
                        }
                        Some(Ok(Some(item)))
                    }
                    None if inbox.closed => Some(Ok(None)),
                    None => None,
                }
            })
            .await;
        match item {
            Ok(Some(Ok(payload))) => Some(Ok(payload)),
            Ok(Some(Err(failure))) => Some(Err(failure.into_error())),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }

    /// Decline streaming on this conversation.
    ///
    /// If the peer is already streaming, tells it so and fails with
    /// `WantsStream`.
    pub async fn no_stream(&self) -> Result<()> {
        let refuse = {
            let mut st = self.lock();
            if st.stream_in != StreamState::On {
                st.inbox = None;
                st.may_stream_out = false;
                return Ok(());
            }
            st.stream_out != StreamState::End
        };
        if refuse {
            self.transmit(B_ERROR, Signal::NoStream.to_payload())
                .await?;
        }
        Err(SessionError::WantsStream)
    }

    /// Reply with a stream the peer writes into.
    pub async fn open_stream_in(&self, payload: Payload) -> Result<Stream> {
        self.open_stream(StreamDir::In, payload).await
    }

    /// Reply with a stream this side writes into.
    pub async fn open_stream_out(&self, payload: Payload) -> Result<Stream> {
        self.open_stream(StreamDir::Out, payload).await
    }

    /// Reply with a bidirectional stream.
    pub async fn open_stream_both(&self, payload: Payload) -> Result<Stream> {
        self.open_stream(StreamDir::Both, payload).await
    }

    /// Reply with a stream in the given direction(s), sending `payload` as
    /// the initial reply.
    pub async fn open_stream(&self, dir: StreamDir, payload: Payload) -> Result<Stream> {
        self.start_stream(dir, payload, false).await?;
        Ok(Stream::new(self.clone(), Payload::new(), false))
    }

    /// Hand this incoming conversation over to `dst`, sending it there as
    /// command `cmd` with the same arguments.
    ///
    /// Every later message is relayed between the two peers until both
    /// sides have finished. The handler should return without replying.
    pub fn forward(&self, dst: &Session, cmd: impl Into<Value>) -> Result<()> {
        crate::forward::start(self, dst, cmd.into())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConvState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn ptr_eq(&self, other: &Conversation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Process one message from the peer.
    pub(crate) fn receive(&self, msg: Message) {
        let mut cancel = false;
        {
            let mut guard = self.lock();
            if guard.forwarded {
                // Raced with the route switch; the forwarder owns it now.
                drop(guard);
                if let Some(session) = self.inner.session.upgrade() {
                    session.reroute(msg);
                }
                return;
            }
            let st = &mut *guard;
            let stream = msg.is_stream();
            let error = msg.is_error();
            let payload = msg.payload;

            if st.stream_in == StreamState::End {
                if error && Signal::from_payload(&payload) == Some(Signal::Cancel) {
                    cancel = true;
                } else {
                    warn!(id = self.id(), %payload, "late message");
                }
            } else if !stream {
                let reply = if error {
                    Err(Failure::from_error_payload(payload))
                } else {
                    Ok(payload)
                };
                cancel = matches!(reply, Err(Failure::Signal(Signal::Cancel)));
                st.replies.push_back(reply);
                st.stream_in = StreamState::End;
                // The peer will not read further streamed data.
                if st.stream_out == StreamState::On {
                    st.stream_out = StreamState::Off;
                }
                if let Some(inbox) = st.inbox.as_mut() {
                    inbox.closed = true;
                }
            } else if error {
                match Failure::from_error_payload(payload) {
                    Failure::Signal(Signal::Flow(n)) => st.flow_out.grant(n),
                    Failure::Signal(Signal::Cancel) => cancel = true,
                    failure => match st.inbox.as_mut() {
                        Some(inbox) if st.stream_in == StreamState::On => {
                            inbox.items.push_back(Err(failure))
                        }
                        _ => st.warnings.push(failure),
                    },
                }
            } else if st.stream_in == StreamState::New {
                st.replies.push_back(Ok(payload));
                st.stream_in = StreamState::On;
            } else if let Some(inbox) = st.inbox.as_mut() {
                if inbox.is_full() {
                    debug!(id = self.id(), "inbox full, dropping item");
                    st.skipped = true;
                } else {
                    inbox.items.push_back(Ok(payload));
                    let grant = inbox.flow.on_push(inbox.items.len());
                    if let Some(n) = grant {
                        if st.stream_out != StreamState::End {
                            self.emit(B_STREAM | B_ERROR, Signal::Flow(n).to_payload());
                        }
                    }
                }
            } else {
                debug!(id = self.id(), "unwanted stream data");
                if st.stream_in == StreamState::On {
                    st.stream_in = StreamState::Off;
                    if st.stream_out != StreamState::End {
                        self.emit(B_ERROR, Signal::NoStream.to_payload());
                        st.stream_out = StreamState::End;
                    }
                }
            }

            self.finish_if_ended(st);
        }
        if cancel {
            self.inner.cancel.cancel();
        }
        self.inner.changed.notify_waiters();
    }

    /// Move the initial message of an incoming conversation into
    /// `cmd`/`message`.
    pub(crate) fn take_request(&self) {
        let mut st = self.lock();
        if let Some(Ok(mut request)) = st.replies.pop_front() {
            st.command = request.take_first();
            st.message = request;
        }
    }

    /// Wait for the next non-streamed reply.
    pub(crate) async fn replied(&self) -> Result<Payload> {
        self.wait_for(|st| match st.replies.pop_front() {
            Some(Ok(payload)) => {
                st.message = payload.clone();
                Some(Ok(payload))
            }
            Some(Err(failure)) => Some(Err(failure.into_error())),
            None if st.stream_in == StreamState::End => {
                Some(Err(SessionError::Protocol("no reply pending".into())))
            }
            None => None,
        })
        .await
    }

    /// Set up streaming and send the opening message.
    ///
    /// The initiator waits for the peer's initial reply and returns it.
    pub(crate) async fn start_stream(
        &self,
        dir: StreamDir,
        payload: Payload,
        initiator: bool,
    ) -> Result<Payload> {
        let grant = {
            let mut guard = self.lock();
            let st = &mut *guard;
            if let Some(reason) = &st.down {
                return Err(SessionError::LinkDown(reason.clone()));
            }
            match st.stream_out {
                StreamState::New => {}
                StreamState::End => return Err(SessionError::SimpleCommand),
                _ => return Err(SessionError::StreamAlreadySet),
            }

            if dir.has_in() {
                if st.inbox.is_none() {
                    st.inbox = Some(Inbox::new(self.default_inbox_len()));
                }
            } else if let Some(inbox) = st.inbox.take() {
                if !inbox.items.is_empty() && st.stream_in == StreamState::On {
                    st.stream_in = StreamState::Off;
                    self.emit(B_STREAM | B_ERROR, Signal::NoStream.to_payload());
                }
            }
            st.may_stream_out = dir.has_out();
            st.inbox.as_mut().and_then(|inbox| inbox.flow.open())
        };

        // The peer only knows this conversation once the opening message
        // arrived, so the initiator grants afterwards.
        if !initiator {
            if let Some(n) = grant {
                self.emit(B_STREAM | B_ERROR, Signal::Flow(n).to_payload());
            }
        }
        self.transmit(B_STREAM, payload).await?;
        if initiator {
            if let Some(n) = grant {
                self.emit(B_STREAM | B_ERROR, Signal::Flow(n).to_payload());
            }
            return self.replied().await;
        }
        Ok(Payload::new())
    }

    /// Send the closing message if needed, then wait for the peer's final
    /// reply. `initial` is returned when the peer's final reply already
    /// served as its initial one.
    pub(crate) async fn close_and_wait(&self, initial: &Payload) -> Result<Payload> {
        if self.stream_out_state() != StreamState::End {
            self.transmit(0, Payload::single(Value::Null)).await?;
        }
        self.wait_for(|st| match st.replies.pop_front() {
            Some(Ok(payload)) => {
                st.message = payload.clone();
                Some(Ok(payload))
            }
            Some(Err(failure)) => Some(Err(failure.into_error())),
            None if st.stream_in == StreamState::End => Some(Ok(initial.clone())),
            None => None,
        })
        .await
    }

    /// Queue a message on this conversation, waiting for send-queue space.
    pub(crate) async fn transmit(&self, flags: i64, payload: Payload) -> Result<()> {
        let session = self.session()?;
        let permit = session.reserve().await?;
        {
            let mut guard = self.lock();
            let st = &mut *guard;
            if let Some(reason) = &st.down {
                return Err(SessionError::LinkDown(reason.clone()));
            }
            if st.forwarded {
                return Err(SessionError::AlreadyReplied);
            }
            st.apply_send(flags)?;
            permit.forget();
            session.enqueue(Message::outgoing(self.id(), flags, payload), true);
            self.finish_if_ended(st);
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }

    /// End the conversation immediately. Never waits.
    pub(crate) fn kill_nowait(&self, kill: Kill) {
        let cancel = matches!(kill, Kill::Cancel);
        {
            let mut guard = self.lock();
            let st = &mut *guard;
            let open = st.down.is_none() && !st.forwarded;
            if open && st.stream_out != StreamState::End {
                st.stream_out = StreamState::End;
                match kill {
                    Kill::Close => self.emit(0, Payload::single(Value::Null)),
                    Kill::Cancel => self.emit(B_ERROR, Signal::Cancel.to_payload()),
                    Kill::Error(err) => self.emit(B_ERROR, err.to_payload()),
                }
            } else if open && cancel && self.id() > 0 && st.stream_in != StreamState::End {
                // A call still waiting for its reply: tell the handler to stop.
                self.emit(B_ERROR, Signal::Cancel.to_payload());
            }
            if st.inbox.take().is_some() && st.stream_in == StreamState::On {
                st.stream_in = StreamState::Off;
            }
            if self.id() > 0 {
                // Our own IDs are released right away; late replies are dropped.
                st.stream_in = StreamState::End;
                self.detach(st);
            } else {
                self.finish_if_ended(st);
            }
        }
        if cancel {
            self.inner.cancel.cancel();
        }
        self.inner.changed.notify_waiters();
    }

    /// Drop the inbox of a handler that finished before the peer did.
    pub(crate) fn drop_inbox(&self) {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.stream_in != StreamState::End {
            st.inbox = None;
        }
        self.finish_if_ended(st);
    }

    /// The transport is gone: fail every waiter with link-down.
    pub(crate) fn link_down(&self, reason: &str) {
        {
            let mut st = self.lock();
            if st.down.is_none() {
                st.down = Some(reason.to_string());
            }
            st.stream_in = StreamState::End;
            st.stream_out = StreamState::End;
            st.detached = true;
            if let Some(inbox) = st.inbox.as_mut() {
                inbox.closed = true;
            }
        }
        self.inner.changed.notify_waiters();
    }

    /// Take everything a forwarder needs and retire this conversation.
    pub(crate) fn take_for_forward(&self) -> Result<ForwardState> {
        let mut guard = self.lock();
        let st = &mut *guard;
        if let Some(reason) = &st.down {
            return Err(SessionError::LinkDown(reason.clone()));
        }
        if self.id() > 0 {
            return Err(SessionError::Protocol(
                "only incoming conversations can be forwarded".into(),
            ));
        }
        if st.stream_out != StreamState::New || st.forwarded {
            return Err(SessionError::AlreadyReplied);
        }
        let streaming = st.stream_in != StreamState::End;
        let mut pending = Vec::new();
        if let Some(inbox) = st.inbox.take() {
            pending.extend(inbox.items);
        }
        let mut final_reply = None;
        if let Some(reply) = st.replies.pop_front() {
            final_reply = Some(reply);
        }
        st.forwarded = true;
        st.stream_in = StreamState::End;
        st.stream_out = StreamState::End;
        st.detached = true;
        Ok(ForwardState {
            streaming,
            request: st.message.clone(),
            pending,
            final_reply,
        })
    }

    pub(crate) fn session(&self) -> Result<Arc<SessionInner>> {
        self.inner
            .session
            .upgrade()
            .ok_or_else(|| SessionError::LinkDown("session dropped".into()))
    }

    fn default_inbox_len(&self) -> usize {
        self.inner
            .session
            .upgrade()
            .map(|session| session.config().inbox_len)
            .unwrap_or(crate::config::SessionConfig::default().inbox_len)
    }

    /// Queue a control message. Used with the state lock held; never waits.
    fn emit(&self, flags: i64, payload: Payload) {
        if let Some(session) = self.inner.session.upgrade() {
            session.enqueue(Message::outgoing(self.id(), flags, payload), false);
        }
    }

    fn report_skip(&self) {
        let mut st = self.lock();
        if st.skipped && st.inbox.is_some() && st.stream_out != StreamState::End {
            st.skipped = false;
            self.emit(B_STREAM | B_ERROR, Signal::Skip.to_payload());
        }
    }

    fn finish_if_ended(&self, st: &mut ConvState) {
        if st.stream_in == StreamState::End && st.stream_out == StreamState::End {
            self.detach(st);
        }
    }

    fn detach(&self, st: &mut ConvState) {
        if st.detached {
            return;
        }
        st.detached = true;
        if let Some(session) = self.inner.session.upgrade() {
            session.remove_conversation(self);
        }
        debug!(id = self.id(), "conversation finished");
    }

    /// Poll `check` under the state lock until it yields, waking on every
    /// state change. Link-down and cancellation end the wait.
    async fn wait_for<T>(
        &self,
        mut check: impl FnMut(&mut ConvState) -> Option<Result<T>>,
    ) -> Result<T> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.lock();
                if let Some(reason) = &st.down {
                    return Err(SessionError::LinkDown(reason.clone()));
                }
                if let Some(ready) = check(&mut *st) {
                    return ready;
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = self.inner.cancel.cancelled() => {
                    let mut st = self.lock();
                    if let Some(reason) = &st.down {
                        return Err(SessionError::LinkDown(reason.clone()));
                    }
                    return check(&mut *st).unwrap_or(Err(SessionError::Cancelled));
                }
            }
        }
    }
}

/// What a forwarder takes over from an incoming conversation.
pub(crate) struct ForwardState {
    pub(crate) streaming: bool,
    pub(crate) request: Payload,
    pub(crate) pending: Vec<std::result::Result<Payload, Failure>>,
    pub(crate) final_reply: Option<std::result::Result<Payload, Failure>>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("Conversation")
            .field("id", &self.inner.id)
            .field("stream_in", &st.stream_in)
            .field("stream_out", &st.stream_out)
            .field("credit", &st.flow_out.credit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    #[tokio::test]
    async fn failed_send_keeps_its_credit() {
        let config = SessionConfig {
            send_queue_len: 1,
            ..SessionConfig::default()
        };
        let session = Session::with_config(config, crate::Inbound::None).expect("config");
        let opening = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .stream(StreamDir::Out, "sink", Payload::new(), None)
                    .await
            }
        });
        let open = session.message_out().await.expect("opening message");
        assert_eq!(open.conversation_id(), 1);
        session.message_in(Message::outgoing(1, B_STREAM, Payload::single("ready")));
        session.message_in(Message::outgoing(
            1,
            B_STREAM | B_ERROR,
            Signal::Flow(2).to_payload(),
        ));
        let stream = opening.await.expect("task").expect("stream");

        // Takes the only queue slot.
        stream.send(Payload::single(1)).await.expect("first send");
        let conv = stream.conversation().clone();
        let blocked = tokio::spawn(async move { conv.send(Payload::single(2)).await });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        session.message_in(Message::outgoing(1, 0, Payload::single("done")));
        let item = session.message_out().await.expect("first item");
        assert_eq!(item.payload.as_single_int(), Some(1));

        let second = blocked.await.expect("task");
        assert!(matches!(second, Err(SessionError::NoStream)), "{second:?}");
        assert_eq!(stream.conversation().lock().flow_out.credit(), Some(1));
        assert_eq!(stream.stream_out_state(), StreamState::Off);
    }
}
