//! The conversation table and message routing for one connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cmdmux_frame::{Message, Payload, B_ERROR};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::conversation::{Conversation, Kill};
use crate::error::{RemoteError, Result, SessionError};
use crate::forward::{Forward, Side};
use crate::handler::{self, Handler};
use crate::signal::Signal;
use crate::stream::Stream;

/// Which directions of a stream carry data after the initial exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDir {
    /// The peer sends, this side receives.
    In,
    /// This side sends, the peer receives.
    Out,
    Both,
}

impl StreamDir {
    pub fn has_in(self) -> bool {
        matches!(self, StreamDir::In | StreamDir::Both)
    }

    pub fn has_out(self) -> bool {
        matches!(self, StreamDir::Out | StreamDir::Both)
    }
}

/// What happens to conversations the peer opens.
#[derive(Clone)]
pub enum Inbound {
    /// Refuse them with the "no commands" signal.
    None,
    /// Run a handler task per conversation.
    Handler(Arc<dyn Handler>),
    /// Queue them for [`Session::next_incoming`].
    Queue,
}

impl Inbound {
    pub fn handler(handler: impl Handler) -> Self {
        Inbound::Handler(Arc::new(handler))
    }
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inbound::None => f.write_str("None"),
            Inbound::Handler(_) => f.write_str("Handler"),
            Inbound::Queue => f.write_str("Queue"),
        }
    }
}

enum InboundMode {
    None,
    Handler(Arc<dyn Handler>),
    Queue {
        tx: mpsc::Sender<Conversation>,
        rx: tokio::sync::Mutex<mpsc::Receiver<Conversation>>,
    },
}

#[derive(Clone)]
pub(crate) enum Route {
    Conv(Conversation),
    Forward(Arc<Forward>, Side),
}

struct Table {
    next_id: i64,
    routes: HashMap<i64, Route>,
    down: Option<String>,
}

struct Outgoing {
    msg: Message,
    /// Holds a send-queue slot that must be returned once written.
    counted: bool,
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    table: Mutex<Table>,
    outbox_tx: mpsc::UnboundedSender<Outgoing>,
    outbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Outgoing>>,
    send_permits: Semaphore,
    inbound: InboundMode,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// One multiplexed session with a single peer.
///
/// Cloning is cheap and yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session with default limits.
    pub fn new(inbound: Inbound) -> Self {
        Self::build(SessionConfig::default(), inbound)
    }

    /// Create a session with explicit limits.
    pub fn with_config(config: SessionConfig, inbound: Inbound) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, inbound))
    }

    fn build(config: SessionConfig, inbound: Inbound) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let inbound = match inbound {
            Inbound::None => InboundMode::None,
            Inbound::Handler(handler) => InboundMode::Handler(handler),
            Inbound::Queue => {
                let (tx, rx) = mpsc::channel(config.incoming_queue_len);
                InboundMode::Queue {
                    tx,
                    rx: tokio::sync::Mutex::new(rx),
                }
            }
        };
        Self {
            inner: Arc::new(SessionInner {
                send_permits: Semaphore::new(config.send_queue_len),
                config,
                table: Mutex::new(Table {
                    next_id: 1,
                    routes: HashMap::new(),
                    down: None,
                }),
                outbox_tx,
                outbox_rx: tokio::sync::Mutex::new(outbox_rx),
                inbound,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Send a command and wait for its single reply.
    ///
    /// Dropping the returned future cancels the call on the peer.
    pub async fn cmd(&self, cmd: impl Into<Value>, payload: Payload) -> Result<Payload> {
        let cmd = cmd.into();
        let conv = self.inner.open(None)?;
        let _guard = CallGuard(Some(conv.clone()));
        let request = with_command(&cmd, payload);
        let reply = async {
            conv.transmit(0, request).await?;
            conv.replied().await
        }
        .await;
        reply.map_err(|err| err.with_command(&cmd))
    }

    /// Start a stream the peer sends into.
    pub async fn stream_in(&self, cmd: impl Into<Value>, payload: Payload) -> Result<Stream> {
        self.stream(StreamDir::In, cmd, payload, None).await
    }

    /// Start a stream this side sends into.
    pub async fn stream_out(&self, cmd: impl Into<Value>, payload: Payload) -> Result<Stream> {
        self.stream(StreamDir::Out, cmd, payload, None).await
    }

    /// Start a bidirectional stream.
    pub async fn stream_both(&self, cmd: impl Into<Value>, payload: Payload) -> Result<Stream> {
        self.stream(StreamDir::Both, cmd, payload, None).await
    }

    /// Start a stream and wait for the peer's initial reply.
    ///
    /// `capacity` overrides the inbox length for incoming data.
    pub async fn stream(
        &self,
        dir: StreamDir,
        cmd: impl Into<Value>,
        payload: Payload,
        capacity: Option<usize>,
    ) -> Result<Stream> {
        let cmd = cmd.into();
        let inbox = dir
            .has_in()
            .then(|| capacity.unwrap_or(self.inner.config.inbox_len).max(1));
        let conv = self.inner.open(inbox)?;
        let guard = CallGuard(Some(conv.clone()));
        let initial = conv
            .start_stream(dir, with_command(&cmd, payload), true)
            .await
            .map_err(|err| err.with_command(&cmd))?;
        guard.disarm();
        Ok(Stream::new(conv, initial, true))
    }

    /// Feed one decoded message from the peer into the session.
    pub fn message_in(&self, msg: Message) {
        let id = msg.conversation_id();
        let route = {
            let table = self.inner.lock_table();
            if table.down.is_some() {
                return;
            }
            table.routes.get(&id).cloned()
        };
        match route {
            Some(Route::Conv(conv)) => conv.receive(msg),
            Some(Route::Forward(forward, side)) => forward.relay(side, msg),
            None => self.inner.unknown_message(id, msg),
        }
    }

    /// Next message to write to the transport.
    ///
    /// Returns `None` once the session is shut down and the queue is drained.
    pub async fn message_out(&self) -> Option<Message> {
        let mut rx = self.inner.outbox_rx.lock().await;
        let item = tokio::select! {
            biased;
            item = rx.recv() => item,
            _ = self.inner.shutdown.cancelled() => None,
        }?;
        if item.counted {
            self.inner.send_permits.add_permits(1);
        }
        Some(item.msg)
    }

    /// Next conversation opened by the peer, in queue mode.
    ///
    /// Returns `Ok(None)` once the session is down.
    pub async fn next_incoming(&self) -> Result<Option<Conversation>> {
        let InboundMode::Queue { rx, .. } = &self.inner.inbound else {
            return Err(SessionError::NoIncomingQueue);
        };
        let mut rx = rx.lock().await;
        Ok(tokio::select! {
            biased;
            conv = rx.recv() => conv,
            _ = self.inner.shutdown.cancelled() => None,
        })
    }

    /// Number of conversations (and forwarding routes) currently tracked.
    pub fn live_conversations(&self) -> usize {
        self.inner.lock_table().routes.len()
    }

    pub fn is_down(&self) -> bool {
        self.inner.is_down()
    }

    /// Resolves once the session is down.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// The transport is gone. Fails every pending operation and tells
    /// forwarding peers to stop.
    pub fn link_down(&self, reason: &str) {
        self.inner.link_down(reason)
    }

    /// Take the session down and wait for running handlers to finish.
    pub async fn shutdown(&self) {
        self.inner.link_down("session shut down");
        self.inner.tasks.wait().await;
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.lock_table();
        f.debug_struct("Session")
            .field("conversations", &table.routes.len())
            .field("down", &table.down)
            .finish()
    }
}

impl SessionInner {
    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn lock_table(&self) -> MutexGuard<'_, Table> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn down_error(&self) -> SessionError {
        let reason = self
            .lock_table()
            .down
            .clone()
            .unwrap_or_else(|| "session shut down".into());
        SessionError::LinkDown(reason)
    }

    pub(crate) fn is_down(&self) -> bool {
        self.lock_table().down.is_some()
    }

    /// Deliver a message that reached a conversation after it was forwarded.
    pub(crate) fn reroute(&self, msg: Message) {
        let id = msg.conversation_id();
        let route = self.lock_table().routes.get(&id).cloned();
        match route {
            Some(Route::Forward(forward, side)) => forward.relay(side, msg),
            _ => debug!(id, "dropping message for forwarded conversation"),
        }
    }

    /// Wait for a free send-queue slot.
    pub(crate) async fn reserve(&self) -> Result<SemaphorePermit<'_>> {
        tokio::select! {
            permit = self.send_permits.acquire() => {
                permit.map_err(|_| self.down_error())
            }
            _ = self.shutdown.cancelled() => Err(self.down_error()),
        }
    }

    pub(crate) fn enqueue(&self, msg: Message, counted: bool) {
        if self.outbox_tx.send(Outgoing { msg, counted }).is_err() {
            debug!("outbox closed, dropping message");
        }
    }

    /// Allocate a fresh local ID and register a route for it.
    pub(crate) fn alloc_route(&self, make: impl FnOnce(i64) -> Route) -> Result<i64> {
        let mut table = self.lock_table();
        if let Some(reason) = &table.down {
            return Err(SessionError::LinkDown(reason.clone()));
        }
        let limit = i64::from(self.config.id_limit);
        for _ in 0..limit {
            let id = table.next_id;
            table.next_id = if id >= limit { 1 } else { id + 1 };
            if !table.routes.contains_key(&id) {
                table.routes.insert(id, make(id));
                return Ok(id);
            }
        }
        Err(SessionError::IdsExhausted)
    }

    fn open(self: &Arc<Self>, inbox: Option<usize>) -> Result<Conversation> {
        let mut opened = None;
        self.alloc_route(|id| {
            let conv = Conversation::new(id, self, inbox);
            opened = Some(conv.clone());
            Route::Conv(conv)
        })?;
        opened.ok_or(SessionError::IdsExhausted)
    }

    pub(crate) fn set_route(&self, id: i64, route: Route) -> Result<()> {
        let mut table = self.lock_table();
        if let Some(reason) = &table.down {
            return Err(SessionError::LinkDown(reason.clone()));
        }
        table.routes.insert(id, route);
        Ok(())
    }

    pub(crate) fn remove_route(&self, id: i64) {
        self.lock_table().routes.remove(&id);
    }

    /// Drop the route of a finished conversation, unless the ID was
    /// already reused.
    pub(crate) fn remove_conversation(&self, conv: &Conversation) {
        let mut table = self.lock_table();
        if let Some(Route::Conv(current)) = table.routes.get(&conv.id()) {
            if current.ptr_eq(conv) {
                table.routes.remove(&conv.id());
            }
        }
    }

    fn unknown_message(self: &Arc<Self>, id: i64, msg: Message) {
        if msg.is_error() {
            debug!(id, payload = %msg.payload, "dropping error for unknown conversation");
            return;
        }
        if id > 0 {
            warn!(id, payload = %msg.payload, "spurious reply");
            return;
        }

        match &self.inbound {
            InboundMode::None => {
                debug!(id, "refusing incoming command");
                self.enqueue(
                    Message::outgoing(id, B_ERROR, Signal::NoCmds.to_payload()),
                    false,
                );
            }
            InboundMode::Handler(handler) => {
                let Some(conv) = self.accept(id, msg) else {
                    return;
                };
                self.tasks.spawn(handler::run(handler.clone(), conv));
            }
            InboundMode::Queue { tx, .. } => {
                let Some(conv) = self.accept(id, msg) else {
                    return;
                };
                match tx.try_send(conv) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(conv)) => {
                        warn!(id, "incoming queue full");
                        conv.kill_nowait(Kill::Error(RemoteError::new(
                            "QueueFull",
                            [Value::from("incoming queue full")],
                        )));
                    }
                    Err(mpsc::error::TrySendError::Closed(conv)) => {
                        conv.kill_nowait(Kill::Cancel);
                    }
                }
            }
        }
    }

    /// Register a conversation for a peer-opened ID and feed it the
    /// opening message.
    fn accept(self: &Arc<Self>, id: i64, msg: Message) -> Option<Conversation> {
        let conv = Conversation::new(id, self, Some(self.config.inbox_len));
        if self.set_route(id, Route::Conv(conv.clone())).is_err() {
            return None;
        }
        conv.receive(msg);
        conv.take_request();
        debug!(id, cmd = ?conv.cmd(), "incoming conversation");
        Some(conv)
    }

    pub(crate) fn link_down(&self, reason: &str) {
        let routes = {
            let mut table = self.lock_table();
            if table.down.is_some() {
                return;
            }
            table.down = Some(reason.to_string());
            std::mem::take(&mut table.routes)
        };
        info!(reason, conversations = routes.len(), "session down");
        for route in routes.into_values() {
            match route {
                Route::Conv(conv) => conv.link_down(reason),
                Route::Forward(forward, side) => forward.link_down(side),
            }
        }
        self.shutdown.cancel();
        self.tasks.close();
    }
}

/// Cancels an outgoing call whose future is dropped before completion.
struct CallGuard(Option<Conversation>);

impl CallGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if let Some(conv) = self.0.take() {
            conv.kill_nowait(Kill::Cancel);
        }
    }
}

fn with_command(cmd: &Value, mut payload: Payload) -> Payload {
    payload.args.insert(0, cmd.clone());
    payload
}
