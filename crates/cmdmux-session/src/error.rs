use cmdmux_frame::Payload;
use serde_json::Value;

use crate::signal::Signal;

/// An application error raised by the peer's handler.
///
/// Travels on the wire as an error-flagged `[name, args...]` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub name: String,
    pub args: Vec<Value>,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Interpret an error payload. A payload that does not start with a
    /// string is kept whole under the name `Error`.
    pub fn from_payload(mut payload: Payload) -> Self {
        let name = match payload.args.first() {
            Some(Value::String(_)) => match payload.take_first() {
                Some(Value::String(name)) => name,
                _ => "Error".to_string(),
            },
            _ => "Error".to_string(),
        };
        let mut args = payload.args;
        if !payload.kw.is_empty() {
            args.push(Value::Object(payload.kw));
        }
        Self { name, args }
    }

    pub fn to_payload(&self) -> Payload {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(Value::String(self.name.clone()));
        args.extend(self.args.iter().cloned());
        Payload::from_args(args)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, Value::Array(self.args.clone()))
    }
}

impl std::error::Error for RemoteError {}

/// Errors surfaced by session, conversation and stream operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport went away while the conversation was open.
    #[error("link down: {0}")]
    LinkDown(String),

    /// The peer's handler failed.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The peer declined (or stopped accepting) streamed data.
    #[error("peer does not accept a stream")]
    NoStream,

    /// This side declined streaming but the peer had already started.
    #[error("peer wants to stream")]
    WantsStream,

    /// The command only works as a stream.
    #[error("command must be called as a stream")]
    MustStream,

    /// The peer accepts no commands at all.
    #[error("peer accepts no commands")]
    NoCommands,

    /// The peer has no handler for this command.
    #[error("no such command{}", .name.as_ref().map(|n| format!(": {n}")).unwrap_or_default())]
    NoCommand { index: u64, name: Option<String> },

    /// The peer stopped the conversation.
    #[error("stopped by peer")]
    Stopped,

    /// The peer dropped data because its inbox was full.
    #[error("peer skipped data")]
    Skipped,

    /// The conversation was cancelled, locally or by the peer.
    #[error("cancelled")]
    Cancelled,

    /// The outgoing direction already sent its final message.
    #[error("already replied")]
    AlreadyReplied,

    /// Streaming was requested on a conversation that already replied.
    #[error("simple command: cannot start a stream after replying")]
    SimpleCommand,

    /// Streaming was requested twice on the same conversation.
    #[error("stream-out already set")]
    StreamAlreadySet,

    /// `send` on a stream that was opened without an outgoing direction.
    #[error("stream is read-only")]
    NotStreaming,

    /// Every conversation ID is in use.
    #[error("no free conversation id")]
    IdsExhausted,

    /// The incoming queue is full; the new conversation was refused.
    #[error("incoming queue full")]
    QueueFull,

    /// `next_incoming` on a session that dispatches to a handler.
    #[error("session has no incoming queue")]
    NoIncomingQueue,

    /// The conversation is in a state that does not allow this operation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A configuration value or file was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] cmdmux_frame::FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] cmdmux_transport::TransportError),
}

impl SessionError {
    /// Whether this is the link-down condition.
    pub fn is_link_down(&self) -> bool {
        matches!(self, SessionError::LinkDown(_))
    }

    /// Whether the peer reported that the command does not exist.
    pub fn is_no_command(&self) -> bool {
        matches!(
            self,
            SessionError::NoCommand { .. } | SessionError::NoCommands
        )
    }

    /// Short name used when this error is reported to a peer.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SessionError::LinkDown(_) => "LinkDown",
            SessionError::Remote(_) => "RemoteError",
            SessionError::NoStream => "NoStream",
            SessionError::WantsStream => "WantsStream",
            SessionError::MustStream => "MustStream",
            SessionError::NoCommands => "NoCmds",
            SessionError::NoCommand { .. } => "NoCmd",
            SessionError::Stopped => "StopMe",
            SessionError::Skipped => "SkippedData",
            SessionError::Cancelled => "Cancelled",
            SessionError::AlreadyReplied => "AlreadyReplied",
            SessionError::SimpleCommand => "SimpleCommand",
            SessionError::StreamAlreadySet => "StreamAlreadySet",
            SessionError::NotStreaming => "NotStreaming",
            SessionError::IdsExhausted => "IdsExhausted",
            SessionError::QueueFull => "QueueFull",
            SessionError::NoIncomingQueue => "NoIncomingQueue",
            SessionError::Protocol(_) => "ProtocolError",
            SessionError::Config(_) => "ConfigError",
            SessionError::Frame(_) => "FrameError",
            SessionError::Transport(_) => "TransportError",
        }
    }

    /// Attach the failing command name to a `NoCommand` error.
    pub(crate) fn with_command(self, cmd: &Value) -> Self {
        match self {
            SessionError::NoCommand { index, name: None } => {
                let name = match cmd {
                    Value::Array(path) => path.get(index as usize).map(value_name),
                    other if index == 0 => Some(value_name(other)),
                    _ => None,
                };
                SessionError::NoCommand { index, name }
            }
            other => other,
        }
    }
}

fn value_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Why an incoming-conversation handler did not produce a result.
///
/// `Failed` is reported to the peer as a remote error; `Signal` is sent as
/// the corresponding out-of-band code.
#[derive(Debug, thiserror::Error)]
pub enum CmdError {
    #[error("{0}")]
    Failed(RemoteError),

    #[error("{0}")]
    Signal(Signal),
}

impl CmdError {
    /// A remote error with the given name and arguments.
    pub fn failed(name: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        CmdError::Failed(RemoteError::new(name, args))
    }

    /// A generic error carrying one message.
    pub fn msg(text: impl std::fmt::Display) -> Self {
        Self::failed("Error", [Value::String(text.to_string())])
    }

    pub(crate) fn to_payload(&self) -> Payload {
        match self {
            CmdError::Failed(err) => err.to_payload(),
            CmdError::Signal(sig) => sig.to_payload(),
        }
    }
}

impl From<RemoteError> for CmdError {
    fn from(err: RemoteError) -> Self {
        CmdError::Failed(err)
    }
}

impl From<SessionError> for CmdError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Remote(remote) => CmdError::Failed(remote),
            SessionError::Cancelled => CmdError::Signal(Signal::Cancel),
            SessionError::Stopped => CmdError::Signal(Signal::Stop),
            SessionError::NoStream => CmdError::Signal(Signal::NoStream),
            SessionError::MustStream => CmdError::Signal(Signal::MustStream),
            SessionError::NoCommand { index, .. } => CmdError::Signal(Signal::NoCmd(index)),
            other => CmdError::failed(other.kind_name(), [Value::String(other.to_string())]),
        }
    }
}

/// Terminal or out-of-band failure recorded inside a conversation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Failure {
    Remote(RemoteError),
    Signal(Signal),
}

impl Failure {
    pub(crate) fn from_error_payload(payload: Payload) -> Self {
        match Signal::from_payload(&payload) {
            Some(sig) => Failure::Signal(sig),
            None => Failure::Remote(RemoteError::from_payload(payload)),
        }
    }

    /// Payload to relay this failure to another peer.
    pub(crate) fn to_payload(&self) -> Payload {
        match self {
            Failure::Remote(err) => err.to_payload(),
            Failure::Signal(sig) => sig.to_payload(),
        }
    }

    pub(crate) fn into_error(self) -> SessionError {
        match self {
            Failure::Remote(err) => SessionError::Remote(err),
            Failure::Signal(sig) => match sig {
                Signal::Stop => SessionError::Stopped,
                Signal::NoStream => SessionError::NoStream,
                Signal::Cancel => SessionError::Cancelled,
                Signal::NoCmds => SessionError::NoCommands,
                Signal::Skip => SessionError::Skipped,
                Signal::MustStream => SessionError::MustStream,
                Signal::NoCmd(index) => SessionError::NoCommand { index, name: None },
                Signal::Flow(n) => SessionError::Protocol(format!("flow grant {n} as final reply")),
            },
        }
    }
}
