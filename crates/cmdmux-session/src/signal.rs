use cmdmux_frame::Payload;

/// Wire code: generic stop.
pub const E_STOP: i64 = -1;
/// Wire code: the receiver refuses streamed data.
pub const E_NO_STREAM: i64 = -2;
/// Wire code: cancellation.
pub const E_CANCEL: i64 = -3;
/// Wire code: the peer accepts no commands at all.
pub const E_NO_CMDS: i64 = -4;
/// Wire code: data was dropped because the receiver's inbox was full.
pub const E_SKIP: i64 = -5;
/// Wire code: the command only works as a stream.
pub const E_MUST_STREAM: i64 = -6;
/// Wire code base for "no such command"; detail `d` is sent as `E_NO_CMD - d`.
pub const E_NO_CMD: i64 = -11;

/// Out-of-band control value carried in an error-flagged `[integer]` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Flow-control credit: the sender may send this many more items.
    Flow(u64),
    Stop,
    NoStream,
    Cancel,
    NoCmds,
    Skip,
    MustStream,
    /// No such command; the detail is the index of the path element that
    /// failed to resolve.
    NoCmd(u64),
}

impl Signal {
    /// Decode a wire integer. Codes between -7 and -10 are unassigned.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            n if n >= 0 => Some(Signal::Flow(n as u64)),
            E_STOP => Some(Signal::Stop),
            E_NO_STREAM => Some(Signal::NoStream),
            E_CANCEL => Some(Signal::Cancel),
            E_NO_CMDS => Some(Signal::NoCmds),
            E_SKIP => Some(Signal::Skip),
            E_MUST_STREAM => Some(Signal::MustStream),
            n if n <= E_NO_CMD => Some(Signal::NoCmd((E_NO_CMD - n) as u64)),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match *self {
            Signal::Flow(n) => n as i64,
            Signal::Stop => E_STOP,
            Signal::NoStream => E_NO_STREAM,
            Signal::Cancel => E_CANCEL,
            Signal::NoCmds => E_NO_CMDS,
            Signal::Skip => E_SKIP,
            Signal::MustStream => E_MUST_STREAM,
            Signal::NoCmd(detail) => E_NO_CMD - detail as i64,
        }
    }

    /// Decode an error payload; only a lone integer is a signal.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        payload.as_single_int().and_then(Self::from_code)
    }

    pub fn to_payload(&self) -> Payload {
        Payload::single(self.code())
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Flow(n) => write!(f, "flow credit {n}"),
            Signal::Stop => f.write_str("stop"),
            Signal::NoStream => f.write_str("no stream"),
            Signal::Cancel => f.write_str("cancelled"),
            Signal::NoCmds => f.write_str("no commands"),
            Signal::Skip => f.write_str("data skipped"),
            Signal::MustStream => f.write_str("must stream"),
            Signal::NoCmd(detail) => write!(f, "no such command (element {detail})"),
        }
    }
}
