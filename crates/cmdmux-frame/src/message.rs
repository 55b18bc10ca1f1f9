use serde_json::{Map, Value};

use crate::error::{FrameError, Result};
use crate::flags::{decode_id, encode_id, is_error, is_stream};

/// Positional arguments plus keyword arguments of one wire message.
///
/// On the wire the keywords follow the positional items as a trailing JSON
/// object. A trailing object is *always* the keyword map: if there are no
/// keywords but the last positional item is an object, an empty `{}` is
/// appended so the receiver never mistakes data for keywords.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub args: Vec<Value>,
    pub kw: Map<String, Value>,
}

impl Payload {
    /// An empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// A payload of positional arguments.
    pub fn from_args(args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            args: args.into_iter().collect(),
            kw: Map::new(),
        }
    }

    /// A payload carrying exactly one positional value.
    pub fn single(value: impl Into<Value>) -> Self {
        Self::from_args([value.into()])
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Add a keyword argument.
    pub fn with_kw(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kw.insert(key.into(), value.into());
        self
    }

    /// Positional argument `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument `key`, if present.
    pub fn get_kw(&self, key: &str) -> Option<&Value> {
        self.kw.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kw.is_empty()
    }

    /// If this payload is a single integer and nothing else, return it.
    pub fn as_single_int(&self) -> Option<i64> {
        match (self.args.as_slice(), self.kw.is_empty()) {
            ([value], true) => value.as_i64(),
            _ => None,
        }
    }

    /// Remove and return the first positional argument.
    pub fn take_first(&mut self) -> Option<Value> {
        if self.args.is_empty() {
            None
        } else {
            Some(self.args.remove(0))
        }
    }

    /// Compact JSON representation for logs and CLI output.
    pub fn to_value(&self) -> Value {
        let mut items = self.args.clone();
        if self.needs_kw_item() {
            items.push(Value::Object(self.kw.clone()));
        }
        Value::Array(items)
    }

    fn needs_kw_item(&self) -> bool {
        !self.kw.is_empty() || matches!(self.args.last(), Some(Value::Object(_)))
    }

    fn push_onto(self, items: &mut Vec<Value>) {
        let needs_kw = self.needs_kw_item();
        items.extend(self.args);
        if needs_kw {
            items.push(Value::Object(self.kw));
        }
    }

    fn from_items(mut items: Vec<Value>) -> Self {
        let kw = match items.last() {
            Some(Value::Object(_)) => match items.pop() {
                Some(Value::Object(kw)) => kw,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        Self { args: items, kw }
    }
}

impl From<Vec<Value>> for Payload {
    fn from(args: Vec<Value>) -> Self {
        Self::from_args(args)
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// One decoded wire message: `[id_and_flags, args..., kw?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Conversation ID (sender's encoding) plus flag bits.
    pub id_and_flags: i64,
    pub payload: Payload,
}

impl Message {
    /// Build an outgoing message for the local conversation `id`.
    pub fn outgoing(id: i64, flags: i64, payload: Payload) -> Self {
        Self {
            id_and_flags: encode_id(id, flags),
            payload,
        }
    }

    /// The conversation ID as seen by the receiver of this message.
    pub fn conversation_id(&self) -> i64 {
        decode_id(self.id_and_flags)
    }

    pub fn is_stream(&self) -> bool {
        is_stream(self.id_and_flags)
    }

    pub fn is_error(&self) -> bool {
        is_error(self.id_and_flags)
    }

    /// Serialize to the JSON array carried in one frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut items = Vec::with_capacity(self.payload.args.len() + 2);
        items.push(Value::from(self.id_and_flags));
        self.payload.clone().push_onto(&mut items);
        serde_json::to_vec(&Value::Array(items)).map_err(|e| FrameError::Malformed(e.to_string()))
    }

    /// Parse the JSON array carried in one frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| FrameError::Malformed(e.to_string()))?;
        let Value::Array(mut items) = value else {
            return Err(FrameError::Malformed("message is not an array".into()));
        };
        if items.is_empty() {
            return Err(FrameError::Malformed("empty message".into()));
        }
        let id_and_flags = items
            .remove(0)
            .as_i64()
            .ok_or_else(|| FrameError::Malformed("first element is not an integer".into()))?;
        Ok(Self {
            id_and_flags,
            payload: Payload::from_items(items),
        })
    }
}
