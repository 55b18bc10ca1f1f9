//! Routing incoming commands to named handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::conversation::Conversation;
use crate::error::CmdError;
use crate::handler::{Handler, HandlerFuture};
use crate::signal::Signal;

enum Entry {
    Simple(Arc<dyn Handler>),
    /// Only valid when the peer opened a stream.
    Stream(Arc<dyn Handler>),
    Sub(CommandRegistry),
}

/// A tree of named command handlers.
///
/// The command of an incoming conversation is either a name or a path (an
/// array of names) walking into nested registries. An unknown path element
/// `i` is answered with the "no such command" signal carrying `i`.
#[derive(Default)]
pub struct CommandRegistry {
    entries: HashMap<String, Entry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for calls and streams alike.
    pub fn register(mut self, name: impl Into<String>, handler: impl Handler) -> Self {
        self.entries
            .insert(name.into(), Entry::Simple(Arc::new(handler)));
        self
    }

    /// Add a handler that refuses plain calls with the "must stream" signal.
    pub fn register_stream(mut self, name: impl Into<String>, handler: impl Handler) -> Self {
        self.entries
            .insert(name.into(), Entry::Stream(Arc::new(handler)));
        self
    }

    /// Nest another registry under `name`.
    pub fn sub(mut self, name: impl Into<String>, registry: CommandRegistry) -> Self {
        self.entries.insert(name.into(), Entry::Sub(registry));
        self
    }

    /// Registered names at this level, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the handler for `cmd`. On failure returns the index of the
    /// path element that did not resolve.
    fn resolve(&self, cmd: &Value) -> Result<(&Arc<dyn Handler>, bool), u64> {
        let path: Vec<&Value> = match cmd {
            Value::Array(items) if !items.is_empty() => items.iter().collect(),
            Value::Array(_) => return Err(0),
            other => vec![other],
        };

        let mut registry = self;
        for (index, element) in path.iter().enumerate() {
            let Some(name) = element.as_str() else {
                return Err(index as u64);
            };
            let last = index + 1 == path.len();
            match registry.entries.get(name) {
                Some(Entry::Simple(handler)) if last => return Ok((handler, false)),
                Some(Entry::Stream(handler)) if last => return Ok((handler, true)),
                Some(Entry::Sub(sub)) if !last => registry = sub,
                _ => return Err(index as u64),
            }
        }
        Err(path.len().saturating_sub(1) as u64)
    }
}

impl Handler for CommandRegistry {
    fn handle(&self, conv: Conversation) -> HandlerFuture {
        let cmd = conv.cmd().unwrap_or(Value::Null);
        match self.resolve(&cmd) {
            Ok((_, true)) if !conv.is_stream_call() => {
                debug!(%cmd, "stream-only command called plainly");
                Box::pin(async { Err::<Value, _>(CmdError::Signal(Signal::MustStream)) })
            }
            Ok((handler, _)) => handler.handle(conv),
            Err(index) => {
                debug!(%cmd, index, "no such command");
                Box::pin(async move { Err::<Value, _>(CmdError::Signal(Signal::NoCmd(index))) })
            }
        }
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("names", &self.names())
            .finish()
    }
}
