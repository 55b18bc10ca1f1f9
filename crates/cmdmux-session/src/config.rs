use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Tunables of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Data messages that may wait for the writer before senders block.
    pub send_queue_len: usize,
    /// New incoming conversations buffered for `next_incoming`.
    pub incoming_queue_len: usize,
    /// Default inbox capacity of a streaming conversation.
    pub inbox_len: usize,
    /// Highest conversation ID handed out before wrapping to 1.
    pub id_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_len: 9,
            incoming_queue_len: 99,
            inbox_len: 42,
            id_limit: 1 << 24,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.send_queue_len == 0 {
            return Err(SessionError::Config("send_queue_len must be at least 1".into()));
        }
        if self.incoming_queue_len == 0 {
            return Err(SessionError::Config(
                "incoming_queue_len must be at least 1".into(),
            ));
        }
        if self.inbox_len == 0 {
            return Err(SessionError::Config("inbox_len must be at least 1".into()));
        }
        if self.id_limit == 0 {
            return Err(SessionError::Config("id_limit must be at least 1".into()));
        }
        Ok(())
    }
}
