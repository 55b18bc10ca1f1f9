//! Credit-based flow control for streamed data.
//!
//! The receiving side watches its inbox and hands out credit as
//! error-flagged `[n]` messages; the sending side counts credit down and
//! waits when it runs out. Credit is additive, so a repeated grant can
//! only add to what the sender may send.

/// Below this inbox capacity the half/quarter arithmetic degenerates and
/// credit is granted in full when the stream opens.
pub const MIN_WINDOW: usize = 10;

/// Receiver-side credit bookkeeping for one inbox.
#[derive(Debug, Clone)]
pub struct FlowIn {
    capacity: usize,
    /// Items consumed since the last grant; `None` until flow control starts.
    consumed: Option<usize>,
}

impl FlowIn {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            consumed: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the window is too small for incremental credit.
    pub fn is_small(&self) -> bool {
        self.capacity < MIN_WINDOW
    }

    /// Whether any credit has been handed out yet.
    pub fn is_active(&self) -> bool {
        self.consumed.is_some()
    }

    /// Credit to grant when the stream opens. Only small windows do this.
    pub fn open(&mut self) -> Option<u64> {
        if !self.is_small() || self.consumed.is_some() {
            return None;
        }
        self.consumed = Some(0);
        Some(self.capacity as u64)
    }

    /// An item was queued; `queued` is the inbox length afterwards.
    ///
    /// Starts flow control with a quarter-window grant the first time the
    /// inbox is half full.
    pub fn on_push(&mut self, queued: usize) -> Option<u64> {
        if self.consumed.is_none() && queued >= self.capacity / 2 {
            self.consumed = Some(0);
            return Some((self.capacity / 4) as u64);
        }
        None
    }

    /// An item was consumed; `queued` is the inbox length afterwards.
    ///
    /// Once the inbox has drained to a quarter and more than half a window
    /// was consumed since the last grant, grants half a window. Small
    /// windows grant whatever was consumed as soon as it reaches a quarter.
    pub fn on_read(&mut self, queued: usize) -> Option<u64> {
        let consumed = self.consumed.as_mut()?;
        let half = self.capacity / 2;
        let quarter = self.capacity / 4;

        if queued <= quarter && *consumed > half {
            let grant = half + 1;
            *consumed -= grant;
            return Some(grant as u64);
        }

        *consumed += 1;
        if self.capacity < MIN_WINDOW && *consumed >= quarter {
            let grant = std::mem::take(consumed);
            return Some(grant as u64);
        }
        None
    }
}

/// Sender-side credit counter.
#[derive(Debug, Clone, Default)]
pub struct FlowOut {
    /// `None` until the first grant arrives; sending is unrestricted until then.
    credit: Option<u64>,
}

impl FlowOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add granted credit.
    pub fn grant(&mut self, n: u64) {
        self.credit = Some(self.credit.unwrap_or(0).saturating_add(n));
    }

    /// Whether one more item may be sent now.
    pub fn can_send(&self) -> bool {
        self.credit != Some(0)
    }

    /// Take one unit of credit. Returns false (and takes nothing) if none is left.
    pub fn take(&mut self) -> bool {
        match self.credit.as_mut() {
            None => true,
            Some(0) => false,
            Some(credit) => {
                *credit -= 1;
                true
            }
        }
    }

    /// Remaining credit, or `None` while untracked.
    pub fn credit(&self) -> Option<u64> {
        self.credit
    }
}
