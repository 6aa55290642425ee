//! # Command store
//!
//! Holds the most recent valid command along with the time it arrived. The store performs no
//! ordering checks: whatever was received last wins, even if its sequence number is lower than
//! the one it replaces.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::cmd::CmdFrame;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CmdStore {
    latest: Option<CmdFrame>,
    last_rx_ms: Option<u64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored command with `cmd`, received at `now_ms`.
    pub fn accept(&mut self, cmd: CmdFrame, now_ms: u64) {
        self.latest = Some(cmd);
        self.last_rx_ms = Some(now_ms);
    }

    /// The latest valid command, if one has ever been received.
    pub fn latest(&self) -> Option<&CmdFrame> {
        self.latest.as_ref()
    }

    /// True if no command has ever been received, or if the last one is older than
    /// `timeout_ms`.
    pub fn is_stale(&self, now_ms: u64, timeout_ms: u64) -> bool {
        match self.last_rx_ms {
            Some(t) => now_ms.saturating_sub(t) > timeout_ms,
            None => true,
        }
    }

    /// Milliseconds since the last command, or `u64::MAX` if none has been received.
    pub fn age(&self, now_ms: u64) -> u64 {
        match self.last_rx_ms {
            Some(t) => now_ms.saturating_sub(t),
            None => u64::MAX,
        }
    }
}
