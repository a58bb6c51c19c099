//! Link diagnostics counters.
//!
//! Every bounded-loss path (rejected connection, dropped notification,
//! truncated console write) and every invariant violation is counted
//! here so drops are observable without a debugger.  The snapshot is
//! serde-serialisable for export over a diagnostics channel.

use serde::{Deserialize, Serialize};

use crate::error::{Error, ResourceExhausted};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub connections_accepted: u32,
    /// Connections terminated on arrival because every slot was busy.
    pub connections_rejected: u32,
    pub notifications_sent: u32,
    /// Oversized payloads and engine buffer failures.
    pub notifications_dropped: u32,
    /// Console bytes dropped because RX was full.
    pub console_bytes_truncated: u32,
    pub invariant_violations: u32,
    pub inbox_overflows: u32,
}

impl LinkStats {
    /// Count a failure against the matching counter.
    pub fn record(&mut self, err: &Error) {
        let counter = match err {
            Error::Invariant(_) => &mut self.invariant_violations,
            Error::Resource(ResourceExhausted::InboxFull) => &mut self.inbox_overflows,
            Error::Resource(ResourceExhausted::NoFreeSlot) => &mut self.connections_rejected,
            Error::Resource(
                ResourceExhausted::NotificationTooLarge { .. }
                | ResourceExhausted::NotifyBufferUnavailable,
            )
            | Error::Engine(_) => &mut self.notifications_dropped,
            _ => return,
        };
        bump(counter);
    }

    /// Compact binary snapshot.  Returns the bytes used.
    pub fn encode_into(&self, buf: &mut [u8]) -> Option<usize> {
        postcard::to_slice(self, buf).ok().map(|used| used.len())
    }
}

/// Counters stick at `u32::MAX` instead of wrapping.
pub fn bump(counter: &mut u32) {
    *counter = counter.saturating_add(1);
}
