//! Inbound engine events.
//!
//! The BLE engine reports link-level happenings from its own callbacks.
//! They are queued here and drained by the peripheral task, one message
//! per `SystemMessage` dispatch, so every state change happens inside the
//! dispatch loop.
//!
//! ```text
//! ┌─────────────┐  post()  ┌──────────────┐  SystemMessage  ┌────────────┐
//! │ BLE engine  │─────────▶│  EventInbox  │────────────────▶│ Peripheral │
//! │ callbacks   │          │  (bounded)   │   one per pop   │  dispatch  │
//! └─────────────┘          └──────────────┘                 └────────────┘
//! ```

use heapless::Deque;

use crate::error::ResourceExhausted;

/// Maximum number of undelivered engine events.
pub const INBOX_CAP: usize = 16;

/// Engine-assigned connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u16);

/// Physical layer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phy {
    Le1M,
    Le2M,
    LeCoded,
}

/// Link events reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A central connected.
    Connected { conn: ConnId },
    /// A link went away; `reason` is the HCI disconnect reason.
    Terminated { conn: ConnId, reason: u8 },
    /// ATT MTU exchange finished.
    MtuExchanged { conn: ConnId, mtu: u16 },
    /// Connection parameters were (re)negotiated.
    ParamsUpdated {
        conn: ConnId,
        interval: u16,
        latency: u16,
        timeout: u16,
    },
    /// PHY changed.
    PhyUpdated { conn: ConnId, rx: Phy, tx: Phy },
    /// Result of an RSSI poll.
    RssiRead { conn: ConnId, rssi: i8 },
}

impl EngineEvent {
    /// `Connected` and `Terminated` drive slot occupancy and must reach
    /// the peripheral.
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Terminated { .. })
    }

    /// Reports whose loss only costs a log line or a stale sample.
    const fn is_informational(&self) -> bool {
        matches!(self, Self::RssiRead { .. } | Self::PhyUpdated { .. })
    }
}

/// Bounded FIFO of pending engine events.
#[derive(Debug, Default)]
pub struct EventInbox {
    queue: Deque<EngineEvent, INBOX_CAP>,
}

impl EventInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event.
    ///
    /// When full, a lifecycle event evicts the oldest informational event
    /// (else the oldest non-lifecycle one) and returns it.  Anything else
    /// is refused.
    pub fn push(&mut self, event: EngineEvent) -> Result<Option<EngineEvent>, ResourceExhausted> {
        let Err(event) = self.queue.push_back(event) else {
            return Ok(None);
        };
        if !event.is_lifecycle() {
            return Err(ResourceExhausted::InboxFull);
        }
        let victim = self
            .queue
            .iter()
            .position(EngineEvent::is_informational)
            .or_else(|| self.queue.iter().position(|e| !e.is_lifecycle()))
            .ok_or(ResourceExhausted::InboxFull)?;

        // Rotate once through the queue, leaving the victim out.
        let mut displaced = None;
        for i in 0..self.queue.len() {
            let Some(queued) = self.queue.pop_front() else {
                break;
            };
            if i == victim {
                displaced = Some(queued);
            } else {
                let _ = self.queue.push_back(queued);
            }
        }
        self.queue
            .push_back(event)
            .map_err(|_| ResourceExhausted::InboxFull)?;
        Ok(displaced)
    }

    pub fn pop(&mut self) -> Option<EngineEvent> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
