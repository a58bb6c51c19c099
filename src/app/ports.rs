//! Port traits: the boundary between the application core and the BLE
//! engine / script interpreter.
//!
//! ```text
//!   BLE engine adapter ──▶ BleEngine ──▶ Peripheral (domain)
//!   VM adapter         ──▶ Interpreter ─┘
//! ```
//!
//! The [`Peripheral`](super::service::Peripheral) receives both at call
//! sites, so the domain core never touches the radio stack directly and
//! the whole multiplexer runs on the host against mock adapters.

use crate::app::advertising::{ConnParamRequest, GapParameters};
use crate::error::EngineError;
use crate::events::{ConnId, Phy};
use crate::gatt::AttributeTable;
use crate::slots::{ConsoleBuffer, VmRegisters};

// ───────────────────────────────────────────────────────────────
// BLE engine port (driven adapter: domain → GAP/GATT stack)
// ───────────────────────────────────────────────────────────────

/// Requests the domain makes of the link-layer / GATT engine.
///
/// Object safe: GATT handlers receive it as `&mut dyn BleEngine`.
pub trait BleEngine {
    /// Bring up the peripheral role with the given GAP configuration.
    fn start_device(&mut self, params: &GapParameters) -> Result<(), EngineError>;

    fn set_advertising_enabled(&mut self, enabled: bool);

    /// Drop a link.  Completion arrives later as a `Terminated` event.
    fn terminate_connection(&mut self, conn: ConnId);

    fn request_connection_parameters(
        &mut self,
        conn: ConnId,
        params: ConnParamRequest,
    ) -> Result<(), EngineError>;

    fn update_phy(&mut self, conn: ConnId, phy: Phy) -> Result<(), EngineError>;

    /// Start an RSSI read; the result arrives as an `RssiRead` event.
    fn read_rssi(&mut self, conn: ConnId) -> Result<(), EngineError>;

    /// Queue one handle-value notification.
    fn send_notification(
        &mut self,
        conn: ConnId,
        handle: u16,
        payload: &[u8],
    ) -> Result<(), EngineError>;

    fn register_attribute_table(&mut self, table: &AttributeTable) -> Result<(), EngineError>;

    /// Free-running system clock in 625 us ticks (wraps).
    fn system_clock(&self) -> u32;

    fn random(&mut self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Interpreter port (driven adapter: domain → script VM)
// ───────────────────────────────────────────────────────────────

/// State the interpreter may touch while resumed for one slot.
pub struct StepContext<'a> {
    pub slot: usize,
    pub conn: ConnId,
    pub registers: &'a mut VmRegisters,
    /// Input from the peer.
    pub console_rx: &'a mut ConsoleBuffer,
    /// Output to the peer.
    pub console_tx: &'a mut ConsoleBuffer,
}

/// Opaque coroutine resumed in fixed quanta.  `step` must not block.
pub trait Interpreter {
    fn step(&mut self, ctx: &mut StepContext<'_>);
}
