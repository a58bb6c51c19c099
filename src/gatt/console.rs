//! Console service: a duplex byte tunnel over one characteristic.
//!
//! ```text
//!  peer write ──▶ console_rx ──▶ interpreter
//!  peer read  ◀── console_tx ◀── interpreter
//!  periodic   ◀── console_tx   (notify, bounded by MTU - 3)
//! ```
//!
//! Writes push up to the free space and silently drop the rest.  Reads
//! and notifications drain destructively.  `Ctl` reports
//! `[rx free, tx free]`.

use log::debug;

use super::{
    AttributeTable, Properties, ReadMode, RequestContext, ServiceHandler, TableBuilder, Uuid16,
    ValueBuf, WriteOutcome, value_from,
};
use crate::config::CONSOLE_FIFO_SIZE;
use crate::error::{AttError, RegistryError};

pub const CONSOLE_SERVICE: Uuid16 = Uuid16(0xFFC0);
pub const CONSOLE_RNW: Uuid16 = Uuid16(0xFFC1);
pub const CONSOLE_CTL: Uuid16 = Uuid16(0xFFC2);

#[derive(Debug, Default)]
pub struct ConsoleService {
    rnw_handle: Option<u16>,
}

impl ConsoleService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value handle of RNW, once registered.
    pub fn rnw_handle(&self) -> Option<u16> {
        self.rnw_handle
    }
}

impl ServiceHandler for ConsoleService {
    fn table(&self) -> Result<AttributeTable, RegistryError> {
        TableBuilder::service(CONSOLE_SERVICE)
            .characteristic(
                CONSOLE_RNW,
                Properties::READ | Properties::WRITE | Properties::WRITE_NO_RSP | Properties::NOTIFY,
                ReadMode::WholeOnly,
            )
            .description("Debug Console")
            .client_config()
            .characteristic(CONSOLE_CTL, Properties::READ, ReadMode::WholeOnly)
            .description(
                "Debug Console Info Interface, byte0 is rx fifo free, byte1 is tx fifo free",
            )
            .build()
    }

    fn on_registered(&mut self, uuid: Uuid16, handle: u16) {
        if uuid == CONSOLE_RNW {
            self.rnw_handle = Some(handle);
        }
    }

    fn read(
        &mut self,
        uuid: Uuid16,
        req: &mut RequestContext<'_>,
        max_len: usize,
        out: &mut ValueBuf,
    ) -> Result<(), AttError> {
        match uuid {
            CONSOLE_RNW => {
                let mut buf = [0u8; CONSOLE_FIFO_SIZE];
                let n = max_len.min(CONSOLE_FIFO_SIZE);
                let popped = req.slot.console_tx.pop_into(&mut buf[..n]);
                *out = value_from(&buf[..popped])?;
            }
            CONSOLE_CTL => {
                let rx_free = req.slot.console_rx.free() as u8;
                let tx_free = req.slot.console_tx.free() as u8;
                *out = value_from(&[rx_free, tx_free])?;
            }
            _ => return Err(AttError::AttributeNotFound),
        }
        Ok(())
    }

    fn write(
        &mut self,
        uuid: Uuid16,
        req: &mut RequestContext<'_>,
        data: &[u8],
    ) -> Result<WriteOutcome, AttError> {
        if uuid != CONSOLE_RNW {
            return Err(AttError::AttributeNotFound);
        }
        let accepted = req.slot.console_rx.push_slice(data);
        let dropped = data.len() - accepted;
        if dropped > 0 {
            debug!(
                "CONSOLE: conn {} rx full, dropped {} bytes",
                req.conn.0, dropped
            );
            return Ok(WriteOutcome::Truncated { dropped });
        }
        Ok(WriteOutcome::Done)
    }
}
