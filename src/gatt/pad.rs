//! Pad service: a per-connection scratch buffer for link testing.
//!
//! | Characteristic | UUID     | Access        | Value                              |
//! |----------------|----------|---------------|------------------------------------|
//! | Read           | `0xFF01` | read          | pad contents                       |
//! | Write          | `0xFF02` | write         | replaces pad, echoed on Notify     |
//! | WriteNoRsp     | `0xFF03` | write-no-rsp  | same as Write                      |
//! | Notify         | `0xFF04` | read, notify  | writes echoed; reads find no value |
//! | Sum            | `0xFF05` | read          | modulo-256 byte sum                |
//! | Rand           | `0xFF06` | read          | refills pad randomly, returns len  |

use log::debug;

use super::{
    AttributeTable, Permissions, Properties, ReadMode, RequestContext, ServiceHandler, TableBuilder, Uuid16,
    ValueBuf, WriteOutcome, value_from,
};
use crate::config::PAD_BUF_SIZE;
use crate::error::{AttError, RegistryError};

pub const PAD_SERVICE: Uuid16 = Uuid16(0xFF00);
pub const PAD_READ: Uuid16 = Uuid16(0xFF01);
pub const PAD_WRITE: Uuid16 = Uuid16(0xFF02);
pub const PAD_WRITE_NO_RSP: Uuid16 = Uuid16(0xFF03);
pub const PAD_NOTIFY: Uuid16 = Uuid16(0xFF04);
pub const PAD_SUM: Uuid16 = Uuid16(0xFF05);
pub const PAD_RAND: Uuid16 = Uuid16(0xFF06);

#[derive(Debug, Default)]
pub struct PadService {
    notify_handle: Option<u16>,
}

impl PadService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value handle of the Notify characteristic, once registered.
    pub fn notify_handle(&self) -> Option<u16> {
        self.notify_handle
    }
}

impl ServiceHandler for PadService {
    fn table(&self) -> Result<AttributeTable, RegistryError> {
        TableBuilder::service(PAD_SERVICE)
            .characteristic(PAD_READ, Properties::READ, ReadMode::Sliced)
            .description("read from pad buffer")
            .characteristic(PAD_WRITE, Properties::WRITE, ReadMode::WholeOnly)
            .description("write data to pad buffer")
            .characteristic(PAD_WRITE_NO_RSP, Properties::WRITE_NO_RSP, ReadMode::WholeOnly)
            .description("write data to pad buffer, no response")
            .characteristic(PAD_NOTIFY, Properties::NOTIFY, ReadMode::WholeOnly)
            .permit(Permissions::READ)
            .description("when pad buffer change, send notification")
            .client_config()
            .characteristic(PAD_SUM, Properties::READ, ReadMode::Sliced)
            .description("compute & read pad buffer sum")
            .characteristic(PAD_RAND, Properties::READ, ReadMode::WholeOnly)
            .description("use random number fill pad buffer")
            .build()
    }

    fn on_registered(&mut self, uuid: Uuid16, handle: u16) {
        if uuid == PAD_NOTIFY {
            self.notify_handle = Some(handle);
        }
    }

    fn read(
        &mut self,
        uuid: Uuid16,
        req: &mut RequestContext<'_>,
        _max_len: usize,
        out: &mut ValueBuf,
    ) -> Result<(), AttError> {
        let pad = &mut req.slot.pad;
        match uuid {
            PAD_READ => {
                *out = value_from(pad)?;
            }
            PAD_SUM => {
                let sum = pad.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
                *out = value_from(&[sum])?;
            }
            PAD_RAND => {
                let len = req.engine.random() as usize % PAD_BUF_SIZE;
                pad.clear();
                for _ in 0..len {
                    // len < capacity
                    let _ = pad.push(req.engine.random() as u8);
                }
                *out = value_from(&(len as u16).to_le_bytes())?;
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
        if uuid != PAD_WRITE && uuid != PAD_WRITE_NO_RSP {
            return Err(AttError::AttributeNotFound);
        }
        if data.len() > PAD_BUF_SIZE {
            return Err(AttError::InvalidValue);
        }
        let pad = &mut req.slot.pad;
        pad.clear();
        pad.extend_from_slice(data)
            .map_err(|()| AttError::InvalidValue)?;
        debug!("PAD: conn {} wrote {} bytes", req.conn.0, data.len());
        Ok(match self.notify_handle {
            Some(handle) => WriteOutcome::Notify {
                handle,
                payload: value_from(data)?,
            },
            None => WriteOutcome::Done,
        })
    }
}
