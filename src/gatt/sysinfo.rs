//! System information service.
//!
//! `SysClock` is also pushed to subscribers on every periodic tick.

use heapless::String;

use super::{
    AttributeTable, Properties, ReadMode, RequestContext, ServiceHandler, TableBuilder, Uuid16,
    ValueBuf, WriteOutcome, value_from,
};
use crate::app::identity::{ChipUid, DeviceIdentity};
use crate::app::ports::BleEngine;
use crate::error::{AttError, RegistryError};

pub const SYSINFO_SERVICE: Uuid16 = Uuid16(0xFFE0);
pub const CHIP_NAME: Uuid16 = Uuid16(0xFFE1);
pub const SYS_CLOCK: Uuid16 = Uuid16(0xFFE2);
pub const CHIP_UID: Uuid16 = Uuid16(0xFFE3);

/// Length of the chip name prefix taken from the device name.
const CHIP_NAME_LEN: usize = 5;

#[derive(Debug)]
pub struct SysInfoService {
    chip_name: String<CHIP_NAME_LEN>,
    chip_uid: ChipUid,
    clock_handle: Option<u16>,
}

impl SysInfoService {
    pub fn new(identity: &DeviceIdentity) -> Self {
        let mut chip_name = String::new();
        for c in identity.name.chars().take(CHIP_NAME_LEN) {
            if chip_name.push(c).is_err() {
                break;
            }
        }
        Self {
            chip_name,
            chip_uid: identity.uid,
            clock_handle: None,
        }
    }

    /// Value handle of SysClock, once registered.
    pub fn clock_handle(&self) -> Option<u16> {
        self.clock_handle
    }

    pub fn chip_name(&self) -> &str {
        &self.chip_name
    }

    /// SysClock value: engine ticks (625 us), little endian.
    pub fn clock_payload(engine: &dyn BleEngine) -> [u8; 4] {
        engine.system_clock().to_le_bytes()
    }
}

impl ServiceHandler for SysInfoService {
    fn table(&self) -> Result<AttributeTable, RegistryError> {
        TableBuilder::service(SYSINFO_SERVICE)
            .characteristic(CHIP_NAME, Properties::READ, ReadMode::Sliced)
            .description("chip name")
            .characteristic(SYS_CLOCK, Properties::READ | Properties::NOTIFY, ReadMode::WholeOnly)
            .description("System Clock unit 625us")
            .client_config()
            .characteristic(CHIP_UID, Properties::READ, ReadMode::Sliced)
            .description("chip uid")
            .build()
    }

    fn on_registered(&mut self, uuid: Uuid16, handle: u16) {
        if uuid == SYS_CLOCK {
            self.clock_handle = Some(handle);
        }
    }

    fn read(
        &mut self,
        uuid: Uuid16,
        req: &mut RequestContext<'_>,
        _max_len: usize,
        out: &mut ValueBuf,
    ) -> Result<(), AttError> {
        *out = match uuid {
            CHIP_NAME => value_from(self.chip_name.as_bytes())?,
            SYS_CLOCK => value_from(&Self::clock_payload(&*req.engine))?,
            CHIP_UID => value_from(&self.chip_uid)?,
            _ => return Err(AttError::AttributeNotFound),
        };
        Ok(())
    }

    fn write(
        &mut self,
        _uuid: Uuid16,
        _req: &mut RequestContext<'_>,
        _data: &[u8],
    ) -> Result<WriteOutcome, AttError> {
        Err(AttError::AttributeNotFound)
    }
}
