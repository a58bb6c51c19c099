//! Device identity derived from the chip id and factory unique id.
//!
//! Produces a stable, human-readable device name in the form `CH5XX-YYYY`
//! where `XX` is the chip id and `YYYY` the 16-bit sum of the 8 unique-id
//! bytes, both in uppercase hex.  The name is:
//! - The GAP device name
//! - The complete local name in the scan response (first 10 bytes)
//! - The source of the SysInfo `ChipName` value (first 5 bytes)

use core::fmt::Write;

/// Fixed-size device name string.
pub type DeviceName = heapless::String<16>;

/// Factory-programmed 8-byte unique id.
pub type ChipUid = [u8; 8];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub chip_id: u8,
    pub uid: ChipUid,
    pub name: DeviceName,
}

impl DeviceIdentity {
    pub fn new(chip_id: u8, uid: ChipUid) -> Self {
        Self {
            chip_id,
            uid,
            name: device_name(chip_id, &uid),
        }
    }
}

/// Wrapping 16-bit sum of the unique-id bytes.
pub fn uid_sum(uid: &ChipUid) -> u16 {
    uid.iter().fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
}

/// Format: `CH5XX-YYYY` (e.g., `CH582-03A1`).
pub fn device_name(chip_id: u8, uid: &ChipUid) -> DeviceName {
    let mut name = DeviceName::new();
    let _ = write!(name, "CH5{:02X}-{:04X}", chip_id, uid_sum(uid));
    name
}
