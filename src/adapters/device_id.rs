//! Chip identification source.
//!
//! On silicon the chip id and the 8-byte unique id come from the
//! information flash; host builds return fixed values so the device name
//! is deterministic across runs.

use crate::app::identity::{ChipUid, DeviceIdentity};

/// Chip model byte (`0x82` for a CH582).
pub fn read_chip_id() -> u8 {
    0x82
}

/// Simulation: deterministic fake unique id.
pub fn read_chip_uid() -> ChipUid {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0x00, 0x01]
}

pub fn read_identity() -> DeviceIdentity {
    DeviceIdentity::new(read_chip_id(), read_chip_uid())
}
