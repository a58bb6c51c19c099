//! GATT attribute model and service handlers.
//!
//! Services are declared as [`AttributeTable`]s with a small builder and
//! served by a [`ServiceHandler`].  The
//! [`AttributeServiceRegistry`](registry::AttributeServiceRegistry) assigns
//! handles, routes requests by handle to the owning handler, and keeps the
//! per-connection notification state.
//!
//! ## Service layout
//!
//! | Service  | UUID     | Characteristics                                   |
//! |----------|----------|---------------------------------------------------|
//! | Pad      | `0xFF00` | Read, Write, WriteNoRsp, Notify, Sum, Rand        |
//! | SysInfo  | `0xFFE0` | ChipName, SysClock (notify), ChipUid              |
//! | Console  | `0xFFC0` | RNW (read/write/notify), Ctl                      |

pub mod console;
pub mod pad;
pub mod registry;
pub mod sysinfo;

use core::ops::BitOr;

use heapless::Vec;

use crate::app::ports::BleEngine;
use crate::error::{AttError, RegistryError};
use crate::events::ConnId;
use crate::slots::ConnectionSlot;

// ───────────────────────────────────────────────────────────────
// Identifiers and permission bits
// ───────────────────────────────────────────────────────────────

/// 16-bit Bluetooth SIG-style UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uuid16(pub u16);

impl Uuid16 {
    pub const PRIMARY_SERVICE: Self = Self(0x2800);
    pub const CHARACTERISTIC: Self = Self(0x2803);
    pub const USER_DESCRIPTION: Self = Self(0x2901);
    pub const CLIENT_CONFIG: Self = Self(0x2902);

    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

/// Server-side access permissions of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permissions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Characteristic properties as advertised in the declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Properties(u8);

impl Properties {
    pub const READ: Self = Self(0x02);
    pub const WRITE_NO_RSP: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Permissions the value attribute needs to honour these properties.
    pub const fn permissions(self) -> Permissions {
        let mut bits = 0;
        if self.contains(Self::READ) {
            bits |= Permissions::READ.0;
        }
        if self.contains(Self::WRITE) || self.contains(Self::WRITE_NO_RSP) {
            bits |= Permissions::WRITE.0;
        }
        Permissions(bits)
    }
}

impl BitOr for Properties {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ───────────────────────────────────────────────────────────────
// Attributes and tables
// ───────────────────────────────────────────────────────────────

/// How a dynamic value honours read offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The handler produces the whole value; the registry slices it by offset.
    Sliced,
    /// Generated or consumed per read; only `offset == 0` is accepted.
    WholeOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrValue {
    /// Primary service declaration carrying the service UUID.
    Service(Uuid16),
    /// Characteristic declaration; the value handle is the next handle.
    Declaration { props: Properties, value_uuid: Uuid16 },
    /// Constant bytes (user descriptions).
    Static(&'static [u8]),
    /// Served by the owning [`ServiceHandler`].
    Dynamic(ReadMode),
    /// Client characteristic configuration of the preceding value.
    ClientConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub uuid: Uuid16,
    pub perms: Permissions,
    /// 0 until registered.
    pub handle: u16,
    pub value: AttrValue,
}

pub const MAX_TABLE_ENTRIES: usize = 24;

/// Ordered attribute list of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeTable {
    entries: Vec<Attribute, MAX_TABLE_ENTRIES>,
}

impl AttributeTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Attribute> {
        self.entries.get(index)
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [Attribute] {
        &mut self.entries
    }

    /// Handle of the first attribute of type `uuid`.
    pub fn handle_of(&self, uuid: Uuid16) -> Option<u16> {
        self.entries
            .iter()
            .find(|a| a.uuid == uuid)
            .map(|a| a.handle)
    }
}

/// Declarative builder for one primary service.
///
/// ```text
/// TableBuilder::service(SVC)
///     .characteristic(CHR, Properties::READ, ReadMode::Sliced)
///     .description("...")
///     .client_config()
///     .build()
/// ```
#[derive(Debug)]
pub struct TableBuilder {
    table: AttributeTable,
    overflow: bool,
}

impl TableBuilder {
    pub fn service(uuid: Uuid16) -> Self {
        let builder = Self {
            table: AttributeTable::default(),
            overflow: false,
        };
        builder.push(Uuid16::PRIMARY_SERVICE, Permissions::READ, AttrValue::Service(uuid))
    }

    /// Declaration plus value attribute.
    pub fn characteristic(self, uuid: Uuid16, props: Properties, mode: ReadMode) -> Self {
        self.push(
            Uuid16::CHARACTERISTIC,
            Permissions::READ,
            AttrValue::Declaration {
                props,
                value_uuid: uuid,
            },
        )
        .push(uuid, props.permissions(), AttrValue::Dynamic(mode))
    }

    /// Grant `perms` on the preceding value in addition to those its
    /// properties imply.
    pub fn permit(mut self, perms: Permissions) -> Self {
        if let Some(attr) = self.table.entries.last_mut() {
            attr.perms = attr.perms | perms;
        }
        self
    }

    /// User description of the preceding characteristic.
    pub fn description(self, text: &'static str) -> Self {
        self.push(
            Uuid16::USER_DESCRIPTION,
            Permissions::READ,
            AttrValue::Static(text.as_bytes()),
        )
    }

    /// Notification configuration of the preceding characteristic.
    pub fn client_config(self) -> Self {
        self.push(
            Uuid16::CLIENT_CONFIG,
            Permissions::READ | Permissions::WRITE,
            AttrValue::ClientConfig,
        )
    }

    pub fn build(self) -> Result<AttributeTable, RegistryError> {
        if self.overflow {
            return Err(RegistryError::TableFull);
        }
        Ok(self.table)
    }

    fn push(mut self, uuid: Uuid16, perms: Permissions, value: AttrValue) -> Self {
        let attr = Attribute {
            uuid,
            perms,
            handle: 0,
            value,
        };
        if self.table.entries.push(attr).is_err() {
            self.overflow = true;
        }
        self
    }
}

// ───────────────────────────────────────────────────────────────
// Handler seam
// ───────────────────────────────────────────────────────────────

/// Largest attribute value produced in one response.
pub const MAX_VALUE_LEN: usize = 128;

pub type ValueBuf = Vec<u8, MAX_VALUE_LEN>;

/// Everything a handler may touch while serving one request.
pub struct RequestContext<'a> {
    pub conn: ConnId,
    pub slot: &'a mut ConnectionSlot,
    pub engine: &'a mut dyn BleEngine,
}

/// Side effect requested by a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Done,
    /// Accepted, but `dropped` trailing bytes did not fit.
    Truncated { dropped: usize },
    /// Send `payload` on the characteristic value at `handle`.
    Notify { handle: u16, payload: ValueBuf },
}

/// Semantic handler for one service's dynamic attributes.
pub trait ServiceHandler {
    /// The attribute table this handler serves.
    fn table(&self) -> Result<AttributeTable, RegistryError>;

    /// Called once per dynamic attribute with its assigned handle.
    fn on_registered(&mut self, _uuid: Uuid16, _handle: u16) {}

    /// Produce the value of `uuid`, at most `max_len` bytes.
    fn read(
        &mut self,
        uuid: Uuid16,
        req: &mut RequestContext<'_>,
        max_len: usize,
        out: &mut ValueBuf,
    ) -> Result<(), AttError>;

    /// Apply a whole-value write to `uuid`.
    fn write(
        &mut self,
        uuid: Uuid16,
        req: &mut RequestContext<'_>,
        data: &[u8],
    ) -> Result<WriteOutcome, AttError>;
}

/// Copy `data` into a response buffer.
pub(crate) fn value_from(data: &[u8]) -> Result<ValueBuf, AttError> {
    Vec::from_slice(data).map_err(|_| AttError::InsufficientResources)
}
