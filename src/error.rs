//! Unified error types for the peripheral application layer.
//!
//! A single `Error` enum that every subsystem converts into, so the dispatch
//! loop handles failures uniformly.  All variants are `Copy` so they can be
//! passed through the scheduler and GATT dispatch paths without allocation.
//!
//! Failure classes:
//!
//! | Class                | Type                  | Effect                               |
//! |----------------------|-----------------------|--------------------------------------|
//! | Protocol error       | [`AttError`]          | returned to the peer, nothing else   |
//! | Invariant violation  | [`InvariantViolation`]| logged with location, op aborted     |
//! | Resource exhaustion  | [`ResourceExhausted`] | dropped where it occurs, logged      |

use core::fmt;
use core::panic::Location;

use log::error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An attribute request was rejected with an ATT status code.
    Att(AttError),
    /// Internal bookkeeping disagreed with what the engine reported.
    Invariant(InvariantViolation),
    /// A bounded resource ran out.
    Resource(ResourceExhausted),
    /// Attribute table registration failed.
    Registry(RegistryError),
    /// The BLE engine refused a request.
    Engine(EngineError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Att(e) => write!(f, "att: {e}"),
            Self::Invariant(e) => write!(f, "invariant: {e}"),
            Self::Resource(e) => write!(f, "resource: {e}"),
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Engine(e) => write!(f, "engine: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// ATT protocol errors
// ---------------------------------------------------------------------------

/// Status codes returned to the peer for a failed attribute request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttError {
    InvalidHandle = 0x01,
    ReadNotPermitted = 0x02,
    WriteNotPermitted = 0x03,
    /// Request from a connection that owns no slot.
    InvalidPdu = 0x04,
    InvalidOffset = 0x07,
    AttributeNotFound = 0x0A,
    /// Offset given for a value that can only be accessed whole.
    AttributeNotLong = 0x0B,
    InvalidValueLength = 0x0D,
    InsufficientResources = 0x11,
    /// Application error: payload exceeds the destination capacity.
    InvalidValue = 0x80,
}

impl AttError {
    /// Raw status byte as carried in an ATT error response.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for AttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "invalid handle"),
            Self::ReadNotPermitted => write!(f, "read not permitted"),
            Self::WriteNotPermitted => write!(f, "write not permitted"),
            Self::InvalidPdu => write!(f, "invalid PDU"),
            Self::InvalidOffset => write!(f, "invalid offset"),
            Self::AttributeNotFound => write!(f, "attribute not found"),
            Self::AttributeNotLong => write!(f, "attribute not long"),
            Self::InvalidValueLength => write!(f, "invalid value length"),
            Self::InsufficientResources => write!(f, "insufficient resources"),
            Self::InvalidValue => write!(f, "invalid value"),
        }
    }
}

impl From<AttError> for Error {
    fn from(e: AttError) -> Self {
        Self::Att(e)
    }
}

// ---------------------------------------------------------------------------
// Invariant violations
// ---------------------------------------------------------------------------

/// The engine reported something the slot table cannot account for
/// (unknown connection, event for a free slot, ...).
///
/// Never fatal: the operation that detected it is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvariantViolation {
    pub what: &'static str,
    pub location: &'static Location<'static>,
}

impl InvariantViolation {
    /// Record and log a violation at the caller's source location.
    #[track_caller]
    pub fn raise(what: &'static str) -> Self {
        let location = Location::caller();
        error!(
            "BLE: invariant violated: {} ({}:{})",
            what,
            location.file(),
            location.line()
        );
        Self { what, location }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.what,
            self.location.file(),
            self.location.line()
        )
    }
}

impl From<InvariantViolation> for Error {
    fn from(e: InvariantViolation) -> Self {
        Self::Invariant(e)
    }
}

// ---------------------------------------------------------------------------
// Resource exhaustion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceExhausted {
    /// Every connection slot is occupied.
    NoFreeSlot,
    /// Payload does not fit in one notification for the link's MTU.
    NotificationTooLarge { len: usize, limit: usize },
    /// The engine could not allocate an outbound notification buffer.
    NotifyBufferUnavailable,
    /// The engine-event inbox is full.
    InboxFull,
    /// No scheduler task ids left.
    NoTaskId,
}

impl fmt::Display for ResourceExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreeSlot => write!(f, "no free connection slot"),
            Self::NotificationTooLarge { len, limit } => {
                write!(f, "notification of {len} bytes exceeds limit {limit}")
            }
            Self::NotifyBufferUnavailable => write!(f, "notification buffer unavailable"),
            Self::InboxFull => write!(f, "event inbox full"),
            Self::NoTaskId => write!(f, "scheduler task ids exhausted"),
        }
    }
}

impl From<ResourceExhausted> for Error {
    fn from(e: ResourceExhausted) -> Self {
        Self::Resource(e)
    }
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// An attribute table exceeded its fixed entry capacity while building.
    TableFull,
    /// Not enough room left in the handle routing map.
    RouteTableFull,
    /// Too many tables or notifying characteristics registered.
    TooManyTables,
    /// Handle space (u16) exhausted.
    HandleSpaceExhausted,
    /// A client configuration descriptor with no preceding characteristic value.
    OrphanClientConfig,
    /// The engine rejected the table.
    EngineRejected,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableFull => write!(f, "attribute table full"),
            Self::RouteTableFull => write!(f, "handle route table full"),
            Self::TooManyTables => write!(f, "too many tables"),
            Self::HandleSpaceExhausted => write!(f, "attribute handle space exhausted"),
            Self::OrphanClientConfig => write!(f, "client config without characteristic"),
            Self::EngineRejected => write!(f, "engine rejected attribute table"),
        }
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Failures reported by the [`BleEngine`](crate::app::ports::BleEngine) port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// No buffer available for the outbound PDU.
    NoResources,
    /// The connection is not (or no longer) known to the engine.
    NotConnected,
    /// The engine is in the wrong state for this request.
    IncorrectMode,
    /// Any other engine status byte.
    Status(u8),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResources => write!(f, "no resources"),
            Self::NotConnected => write!(f, "not connected"),
            Self::IncorrectMode => write!(f, "incorrect mode"),
            Self::Status(s) => write!(f, "status 0x{s:02X}"),
        }
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed validation; carries the field name.
    Invalid(&'static str),
    /// Serialised form could not be decoded.
    Decode,
    /// Output buffer too small while encoding.
    Encode,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(field) => write!(f, "invalid value for {field}"),
            Self::Decode => write!(f, "decode failed"),
            Self::Encode => write!(f, "encode failed"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
