//! Attribute service registry.
//!
//! Assigns handles at registration, resolves every handle to its owning
//! service once, and applies the generic read/write contract before the
//! semantic handler sees a request.
//!
//! ```text
//!  read/write(handle) ──▶ routes[handle] ──▶ Route { service, attr }
//!                                               │
//!            ┌──────────────────────────────────┼─────────────────────┐
//!            ▼                                  ▼                     ▼
//!     static / declaration               ClientConfig           Dynamic(mode)
//!     (served here)                 (ccc[value handle][conn])  handlers[service]
//! ```
//!
//! Read contract: a value of length 0 reads as empty at any offset;
//! otherwise `offset >= len` is `InvalidOffset` and the response is
//! `min(max_len, len - offset)` bytes from `offset`.  `WholeOnly` values
//! reject any non-zero offset with `AttributeNotLong`, as do all writes.

use heapless::{FnvIndexMap, Vec};
use log::{debug, info, warn};

use super::{
    AttrValue, Attribute, AttributeTable, MAX_VALUE_LEN, Permissions, ReadMode, RequestContext,
    ServiceHandler, Uuid16, ValueBuf, WriteOutcome, value_from,
};
use crate::app::ports::BleEngine;
use crate::config::MAX_CONNECTIONS;
use crate::error::{AttError, EngineError, Error, RegistryError, ResourceExhausted};
use crate::events::ConnId;

pub const MAX_TABLES: usize = 4;
/// Handle routing capacity (power of two for the index map).
pub const MAX_ROUTES: usize = 64;
/// Notifying characteristics across all tables (power of two).
pub const MAX_NOTIFY_CHARS: usize = 8;

/// CCC value enabling notifications.
pub const CCC_NOTIFY: u16 = 0x0001;

/// Position of a registered handler in the slice passed to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceId(pub u8);

#[derive(Debug, Clone, Copy)]
struct Route {
    service: ServiceId,
    table: u8,
    index: u8,
    /// For a CCC: the value it configures.  Otherwise the attribute itself.
    value_handle: u16,
}

/// Per-characteristic notification enable state, keyed by connection.
#[derive(Debug, Clone)]
struct CccTable {
    ccc_handle: u16,
    entries: [Option<(ConnId, u16)>; MAX_CONNECTIONS],
}

impl CccTable {
    fn new(ccc_handle: u16) -> Self {
        Self {
            ccc_handle,
            entries: [None; MAX_CONNECTIONS],
        }
    }

    fn get(&self, conn: ConnId) -> u16 {
        self.entries
            .iter()
            .flatten()
            .find(|(c, _)| *c == conn)
            .map_or(0, |(_, v)| *v)
    }

    /// Store `conn`'s value.  `live` lists the connections that currently
    /// own a slot; entries of anyone else are reclaimed when the table is
    /// otherwise full.
    fn set(&mut self, conn: ConnId, value: u16, live: &[ConnId]) -> Result<(), AttError> {
        if let Some(entry) = self.entries.iter_mut().flatten().find(|(c, _)| *c == conn) {
            entry.1 = value;
            return Ok(());
        }
        if value == 0 {
            return Ok(());
        }
        // Unused or disabled entries first, so a returning id keeps its
        // subscription for as long as there is room.
        let index = self
            .entries
            .iter()
            .position(|e| e.is_none_or(|(_, v)| v == 0))
            .or_else(|| {
                self.entries
                    .iter()
                    .position(|e| e.is_some_and(|(c, _)| !live.contains(&c)))
            })
            .ok_or(AttError::InsufficientResources)?;
        self.entries[index] = Some((conn, value));
        Ok(())
    }

    fn clear(&mut self, conn: ConnId) {
        for entry in &mut self.entries {
            if entry.is_some_and(|(c, _)| c == conn) {
                *entry = None;
            }
        }
    }
}

/// Outcome of a notification attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The connection has not enabled notifications for this value.
    NotSubscribed,
}

#[derive(Debug)]
pub struct AttributeServiceRegistry {
    tables: Vec<AttributeTable, MAX_TABLES>,
    routes: FnvIndexMap<u16, Route, MAX_ROUTES>,
    ccc: FnvIndexMap<u16, CccTable, MAX_NOTIFY_CHARS>,
    next_handle: u16,
}

impl Default for AttributeServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeServiceRegistry {
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            routes: FnvIndexMap::new(),
            ccc: FnvIndexMap::new(),
            next_handle: 1,
        }
    }

    // ── Registration ─────────────────────────────────────────

    /// Assign handles to `handler`'s table, hand it to the engine and wire
    /// up routing.  Nothing is modified when validation fails or the
    /// engine rejects the table.
    pub fn register(
        &mut self,
        service: ServiceId,
        handler: &mut dyn ServiceHandler,
        engine: &mut dyn BleEngine,
    ) -> Result<(), RegistryError> {
        let mut table = handler.table()?;

        if self.tables.is_full() {
            return Err(RegistryError::TooManyTables);
        }
        if self.routes.len() + table.len() > MAX_ROUTES {
            return Err(RegistryError::RouteTableFull);
        }
        if usize::from(self.next_handle) + table.len() > usize::from(u16::MAX) {
            return Err(RegistryError::HandleSpaceExhausted);
        }
        let mut seen_value = false;
        let mut configs = 0;
        for attr in table.iter() {
            match attr.value {
                AttrValue::Dynamic(_) => seen_value = true,
                AttrValue::ClientConfig if !seen_value => {
                    return Err(RegistryError::OrphanClientConfig);
                }
                AttrValue::ClientConfig => configs += 1,
                _ => {}
            }
        }
        if self.ccc.len() + configs > MAX_NOTIFY_CHARS {
            return Err(RegistryError::TooManyTables);
        }

        let first = self.next_handle;
        for (index, attr) in table.entries_mut().iter_mut().enumerate() {
            attr.handle = first + index as u16;
        }
        engine
            .register_attribute_table(&table)
            .map_err(|_| RegistryError::EngineRejected)?;

        let table_index = self.tables.len() as u8;
        let mut last_value = 0;
        for (index, attr) in table.iter().enumerate() {
            let handle = attr.handle;
            let value_handle = match attr.value {
                AttrValue::Dynamic(_) => {
                    last_value = handle;
                    handler.on_registered(attr.uuid, handle);
                    handle
                }
                AttrValue::ClientConfig => {
                    self.ccc
                        .insert(last_value, CccTable::new(handle))
                        .map_err(|_| RegistryError::TooManyTables)?;
                    last_value
                }
                _ => handle,
            };
            self.routes
                .insert(
                    handle,
                    Route {
                        service,
                        table: table_index,
                        index: index as u8,
                        value_handle,
                    },
                )
                .map_err(|_| RegistryError::RouteTableFull)?;
        }
        self.next_handle = first + table.len() as u16;

        info!(
            "GATT: registered service {:04X} handles {}..={}",
            service_uuid(&table).0,
            table.get(0).map_or(0, |a| a.handle),
            self.next_handle - 1
        );
        self.tables
            .push(table)
            .map_err(|_| RegistryError::TooManyTables)
    }

    /// Number of handles assigned so far.
    pub fn handle_count(&self) -> usize {
        usize::from(self.next_handle - 1)
    }

    pub fn attribute(&self, handle: u16) -> Option<&Attribute> {
        let route = self.routes.get(&handle)?;
        self.tables
            .get(usize::from(route.table))?
            .get(usize::from(route.index))
    }

    /// Handle of the first attribute of type `uuid` across all tables.
    pub fn handle_of(&self, uuid: Uuid16) -> Option<u16> {
        self.tables.iter().find_map(|t| t.handle_of(uuid))
    }

    /// CCC descriptor handle configuring the value at `value_handle`.
    pub fn client_config_handle(&self, value_handle: u16) -> Option<u16> {
        self.ccc.get(&value_handle).map(|c| c.ccc_handle)
    }

    // ── Dispatch ─────────────────────────────────────────────

    pub fn dispatch_read(
        &mut self,
        handlers: &mut [&mut dyn ServiceHandler],
        req: &mut RequestContext<'_>,
        handle: u16,
        offset: usize,
        max_len: usize,
    ) -> Result<ValueBuf, AttError> {
        let (route, attr) = self.resolve(handle)?;
        if !attr.perms.contains(Permissions::READ) {
            return Err(AttError::ReadNotPermitted);
        }
        match attr.value {
            AttrValue::Service(uuid) => slice_read(&uuid.to_le_bytes(), offset, max_len),
            AttrValue::Declaration { props, value_uuid } => {
                let [h_lo, h_hi] = (handle + 1).to_le_bytes();
                let [u_lo, u_hi] = value_uuid.to_le_bytes();
                slice_read(&[props.bits(), h_lo, h_hi, u_lo, u_hi], offset, max_len)
            }
            AttrValue::Static(bytes) => slice_read(bytes, offset, max_len),
            AttrValue::ClientConfig => {
                let value = self
                    .ccc
                    .get(&route.value_handle)
                    .map_or(0, |c| c.get(req.conn));
                slice_read(&value.to_le_bytes(), offset, max_len)
            }
            AttrValue::Dynamic(ReadMode::Sliced) => {
                let handler = handler_for(handlers, route.service)?;
                let mut full = ValueBuf::new();
                handler.read(attr.uuid, req, MAX_VALUE_LEN, &mut full)?;
                slice_read(&full, offset, max_len)
            }
            AttrValue::Dynamic(ReadMode::WholeOnly) => {
                if offset != 0 {
                    return Err(AttError::AttributeNotLong);
                }
                let handler = handler_for(handlers, route.service)?;
                let mut out = ValueBuf::new();
                handler.read(attr.uuid, req, max_len.min(MAX_VALUE_LEN), &mut out)?;
                out.truncate(max_len);
                Ok(out)
            }
        }
    }

    /// Route a write.  `live` is the set of connections owning a slot,
    /// used to reclaim CCC entries left behind by departed peers.
    pub fn dispatch_write(
        &mut self,
        handlers: &mut [&mut dyn ServiceHandler],
        req: &mut RequestContext<'_>,
        live: &[ConnId],
        handle: u16,
        data: &[u8],
        offset: usize,
    ) -> Result<WriteOutcome, AttError> {
        let (route, attr) = self.resolve(handle)?;
        if !attr.perms.contains(Permissions::WRITE) {
            return Err(AttError::WriteNotPermitted);
        }
        if offset != 0 {
            return Err(AttError::AttributeNotLong);
        }
        match attr.value {
            AttrValue::ClientConfig => {
                let value = match data {
                    [lo, hi] => u16::from_le_bytes([*lo, *hi]),
                    _ => return Err(AttError::InvalidValueLength),
                };
                if value & !CCC_NOTIFY != 0 {
                    return Err(AttError::InvalidValue);
                }
                let ccc = self
                    .ccc
                    .get_mut(&route.value_handle)
                    .ok_or(AttError::AttributeNotFound)?;
                ccc.set(req.conn, value, live)?;
                debug!(
                    "GATT: conn {} notify {} on handle {}",
                    req.conn.0,
                    if value == 0 { "off" } else { "on" },
                    route.value_handle
                );
                Ok(WriteOutcome::Done)
            }
            AttrValue::Dynamic(_) => {
                let handler = handler_for(handlers, route.service)?;
                handler.write(attr.uuid, req, data)
            }
            _ => Err(AttError::WriteNotPermitted),
        }
    }

    // ── Notifications ────────────────────────────────────────

    pub fn notifications_enabled(&self, conn: ConnId, value_handle: u16) -> bool {
        self.ccc
            .get(&value_handle)
            .is_some_and(|c| c.get(conn) & CCC_NOTIFY != 0)
    }

    /// Send `payload` on `value_handle` if `conn` subscribed.
    ///
    /// Payloads longer than `limit` (MTU - 3) are dropped, never fragmented.
    pub fn notify(
        &self,
        engine: &mut dyn BleEngine,
        conn: ConnId,
        limit: usize,
        value_handle: u16,
        payload: &[u8],
    ) -> Result<Delivery, Error> {
        if !self.notifications_enabled(conn, value_handle) {
            return Ok(Delivery::NotSubscribed);
        }
        if payload.len() > limit {
            return Err(ResourceExhausted::NotificationTooLarge {
                len: payload.len(),
                limit,
            }
            .into());
        }
        engine
            .send_notification(conn, value_handle, payload)
            .map_err(|e| match e {
                EngineError::NoResources => ResourceExhausted::NotifyBufferUnavailable.into(),
                other => Error::Engine(other),
            })?;
        Ok(Delivery::Sent)
    }

    /// Forget every subscription held by `conn`.
    pub fn clear_connection(&mut self, conn: ConnId) {
        for table in self.ccc.values_mut() {
            table.clear(conn);
        }
    }

    fn resolve(&self, handle: u16) -> Result<(Route, Attribute), AttError> {
        let route = *self.routes.get(&handle).ok_or(AttError::InvalidHandle)?;
        let attr = self
            .tables
            .get(usize::from(route.table))
            .and_then(|t| t.get(usize::from(route.index)))
            .copied()
            .ok_or(AttError::InvalidHandle)?;
        Ok((route, attr))
    }
}

fn handler_for<'h>(
    handlers: &'h mut [&mut dyn ServiceHandler],
    service: ServiceId,
) -> Result<&'h mut dyn ServiceHandler, AttError> {
    match handlers.get_mut(usize::from(service.0)) {
        Some(h) => Ok(&mut **h),
        None => {
            warn!("GATT: no handler for service {}", service.0);
            Err(AttError::AttributeNotFound)
        }
    }
}

fn service_uuid(table: &AttributeTable) -> Uuid16 {
    match table.get(0).map(|a| a.value) {
        Some(AttrValue::Service(uuid)) => uuid,
        _ => Uuid16(0),
    }
}

/// Apply the offset/length read contract to a complete value.
pub fn slice_read(value: &[u8], offset: usize, max_len: usize) -> Result<ValueBuf, AttError> {
    if value.is_empty() {
        return Ok(ValueBuf::new());
    }
    if value.len() <= offset {
        return Err(AttError::InvalidOffset);
    }
    let end = offset + max_len.min(value.len() - offset).min(MAX_VALUE_LEN);
    value_from(&value[offset..end])
}
