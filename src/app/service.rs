//! Peripheral service, the single-threaded application core.
//!
//! [`Peripheral`] owns the slot table, the scheduler, the attribute
//! registry and the three GATT services.  It exposes a hardware-agnostic
//! API: the BLE engine and the script interpreter are injected at call
//! sites, so the whole multiplexer runs on the host against mock adapters.
//!
//! ```text
//!  engine callbacks ──post()──▶ EventInbox ─┐
//!                                           ▼
//!  BleEngine ◀──┐        ┌──────────────────────────────────┐
//!               ├────────│            Peripheral            │
//!  Interpreter ◀┘        │ scheduler · slots · registry     │
//!                        └──────────────────────────────────┘
//!  GATT read/write ──handle_read()/handle_write()──▶ registry ──▶ handlers
//! ```
//!
//! Task layout: one peripheral task (inbox drain, device start) plus one
//! task per connection slot.  [`Peripheral::run_pending`] dispatches at
//! most one event, so every handler runs to completion before the next.

use heapless::Vec;
use log::{debug, error, info, warn};

use crate::config::{CONSOLE_FIFO_SIZE, DEFAULT_ATT_MTU, MAX_CONNECTIONS, PeripheralConfig};
use crate::diagnostics::{LinkStats, bump};
use crate::error::{AttError, Error, InvariantViolation, ResourceExhausted, Result};
use crate::events::{ConnId, EngineEvent, EventInbox, Phy};
use crate::gatt::console::ConsoleService;
use crate::gatt::pad::PadService;
use crate::gatt::registry::{AttributeServiceRegistry, Delivery, ServiceId};
use crate::gatt::sysinfo::SysInfoService;
use crate::gatt::{RequestContext, ServiceHandler, ValueBuf, WriteOutcome};
use crate::scheduler::{EventScheduler, TaskEvent, TaskId};
use crate::slots::{ConnectionSlot, ConnectionSlotTable};

use super::advertising::{ConnParamRequest, GapParameters};
use super::identity::DeviceIdentity;
use super::ports::{BleEngine, Interpreter, StepContext};

/// Handler positions in the dispatch slice.
pub const PAD_SERVICE_ID: ServiceId = ServiceId(0);
pub const SYSINFO_SERVICE_ID: ServiceId = ServiceId(1);
pub const CONSOLE_SERVICE_ID: ServiceId = ServiceId(2);

// ───────────────────────────────────────────────────────────────
// Peripheral
// ───────────────────────────────────────────────────────────────

/// The application context every handler runs against.
#[derive(Debug)]
pub struct Peripheral {
    config: PeripheralConfig,
    identity: DeviceIdentity,
    scheduler: EventScheduler,
    main_task: TaskId,
    slots: ConnectionSlotTable,
    registry: AttributeServiceRegistry,
    pad: PadService,
    sysinfo: SysInfoService,
    console: ConsoleService,
    inbox: EventInbox,
    /// Connections terminated on arrival whose `Terminated` is still due.
    rejected: Vec<ConnId, MAX_CONNECTIONS>,
    stats: LinkStats,
}

impl Peripheral {
    /// Validate `config`, register the scheduler tasks and hand the three
    /// attribute tables to the engine.
    ///
    /// Does **not** start advertising; call [`start`](Self::start) next.
    pub fn new(
        config: PeripheralConfig,
        identity: DeviceIdentity,
        engine: &mut impl BleEngine,
    ) -> Result<Self> {
        config.validate()?;

        let mut scheduler = EventScheduler::new();
        let main_task = scheduler
            .register_task()
            .ok_or(ResourceExhausted::NoTaskId)?;
        let mut tasks = [main_task; MAX_CONNECTIONS];
        for task in &mut tasks {
            *task = scheduler
                .register_task()
                .ok_or(ResourceExhausted::NoTaskId)?;
        }

        let mut registry = AttributeServiceRegistry::new();
        let mut pad = PadService::new();
        let mut sysinfo = SysInfoService::new(&identity);
        let mut console = ConsoleService::new();
        registry.register(PAD_SERVICE_ID, &mut pad, &mut *engine)?;
        registry.register(SYSINFO_SERVICE_ID, &mut sysinfo, &mut *engine)?;
        registry.register(CONSOLE_SERVICE_ID, &mut console, &mut *engine)?;

        info!(
            "BLE: {} ready ({} slots, {} handles)",
            identity.name,
            MAX_CONNECTIONS,
            registry.handle_count()
        );

        Ok(Self {
            config,
            identity,
            scheduler,
            main_task,
            slots: ConnectionSlotTable::new(tasks),
            registry,
            pad,
            sysinfo,
            console,
            inbox: EventInbox::new(),
            rejected: Vec::new(),
            stats: LinkStats::default(),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Queue device start-up on the peripheral task.
    pub fn start(&mut self) {
        self.scheduler
            .set_event(self.main_task, TaskEvent::StartDevice);
    }

    /// Deliver an engine event.  Processed later, one per dispatch.
    ///
    /// On a full inbox a `Connected` or `Terminated` displaces a queued
    /// link event, so slot occupancy never drifts from the engine's view.
    pub fn post(&mut self, event: EngineEvent) -> core::result::Result<(), ResourceExhausted> {
        match self.inbox.push(event) {
            Ok(None) => {}
            Ok(Some(displaced)) => {
                bump(&mut self.stats.inbox_overflows);
                warn!("BLE: inbox full, {:?} displaced by {:?}", displaced, event);
            }
            Err(e) => {
                bump(&mut self.stats.inbox_overflows);
                warn!("BLE: inbox full, dropping {:?}", event);
                return Err(e);
            }
        }
        self.scheduler
            .set_event(self.main_task, TaskEvent::SystemMessage);
        Ok(())
    }

    // ── Dispatch loop ─────────────────────────────────────────

    /// Catch up with the engine clock and dispatch at most one event.
    ///
    /// Returns `false` when nothing was ready.
    pub fn run_pending(
        &mut self,
        engine: &mut impl BleEngine,
        vm: &mut impl Interpreter,
    ) -> bool {
        self.scheduler.advance_to(engine.system_clock());
        let Some((task, event)) = self.scheduler.pop_ready() else {
            return false;
        };
        if task == self.main_task {
            self.dispatch_main(engine, event);
        } else {
            self.dispatch_slot(engine, vm, task, event);
        }
        true
    }

    /// Dispatch until no event is ready at the current clock.
    ///
    /// Returns the number of events dispatched.
    pub fn run_until_idle(
        &mut self,
        engine: &mut impl BleEngine,
        vm: &mut impl Interpreter,
    ) -> usize {
        let mut dispatched = 0;
        while self.run_pending(engine, vm) {
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch_main(&mut self, engine: &mut impl BleEngine, event: TaskEvent) {
        match event {
            TaskEvent::SystemMessage => {
                if let Some(msg) = self.inbox.pop() {
                    self.on_engine_event(engine, msg);
                }
                if !self.inbox.is_empty() {
                    self.scheduler
                        .set_event(self.main_task, TaskEvent::SystemMessage);
                }
            }
            TaskEvent::StartDevice => self.start_device(engine),
            other => {
                debug!("BLE: {:?} on peripheral task", other);
                self.violation(InvariantViolation::raise("slot event on peripheral task"));
            }
        }
    }

    fn start_device(&mut self, engine: &mut impl BleEngine) {
        let params = GapParameters::from_config(&self.config, &self.identity.name);
        match engine.start_device(&params) {
            Ok(()) => {
                engine.set_advertising_enabled(true);
                info!("BLE: advertising as {}", self.identity.name);
            }
            Err(e) => error!("BLE: device start failed: {}", e),
        }
    }

    // ── Engine events ─────────────────────────────────────────

    fn on_engine_event(&mut self, engine: &mut impl BleEngine, event: EngineEvent) {
        match event {
            EngineEvent::Connected { conn } => self.on_connected(engine, conn),
            EngineEvent::Terminated { conn, reason } => self.on_terminated(engine, conn, reason),
            EngineEvent::MtuExchanged { conn, mtu } => {
                if let Some(slot) = self.slot_mut_or_violation(conn) {
                    slot.mtu = mtu.max(DEFAULT_ATT_MTU);
                    debug!("BLE: conn {} mtu {}", conn.0, slot.mtu);
                }
            }
            EngineEvent::ParamsUpdated {
                conn,
                interval,
                latency,
                timeout,
            } => self.on_params_updated(conn, interval, latency, timeout),
            EngineEvent::PhyUpdated { conn, rx, tx } => {
                info!("BLE: conn {} phy rx {:?} tx {:?}", conn.0, rx, tx);
            }
            EngineEvent::RssiRead { conn, rssi } => {
                if let Some(slot) = self.slot_mut_or_violation(conn) {
                    slot.rssi = Some(rssi);
                }
            }
        }
    }

    fn on_connected(&mut self, engine: &mut impl BleEngine, conn: ConnId) {
        match self.slots.acquire(conn) {
            Ok(index) => {
                bump(&mut self.stats.connections_accepted);
                let Some(task) = self.slots.get(index).map(ConnectionSlot::task) else {
                    return;
                };
                let cfg = &self.config;
                self.scheduler
                    .arm(task, TaskEvent::ParamUpdate, cfg.param_update_delay);
                self.scheduler
                    .arm(task, TaskEvent::PhyUpdate, cfg.phy_update_delay);
                self.scheduler
                    .arm(task, TaskEvent::RssiPoll, cfg.rssi_poll_period);
                self.scheduler
                    .arm(task, TaskEvent::Interpreter, cfg.interpreter_delay);
            }
            Err(Error::Resource(ResourceExhausted::NoFreeSlot)) => {
                warn!("BLE: no free slot, terminating conn {}", conn.0);
                if self.rejected.is_full() {
                    self.rejected.remove(0);
                }
                let _ = self.rejected.push(conn);
                engine.terminate_connection(conn);
                bump(&mut self.stats.connections_rejected);
            }
            Err(e) => self.stats.record(&e),
        }
    }

    fn on_terminated(&mut self, engine: &mut impl BleEngine, conn: ConnId, reason: u8) {
        if self.slots.find_by_connection(conn).is_none() && self.take_rejected(conn) {
            debug!("BLE: rejected conn {} gone", conn.0);
            return;
        }
        match self.slots.release(conn) {
            Ok(index) => {
                info!("BLE: conn {} terminated (reason 0x{:02X})", conn.0, reason);
                if let Some(slot) = self.slots.get_mut(index) {
                    self.scheduler.disarm_all(slot.task());
                    if self.config.reset_console_on_release {
                        slot.reset_console();
                    }
                }
                if self.config.reset_notifications_on_disconnect {
                    self.registry.clear_connection(conn);
                }
            }
            Err(v) => {
                self.violation(v);
                return;
            }
        }
        if self.slots.count_free() > 0 {
            engine.set_advertising_enabled(true);
        }
    }

    fn on_params_updated(&mut self, conn: ConnId, interval: u16, latency: u16, timeout: u16) {
        let (min, max, retry) = (
            self.config.conn_interval_min,
            self.config.conn_interval_max,
            self.config.param_update_delay,
        );
        let Some(slot) = self.slot_mut_or_violation(conn) else {
            return;
        };
        debug!(
            "BLE: conn {} interval {} latency {} timeout {}",
            conn.0, interval, latency, timeout
        );
        slot.conn_interval = interval;
        let delay = u32::from(interval) + u32::from(interval) / 2;
        slot.periodic_delay = delay;
        let task = slot.task();

        if !(min..=max).contains(&interval) {
            self.scheduler.arm(task, TaskEvent::ParamUpdate, retry);
        }
        if delay > 0 {
            self.scheduler.arm(task, TaskEvent::Periodic, delay);
        } else {
            self.scheduler.disarm(task, TaskEvent::Periodic);
        }
    }

    // ── Slot tasks ────────────────────────────────────────────

    fn dispatch_slot(
        &mut self,
        engine: &mut impl BleEngine,
        vm: &mut impl Interpreter,
        task: TaskId,
        event: TaskEvent,
    ) {
        let slot = self
            .slots
            .find_by_task(task)
            .and_then(|index| Some((index, self.slots.get(index)?.conn()?)));
        let Some((index, conn)) = slot else {
            debug!("BLE: {:?} for task {}", event, task.index());
            self.violation(InvariantViolation::raise("event for a free slot"));
            return;
        };

        match event {
            TaskEvent::ParamUpdate => {
                let params = ConnParamRequest::from_config(&self.config);
                if let Err(e) = engine.request_connection_parameters(conn, params) {
                    warn!("BLE: conn {} param update request failed: {}", conn.0, e);
                }
            }
            TaskEvent::PhyUpdate => {
                if let Err(e) = engine.update_phy(conn, Phy::Le2M) {
                    warn!("BLE: conn {} phy update failed: {}", conn.0, e);
                }
            }
            TaskEvent::RssiPoll => {
                if let Err(e) = engine.read_rssi(conn) {
                    debug!("BLE: conn {} rssi read failed: {}", conn.0, e);
                }
                self.scheduler
                    .arm(task, TaskEvent::RssiPoll, self.config.rssi_poll_period);
            }
            TaskEvent::Periodic => {
                let delay = self.slots.get(index).map_or(0, |s| s.periodic_delay);
                if delay > 0 {
                    self.scheduler.arm(task, TaskEvent::Periodic, delay);
                }
                self.periodic_task(engine, index, conn);
            }
            TaskEvent::Interpreter => {
                self.scheduler
                    .arm(task, TaskEvent::Interpreter, self.config.interpreter_delay);
                self.resume_interpreter(vm, index, conn);
            }
            TaskEvent::SystemMessage | TaskEvent::StartDevice => {
                self.violation(InvariantViolation::raise("peripheral event on slot task"));
            }
        }
    }

    /// Tick counter, SysClock notification, then console TX drain.
    fn periodic_task(&mut self, engine: &mut impl BleEngine, index: usize, conn: ConnId) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        slot.periodic_count = slot.periodic_count.wrapping_add(1);
        let limit = slot.notify_limit();

        if let Some(handle) = self.sysinfo.clock_handle() {
            let payload = SysInfoService::clock_payload(&*engine);
            let result = self
                .registry
                .notify(&mut *engine, conn, limit, handle, &payload);
            tally(&mut self.stats, result);
        }

        let Some(handle) = self.console.rnw_handle() else {
            return;
        };
        if slot.console_tx.is_empty() || !self.registry.notifications_enabled(conn, handle) {
            return;
        }
        let mut buf = [0u8; CONSOLE_FIFO_SIZE];
        let n = slot
            .console_tx
            .peek_into(&mut buf[..limit.min(CONSOLE_FIFO_SIZE)]);
        let result = self.registry.notify(engine, conn, limit, handle, &buf[..n]);
        // Bytes leave TX only once the engine took them.
        if tally(&mut self.stats, result) {
            slot.console_tx.discard(n);
        }
    }

    fn resume_interpreter(&mut self, vm: &mut impl Interpreter, index: usize, conn: ConnId) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        let mut ctx = StepContext {
            slot: index,
            conn,
            registers: &mut slot.vm,
            console_rx: &mut slot.console_rx,
            console_tx: &mut slot.console_tx,
        };
        for _ in 0..self.config.interpreter_quantum {
            vm.step(&mut ctx);
        }
    }

    // ── GATT requests ─────────────────────────────────────────

    /// Serve an ATT read from `conn`.
    pub fn handle_read(
        &mut self,
        engine: &mut impl BleEngine,
        conn: ConnId,
        handle: u16,
        offset: usize,
        max_len: usize,
    ) -> core::result::Result<ValueBuf, AttError> {
        let index = self.request_slot(conn)?;
        let slot = self.slots.get_mut(index).ok_or(AttError::InvalidPdu)?;
        let mut handlers: [&mut dyn ServiceHandler; 3] =
            [&mut self.pad, &mut self.sysinfo, &mut self.console];
        let mut req = RequestContext { conn, slot, engine };
        self.registry
            .dispatch_read(&mut handlers, &mut req, handle, offset, max_len)
    }

    /// Serve an ATT write (with or without response) from `conn`.
    pub fn handle_write(
        &mut self,
        engine: &mut impl BleEngine,
        conn: ConnId,
        handle: u16,
        data: &[u8],
        offset: usize,
    ) -> core::result::Result<(), AttError> {
        let index = self.request_slot(conn)?;
        let live: Vec<ConnId, MAX_CONNECTIONS> =
            self.slots.iter().filter_map(ConnectionSlot::conn).collect();
        let slot = self.slots.get_mut(index).ok_or(AttError::InvalidPdu)?;
        let limit = slot.notify_limit();
        let outcome = {
            let mut handlers: [&mut dyn ServiceHandler; 3] =
                [&mut self.pad, &mut self.sysinfo, &mut self.console];
            let mut req = RequestContext {
                conn,
                slot,
                engine: &mut *engine,
            };
            self.registry
                .dispatch_write(&mut handlers, &mut req, &live, handle, data, offset)?
        };

        match outcome {
            WriteOutcome::Done => {}
            WriteOutcome::Truncated { dropped } => {
                self.stats.console_bytes_truncated = self
                    .stats
                    .console_bytes_truncated
                    .saturating_add(dropped as u32);
            }
            WriteOutcome::Notify { handle, payload } => {
                let result = self.registry.notify(engine, conn, limit, handle, &payload);
                tally(&mut self.stats, result);
            }
        }
        Ok(())
    }

    fn request_slot(&mut self, conn: ConnId) -> core::result::Result<usize, AttError> {
        match self.slots.find_by_connection(conn) {
            Some(index) => Ok(index),
            None => {
                debug!("GATT: request from conn {} without a slot", conn.0);
                self.violation(InvariantViolation::raise("request from unknown connection"));
                Err(AttError::InvalidPdu)
            }
        }
    }

    // ── Helpers ───────────────────────────────────────────────

    fn slot_mut_or_violation(&mut self, conn: ConnId) -> Option<&mut ConnectionSlot> {
        match self.slots.find_by_connection(conn) {
            Some(index) => self.slots.get_mut(index),
            None => {
                self.violation(InvariantViolation::raise("event for unknown connection"));
                None
            }
        }
    }

    fn take_rejected(&mut self, conn: ConnId) -> bool {
        match self.rejected.iter().position(|c| *c == conn) {
            Some(pos) => {
                self.rejected.remove(pos);
                true
            }
            None => false,
        }
    }

    fn violation(&mut self, v: InvariantViolation) {
        self.stats.record(&v.into());
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn slots(&self) -> &ConnectionSlotTable {
        &self.slots
    }

    /// Slot currently owned by `conn`.
    pub fn slot_for(&self, conn: ConnId) -> Option<&ConnectionSlot> {
        self.slots
            .find_by_connection(conn)
            .and_then(|index| self.slots.get(index))
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &AttributeServiceRegistry {
        &self.registry
    }

    pub fn main_task(&self) -> TaskId {
        self.main_task
    }

    pub fn pad_service(&self) -> &PadService {
        &self.pad
    }

    pub fn sysinfo_service(&self) -> &SysInfoService {
        &self.sysinfo
    }

    pub fn console_service(&self) -> &ConsoleService {
        &self.console
    }
}

/// Count one notification attempt.  Returns `true` if it was sent.
fn tally(stats: &mut LinkStats, result: Result<Delivery>) -> bool {
    match result {
        Ok(Delivery::Sent) => {
            bump(&mut stats.notifications_sent);
            true
        }
        Ok(Delivery::NotSubscribed) => false,
        Err(e) => {
            debug!("BLE: notification dropped: {}", e);
            stats.record(&e);
            false
        }
    }
}
