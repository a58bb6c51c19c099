//! Connection slot table.
//!
//! One slot per admitted concurrent connection, allocated at startup and
//! never destroyed.  Each slot owns its console buffers, its pad buffer and
//! the interpreter registers, and is bound forever to one scheduler task.
//!
//! ```text
//!   Free ──acquire(conn)──▶ Connected ──release(conn)──▶ Free
//! ```

use heapless::Vec;
use log::info;

use crate::config::{CONSOLE_FIFO_SIZE, DEFAULT_ATT_MTU, MAX_CONNECTIONS, PAD_BUF_SIZE};
use crate::error::{Error, InvariantViolation, ResourceExhausted};
use crate::events::ConnId;
use crate::ring_buffer::RingBuffer;
use crate::scheduler::TaskId;

pub type ConsoleBuffer = RingBuffer<CONSOLE_FIFO_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Connected,
}

/// Register file of the slot's interpreter coroutine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmRegisters {
    /// Instruction pointer
    pub ip: u32,
    /// Word pointer
    pub wp: u32,
    /// Parameter stack pointer
    pub psp: u32,
    /// Parameter stack base
    pub psb: u32,
    /// Return stack pointer
    pub rsp: u32,
}

/// Per-connection state.
#[derive(Debug)]
pub struct ConnectionSlot {
    state: SlotState,
    conn: Option<ConnId>,
    task: TaskId,
    /// Periodic ticks delivered since connect.
    pub periodic_count: u32,
    /// Periodic tick interval; 0 keeps the periodic event unarmed.
    pub periodic_delay: u32,
    /// Negotiated ATT MTU.
    pub mtu: u16,
    /// Last negotiated connection interval (x1.25 ms).
    pub conn_interval: u16,
    pub rssi: Option<i8>,
    pub pad: Vec<u8, PAD_BUF_SIZE>,
    /// Peer → device console bytes.
    pub console_rx: ConsoleBuffer,
    /// Device → peer console bytes.
    pub console_tx: ConsoleBuffer,
    pub vm: VmRegisters,
}

impl ConnectionSlot {
    fn new(task: TaskId) -> Self {
        Self {
            state: SlotState::Free,
            conn: None,
            task,
            periodic_count: 0,
            periodic_delay: 0,
            mtu: DEFAULT_ATT_MTU,
            conn_interval: 0,
            rssi: None,
            pad: Vec::new(),
            console_rx: ConsoleBuffer::new(),
            console_tx: ConsoleBuffer::new(),
            vm: VmRegisters::default(),
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    pub fn conn(&self) -> Option<ConnId> {
        self.conn
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Largest notification payload this link can carry.
    pub fn notify_limit(&self) -> usize {
        usize::from(self.mtu.saturating_sub(crate::config::NOTIFY_HEADER_LEN))
    }

    pub fn reset_console(&mut self) {
        self.console_rx.clear();
        self.console_tx.clear();
    }
}

// ───────────────────────────────────────────────────────────────
// Slot table
// ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ConnectionSlotTable {
    slots: [ConnectionSlot; MAX_CONNECTIONS],
}

impl ConnectionSlotTable {
    /// Build the table, binding slot `i` to `tasks[i]` for its lifetime.
    pub fn new(tasks: [TaskId; MAX_CONNECTIONS]) -> Self {
        Self {
            slots: tasks.map(ConnectionSlot::new),
        }
    }

    /// Claim the first free slot for `conn`.  Returns its index.
    pub fn acquire(&mut self, conn: ConnId) -> Result<usize, Error> {
        if self.find_by_connection(conn).is_some() {
            return Err(InvariantViolation::raise("connection already owns a slot").into());
        }
        let index = self
            .slots
            .iter()
            .position(ConnectionSlot::is_free)
            .ok_or(ResourceExhausted::NoFreeSlot)?;
        let slot = &mut self.slots[index];
        slot.state = SlotState::Connected;
        slot.conn = Some(conn);
        slot.mtu = DEFAULT_ATT_MTU;
        slot.periodic_count = 0;
        slot.periodic_delay = 0;
        slot.conn_interval = 0;
        slot.rssi = None;
        info!(
            "BLE: conn {} -> slot {} (used {}, free {})",
            conn.0,
            index,
            self.count_used(),
            self.count_free()
        );
        Ok(index)
    }

    /// Return `conn`'s slot to the free pool.  Returns its index.
    #[track_caller]
    pub fn release(&mut self, conn: ConnId) -> Result<usize, InvariantViolation> {
        let index = self
            .find_by_connection(conn)
            .ok_or_else(|| InvariantViolation::raise("release of unknown connection"))?;
        let slot = &mut self.slots[index];
        slot.state = SlotState::Free;
        slot.conn = None;
        slot.periodic_delay = 0;
        info!(
            "BLE: slot {} released (used {}, free {})",
            index,
            self.count_used(),
            self.count_free()
        );
        Ok(index)
    }

    pub fn count_used(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn count_free(&self) -> usize {
        MAX_CONNECTIONS - self.count_used()
    }

    pub fn find_by_connection(&self, conn: ConnId) -> Option<usize> {
        self.slots.iter().position(|s| s.conn == Some(conn))
    }

    pub fn find_by_task(&self, task: TaskId) -> Option<usize> {
        self.slots.iter().position(|s| s.task == task)
    }

    pub fn get(&self, index: usize) -> Option<&ConnectionSlot> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ConnectionSlot> {
        self.slots.get_mut(index)
    }

    pub fn by_connection_mut(&mut self, conn: ConnId) -> Option<&mut ConnectionSlot> {
        self.slots.iter_mut().find(|s| s.conn == Some(conn))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionSlot> {
        self.slots.iter()
    }
}
