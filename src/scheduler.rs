//! Cooperative per-task event scheduler.
//!
//! Every connection slot owns one task id, plus one task for the
//! peripheral itself.  A task has one one-shot timer per [`TaskEvent`]
//! category and a small priority work queue of events that are due.
//! The dispatch loop pops exactly one event per iteration.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       EventScheduler                         │
//! │                                                              │
//! │  arm(task, ev, delay) ──▶ ┌──────────────┐                   │
//! │                           │ timers[task] │  advance_to(clock)│
//! │  disarm(task, ev) ──────▶ │  deadline/ev │ ─────────┐        │
//! │                           └──────────────┘          │        │
//! │                                                     ▼        │
//! │  set_event(task, ev) ───────────────────▶ ┌──────────────┐   │
//! │                                           │ ready[task]  │   │
//! │                                           │ (priority)   │   │
//! │                                           └──────┬───────┘   │
//! │                                                  │           │
//! │                      pop_ready() ◀── round-robin over tasks  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timers fire at or after their deadline, never early.  Re-arming a
//! pending timer replaces its deadline.  A due event is never dropped;
//! the same category becoming due twice before delivery is delivered once.

use heapless::Vec;
use log::{debug, warn};

use crate::config::MAX_CONNECTIONS;

// ═══════════════════════════════════════════════════════════════
//  Task and event identifiers
// ═══════════════════════════════════════════════════════════════

/// One task per connection slot plus the peripheral's own task.
pub const MAX_TASKS: usize = MAX_CONNECTIONS + 1;

const EVENT_KINDS: usize = 7;

/// Stable scheduler task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u8);

impl TaskId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Event categories, declared in delivery priority order (first = highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskEvent {
    /// An engine message is waiting in the inbox.
    SystemMessage = 0,
    /// Bring up the GAP role and start advertising.
    StartDevice = 1,
    /// Ask the central for our preferred connection parameters.
    ParamUpdate = 2,
    /// Ask for the 2M PHY.
    PhyUpdate = 3,
    /// Poll link RSSI.
    RssiPoll = 4,
    /// Periodic notification tick.
    Periodic = 5,
    /// Resume the slot's interpreter for one quantum.
    Interpreter = 6,
}

impl TaskEvent {
    const fn index(self) -> usize {
        self as usize
    }
}

// ═══════════════════════════════════════════════════════════════
//  Per-task state
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct TaskQueue {
    /// Absolute deadline per event category, `None` when disarmed.
    deadlines: [Option<u64>; EVENT_KINDS],
    /// Due events, kept sorted by priority, no duplicates.
    ready: Vec<TaskEvent, EVENT_KINDS>,
}

impl TaskQueue {
    fn make_ready(&mut self, event: TaskEvent) {
        match self.ready.binary_search(&event) {
            Ok(_) => {}
            Err(pos) => {
                // At most one entry per category, so this cannot overflow.
                if self.ready.insert(pos, event).is_err() {
                    warn!("Scheduler: ready queue overflow dropping {:?}", event);
                }
            }
        }
    }

    fn remove_ready(&mut self, event: TaskEvent) {
        if let Ok(pos) = self.ready.binary_search(&event) {
            self.ready.remove(pos);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// The scheduler engine.
///
/// Knows nothing about connections; callers map task ids to slots.
#[derive(Debug, Default)]
pub struct EventScheduler {
    tasks: Vec<TaskQueue, MAX_TASKS>,
    /// Monotonic tick count, extended from the engine's wrapping u32 clock.
    now: u64,
    last_clock: Option<u32>,
    /// Next task to inspect in `pop_ready`.
    cursor: usize,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next task id.  `None` once [`MAX_TASKS`] are registered.
    pub fn register_task(&mut self) -> Option<TaskId> {
        let id = self.tasks.len();
        self.tasks.push(TaskQueue::default()).ok()?;
        debug!("Scheduler: registered task {}", id);
        Some(TaskId(id as u8))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Current scheduler time in ticks.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Start (or restart) a one-shot timer `delay` ticks from now.
    pub fn arm(&mut self, task: TaskId, event: TaskEvent, delay: u32) {
        let now = self.now;
        if let Some(q) = self.task_mut(task) {
            q.deadlines[event.index()] = Some(now + u64::from(delay));
        }
    }

    /// Make `event` due immediately.
    pub fn set_event(&mut self, task: TaskId, event: TaskEvent) {
        if let Some(q) = self.task_mut(task) {
            q.make_ready(event);
        }
    }

    /// Cancel a pending timer and any undelivered occurrence of `event`.
    pub fn disarm(&mut self, task: TaskId, event: TaskEvent) {
        if let Some(q) = self.task_mut(task) {
            q.deadlines[event.index()] = None;
            q.remove_ready(event);
        }
    }

    /// Cancel everything pending for `task`.
    pub fn disarm_all(&mut self, task: TaskId) {
        if let Some(q) = self.task_mut(task) {
            q.deadlines = [None; EVENT_KINDS];
            q.ready.clear();
        }
    }

    pub fn is_armed(&self, task: TaskId, event: TaskEvent) -> bool {
        self.tasks
            .get(task.index())
            .is_some_and(|q| q.deadlines[event.index()].is_some())
    }

    pub fn is_ready(&self, task: TaskId, event: TaskEvent) -> bool {
        self.tasks
            .get(task.index())
            .is_some_and(|q| q.ready.contains(&event))
    }

    /// Absolute deadline of a pending timer.
    pub fn deadline(&self, task: TaskId, event: TaskEvent) -> Option<u64> {
        self.tasks
            .get(task.index())
            .and_then(|q| q.deadlines[event.index()])
    }

    /// Earliest pending deadline across all tasks.
    pub fn next_deadline(&self) -> Option<u64> {
        self.tasks
            .iter()
            .flat_map(|q| q.deadlines.iter().flatten())
            .copied()
            .min()
    }

    pub fn has_ready(&self) -> bool {
        self.tasks.iter().any(|q| !q.ready.is_empty())
    }

    /// Synchronise with the engine's system clock (wrapping u32 ticks)
    /// and promote expired timers.
    pub fn advance_to(&mut self, clock: u32) {
        let delta = match self.last_clock {
            Some(last) => u64::from(clock.wrapping_sub(last)),
            None => 0,
        };
        self.last_clock = Some(clock);
        self.advance_by(delta);
    }

    /// Move time forward by `ticks` and promote expired timers.
    pub fn advance_by(&mut self, ticks: u64) {
        self.now += ticks;
        let now = self.now;
        for q in &mut self.tasks {
            for (kind, deadline) in TASK_EVENTS.iter().zip(q.deadlines) {
                if deadline.is_some_and(|d| d <= now) {
                    q.deadlines[kind.index()] = None;
                    q.make_ready(*kind);
                }
            }
        }
    }

    /// Take the single highest-priority due event of the next task with
    /// work, serving tasks round-robin.
    pub fn pop_ready(&mut self) -> Option<(TaskId, TaskEvent)> {
        let count = self.tasks.len();
        for step in 0..count {
            let idx = (self.cursor + step) % count;
            let q = &mut self.tasks[idx];
            if q.ready.is_empty() {
                continue;
            }
            let event = q.ready.remove(0);
            self.cursor = (idx + 1) % count;
            return Some((TaskId(idx as u8), event));
        }
        None
    }

    fn task_mut(&mut self, task: TaskId) -> Option<&mut TaskQueue> {
        let q = self.tasks.get_mut(task.index());
        if q.is_none() {
            warn!("Scheduler: unknown task {}", task.index());
        }
        q
    }
}

const TASK_EVENTS: [TaskEvent; EVENT_KINDS] = [
    TaskEvent::SystemMessage,
    TaskEvent::StartDevice,
    TaskEvent::ParamUpdate,
    TaskEvent::PhyUpdate,
    TaskEvent::RssiPoll,
    TaskEvent::Periodic,
    TaskEvent::Interpreter,
];
