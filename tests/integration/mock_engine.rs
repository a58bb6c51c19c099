//! Mock BLE engine for integration tests.
//!
//! Records every request so tests can assert on the full call history
//! without a radio.  The clock is set by the test; notifications can be
//! made to fail to exercise the buffer-shortage path.

use periconsole::app::advertising::{ConnParamRequest, GapParameters};
use periconsole::app::identity::DeviceIdentity;
use periconsole::app::ports::{BleEngine, Interpreter, StepContext};
use periconsole::app::service::Peripheral;
use periconsole::config::PeripheralConfig;
use periconsole::error::EngineError;
use periconsole::events::{ConnId, EngineEvent, Phy};
use periconsole::gatt::AttributeTable;

// ── Engine call record ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    StartDevice { name: String },
    Advertising(bool),
    Terminate(ConnId),
    ParamRequest(ConnId, ConnParamRequest),
    UpdatePhy(ConnId, Phy),
    ReadRssi(ConnId),
    Notify { conn: ConnId, handle: u16, payload: Vec<u8> },
    RegisterTable { len: usize },
}

// ── MockEngine ────────────────────────────────────────────────

pub struct MockEngine {
    pub calls: Vec<EngineCall>,
    pub clock: u32,
    pub random_values: Vec<u32>,
    /// Refuse this many upcoming notifications with `NoResources`.
    pub notify_failures: usize,
}

#[allow(dead_code)]
impl MockEngine {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            clock: 0,
            random_values: Vec::new(),
            notify_failures: 0,
        }
    }

    pub fn advance(&mut self, ticks: u32) {
        self.clock = self.clock.wrapping_add(ticks);
    }

    pub fn notifications(&self) -> Vec<(ConnId, u16, Vec<u8>)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::Notify {
                    conn,
                    handle,
                    payload,
                } => Some((*conn, *handle, payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn notifications_on(&self, handle: u16) -> Vec<(ConnId, Vec<u8>)> {
        self.notifications()
            .into_iter()
            .filter(|(_, h, _)| *h == handle)
            .map(|(c, _, p)| (c, p))
            .collect()
    }

    pub fn terminated(&self) -> Vec<ConnId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::Terminate(conn) => Some(*conn),
                _ => None,
            })
            .collect()
    }

    pub fn advertising(&self) -> Option<bool> {
        self.calls.iter().rev().find_map(|c| match c {
            EngineCall::Advertising(on) => Some(*on),
            _ => None,
        })
    }

    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BleEngine for MockEngine {
    fn start_device(&mut self, params: &GapParameters) -> Result<(), EngineError> {
        self.calls.push(EngineCall::StartDevice {
            name: params.device_name.as_str().to_owned(),
        });
        Ok(())
    }

    fn set_advertising_enabled(&mut self, enabled: bool) {
        self.calls.push(EngineCall::Advertising(enabled));
    }

    fn terminate_connection(&mut self, conn: ConnId) {
        self.calls.push(EngineCall::Terminate(conn));
    }

    fn request_connection_parameters(
        &mut self,
        conn: ConnId,
        params: ConnParamRequest,
    ) -> Result<(), EngineError> {
        self.calls.push(EngineCall::ParamRequest(conn, params));
        Ok(())
    }

    fn update_phy(&mut self, conn: ConnId, phy: Phy) -> Result<(), EngineError> {
        self.calls.push(EngineCall::UpdatePhy(conn, phy));
        Ok(())
    }

    fn read_rssi(&mut self, conn: ConnId) -> Result<(), EngineError> {
        self.calls.push(EngineCall::ReadRssi(conn));
        Ok(())
    }

    fn send_notification(
        &mut self,
        conn: ConnId,
        handle: u16,
        payload: &[u8],
    ) -> Result<(), EngineError> {
        if self.notify_failures > 0 {
            self.notify_failures -= 1;
            return Err(EngineError::NoResources);
        }
        self.calls.push(EngineCall::Notify {
            conn,
            handle,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn register_attribute_table(&mut self, table: &AttributeTable) -> Result<(), EngineError> {
        self.calls.push(EngineCall::RegisterTable { len: table.len() });
        Ok(())
    }

    fn system_clock(&self) -> u32 {
        self.clock
    }

    fn random(&mut self) -> u32 {
        if self.random_values.is_empty() {
            0
        } else {
            self.random_values.remove(0)
        }
    }
}

// ── Interpreter that does nothing but count ───────────────────

#[derive(Default)]
pub struct CountingVm {
    pub steps: usize,
    pub slots_seen: Vec<usize>,
}

impl Interpreter for CountingVm {
    fn step(&mut self, ctx: &mut StepContext<'_>) {
        self.steps += 1;
        if self.slots_seen.last() != Some(&ctx.slot) {
            self.slots_seen.push(ctx.slot);
        }
    }
}

// ── Fixtures ──────────────────────────────────────────────────

pub fn identity() -> DeviceIdentity {
    DeviceIdentity::new(0x82, [1, 2, 3, 4, 5, 6, 7, 8])
}

#[allow(dead_code)]
pub fn make_peripheral(config: PeripheralConfig) -> (Peripheral, MockEngine, CountingVm) {
    let mut engine = MockEngine::new();
    let peri = Peripheral::new(config, identity(), &mut engine).expect("peripheral");
    engine.clear();
    (peri, engine, CountingVm::default())
}

/// Post `conn` and run it through admission.
#[allow(dead_code)]
pub fn connect(peri: &mut Peripheral, engine: &mut MockEngine, vm: &mut CountingVm, conn: ConnId) {
    peri.post(EngineEvent::Connected { conn }).expect("inbox");
    peri.run_until_idle(engine, vm);
}

#[allow(dead_code)]
pub fn post_and_run(
    peri: &mut Peripheral,
    engine: &mut MockEngine,
    vm: &mut CountingVm,
    event: EngineEvent,
) {
    peri.post(event).expect("inbox");
    peri.run_until_idle(engine, vm);
}
