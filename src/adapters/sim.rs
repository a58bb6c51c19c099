//! Simulated BLE engine for host runs.
//!
//! Implements [`BleEngine`] without a radio.  Requests that a real
//! controller would answer asynchronously (parameter update, PHY update,
//! RSSI read, termination) queue the matching [`EngineEvent`] so the
//! caller can feed it back through `Peripheral::post`.
//!
//! ```text
//!  Peripheral ──request──▶ SimEngine ──take_events()──▶ Peripheral::post
//! ```

use log::{debug, info};

use crate::app::advertising::{ConnParamRequest, GapParameters};
use crate::app::ports::BleEngine;
use crate::error::EngineError;
use crate::events::{ConnId, EngineEvent, Phy};
use crate::gatt::AttributeTable;

/// HCI reason: remote user terminated connection.
const REASON_REMOTE_USER: u8 = 0x13;

/// One notification handed to the simulated controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub conn: ConnId,
    pub handle: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct SimEngine {
    clock: u32,
    rng: u32,
    advertising: bool,
    tables: usize,
    rssi: i8,
    /// Refuse this many upcoming notifications with `NoResources`.
    notify_failures: usize,
    events: Vec<EngineEvent>,
    sent: Vec<SentNotification>,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new(0x1234_5678)
    }
}

impl SimEngine {
    pub fn new(seed: u32) -> Self {
        Self {
            clock: 0,
            rng: seed.max(1),
            advertising: false,
            tables: 0,
            rssi: -60,
            notify_failures: 0,
            events: Vec::new(),
            sent: Vec::new(),
        }
    }

    /// Advance the controller clock by `ticks` (625 us each).
    pub fn tick(&mut self, ticks: u32) {
        self.clock = self.clock.wrapping_add(ticks);
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn table_count(&self) -> usize {
        self.tables
    }

    pub fn fail_next_notifications(&mut self, count: usize) {
        self.notify_failures = count;
    }

    /// Events produced since the last call.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Notifications sent since the last call.
    pub fn take_notifications(&mut self) -> Vec<SentNotification> {
        std::mem::take(&mut self.sent)
    }
}

impl BleEngine for SimEngine {
    fn start_device(&mut self, params: &GapParameters) -> Result<(), EngineError> {
        info!(
            "BLE: sim device {} adv {}..{}",
            params.device_name, params.adv_interval_min, params.adv_interval_max
        );
        Ok(())
    }

    fn set_advertising_enabled(&mut self, enabled: bool) {
        self.advertising = enabled;
    }

    fn terminate_connection(&mut self, conn: ConnId) {
        self.events.push(EngineEvent::Terminated {
            conn,
            reason: REASON_REMOTE_USER,
        });
    }

    fn request_connection_parameters(
        &mut self,
        conn: ConnId,
        params: ConnParamRequest,
    ) -> Result<(), EngineError> {
        // The simulated central grants the slowest interval asked for.
        self.events.push(EngineEvent::ParamsUpdated {
            conn,
            interval: params.interval_max,
            latency: params.latency,
            timeout: params.timeout,
        });
        Ok(())
    }

    fn update_phy(&mut self, conn: ConnId, phy: Phy) -> Result<(), EngineError> {
        self.events.push(EngineEvent::PhyUpdated {
            conn,
            rx: phy,
            tx: phy,
        });
        Ok(())
    }

    fn read_rssi(&mut self, conn: ConnId) -> Result<(), EngineError> {
        self.events.push(EngineEvent::RssiRead {
            conn,
            rssi: self.rssi,
        });
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
        debug!("BLE: sim notify conn {} handle {} {:02X?}", conn.0, handle, payload);
        self.sent.push(SentNotification {
            conn,
            handle,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn register_attribute_table(&mut self, _table: &AttributeTable) -> Result<(), EngineError> {
        self.tables += 1;
        Ok(())
    }

    fn system_clock(&self) -> u32 {
        self.clock
    }

    fn random(&mut self) -> u32 {
        // xorshift32
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }
}
