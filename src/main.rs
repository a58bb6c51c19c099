//! PeriConsole host simulation: main entry point.
//!
//! Runs the peripheral core against the simulated engine and the echo
//! interpreter, scripting a short session: two centrals connect, enable
//! notifications, type into the console and read the echo back, then one
//! disconnects.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SimEngine        EchoInterpreter     ConsoleLog   device_id   │
//! │  (BleEngine)      (Interpreter)       (log::Log)               │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Peripheral (pure logic)                   │    │
//! │  │  Slots · Scheduler · Attribute registry · Services     │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `periconsole-sim [config.json]`
#![deny(unused_must_use)]

use std::{env, fs};

use anyhow::{Context, Result};
use log::{info, warn};

use periconsole::adapters::console_log;
use periconsole::adapters::device_id;
use periconsole::adapters::echo::EchoInterpreter;
use periconsole::adapters::sim::SimEngine;
use periconsole::app::service::Peripheral;
use periconsole::config::PeripheralConfig;
use periconsole::error::Error;
use periconsole::events::{ConnId, EngineEvent};
use periconsole::gatt::registry::CCC_NOTIFY;

/// Simulated time advanced per round (625 us ticks).
const ROUND_TICKS: u32 = 100;
const ROUNDS: usize = 80;

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. Configuration + logging ────────────────────────────
    let config = match env::args().nth(1) {
        Some(path) => {
            let text = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            PeripheralConfig::from_json(&text).map_err(Error::from)?
        }
        None => PeripheralConfig::default(),
    };
    console_log::init(config.log_level.to_filter()).context("installing logger")?;

    info!("╔══════════════════════════════════════╗");
    info!("║  PeriConsole sim v{}              ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Bring-up ───────────────────────────────────────────
    let identity = device_id::read_identity();
    let mut engine = SimEngine::default();
    let mut vm = EchoInterpreter::new();
    let mut peri = Peripheral::new(config, identity, &mut engine)?;
    peri.start();
    pump(&mut peri, &mut engine, &mut vm);

    // ── 3. Two centrals connect ───────────────────────────────
    let centrals = [ConnId(0x40), ConnId(0x41)];
    for conn in centrals {
        peri.post(EngineEvent::Connected { conn })
            .map_err(Error::from)?;
        peri.post(EngineEvent::MtuExchanged { conn, mtu: 64 })
            .map_err(Error::from)?;
    }
    pump(&mut peri, &mut engine, &mut vm);

    // ── 4. Subscribe and type into the console ────────────────
    let rnw = peri
        .console_service()
        .rnw_handle()
        .context("console service not registered")?;
    let clock = peri
        .sysinfo_service()
        .clock_handle()
        .context("sysinfo service not registered")?;
    let enable = CCC_NOTIFY.to_le_bytes();
    for conn in centrals {
        let ccc = peri
            .registry()
            .client_config_handle(rnw)
            .context("console has no client config")?;
        peri.handle_write(&mut engine, conn, ccc, &enable, 0)
            .map_err(Error::from)?;
    }
    let clock_ccc = peri
        .registry()
        .client_config_handle(clock)
        .context("sysclock has no client config")?;
    peri.handle_write(&mut engine, centrals[0], clock_ccc, &enable, 0)
        .map_err(Error::from)?;

    peri.handle_write(&mut engine, centrals[0], rnw, b"hello from A\r\n", 0)
        .map_err(Error::from)?;
    peri.handle_write(&mut engine, centrals[1], rnw, b"ping\r\n", 0)
        .map_err(Error::from)?;

    // ── 5. Run the dispatch loop ──────────────────────────────
    for _ in 0..ROUNDS {
        engine.tick(ROUND_TICKS);
        pump(&mut peri, &mut engine, &mut vm);
        for sent in engine.take_notifications() {
            if sent.handle == rnw {
                info!(
                    "conn {:#04x} console <- {:?}",
                    sent.conn.0,
                    String::from_utf8_lossy(&sent.payload)
                );
            }
        }
    }

    // ── 6. One central leaves ─────────────────────────────────
    peri.post(EngineEvent::Terminated {
        conn: centrals[0],
        reason: 0x13,
    })
    .map_err(Error::from)?;
    pump(&mut peri, &mut engine, &mut vm);
    info!(
        "slots used {} free {}, advertising {}",
        peri.slots().count_used(),
        peri.slots().count_free(),
        engine.is_advertising()
    );

    let stats = serde_json::to_string(peri.stats()).context("encoding stats")?;
    println!("{stats}");
    info!("interpreter steps: {}", vm.steps());
    Ok(())
}

/// Feed engine answers back and dispatch until nothing is ready.
fn pump(peri: &mut Peripheral, engine: &mut SimEngine, vm: &mut EchoInterpreter) {
    loop {
        let events = engine.take_events();
        let fed = events.len();
        for event in events {
            if peri.post(event).is_err() {
                warn!("sim: engine event dropped");
            }
        }
        let dispatched = peri.run_until_idle(engine, vm);
        if fed == 0 && dispatched == 0 {
            break;
        }
    }
}
