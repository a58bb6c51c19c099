//! Fuzz target: GATT read/write dispatch
//!
//! Replays arbitrary attribute requests from arbitrary connections
//! against a fully registered peripheral and asserts that every request
//! resolves to a value or an ATT status, never a panic, and that read
//! responses respect the requested length.
//!
//! cargo fuzz run fuzz_gatt_dispatch

#![no_main]

use libfuzzer_sys::fuzz_target;
use periconsole::adapters::echo::EchoInterpreter;
use periconsole::adapters::sim::SimEngine;
use periconsole::app::identity::DeviceIdentity;
use periconsole::app::service::Peripheral;
use periconsole::config::PeripheralConfig;
use periconsole::events::{ConnId, EngineEvent};

fuzz_target!(|data: &[u8]| {
    let mut engine = SimEngine::new(1);
    let mut vm = EchoInterpreter::new();
    let identity = DeviceIdentity::new(0x82, [0; 8]);
    let Ok(mut peri) = Peripheral::new(PeripheralConfig::default(), identity, &mut engine) else {
        return;
    };
    for conn in [ConnId(1), ConnId(2)] {
        let _ = peri.post(EngineEvent::Connected { conn });
    }
    peri.run_until_idle(&mut engine, &mut vm);

    // [conn, handle, offset, len, payload...] records
    let mut input = data;
    while let [conn, handle, offset, len, rest @ ..] = input {
        let conn = ConnId(u16::from(conn % 3));
        let handle = u16::from(*handle);
        let offset = usize::from(*offset);
        let len = usize::from(*len);
        if len & 1 == 0 {
            let max_len = len / 2;
            if let Ok(value) = peri.handle_read(&mut engine, conn, handle, offset, max_len) {
                assert!(value.len() <= max_len);
            }
            input = rest;
        } else {
            let payload = &rest[..(len / 2).min(rest.len())];
            let _ = peri.handle_write(&mut engine, conn, handle, payload, offset % 2);
            input = &rest[payload.len()..];
        }
        engine.tick(7);
        peri.run_until_idle(&mut engine, &mut vm);
        let _ = engine.take_events();
        let _ = engine.take_notifications();
    }

    assert!(peri.slots().count_used() <= 2);
});
