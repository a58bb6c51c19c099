//! Console tunnel: inbound truncation, Ctl status, destructive reads and
//! the periodic notification drain.

use crate::mock_engine::{CountingVm, MockEngine, connect, make_peripheral, post_and_run};

use periconsole::adapters::echo::EchoInterpreter;
use periconsole::app::service::Peripheral;
use periconsole::config::PeripheralConfig;
use periconsole::error::AttError;
use periconsole::events::{ConnId, EngineEvent};
use periconsole::gatt::console::CONSOLE_CTL;
use periconsole::gatt::registry::CCC_NOTIFY;

const CONN: ConnId = ConnId(1);

struct Fixture {
    peri: Peripheral,
    engine: MockEngine,
    vm: CountingVm,
    rnw: u16,
    rnw_ccc: u16,
    ctl: u16,
}

fn fixture(config: PeripheralConfig) -> Fixture {
    let (mut peri, mut engine, mut vm) = make_peripheral(config);
    connect(&mut peri, &mut engine, &mut vm, CONN);
    let rnw = peri.console_service().rnw_handle().unwrap();
    let rnw_ccc = peri.registry().client_config_handle(rnw).unwrap();
    let ctl = peri.registry().handle_of(CONSOLE_CTL).unwrap();
    Fixture {
        peri,
        engine,
        vm,
        rnw,
        rnw_ccc,
        ctl,
    }
}

impl Fixture {
    fn write(&mut self, handle: u16, data: &[u8]) -> Result<(), AttError> {
        self.peri
            .handle_write(&mut self.engine, CONN, handle, data, 0)
    }

    fn ctl(&mut self) -> Vec<u8> {
        self.peri
            .handle_read(&mut self.engine, CONN, self.ctl, 0, 22)
            .unwrap()
            .to_vec()
    }

    fn subscribe(&mut self, on: bool) {
        let value = if on { CCC_NOTIFY } else { 0 };
        self.write(self.rnw_ccc, &value.to_le_bytes()).unwrap();
    }

    /// Run with the echo interpreter so RX is copied to TX.
    fn run_echo(&mut self, ticks: u32, echo: &mut EchoInterpreter) {
        self.engine.advance(ticks);
        self.peri.run_until_idle(&mut self.engine, echo);
    }

    fn set_interval(&mut self, interval: u16) {
        post_and_run(
            &mut self.peri,
            &mut self.engine,
            &mut self.vm,
            EngineEvent::ParamsUpdated {
                conn: CONN,
                interval,
                latency: 0,
                timeout: 100,
            },
        );
    }

    fn console_notifications(&self) -> Vec<Vec<u8>> {
        self.engine
            .notifications_on(self.rnw)
            .into_iter()
            .map(|(_, p)| p)
            .collect()
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

// ── Inbound ──────────────────────────────────────────────────

#[test]
fn inbound_write_truncates_at_capacity() {
    let mut f = fixture(PeripheralConfig::default());
    f.write(f.rnw, &pattern(50)).unwrap();
    assert_eq!(f.ctl(), [46, 96]);

    f.write(f.rnw, &pattern(60)).unwrap();
    let slot = f.peri.slot_for(CONN).unwrap();
    assert_eq!(slot.console_rx.used(), 96);
    assert_eq!(slot.console_rx.free(), 0);
    assert_eq!(f.peri.stats().console_bytes_truncated, 14);
}

#[test]
fn ctl_reports_full_rx_and_empty_tx() {
    let mut f = fixture(PeripheralConfig::default());
    f.write(f.rnw, &pattern(96)).unwrap();
    assert_eq!(f.ctl(), [0, 96]);
}

#[test]
fn ctl_is_read_only_and_whole() {
    let mut f = fixture(PeripheralConfig::default());
    assert_eq!(f.write(f.ctl, &[1, 2]), Err(AttError::WriteNotPermitted));
    assert_eq!(
        f.peri.handle_read(&mut f.engine, CONN, f.ctl, 1, 22),
        Err(AttError::AttributeNotLong)
    );
}

// ── Outbound ─────────────────────────────────────────────────

#[test]
fn rnw_read_pops_destructively() {
    let mut f = fixture(PeripheralConfig::default());
    let mut echo = EchoInterpreter::new();
    let data = pattern(30);
    f.write(f.rnw, &data).unwrap();
    f.run_echo(2, &mut echo);
    assert_eq!(f.peri.slot_for(CONN).unwrap().console_tx.used(), 30);

    let first = f.peri.handle_read(&mut f.engine, CONN, f.rnw, 0, 22).unwrap();
    assert_eq!(first.as_slice(), &data[..22]);
    let rest = f.peri.handle_read(&mut f.engine, CONN, f.rnw, 0, 22).unwrap();
    assert_eq!(rest.as_slice(), &data[22..]);
    let empty = f.peri.handle_read(&mut f.engine, CONN, f.rnw, 0, 22).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn rnw_read_with_offset_is_rejected() {
    let mut f = fixture(PeripheralConfig::default());
    assert_eq!(
        f.peri.handle_read(&mut f.engine, CONN, f.rnw, 3, 22),
        Err(AttError::AttributeNotLong)
    );
}

#[test]
fn periodic_drain_is_bounded_by_mtu() {
    let mut f = fixture(PeripheralConfig::default());
    let mut echo = EchoInterpreter::new();
    f.subscribe(true);
    let data = pattern(30);
    f.write(f.rnw, &data).unwrap();
    f.run_echo(2, &mut echo);
    f.set_interval(40);

    f.run_echo(60, &mut echo);
    f.run_echo(60, &mut echo);
    let sent = f.console_notifications();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].len(), 20);
    assert_eq!(sent.concat(), data);
    assert!(f.peri.slot_for(CONN).unwrap().console_tx.is_empty());
    assert_eq!(f.peri.stats().notifications_sent, 2);
}

#[test]
fn larger_mtu_drains_in_one_notification() {
    let mut f = fixture(PeripheralConfig::default());
    let mut echo = EchoInterpreter::new();
    post_and_run(
        &mut f.peri,
        &mut f.engine,
        &mut f.vm,
        EngineEvent::MtuExchanged { conn: CONN, mtu: 100 },
    );
    f.subscribe(true);
    f.write(f.rnw, &pattern(80)).unwrap();
    f.run_echo(2, &mut echo);
    f.set_interval(40);
    f.run_echo(60, &mut echo);
    let sent = f.console_notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), 80);
}

#[test]
fn no_drain_without_subscription() {
    let mut f = fixture(PeripheralConfig::default());
    let mut echo = EchoInterpreter::new();
    f.write(f.rnw, &pattern(10)).unwrap();
    f.run_echo(2, &mut echo);
    f.set_interval(40);
    f.run_echo(60, &mut echo);
    assert!(f.console_notifications().is_empty());
    assert_eq!(f.peri.slot_for(CONN).unwrap().console_tx.used(), 10);
    assert_eq!(f.peri.slot_for(CONN).unwrap().periodic_count, 1);
}

#[test]
fn unsubscribe_stops_drain_and_keeps_bytes() {
    let mut f = fixture(PeripheralConfig::default());
    let mut echo = EchoInterpreter::new();
    f.subscribe(true);
    f.write(f.rnw, &pattern(30)).unwrap();
    f.run_echo(2, &mut echo);
    f.set_interval(40);
    f.run_echo(60, &mut echo);
    assert_eq!(f.console_notifications().len(), 1);

    f.subscribe(false);
    f.run_echo(60, &mut echo);
    f.run_echo(60, &mut echo);
    assert_eq!(f.console_notifications().len(), 1);
    assert_eq!(f.peri.slot_for(CONN).unwrap().console_tx.used(), 10);
}

#[test]
fn engine_buffer_shortage_keeps_bytes_for_next_tick() {
    let mut f = fixture(PeripheralConfig::default());
    let mut echo = EchoInterpreter::new();
    f.subscribe(true);
    let data = pattern(12);
    f.write(f.rnw, &data).unwrap();
    f.run_echo(2, &mut echo);
    f.set_interval(40);

    f.engine.notify_failures = 1;
    f.run_echo(60, &mut echo);
    assert!(f.console_notifications().is_empty());
    assert_eq!(f.peri.stats().notifications_dropped, 1);
    assert_eq!(f.peri.slot_for(CONN).unwrap().console_tx.used(), 12);

    f.run_echo(60, &mut echo);
    assert_eq!(f.console_notifications(), [data]);
}

// ── Release ──────────────────────────────────────────────────

fn reconnect(f: &mut Fixture) {
    post_and_run(
        &mut f.peri,
        &mut f.engine,
        &mut f.vm,
        EngineEvent::Terminated {
            conn: CONN,
            reason: 0x13,
        },
    );
    connect(&mut f.peri, &mut f.engine, &mut f.vm, CONN);
}

#[test]
fn console_survives_release_by_default() {
    let mut f = fixture(PeripheralConfig::default());
    f.write(f.rnw, &pattern(5)).unwrap();
    reconnect(&mut f);
    assert_eq!(f.peri.slot_for(CONN).unwrap().console_rx.used(), 5);
}

#[test]
fn console_reset_on_release_when_configured() {
    let mut f = fixture(PeripheralConfig {
        reset_console_on_release: true,
        ..PeripheralConfig::default()
    });
    f.write(f.rnw, &pattern(5)).unwrap();
    reconnect(&mut f);
    assert!(f.peri.slot_for(CONN).unwrap().console_rx.is_empty());
}
