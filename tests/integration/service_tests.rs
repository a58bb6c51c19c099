//! Attribute access contract, Pad and SysInfo services, and per-connection
//! notification state.

use crate::mock_engine::{
    CountingVm, EngineCall, MockEngine, connect, make_peripheral, post_and_run,
};

use periconsole::app::service::Peripheral;
use periconsole::config::PeripheralConfig;
use periconsole::error::AttError;
use periconsole::events::{ConnId, EngineEvent};
use periconsole::gatt::pad::{PAD_RAND, PAD_READ, PAD_SUM, PAD_WRITE, PAD_WRITE_NO_RSP};
use periconsole::gatt::registry::CCC_NOTIFY;
use periconsole::gatt::sysinfo::{CHIP_NAME, CHIP_UID, SYS_CLOCK};
use periconsole::gatt::{Uuid16, ValueBuf};

const A: ConnId = ConnId(1);
const B: ConnId = ConnId(2);

fn setup(config: PeripheralConfig) -> (Peripheral, MockEngine, CountingVm) {
    let (mut peri, mut engine, mut vm) = make_peripheral(config);
    connect(&mut peri, &mut engine, &mut vm, A);
    connect(&mut peri, &mut engine, &mut vm, B);
    engine.clear();
    (peri, engine, vm)
}

fn handle(peri: &Peripheral, uuid: Uuid16) -> u16 {
    peri.registry().handle_of(uuid).unwrap()
}

fn read(
    peri: &mut Peripheral,
    engine: &mut MockEngine,
    conn: ConnId,
    handle: u16,
    offset: usize,
) -> Result<ValueBuf, AttError> {
    peri.handle_read(engine, conn, handle, offset, 22)
}

fn enable(peri: &mut Peripheral, engine: &mut MockEngine, conn: ConnId, value_handle: u16) {
    let ccc = peri.registry().client_config_handle(value_handle).unwrap();
    peri.handle_write(engine, conn, ccc, &CCC_NOTIFY.to_le_bytes(), 0)
        .unwrap();
}

// ── Pad ──────────────────────────────────────────────────────

#[test]
fn pad_sum_of_written_bytes() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE);
    let sum = handle(&peri, PAD_SUM);
    peri.handle_write(&mut engine, A, write, &[1, 2, 3], 0).unwrap();
    assert_eq!(read(&mut peri, &mut engine, A, sum, 0).unwrap().as_slice(), &[6]);
}

#[test]
fn pad_sum_wraps() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE_NO_RSP);
    let sum = handle(&peri, PAD_SUM);
    peri.handle_write(&mut engine, A, write, &[200, 100], 0).unwrap();
    assert_eq!(read(&mut peri, &mut engine, A, sum, 0).unwrap().as_slice(), &[44]);
}

#[test]
fn pad_read_honours_offset() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE);
    let pad = handle(&peri, PAD_READ);
    peri.handle_write(&mut engine, A, write, &[1, 2, 3], 0).unwrap();
    assert_eq!(
        read(&mut peri, &mut engine, A, pad, 1).unwrap().as_slice(),
        &[2, 3]
    );
    assert_eq!(
        read(&mut peri, &mut engine, A, pad, 3),
        Err(AttError::InvalidOffset)
    );
}

#[test]
fn empty_value_reads_empty_at_any_offset() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let pad = handle(&peri, PAD_READ);
    assert!(read(&mut peri, &mut engine, A, pad, 0).unwrap().is_empty());
    assert!(read(&mut peri, &mut engine, A, pad, 5).unwrap().is_empty());
}

#[test]
fn pad_is_per_connection() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE);
    let pad = handle(&peri, PAD_READ);
    peri.handle_write(&mut engine, A, write, &[9, 9], 0).unwrap();
    assert!(read(&mut peri, &mut engine, B, pad, 0).unwrap().is_empty());
}

#[test]
fn oversized_pad_write_rejected() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE);
    assert_eq!(
        peri.handle_write(&mut engine, A, write, &[0; 97], 0),
        Err(AttError::InvalidValue)
    );
    assert!(peri.handle_write(&mut engine, A, write, &[0; 96], 0).is_ok());
}

#[test]
fn pad_rand_refills_and_reports_length() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let rand = handle(&peri, PAD_RAND);
    let pad = handle(&peri, PAD_READ);
    // length 106 % 96 = 10, then ten fill bytes
    engine.random_values = vec![106, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0x10A];
    assert_eq!(
        read(&mut peri, &mut engine, A, rand, 0).unwrap().as_slice(),
        &[10, 0]
    );
    assert_eq!(
        read(&mut peri, &mut engine, A, pad, 0).unwrap().as_slice(),
        &[1, 2, 3, 4, 5, 6, 7, 8, 9, 0x0A]
    );
    assert_eq!(
        read(&mut peri, &mut engine, A, rand, 1),
        Err(AttError::AttributeNotLong)
    );
}

#[test]
fn pad_write_notifies_subscribed_writer() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE);
    let notify = peri.pad_service().notify_handle().unwrap();

    peri.handle_write(&mut engine, A, write, &[1, 2, 3], 0).unwrap();
    assert!(engine.notifications().is_empty());

    enable(&mut peri, &mut engine, A, notify);
    peri.handle_write(&mut engine, A, write, &[4, 5], 0).unwrap();
    peri.handle_write(&mut engine, B, write, &[6], 0).unwrap();
    assert_eq!(engine.notifications(), [(A, notify, vec![4, 5])]);
}

#[test]
fn oversized_notification_dropped_but_write_applies() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE);
    let pad = handle(&peri, PAD_READ);
    let notify = peri.pad_service().notify_handle().unwrap();
    enable(&mut peri, &mut engine, A, notify);

    // Default MTU 23 carries at most 20 bytes.
    peri.handle_write(&mut engine, A, write, &[7; 21], 0).unwrap();
    assert!(engine.notifications().is_empty());
    assert_eq!(peri.stats().notifications_dropped, 1);
    assert_eq!(read(&mut peri, &mut engine, A, pad, 0).unwrap().len(), 21);

    peri.handle_write(&mut engine, A, write, &[7; 20], 0).unwrap();
    assert_eq!(engine.notifications().len(), 1);
}

// ── Generic access contract ──────────────────────────────────

#[test]
fn permissions_are_enforced() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE);
    let pad = handle(&peri, PAD_READ);
    let name = handle(&peri, CHIP_NAME);
    assert_eq!(
        read(&mut peri, &mut engine, A, write, 0),
        Err(AttError::ReadNotPermitted)
    );
    assert_eq!(
        peri.handle_write(&mut engine, A, pad, &[1], 0),
        Err(AttError::WriteNotPermitted)
    );
    assert_eq!(
        peri.handle_write(&mut engine, A, name, b"x", 0),
        Err(AttError::WriteNotPermitted)
    );
    // Notify value is readable but has no value of its own.
    let notify = peri.pad_service().notify_handle().unwrap();
    assert_eq!(
        read(&mut peri, &mut engine, A, notify, 0),
        Err(AttError::AttributeNotFound)
    );
    // Declarations are never writable.
    assert_eq!(
        peri.handle_write(&mut engine, A, 1, &[0, 0], 0),
        Err(AttError::WriteNotPermitted)
    );
}

#[test]
fn unknown_handle_rejected() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    assert_eq!(
        read(&mut peri, &mut engine, A, 0, 0),
        Err(AttError::InvalidHandle)
    );
    assert_eq!(
        peri.handle_write(&mut engine, A, 0x0400, &[1], 0),
        Err(AttError::InvalidHandle)
    );
}

#[test]
fn writes_with_offset_rejected() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let write = handle(&peri, PAD_WRITE);
    assert_eq!(
        peri.handle_write(&mut engine, A, write, &[1], 2),
        Err(AttError::AttributeNotLong)
    );
}

#[test]
fn declarations_and_descriptions_are_served() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    assert_eq!(
        read(&mut peri, &mut engine, A, 1, 0).unwrap().as_slice(),
        &[0x00, 0xFF]
    );
    let pad = handle(&peri, PAD_READ);
    let [lo, hi] = pad.to_le_bytes();
    assert_eq!(
        read(&mut peri, &mut engine, A, pad - 1, 0).unwrap().as_slice(),
        &[0x02, lo, hi, 0x01, 0xFF]
    );
    assert_eq!(
        read(&mut peri, &mut engine, A, pad + 1, 0).unwrap().as_slice(),
        b"read from pad buffer"
    );
    assert_eq!(
        read(&mut peri, &mut engine, A, pad + 1, 5).unwrap().as_slice(),
        b"from pad buffer"
    );
}

#[test]
fn request_from_unknown_connection() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let pad = handle(&peri, PAD_READ);
    assert_eq!(
        read(&mut peri, &mut engine, ConnId(99), pad, 0),
        Err(AttError::InvalidPdu)
    );
    assert_eq!(peri.stats().invariant_violations, 1);
}

// ── Client configuration ─────────────────────────────────────

#[test]
fn client_config_validation() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let notify = peri.pad_service().notify_handle().unwrap();
    let ccc = peri.registry().client_config_handle(notify).unwrap();
    assert_eq!(
        peri.handle_write(&mut engine, A, ccc, &[1], 0),
        Err(AttError::InvalidValueLength)
    );
    assert_eq!(
        peri.handle_write(&mut engine, A, ccc, &[2, 0], 0),
        Err(AttError::InvalidValue)
    );
    peri.handle_write(&mut engine, A, ccc, &[1, 0], 0).unwrap();
    assert_eq!(read(&mut peri, &mut engine, A, ccc, 0).unwrap().as_slice(), &[1, 0]);
    assert_eq!(read(&mut peri, &mut engine, B, ccc, 0).unwrap().as_slice(), &[0, 0]);
    assert!(peri.registry().notifications_enabled(A, notify));
    assert!(!peri.registry().notifications_enabled(B, notify));
}

fn drop_and_reconnect(peri: &mut Peripheral, engine: &mut MockEngine, conn: ConnId) {
    let mut vm = CountingVm::default();
    post_and_run(
        peri,
        engine,
        &mut vm,
        EngineEvent::Terminated { conn, reason: 0x13 },
    );
    connect(peri, engine, &mut vm, conn);
}

#[test]
fn subscriptions_survive_disconnect_by_default() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let notify = peri.pad_service().notify_handle().unwrap();
    enable(&mut peri, &mut engine, A, notify);
    drop_and_reconnect(&mut peri, &mut engine, A);
    assert!(peri.registry().notifications_enabled(A, notify));
}

#[test]
fn subscriptions_cleared_on_disconnect_when_configured() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig {
        reset_notifications_on_disconnect: true,
        ..PeripheralConfig::default()
    });
    let notify = peri.pad_service().notify_handle().unwrap();
    enable(&mut peri, &mut engine, A, notify);
    enable(&mut peri, &mut engine, B, notify);
    drop_and_reconnect(&mut peri, &mut engine, A);
    assert!(!peri.registry().notifications_enabled(A, notify));
    assert!(peri.registry().notifications_enabled(B, notify));
}

#[test]
fn departed_subscribers_do_not_lock_out_new_peers() {
    let (mut peri, mut engine, mut vm) = make_peripheral(PeripheralConfig::default());
    let rnw = peri.console_service().rnw_handle().unwrap();
    let peers = [ConnId(1), ConnId(2), ConnId(3), ConnId(4)];
    for conn in peers {
        connect(&mut peri, &mut engine, &mut vm, conn);
        enable(&mut peri, &mut engine, conn, rnw);
    }
    for conn in peers {
        post_and_run(
            &mut peri,
            &mut engine,
            &mut vm,
            EngineEvent::Terminated { conn, reason: 0x13 },
        );
    }
    assert_eq!(peri.slots().count_used(), 0);

    let newcomer = ConnId(10);
    connect(&mut peri, &mut engine, &mut vm, newcomer);
    enable(&mut peri, &mut engine, newcomer, rnw);
    assert!(peri.registry().notifications_enabled(newcomer, rnw));
}

#[test]
fn live_subscribers_keep_their_entries() {
    let (mut peri, mut engine, mut vm) = make_peripheral(PeripheralConfig::default());
    let rnw = peri.console_service().rnw_handle().unwrap();
    let peers = [ConnId(1), ConnId(2), ConnId(3), ConnId(4)];
    for conn in peers {
        connect(&mut peri, &mut engine, &mut vm, conn);
        enable(&mut peri, &mut engine, conn, rnw);
    }
    post_and_run(
        &mut peri,
        &mut engine,
        &mut vm,
        EngineEvent::Terminated {
            conn: ConnId(3),
            reason: 0x13,
        },
    );
    connect(&mut peri, &mut engine, &mut vm, ConnId(7));
    enable(&mut peri, &mut engine, ConnId(7), rnw);
    for conn in [ConnId(1), ConnId(2), ConnId(4), ConnId(7)] {
        assert!(peri.registry().notifications_enabled(conn, rnw));
    }
    assert!(!peri.registry().notifications_enabled(ConnId(3), rnw));
}

// ── SysInfo ──────────────────────────────────────────────────

#[test]
fn sysinfo_values() {
    let (mut peri, mut engine, _) = setup(PeripheralConfig::default());
    let name = handle(&peri, CHIP_NAME);
    let uid = handle(&peri, CHIP_UID);
    let clock = handle(&peri, SYS_CLOCK);
    assert_eq!(
        read(&mut peri, &mut engine, A, name, 0).unwrap().as_slice(),
        b"CH582"
    );
    assert_eq!(
        read(&mut peri, &mut engine, A, uid, 0).unwrap().as_slice(),
        &[1, 2, 3, 4, 5, 6, 7, 8]
    );
    engine.clock = 0x0102_0304;
    assert_eq!(
        read(&mut peri, &mut engine, A, clock, 0).unwrap().as_slice(),
        &[4, 3, 2, 1]
    );
    assert_eq!(
        read(&mut peri, &mut engine, A, clock, 2),
        Err(AttError::AttributeNotLong)
    );
}

#[test]
fn sysclock_notified_on_periodic_tick() {
    let (mut peri, mut engine, mut vm) = setup(PeripheralConfig::default());
    let clock = peri.sysinfo_service().clock_handle().unwrap();
    enable(&mut peri, &mut engine, A, clock);
    post_and_run(
        &mut peri,
        &mut engine,
        &mut vm,
        EngineEvent::ParamsUpdated {
            conn: A,
            interval: 40,
            latency: 0,
            timeout: 100,
        },
    );
    engine.advance(60);
    peri.run_until_idle(&mut engine, &mut vm);
    assert_eq!(
        engine.notifications_on(clock),
        [(A, 60u32.to_le_bytes().to_vec())]
    );
    assert_eq!(
        engine.count(|c| matches!(c, EngineCall::Notify { conn, .. } if *conn == B)),
        0
    );
}
