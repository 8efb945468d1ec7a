//! Attribute server lifecycle against the simulated stack: bring-up,
//! connection tracking, advertising re-arm and publish fan-out.

use std::sync::Arc;

use envsense::adapters::sim_stack::{SimStack, StackCall};
use envsense::app::ports::{AttrHandle, ConnHandle, StackError};
use envsense::config::SystemConfig;
use envsense::error::Error;
use envsense::gatt::connections::{CONTROLLER_MAX_LINKS, MAX_CONNECTIONS};
use envsense::gatt::events::{IRQ_CENTRAL_CONNECT, IRQ_GATTS_INDICATE_DONE};
use envsense::gatt::server::{EnvironmentSample, EnvironmentServer, PublishMode, encode_value};
use envsense::gatt::service::Characteristic;

use super::mock_hw::boot;

const C1: ConnHandle = ConnHandle(1);
const C2: ConnHandle = ConnHandle(2);

fn both() -> PublishMode {
    PublishMode {
        notify: true,
        indicate: true,
    }
}

// ── Bring-up ──────────────────────────────────────────────────

#[test]
fn initialize_activates_registers_then_advertises() {
    let server = boot();
    let calls = server.stack().calls();

    assert_eq!(calls[0], StackCall::Activate(true));
    assert_eq!(calls[1], StackCall::RegisterService { uuid: 0x181A });
    assert!(matches!(
        &calls[2],
        StackCall::Advertise { interval_us: 500_000, payload } if payload.as_slice() == server.payload()
    ));
    assert_eq!(calls.len(), 3);

    assert!(server.stack().has_callback());
    assert!(server.is_advertising());
    assert!(server.connections().is_empty());
    assert_eq!(server.stats().adv_starts, 1);
}

#[test]
fn handles_are_distinct_and_stable() {
    let server = boot();
    let h = *server.handles();
    let all = [h.temperature, h.pressure, h.humidity, h.command];
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            assert_ne!(a, b);
        }
    }
    server.stack().connect(C1);
    server.stack().disconnect(C1);
    assert_eq!(*server.handles(), h);
}

#[test]
fn activation_failure_aborts_construction() {
    let stack = SimStack::new();
    stack.fail_activate(-1);
    let err = EnvironmentServer::initialize(stack, &SystemConfig::default()).err();
    assert_eq!(err, Some(Error::Stack(StackError::ActivationFailed(-1))));
}

#[test]
fn registration_failure_aborts_construction() {
    let stack = SimStack::new();
    stack.fail_register(-7);
    let err = EnvironmentServer::initialize(stack, &SystemConfig::default()).err();
    assert_eq!(err, Some(Error::Stack(StackError::RegistrationFailed(-7))));
}

#[test]
fn wrong_handle_count_aborts_construction() {
    let stack = SimStack::new();
    stack.short_registration();
    let err = EnvironmentServer::initialize(stack, &SystemConfig::default()).err();
    assert!(matches!(err, Some(Error::Init(_))));
}

#[test]
fn name_too_long_for_payload_aborts_construction() {
    let mut config = SystemConfig::default();
    config.device_name.clear();
    config.device_name.push_str("nineteen-characters").unwrap();
    let err = EnvironmentServer::initialize(SimStack::new(), &config).err();
    assert!(matches!(err, Some(Error::Advertising(_))));
}

#[test]
fn initial_advertise_failure_aborts_construction() {
    let stack = SimStack::new();
    stack.fail_advertise(Some(StackError::Platform(-2)));
    let err = EnvironmentServer::initialize(stack, &SystemConfig::default()).err();
    assert_eq!(err, Some(Error::Stack(StackError::Platform(-2))));
}

// ── Connection tracking ───────────────────────────────────────

#[test]
fn connect_is_idempotent() {
    let server = boot();
    server.stack().connect(C1);
    server.stack().connect(C1);
    assert_eq!(server.connections().as_slice(), &[C1]);
    assert!(server.is_connected(C1));
}

#[test]
fn disconnect_removes_and_rearms_advertising() {
    let server = boot();
    server.stack().connect(C1);
    assert!(server.stack().advertising().is_none());

    server.stack().disconnect(C1);
    assert!(!server.is_connected(C1));
    assert_eq!(server.stack().advertise_count(), 2);
    let (interval, payload) = server.stack().advertising().unwrap();
    assert_eq!(interval, 500_000);
    assert_eq!(payload.as_slice(), server.payload());
}

#[test]
fn disconnect_of_unknown_handle_still_rearms() {
    let server = boot();
    server.stack().connect(C1);
    server.stack().disconnect(ConnHandle(42));
    assert_eq!(server.connections().as_slice(), &[C1]);
    assert_eq!(server.stack().advertise_count(), 2);
    assert!(server.is_advertising());
}

#[test]
fn failed_rearm_clears_advertising_flag() {
    let server = boot();
    server.stack().connect(C1);
    server.stack().fail_advertise(Some(StackError::Timeout));
    server.stack().disconnect(C1);
    assert!(!server.is_advertising());

    server.stack().fail_advertise(None);
    server.advertise(250_000).unwrap();
    assert!(server.is_advertising());
    assert_eq!(server.stack().advertising().unwrap().0, 250_000);
}

#[test]
fn advertise_while_advertising_rearms_without_error() {
    let server = boot();
    server.advertise(500_000).unwrap();
    server.advertise(500_000).unwrap();
    assert!(server.is_advertising());
    assert_eq!(server.stats().adv_starts, 3);
}

#[test]
fn connection_table_is_bounded() {
    let server = boot();
    for h in 0..=MAX_CONNECTIONS as u16 {
        server.stack().connect(ConnHandle(h));
    }
    assert_eq!(server.connections().len(), MAX_CONNECTIONS);
    assert!(!server.is_connected(ConnHandle(MAX_CONNECTIONS as u16)));
}

#[test]
fn every_controller_link_is_notified() {
    let server = boot();
    for h in 0..CONTROLLER_MAX_LINKS as u16 {
        server.stack().connect(ConnHandle(h));
    }
    let report = server.publish(EnvironmentSample::new(1, 2, 3), PublishMode::NOTIFY);
    assert!(server.is_connected(ConnHandle(CONTROLLER_MAX_LINKS as u16 - 1)));
    assert_eq!(report.notified, 3 * CONTROLLER_MAX_LINKS as u32);
    assert_eq!(report.dropped, 0);
}

#[test]
fn raw_events_go_through_the_decoder() {
    let server = boot();
    server.stack().fire_raw(IRQ_CENTRAL_CONNECT, &[9, 0, 0]);
    assert!(server.is_connected(ConnHandle(9)));

    let attr = server.handles().temperature.0;
    server
        .stack()
        .fire_raw(IRQ_GATTS_INDICATE_DONE, &[9, attr, 0xFE]);
    assert_eq!(server.stats().indicate_acks, 1);

    // Unknown and malformed events are ignored.
    server.stack().fire_raw(99, &[1, 2, 3]);
    server.stack().fire_raw(IRQ_CENTRAL_CONNECT, &[]);
    assert_eq!(server.connections().as_slice(), &[ConnHandle(9)]);
}

// ── Publish ───────────────────────────────────────────────────

#[test]
fn silent_publish_updates_values_only() {
    let server = boot();
    server.stack().connect(C1);
    server.stack().clear_calls();

    let report = server.publish(EnvironmentSample::new(21, 101_325, 45), PublishMode::SILENT);

    assert!(server.stack().notify_calls().is_empty());
    assert!(server.stack().indicate_calls().is_empty());
    assert_eq!(report.notified + report.indicated, 0);
    assert_eq!(
        server.read_value(Characteristic::Pressure).unwrap().as_slice(),
        &encode_value(101_325)
    );
}

#[test]
fn notify_sends_three_per_connection() {
    let server = boot();
    for c in [C1, C2, ConnHandle(3)] {
        server.stack().connect(c);
    }
    let report = server.publish(EnvironmentSample::new(1, 2, 3), PublishMode::NOTIFY);
    assert_eq!(server.stack().notify_calls().len(), 9);
    assert!(server.stack().indicate_calls().is_empty());
    assert_eq!(report.notified, 9);
    assert_eq!(server.stats().notifications, 9);
}

#[test]
fn notify_then_indicate_in_characteristic_order_per_connection() {
    let server = boot();
    server.stack().connect(C1);
    server.stack().clear_calls();
    server.publish(EnvironmentSample::new(1, 2, 3), both());

    let h = *server.handles();
    let pushes: Vec<StackCall> = server
        .stack()
        .calls()
        .into_iter()
        .filter(|c| matches!(c, StackCall::Notify { .. } | StackCall::Indicate { .. }))
        .collect();
    let expected: Vec<StackCall> = [h.temperature, h.pressure, h.humidity]
        .into_iter()
        .map(|attr| StackCall::Notify { conn: C1, attr })
        .chain(
            [h.temperature, h.pressure, h.humidity]
                .into_iter()
                .map(|attr| StackCall::Indicate { conn: C1, attr }),
        )
        .collect();
    assert_eq!(pushes, expected);
}

#[test]
fn writes_happen_before_any_push() {
    let server = boot();
    server.stack().connect(C1);
    server.stack().clear_calls();
    server.publish(EnvironmentSample::new(7, 8, 9), PublishMode::NOTIFY);

    let calls = server.stack().calls();
    let first_push = calls
        .iter()
        .position(|c| matches!(c, StackCall::Notify { .. }))
        .unwrap();
    let writes = calls
        .iter()
        .filter(|c| matches!(c, StackCall::Write { .. }))
        .count();
    assert_eq!(writes, 3);
    assert_eq!(first_push, 3);
}

#[test]
fn publish_with_no_connections_is_a_noop_push() {
    let server = boot();
    let report = server.publish(EnvironmentSample::new(1, 1, 1), both());
    assert_eq!(report.notified + report.indicated + report.dropped, 0);
    assert_eq!(report.write_failures, 0);
}

#[test]
fn silently_dropped_link_is_counted_not_raised() {
    let server = boot();
    server.stack().connect(C1);
    server.stack().connect(C2);
    server.stack().drop_link(C2);

    let report = server.publish(EnvironmentSample::new(1, 2, 3), PublishMode::NOTIFY);
    assert_eq!(report.notified, 3);
    assert_eq!(report.dropped, 3);
    assert_eq!(server.stats().dropped, 3);
    // The server only forgets the link once the disconnect arrives.
    assert!(server.is_connected(C2));
}

#[test]
fn failed_write_does_not_stop_the_others() {
    let server = boot();
    server.stack().fail_writes(Some(StackError::Platform(-9)));
    let report = server.publish(EnvironmentSample::new(1, 2, 3), PublishMode::SILENT);
    assert_eq!(report.write_failures, 3);
    let writes = server
        .stack()
        .calls()
        .iter()
        .filter(|c| matches!(c, StackCall::Write { .. }))
        .count();
    assert_eq!(writes, 3);
}

#[test]
fn negative_values_round_trip() {
    let server = boot();
    server.publish(EnvironmentSample::new(-40, 0, -1), PublishMode::SILENT);
    let t = server.read_value(Characteristic::Temperature).unwrap();
    assert_eq!(i32::from_le_bytes(t.as_slice().try_into().unwrap()), -40);
    let h = server.read_value(Characteristic::Humidity).unwrap();
    assert_eq!(h.as_slice(), &[0xFF; 4]);
}

#[test]
fn events_from_another_thread_while_publishing() {
    let server = boot();
    let events = Arc::clone(&server);
    let t = std::thread::spawn(move || {
        for round in 0..200u16 {
            let c = ConnHandle(round % 4);
            events.stack().connect(c);
            events.stack().disconnect(c);
        }
    });
    for i in 0..200 {
        server.publish(EnvironmentSample::new(i, i, i), PublishMode::NOTIFY);
    }
    t.join().unwrap();
    assert!(server.connections().is_empty());
    assert_eq!(server.stack().advertise_count(), 201);
}

#[test]
fn peer_written_command_is_readable() {
    let server = boot();
    let cmd: AttrHandle = server.handles().command;
    server.stack().peer_write(cmd, b"blink").unwrap();
    assert_eq!(server.read_command().unwrap().as_slice(), b"blink");
    server.clear_command().unwrap();
    assert_eq!(server.read_command().unwrap().as_slice(), &[0, 0, 0, 0]);
}
